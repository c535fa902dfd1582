use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use scanstream::pipeline::Pipeline;
use scanstream::point::Record;
use scanstream::sink::checkpoint::MemoryCheckpointStore;
use scanstream::sink::{
    BufferedBatchSink, RejectedRecord, StoreWriter, WriteError, WriteRequest,
};

const NOW_MS: i64 = 1_700_000_000_000;

/// Captures every submitted batch and replays scripted outcomes.
#[derive(Clone, Default)]
struct ScriptedStore {
    batches: Arc<Mutex<Vec<Vec<Record>>>>,
    outcomes: Arc<Mutex<Vec<Result<(), WriteError>>>>,
}

impl ScriptedStore {
    fn push_outcome(&self, outcome: Result<(), WriteError>) {
        self.outcomes.lock().expect("lock").push(outcome);
    }

    fn batches(&self) -> Vec<Vec<Record>> {
        self.batches.lock().expect("lock").clone()
    }
}

impl StoreWriter for ScriptedStore {
    async fn write(&self, request: WriteRequest<'_>) -> Result<(), WriteError> {
        self.batches
            .lock()
            .expect("lock")
            .push(request.records.to_vec());

        let mut outcomes = self.outcomes.lock().expect("lock");
        if outcomes.is_empty() {
            Ok(())
        } else {
            outcomes.remove(0)
        }
    }
}

fn pipeline(store: &ScriptedStore, batch_size: usize) -> Pipeline<ScriptedStore> {
    Pipeline::new(BufferedBatchSink::new(
        store.clone(),
        "analytics",
        "scans",
        batch_size,
    ))
}

fn dimension<'a>(record: &'a Record, name: &str) -> Option<&'a str> {
    record
        .dimensions
        .iter()
        .find(|d| d.name == name)
        .map(|d| d.value.as_str())
}

fn generic_event(seq: usize) -> String {
    format!(r#"{{"hits_measure":"{seq}","host":"edge-{seq}"}}"#)
}

#[tokio::test]
async fn test_mrf_scan_reaches_the_store_as_one_record() {
    let store = ScriptedStore::default();
    let mut pipeline = pipeline(&store, 1);

    pipeline
        .handle_event_at(
            r#"{"data_type":"mrf_scans","mrf_id":"M1","gtin":"G1","count":"5"}"#,
            NOW_MS,
            Instant::now(),
        )
        .await;

    let batches = store.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);

    let record = &batches[0][0];
    assert_eq!(record.measure_name, "count_measure");
    assert_eq!(record.measure_value, "5");
    assert_eq!(record.measure_value_type, "VARCHAR");
    assert_eq!(record.time, NOW_MS.to_string());
    assert_eq!(record.time_unit, "MILLISECONDS");
    assert_eq!(dimension(record, "mrf_id"), Some("M1"));
    assert_eq!(dimension(record, "gtin"), Some("G1"));
    assert_eq!(dimension(record, "data_type"), Some("mrf_scans"));
    assert_eq!(record.dimensions.len(), 3);
}

#[tokio::test]
async fn test_undiscriminated_event_expands_each_measure() {
    let store = ScriptedStore::default();
    let mut pipeline = pipeline(&store, 2);

    pipeline
        .handle_event_at(
            r#"{"opens_measure":"4","closes_measure":"2","host":"edge-1"}"#,
            NOW_MS,
            Instant::now(),
        )
        .await;

    let batches = store.batches();
    assert_eq!(batches.len(), 1);

    let mut records = batches[0].clone();
    assert_eq!(records.len(), 2);
    records.sort_by(|a, b| a.measure_name.cmp(&b.measure_name));

    assert_eq!(records[0].measure_name, "closes_measure");
    assert_eq!(records[0].measure_value, "2");
    assert_eq!(records[1].measure_name, "opens_measure");
    assert_eq!(records[1].measure_value, "4");

    // Both points share the base dimensions and time.
    for record in &records {
        assert_eq!(dimension(record, "host"), Some("edge-1"));
        assert_eq!(record.time, NOW_MS.to_string());
    }
}

#[tokio::test]
async fn test_batch_size_triggers_one_fifo_flush() {
    let store = ScriptedStore::default();
    let mut pipeline = pipeline(&store, 3);
    let start = Instant::now();

    for seq in 0..3 {
        pipeline
            .handle_event_at(&generic_event(seq), NOW_MS, start)
            .await;
    }

    let batches = store.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);

    let order: Vec<&str> = batches[0]
        .iter()
        .map(|r| r.measure_value.as_str())
        .collect();
    assert_eq!(order, vec!["0", "1", "2"]);
    assert_eq!(pipeline.buffered(), 0);
}

#[tokio::test]
async fn test_flush_interval_drains_partial_buffer() {
    let store = ScriptedStore::default();
    let mut pipeline = pipeline(&store, 75);
    let start = Instant::now();

    for seq in 0..3 {
        pipeline
            .handle_event_at(&generic_event(seq), NOW_MS, start)
            .await;
    }
    assert!(store.batches().is_empty());

    // 60+ seconds later the next event flushes everything buffered.
    pipeline
        .handle_event_at(&generic_event(3), NOW_MS, start + Duration::from_secs(61))
        .await;

    let batches = store.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 4);
    assert_eq!(pipeline.buffered(), 0);
}

#[tokio::test]
async fn test_rejected_records_are_logged_out_and_dropped() {
    let store = ScriptedStore::default();
    store.push_outcome(Err(WriteError::Rejected(vec![
        RejectedRecord {
            index: 3,
            reason: "measure value too long".to_string(),
        },
        RejectedRecord {
            index: 7,
            reason: "timestamp out of range".to_string(),
        },
    ])));

    let mut pipeline = pipeline(&store, 10);
    let start = Instant::now();

    for seq in 0..10 {
        pipeline
            .handle_event_at(&generic_event(seq), NOW_MS, start)
            .await;
    }

    // All ten were submitted once and none were re-enqueued.
    assert_eq!(store.batches().len(), 1);
    assert_eq!(store.batches()[0].len(), 10);
    assert_eq!(pipeline.buffered(), 0);

    // The pipeline keeps delivering afterwards.
    for seq in 10..20 {
        pipeline
            .handle_event_at(&generic_event(seq), NOW_MS, start)
            .await;
    }
    assert_eq!(store.batches().len(), 2);
    assert_eq!(store.batches()[1][0].measure_value, "10");
}

#[tokio::test]
async fn test_malformed_and_handler_failing_events_do_not_stall() {
    let store = ScriptedStore::default();
    let mut pipeline = pipeline(&store, 2);
    let start = Instant::now();

    // Not flat JSON: dropped.
    pipeline.handle_event_at("{broken", NOW_MS, start).await;
    // Recognized schema missing a required field: generic fallback, and
    // the fallback finds one measure.
    pipeline
        .handle_event_at(
            r#"{"data_type":"label_scan_ping","hits_measure":"1"}"#,
            NOW_MS,
            start,
        )
        .await;
    // Well-formed event completes the batch.
    pipeline
        .handle_event_at(&generic_event(2), NOW_MS, start)
        .await;

    let batches = store.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(
        dimension(&batches[0][0], "data_type"),
        Some("label_scan_ping")
    );
}

#[tokio::test]
async fn test_snapshot_restore_carries_pending_records_across_restart() {
    let store = ScriptedStore::default();
    let mut first = pipeline(&store, 75);
    let start = Instant::now();

    for seq in 0..5 {
        first
            .handle_event_at(&generic_event(seq), NOW_MS, start)
            .await;
    }
    assert_eq!(first.buffered(), 5);

    let mut checkpoint = MemoryCheckpointStore::default();
    first.snapshot(&mut checkpoint).expect("snapshot");
    drop(first);

    // "Restart": a fresh pipeline restores the mirror and delivers it.
    let restarted_store = ScriptedStore::default();
    let mut second = pipeline(&restarted_store, 75);
    second.restore(&mut checkpoint).expect("restore");
    assert_eq!(second.buffered(), 5);

    second.flush_remaining().await;
    let batches = restarted_store.batches();
    assert_eq!(batches.len(), 1);

    let order: Vec<&str> = batches[0]
        .iter()
        .map(|r| r.measure_value.as_str())
        .collect();
    assert_eq!(order, vec!["0", "1", "2", "3", "4"]);
}

#[tokio::test]
async fn test_future_dated_label_scan_is_clamped_end_to_end() {
    let store = ScriptedStore::default();
    let mut pipeline = pipeline(&store, 1);
    let received_at = NOW_MS + 20 * 60_000;

    pipeline
        .handle_event_at(
            &format!(
                concat!(
                    r#"{{"data_type":"label_scan","request_id":"r-1","received_at":"{}","#,
                    r#""city":"Leeds","country":"GB","ip":"10.0.0.1","latitude":"53.8","#,
                    r#""longitude":"-1.5","postal_code":"LS1","time_zone":"Europe/London","#,
                    r#""is_ios":"true"}}"#,
                ),
                received_at
            ),
            NOW_MS,
            Instant::now(),
        )
        .await;

    let batches = store.batches();
    let record = &batches[0][0];
    assert_eq!(record.time, NOW_MS.to_string());
    assert_eq!(record.time_unit, "MILLISECONDS");
    assert_eq!(dimension(record, "phone_os"), Some("ios"));
}
