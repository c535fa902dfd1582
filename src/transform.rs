//! Maps raw JSON telemetry events to time-series points.
//!
//! Each event is a flat string-to-string JSON object with an optional
//! `data_type` discriminator. Recognized discriminators dispatch to a
//! schema-specific handler; anything else, including a handler that fails
//! on a malformed event, goes through the generic mapping so no event is
//! ever fatal to the pipeline.

use std::collections::HashMap;

use chrono::Utc;
use thiserror::Error;
use tracing::warn;

use crate::point::{Point, TimeUnit};

/// The event payload is not a flat JSON string map.
///
/// Recoverable: callers log the event and move on.
#[derive(Debug, Error)]
#[error("event is not a flat JSON string map: {0}")]
pub struct ParseError(#[from] serde_json::Error);

/// A schema handler could not map the event it matched.
#[derive(Debug, Error)]
enum HandlerError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

/// Closed set of event schemas keyed by the `data_type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    MrfScans,
    LabelScan,
    LabelScanPing,
    LabelScanNavigator,
    /// Absent or unrecognized discriminator; field-driven mapping.
    Generic,
}

impl SchemaKind {
    /// Resolves the discriminator field to a schema kind.
    pub fn from_discriminator(value: Option<&str>) -> Self {
        match value {
            Some("mrf_scans") => Self::MrfScans,
            Some("label_scan") => Self::LabelScan,
            Some("label_scan_ping") => Self::LabelScanPing,
            Some("label_scan_navigator") => Self::LabelScanNavigator,
            _ => Self::Generic,
        }
    }

    /// Returns the discriminator/log label for this schema.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MrfScans => "mrf_scans",
            Self::LabelScan => "label_scan",
            Self::LabelScanPing => "label_scan_ping",
            Self::LabelScanNavigator => "label_scan_navigator",
            Self::Generic => "generic",
        }
    }
}

/// Shared base of one mapped event before measure expansion.
struct MappedEvent {
    dimensions: HashMap<String, String>,
    time: i64,
    time_unit: TimeUnit,
    measures: Vec<(String, String)>,
}

impl MappedEvent {
    fn new(time: i64) -> Self {
        Self {
            dimensions: HashMap::new(),
            time,
            time_unit: TimeUnit::Milliseconds,
            measures: Vec::new(),
        }
    }

    fn dimension(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.dimensions.insert(name.into(), value.into());
    }

    fn measure(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.measures.push((name.into(), value.into()));
    }

    /// Expands every measure against the shared dimensions and time.
    fn into_points(self) -> Vec<Point> {
        let Self {
            dimensions,
            time,
            time_unit,
            measures,
        } = self;

        measures
            .into_iter()
            .map(|(name, value)| Point::new(dimensions.clone(), time, time_unit, name, value))
            .collect()
    }
}

/// Maps one raw event to points using the current wall clock.
pub fn transform(raw: &str) -> Result<Vec<Point>, ParseError> {
    transform_at(raw, Utc::now().timestamp_millis())
}

/// Maps one raw event to points, with the wall clock supplied as epoch
/// milliseconds. Deterministic; `transform` is the production wrapper.
pub fn transform_at(raw: &str, now_ms: i64) -> Result<Vec<Point>, ParseError> {
    let fields: HashMap<String, String> = serde_json::from_str(raw)?;

    let kind = SchemaKind::from_discriminator(fields.get("data_type").map(String::as_str));
    let mapped = match kind {
        SchemaKind::Generic => map_generic(&fields, now_ms),
        _ => match map_schema(kind, &fields, now_ms) {
            Ok(mapped) => mapped,
            Err(err) => {
                warn!(
                    schema = kind.as_str(),
                    error = %err,
                    "schema handler failed, falling back to generic mapping",
                );
                map_generic(&fields, now_ms)
            }
        },
    };

    Ok(mapped.into_points())
}

fn map_schema(
    kind: SchemaKind,
    fields: &HashMap<String, String>,
    now_ms: i64,
) -> Result<MappedEvent, HandlerError> {
    match kind {
        SchemaKind::MrfScans => map_mrf_scans(fields, now_ms),
        SchemaKind::LabelScan => map_label_scan(fields, now_ms),
        SchemaKind::LabelScanPing => map_label_scan_ping(fields, now_ms),
        SchemaKind::LabelScanNavigator => map_label_scan_navigator(fields, now_ms),
        SchemaKind::Generic => Ok(map_generic(fields, now_ms)),
    }
}

fn require<'a>(
    fields: &'a HashMap<String, String>,
    key: &'static str,
) -> Result<&'a str, HandlerError> {
    fields
        .get(key)
        .map(String::as_str)
        .ok_or(HandlerError::MissingField(key))
}

/// Event time for label-scan schemas: `received_at` when present and
/// parseable, otherwise the wall clock.
fn event_time(fields: &HashMap<String, String>, now_ms: i64) -> i64 {
    fields
        .get("received_at")
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(now_ms)
}

fn map_mrf_scans(
    fields: &HashMap<String, String>,
    now_ms: i64,
) -> Result<MappedEvent, HandlerError> {
    let count = require(fields, "count")?;
    let mrf_id = require(fields, "mrf_id")?;
    let gtin = require(fields, "gtin")?;

    let mut event = MappedEvent::new(now_ms);
    event.measure("count_measure", count);
    event.dimension("mrf_id", mrf_id);
    event.dimension("gtin", gtin);
    event.dimension("data_type", "mrf_scans");
    Ok(event)
}

fn map_label_scan(
    fields: &HashMap<String, String>,
    now_ms: i64,
) -> Result<MappedEvent, HandlerError> {
    let request_id = require(fields, "request_id")?;
    let is_ios = require(fields, "is_ios")?;

    let mut event = MappedEvent::new(event_time(fields, now_ms));
    event.measure("label_measure", request_id);

    for key in [
        "city",
        "country",
        "ip",
        "latitude",
        "longitude",
        "postal_code",
        "time_zone",
    ] {
        event.dimension(key, require(fields, key)?);
    }

    // A fresh scan by definition has spent no time away from the page.
    event.dimension("time_spent_away", "0");
    event.dimension("data_type", "label_scan");
    event.dimension("phone_os", if is_ios == "true" { "ios" } else { "android" });
    Ok(event)
}

fn map_label_scan_ping(
    fields: &HashMap<String, String>,
    now_ms: i64,
) -> Result<MappedEvent, HandlerError> {
    let request_id = require(fields, "request_id")?;
    let time_spent_away = require(fields, "time_spent_away")?;

    let mut event = MappedEvent::new(event_time(fields, now_ms));
    event.measure("label_measure", request_id);
    event.dimension("time_spent_away", time_spent_away);
    event.dimension("data_type", "label_scan_ping");
    Ok(event)
}

/// Browser attributes the navigator schema forwards when the client
/// supplied them.
const NAVIGATOR_OPTIONAL_FIELDS: &[&str] = &[
    "gtin",
    "hardware_concurrency",
    "languages",
    "max_touch_points",
    "phone_current_language",
    "screen_size",
    "time_spent_away",
    "user_agent",
    "campaign_id",
    "landing_page_id",
    "product_group_id",
];

fn map_label_scan_navigator(
    fields: &HashMap<String, String>,
    now_ms: i64,
) -> Result<MappedEvent, HandlerError> {
    let request_id = require(fields, "request_id")?;

    let mut event = MappedEvent::new(event_time(fields, now_ms));
    event.measure("label_measure", request_id);
    event.dimension("data_type", "label_scan_navigator");

    for &key in NAVIGATOR_OPTIONAL_FIELDS {
        if let Some(value) = fields.get(key) {
            if !value.is_empty() {
                event.dimension(key, value);
            }
        }
    }

    Ok(event)
}

/// Field-driven fallback mapping.
///
/// Keys ending `_measure` (case-insensitive) each become an independent
/// measure; `time` and `timeunit` set the shared timestamp; every other
/// field becomes a dimension.
fn map_generic(fields: &HashMap<String, String>, now_ms: i64) -> MappedEvent {
    let mut event = MappedEvent::new(now_ms);

    for (key, value) in fields {
        let lower = key.to_lowercase();

        if lower.ends_with("_measure") {
            event.measure(key.clone(), value.clone());
            continue;
        }

        match lower.as_str() {
            "time" => match value.parse::<i64>() {
                Ok(time) => event.time = time,
                Err(_) => {
                    warn!(value = %value, "unparseable time field, keeping processing time");
                }
            },
            "timeunit" => event.time_unit = TimeUnit::parse_or_default(value),
            _ => event.dimension(key.clone(), value.clone()),
        }
    }

    event
}
