//! Event model and validation.
//!
//! Mirrors `capture::event`'s split between a raw wire-format struct and a
//! validated, normalized struct the rest of the pipeline operates on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ValidationError;

const MAX_FIELD_LEN: usize = 255;

/// An event as received over the wire, before validation or defaulting.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RawEvent {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// A validated, normalized event: every field present, defaults applied.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Event {
    pub topic: String,
    pub event_id: String,
    pub timestamp: String,
    pub source: String,
    pub payload: Value,
}

impl RawEvent {
    /// Validate and normalize a raw event. Applies defaults for `event_id`,
    /// `timestamp`, and `payload` when absent, per spec.md §4.A.
    pub fn validate(self) -> Result<Event, ValidationError> {
        let topic = non_empty_bounded(self.topic, "topic")?;
        let source = non_empty_bounded(self.source, "source")?;

        let event_id = self
            .event_id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let timestamp = self.timestamp.filter(|s| !s.is_empty()).unwrap_or_else(|| {
            OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .expect("RFC3339 formatting of OffsetDateTime::now_utc() cannot fail")
        });

        let payload = self.payload.unwrap_or_else(|| Value::Object(Map::new()));

        Ok(Event {
            topic,
            event_id,
            timestamp,
            source,
            payload,
        })
    }
}

fn non_empty_bounded(
    value: Option<String>,
    field: &'static str,
) -> Result<String, ValidationError> {
    match value {
        None => Err(ValidationError::Missing(field)),
        Some(s) if s.is_empty() => Err(ValidationError::Missing(field)),
        Some(s) if s.chars().count() > MAX_FIELD_LEN => Err(ValidationError::TooLong {
            field,
            max: MAX_FIELD_LEN,
        }),
        Some(s) => Ok(s),
    }
}

/// The `{"events": Event | [Event]}` admission request body (spec.md §4.A),
/// normalized to a `Vec<RawEvent>` regardless of the shape the publisher
/// sent.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub events: EventsField,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EventsField {
    // `Many` must be tried first: serde's derived struct deserializer also
    // accepts a JSON array positionally, so an empty (or short) array would
    // otherwise be absorbed by `One(RawEvent)` with defaulted fields instead
    // of landing here as an empty batch.
    Many(Vec<RawEvent>),
    One(RawEvent),
}

impl PublishRequest {
    pub fn into_events(self) -> Vec<RawEvent> {
        match self.events {
            EventsField::One(event) => vec![event],
            EventsField::Many(events) => events,
        }
    }
}

/// The row shape returned from `GET /events`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EventRecord {
    pub topic: String,
    pub event_id: String,
    pub timestamp: String,
    pub source: String,
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub processed_at: OffsetDateTime,
}
