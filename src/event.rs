//! GELF event representation and JSON encoding.
//!
//! [`BaseEvent`] models the GELF 1.1 message: the mandatory `version`,
//! `host` and `short_message` fields, the optional `full_message`,
//! `timestamp` and `level`, and any number of additional fields which are
//! written with a leading underscore. Anything implementing [`GelfEvent`] can
//! be passed to [`GelfTransport::send_event`](crate::GelfTransport::send_event).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer, ser::SerializeMap};
use thiserror::Error;

use crate::level::GelfLevel;

/// GELF protocol version written into every event.
pub const GELF_VERSION: &str = "1.1";

/// Errors raised while turning an event into a payload.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to encode event as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid additional field name {0:?}")]
    InvalidFieldName(String),
}

/// Anything that can be encoded into a GELF payload.
pub trait GelfEvent {
    /// Encode the event into the bytes handed to the transport.
    fn encode(&self) -> Result<Vec<u8>, EncodeError>;
}

/// A GELF 1.1 message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BaseEvent {
    pub version: String,
    pub host: String,
    pub short_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<GelfLevel>,
    #[serde(flatten)]
    additional: AdditionalFields,
}

impl BaseEvent {
    /// Create an event for `host` carrying `short_message`.
    pub fn new(host: impl Into<String>, short_message: impl Into<String>) -> Self {
        Self {
            version: GELF_VERSION.to_owned(),
            host: host.into(),
            short_message: short_message.into(),
            full_message: None,
            timestamp: None,
            level: None,
            additional: AdditionalFields::default(),
        }
    }

    pub fn with_full_message(mut self, full_message: impl Into<String>) -> Self {
        self.full_message = Some(full_message.into());
        self
    }

    pub fn with_level(mut self, level: GelfLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Stamp the event with `at`, expressed as fractional UNIX seconds.
    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at.timestamp_micros() as f64 / 1_000_000.0);
        self
    }

    /// Stamp the event with the current time.
    pub fn stamped_now(self) -> Self {
        self.with_timestamp(Utc::now())
    }

    /// Attach an additional field. `name` is given without the leading
    /// underscore; it is validated when the event is encoded.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.additional.0.insert(name.into(), value.into());
        self
    }

    /// Additional fields keyed by their unprefixed names.
    pub fn fields(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.additional.0
    }
}

impl GelfEvent for BaseEvent {
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        if let Some(bad) = self.additional.0.keys().find(|k| !is_valid_field_name(k)) {
            return Err(EncodeError::InvalidFieldName(bad.clone()));
        }
        Ok(serde_json::to_vec(self)?)
    }
}

impl GelfEvent for serde_json::Value {
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Collectors reserve `_id`; other names are limited to word characters,
/// dots and dashes.
fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty()
        && name != "id"
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[derive(Clone, Debug, Default, PartialEq)]
struct AdditionalFields(BTreeMap<String, serde_json::Value>);

impl Serialize for AdditionalFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(&format!("_{name}"), value)?;
        }
        map.end()
    }
}
