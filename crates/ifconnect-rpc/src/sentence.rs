//! Comma-separated telemetry sentences.
//!
//! The simulator can stream position and attitude to UDP port 49002 in the
//! format other aviation apps share: `<tag>,<value>,<value>,...`. The tag
//! selects a [`SentenceModel`] and the values map positionally onto its
//! fields. Field counts are not validated: extra values are dropped and
//! missing ones leave the field absent.

use std::collections::HashMap;

use ifconnect_types::TelemetryRecord;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::transport::latin1;

/// Well-known UDP port for the sentence feed
pub const TELEMETRY_PORT: u16 = 49002;

pub const GPS_TAG: &str = "XGPSInfinite Flight";
pub const ATTITUDE_TAG: &str = "XATTInfinite Flight";

/// How to decode one sentence tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceModel {
    pub name: String,
    pub fields: Vec<String>,
}

impl SentenceModel {
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// Tag-to-model table; read-only once handed to a listener.
#[derive(Debug, Clone)]
pub struct SentenceParser {
    models: HashMap<String, SentenceModel>,
}

impl Default for SentenceParser {
    fn default() -> Self {
        Self::empty()
            .with_model(
                GPS_TAG,
                SentenceModel::new("gps", ["lat", "lng", "alt", "hdg", "gs"]),
            )
            .with_model(
                ATTITUDE_TAG,
                SentenceModel::new("attitude", ["hdg", "pitch", "roll"]),
            )
    }
}

impl SentenceParser {
    /// Parser with the built-in `XGPS` and `XATT` models.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_model(mut self, tag: impl Into<String>, model: SentenceModel) -> Self {
        self.models.insert(tag.into(), model);
        self
    }

    #[must_use]
    pub fn model(&self, tag: &str) -> Option<&SentenceModel> {
        self.models.get(tag)
    }

    /// Decode one sentence; unknown tags yield `None`.
    #[must_use]
    pub fn parse(&self, sentence: &str) -> Option<TelemetryRecord> {
        let sentence = sentence.trim_end_matches(['\r', '\n', '\0']);
        let mut tokens = sentence.split(',');
        let tag = tokens.next()?;

        let Some(model) = self.models.get(tag) else {
            debug!("Ignoring sentence with unknown tag {:?}", tag);
            return None;
        };

        let fields = model
            .fields
            .iter()
            .zip(tokens)
            .map(|(field, value)| (field.clone(), value.trim().to_string()))
            .collect();

        Some(TelemetryRecord {
            name: model.name.clone(),
            fields,
        })
    }

    #[must_use]
    pub fn parse_bytes(&self, bytes: &[u8]) -> Option<TelemetryRecord> {
        self.parse(&latin1(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_sentence() {
        let parser = SentenceParser::new();
        let record = parser
            .parse("XGPSInfinite Flight,47.6,-122.3,120,270,95")
            .unwrap();

        assert_eq!(record.name, "gps");
        assert_eq!(record.fields.len(), 5);
        assert_eq!(record.get("lat"), Some("47.6"));
        assert_eq!(record.get("lng"), Some("-122.3"));
        assert_eq!(record.get("alt"), Some("120"));
        assert_eq!(record.get("hdg"), Some("270"));
        assert_eq!(record.get("gs"), Some("95"));
    }

    #[test]
    fn test_attitude_sentence() {
        let parser = SentenceParser::new();
        let record = parser.parse("XATTInfinite Flight,182.4,2.1,-0.5\r\n").unwrap();

        assert_eq!(record.name, "attitude");
        assert_eq!(record.get("roll"), Some("-0.5"));
    }

    #[test]
    fn test_extra_tokens_dropped() {
        let parser = SentenceParser::new();
        let record = parser
            .parse("XATTInfinite Flight,1,2,3,4,5,6")
            .unwrap();
        assert_eq!(record.fields.len(), 3);
    }

    #[test]
    fn test_missing_tokens_absent() {
        let parser = SentenceParser::new();
        let record = parser.parse("XGPSInfinite Flight,47.6,-122.3").unwrap();
        assert_eq!(record.fields.len(), 2);
        assert!(record.get("alt").is_none());
    }

    #[test]
    fn test_unknown_tag_ignored() {
        let parser = SentenceParser::new();
        assert!(parser.parse("XTRAFFICOther Sim,1,2,3").is_none());
        assert!(parser.parse("").is_none());
    }

    #[test]
    fn test_custom_model() {
        let parser =
            SentenceParser::empty().with_model("XWIND", SentenceModel::new("wind", ["dir", "kt"]));
        let record = parser.parse_bytes(b"XWIND,270,15").unwrap();
        assert_eq!(record.name, "wind");
        assert_eq!(record.get("kt"), Some("15"));
        assert!(parser.model(GPS_TAG).is_none());
    }
}
