use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// JSON object carried by step inputs, outputs, errors and run metadata.
pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Llm,
    Tool,
    Span,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Tool => "tool",
            Self::Span => "span",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "llm" => Some(Self::Llm),
            "tool" => Some(Self::Tool),
            "span" => Some(Self::Span),
            _ => None,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded agent execution session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub name: String,
    #[serde(with = "timestamp")]
    pub started_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "payload_or_empty")]
    pub meta: Payload,
}

/// One immutable event within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub run_id: String,
    pub idx: i64,
    pub kind: StepKind,
    pub name: String,
    #[serde(with = "timestamp")]
    pub ts: DateTime<Utc>,
    #[serde(default, deserialize_with = "payload_or_empty")]
    pub input: Payload,
    #[serde(default, deserialize_with = "payload_or_empty")]
    pub output: Payload,
    #[serde(default)]
    pub error: Option<Payload>,
}

/// Step fields supplied by a writer; the store assigns `id` and owns `run_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStep {
    pub idx: i64,
    pub kind: StepKind,
    pub name: String,
    pub ts: DateTime<Utc>,
    pub input: Payload,
    pub output: Payload,
    pub error: Option<Payload>,
}

impl From<&Step> for NewStep {
    fn from(step: &Step) -> Self {
        Self {
            idx: step.idx,
            kind: step.kind,
            name: step.name.clone(),
            ts: step.ts,
            input: step.input.clone(),
            output: step.output.clone(),
            error: step.error.clone(),
        }
    }
}

/// Fixed textual encoding: RFC 3339, microseconds, explicit `+00:00` offset.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Accepts any RFC 3339 offset (including `Z`) and naive timestamps, which are read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let raw = raw.trim();
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|ts| ts.and_utc()),
    }
}

fn payload_or_empty<'de, D>(deserializer: D) -> Result<Payload, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Payload>::deserialize(deserializer)?.unwrap_or_default())
}

pub mod timestamp {
    use super::{format_timestamp, parse_timestamp};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::super::{format_timestamp, parse_timestamp};
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_str(&format_timestamp(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) if !raw.trim().is_empty() => parse_timestamp(&raw)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                _ => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{format_timestamp, parse_timestamp, Run, Step, StepKind};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn timestamps_use_explicit_utc_offset() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("valid date");
        assert_eq!(format_timestamp(&ts), "2026-01-02T03:04:05.000000+00:00");
    }

    #[test]
    fn parse_accepts_z_offsets_and_naive_forms() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("valid date");
        assert_eq!(parse_timestamp("2026-01-02T03:04:05Z").expect("z"), expected);
        assert_eq!(parse_timestamp("2026-01-02T05:04:05+02:00").expect("offset"), expected);
        assert_eq!(parse_timestamp("2026-01-02T03:04:05").expect("naive"), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn step_kind_round_trips_through_text() {
        for kind in [StepKind::Llm, StepKind::Tool, StepKind::Span] {
            assert_eq!(StepKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(StepKind::parse("agent"), None);
    }

    #[test]
    fn step_deserialization_fills_missing_payloads() {
        let step: Step = serde_json::from_value(json!({
            "idx": 3,
            "kind": "tool",
            "name": "search",
            "ts": "2026-01-02T03:04:05Z",
            "input": null
        }))
        .expect("parse step");
        assert!(step.input.is_empty());
        assert!(step.output.is_empty());
        assert_eq!(step.error, None);
        assert_eq!(step.id, "");
    }

    #[test]
    fn open_run_serializes_null_end_time() {
        let run = Run {
            id: "r1".to_string(),
            name: "demo".to_string(),
            started_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("valid date"),
            ended_at: None,
            meta: serde_json::Map::new(),
        };
        let value = serde_json::to_value(&run).expect("serialize run");
        assert_eq!(value["ended_at"], serde_json::Value::Null);
        assert_eq!(value["started_at"], "2026-01-02T03:04:05.000000+00:00");
    }
}
