//! Record shapes stored by the consolidation engine.
//!
//! - Live samples and archive tombstones carry [`SampleMetadata`].
//! - Coverage entries hold a JSON array of [`UberSample`] plus [`CoverageMetadata`].
//!
//! ## History Decoding
//!
//! Coverage history written by older releases used a different per-record shape.
//! Stored records are decoded through an explicit set of recognised shapes:
//!
//! | Shape | Recognised by | Decoded as |
//! |-------|---------------|------------|
//! | current | `heard` present | read as-is |
//! | legacy | `heard` absent, `path` present | one observation, migrated |
//!
//! Anything else is rejected. `time` fields are accepted as integers, floats or numeric
//! text and always come out as whole seconds.

use std::collections::BTreeSet;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use coverage_core::error::{Error, Result};

/// Metadata stored with every live sample.
///
/// `time` is decoded leniently (integer, float or numeric text) and truncated to whole
/// seconds. The value exactly as stored is kept in `stored_time` so the archive
/// tombstone can copy it unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SampleMetadata {
    /// Observation time in seconds since the Unix epoch.
    #[serde(deserialize_with = "deserialize_time")]
    pub time: i64,
    /// Repeaters that relayed the observation. Empty means it was not heard.
    #[serde(default, deserialize_with = "deserialize_path")]
    pub path: Vec<String>,
    /// `time` as it appeared in the stored metadata.
    #[serde(skip)]
    pub stored_time: Option<Value>,
}

impl SampleMetadata {
    /// Decodes sample metadata from a stored JSON blob.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the metadata is missing or malformed.
    pub fn from_value(metadata: Option<&Value>) -> Result<Self> {
        let value = metadata.ok_or_else(|| Error::serialization("sample has no metadata"))?;
        let mut decoded = Self::deserialize(value)
            .map_err(|e| Error::serialization(format!("invalid sample metadata: {e}")))?;
        decoded.stored_time = value.get("time").cloned();
        Ok(decoded)
    }
}

/// A live sample that is old enough to be consolidated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleDescriptor {
    /// Sample key in the live sample store.
    pub key: String,
    /// Observation time in seconds since the Unix epoch.
    pub time: i64,
    /// Repeaters that relayed the observation.
    pub path: Vec<String>,
    /// `time` as stored on the live sample. `None` archives `time` itself.
    pub stored_time: Option<Value>,
}

impl SampleDescriptor {
    /// Creates a descriptor from a key and its decoded metadata.
    #[must_use]
    pub fn new(key: impl Into<String>, metadata: SampleMetadata) -> Self {
        Self {
            key: key.into(),
            time: metadata.time,
            path: metadata.path,
            stored_time: metadata.stored_time,
        }
    }

    /// Returns true if at least one repeater relayed the sample.
    #[must_use]
    pub fn is_heard(&self) -> bool {
        !self.path.is_empty()
    }

    /// Returns the `{time, path}` metadata written onto the sample's archive tombstone.
    #[must_use]
    pub fn tombstone_metadata(&self) -> Value {
        let time = self
            .stored_time
            .clone()
            .unwrap_or_else(|| Value::from(self.time));
        serde_json::json!({ "time": time, "path": self.path })
    }
}

/// Aggregate of one consolidation batch for a single location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UberSample {
    /// Latest observation time among contributing samples.
    pub time: i64,
    /// Number of contributing samples heard by at least one repeater.
    pub heard: u64,
    /// Number of contributing samples heard by no repeater.
    pub lost: u64,
    /// Latest time among heard samples, 0 if none were heard.
    pub last_heard: i64,
    /// Distinct repeaters seen in this batch, first-seen order, case as received.
    pub repeaters: Vec<String>,
}

/// Statistics stored as metadata on a coverage entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageMetadata {
    /// Sum of `heard` across retained history.
    #[serde(default, deserialize_with = "deserialize_or_default")]
    pub heard: u64,
    /// Sum of `lost` across retained history.
    #[serde(default, deserialize_with = "deserialize_or_default")]
    pub lost: u64,
    /// Max `last_heard` across retained history.
    #[serde(default, deserialize_with = "deserialize_optional_time")]
    pub last_heard: i64,
    /// Watermark: the latest sample time consolidated into this entry.
    #[serde(default, deserialize_with = "deserialize_optional_time")]
    pub updated: i64,
    /// Every repeater ever observed for this entry, lower-cased. Never pruned.
    #[serde(default, deserialize_with = "deserialize_or_default")]
    pub hit_repeaters: BTreeSet<String>,
}

impl CoverageMetadata {
    /// Decodes coverage metadata, defaulting every field when absent.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the metadata is present but malformed.
    pub fn from_value(metadata: Option<&Value>) -> Result<Self> {
        match metadata {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value) => Self::deserialize(value)
                .map_err(|e| Error::serialization(format!("invalid coverage metadata: {e}"))),
        }
    }

    /// Encodes the metadata as a JSON value.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if encoding fails.
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| Error::serialization(format!("failed to encode coverage metadata: {e}")))
    }
}

/// Which stored shape a history record was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    /// Aggregated record with heard/lost counters.
    Current,
    /// Single-observation record with a `path` and no counters.
    Legacy,
}

#[derive(Debug)]
enum StoredRecord {
    Current(CurrentRecord),
    Legacy(LegacyRecord),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentRecord {
    #[serde(deserialize_with = "deserialize_time")]
    time: i64,
    heard: u64,
    #[serde(default, deserialize_with = "deserialize_or_default")]
    lost: u64,
    #[serde(default, deserialize_with = "deserialize_optional_time")]
    last_heard: i64,
    #[serde(default, deserialize_with = "deserialize_path")]
    repeaters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyRecord {
    #[serde(deserialize_with = "deserialize_time")]
    time: i64,
    #[serde(deserialize_with = "deserialize_path")]
    path: Vec<String>,
}

impl StoredRecord {
    /// A `heard` key (whatever its value) selects the current shape. Only its absence
    /// marks a legacy record.
    fn from_value(record: Value) -> std::result::Result<Self, serde_json::Error> {
        if record.get("heard").is_some() {
            serde_json::from_value(record).map(Self::Current)
        } else {
            serde_json::from_value(record).map(Self::Legacy)
        }
    }

    fn into_uber_sample(self) -> (UberSample, RecordShape) {
        match self {
            Self::Current(r) => (
                UberSample {
                    time: r.time,
                    heard: r.heard,
                    lost: r.lost,
                    last_heard: r.last_heard,
                    repeaters: r.repeaters,
                },
                RecordShape::Current,
            ),
            Self::Legacy(r) => {
                let heard = !r.path.is_empty();
                (
                    UberSample {
                        time: r.time,
                        heard: u64::from(heard),
                        lost: u64::from(!heard),
                        last_heard: if heard { r.time } else { 0 },
                        repeaters: r.path,
                    },
                    RecordShape::Legacy,
                )
            }
        }
    }
}

/// Coverage history decoded into the current record shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedHistory {
    /// Records in stored order.
    pub records: Vec<UberSample>,
    /// How many records were migrated from the legacy shape.
    pub migrated: usize,
}

/// Decodes a stored coverage history, migrating legacy records.
///
/// An empty (or whitespace-only) value decodes as an empty history.
///
/// # Errors
///
/// Returns `Error::Serialization` if the value is not a JSON array or any record
/// matches none of the recognised shapes.
pub fn decode_history(value: &[u8]) -> Result<DecodedHistory> {
    if value.iter().all(u8::is_ascii_whitespace) {
        return Ok(DecodedHistory::default());
    }

    let raw: Vec<Value> = serde_json::from_slice(value)
        .map_err(|e| Error::serialization(format!("coverage history is not an array: {e}")))?;

    let mut history = DecodedHistory {
        records: Vec::with_capacity(raw.len() + 1),
        migrated: 0,
    };
    for (index, record) in raw.into_iter().enumerate() {
        let stored = StoredRecord::from_value(record).map_err(|e| {
            Error::serialization(format!("unrecognised coverage record at index {index}: {e}"))
        })?;
        let (sample, shape) = stored.into_uber_sample();
        if shape == RecordShape::Legacy {
            history.migrated += 1;
        }
        history.records.push(sample);
    }

    Ok(history)
}

/// Encodes coverage history as the stored JSON array.
///
/// # Errors
///
/// Returns `Error::Serialization` if encoding fails.
pub fn encode_history(records: &[UberSample]) -> Result<Bytes> {
    serde_json::to_vec(records)
        .map(Bytes::from)
        .map_err(|e| Error::serialization(format!("failed to encode coverage history: {e}")))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTime {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawTime {
    #[allow(clippy::cast_possible_truncation)]
    fn into_seconds(self) -> std::result::Result<i64, String> {
        match self {
            Self::Int(v) => Ok(v),
            Self::Float(v) if v.is_finite() => Ok(v.trunc() as i64),
            Self::Float(v) => Err(format!("time `{v}` is not finite")),
            Self::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Ok(0);
                }
                if let Ok(v) = trimmed.parse::<i64>() {
                    return Ok(v);
                }
                match trimmed.parse::<f64>() {
                    Ok(v) if v.is_finite() => Ok(v.trunc() as i64),
                    _ => Err(format!("time `{s}` is not numeric")),
                }
            }
        }
    }
}

fn deserialize_time<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    RawTime::deserialize(deserializer)?
        .into_seconds()
        .map_err(serde::de::Error::custom)
}

fn deserialize_optional_time<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawTime>::deserialize(deserializer)? {
        Some(raw) => raw.into_seconds().map_err(serde::de::Error::custom),
        None => Ok(0),
    }
}

fn deserialize_or_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_path<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_current_record_decodes_unchanged() {
        let raw = json!([
            {"time": 200, "heard": 1, "lost": 1, "lastHeard": 100, "repeaters": ["A"]}
        ]);
        let history = decode_history(raw.to_string().as_bytes()).unwrap();

        assert_eq!(history.migrated, 0);
        assert_eq!(
            history.records,
            vec![UberSample {
                time: 200,
                heard: 1,
                lost: 1,
                last_heard: 100,
                repeaters: vec!["A".into()],
            }]
        );
    }

    #[test]
    fn test_legacy_heard_record_is_migrated() {
        let raw = json!([{"time": "150", "path": ["Ab", "cd"]}]);
        let history = decode_history(raw.to_string().as_bytes()).unwrap();

        assert_eq!(history.migrated, 1);
        assert_eq!(
            history.records[0],
            UberSample {
                time: 150,
                heard: 1,
                lost: 0,
                last_heard: 150,
                repeaters: vec!["Ab".into(), "cd".into()],
            }
        );
    }

    #[test]
    fn test_legacy_lost_record_is_migrated() {
        let raw = json!([{"time": 90, "path": []}]);
        let history = decode_history(raw.to_string().as_bytes()).unwrap();

        assert_eq!(
            history.records[0],
            UberSample {
                time: 90,
                heard: 0,
                lost: 1,
                last_heard: 0,
                repeaters: vec![],
            }
        );
    }

    #[test]
    fn test_textual_time_on_current_record_is_coerced() {
        let raw = json!([
            {"time": "300", "heard": 2, "lost": 0, "lastHeard": 300, "repeaters": []}
        ]);
        let history = decode_history(raw.to_string().as_bytes()).unwrap();
        assert_eq!(history.records[0].time, 300);
        assert_eq!(history.migrated, 0);
    }

    #[test]
    fn test_record_with_neither_counters_nor_path_is_rejected() {
        let raw = json!([{"time": 10}]);
        let err = decode_history(raw.to_string().as_bytes()).unwrap_err();
        assert!(err.to_string().contains("index 0"), "{err}");
    }

    #[test]
    fn test_record_with_mistyped_heard_is_not_migrated() {
        let raw = json!([{"time": 10, "heard": "2", "path": ["A"]}]);
        let err = decode_history(raw.to_string().as_bytes()).unwrap_err();
        assert!(err.to_string().contains("index 0"), "{err}");
    }

    #[test]
    fn test_non_numeric_time_is_rejected() {
        let raw = json!([{"time": "yesterday", "path": []}]);
        assert!(decode_history(raw.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_empty_value_is_empty_history() {
        assert_eq!(decode_history(b"").unwrap(), DecodedHistory::default());
        assert_eq!(decode_history(b"  ").unwrap(), DecodedHistory::default());
    }

    #[test]
    fn test_encoded_history_uses_camel_case() {
        let bytes = encode_history(&[UberSample {
            time: 5,
            heard: 1,
            lost: 0,
            last_heard: 5,
            repeaters: vec!["R1".into()],
        }])
        .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!([{"time": 5, "heard": 1, "lost": 0, "lastHeard": 5, "repeaters": ["R1"]}])
        );
    }

    #[test]
    fn test_coverage_metadata_defaults_when_absent() {
        assert_eq!(
            CoverageMetadata::from_value(None).unwrap(),
            CoverageMetadata::default()
        );
        let partial = json!({"updated": 200});
        let meta = CoverageMetadata::from_value(Some(&partial)).unwrap();
        assert_eq!(meta.updated, 200);
        assert!(meta.hit_repeaters.is_empty());
    }

    #[test]
    fn test_coverage_metadata_treats_null_as_absent() {
        let stored = json!({
            "heard": null,
            "lost": 2,
            "lastHeard": null,
            "updated": null,
            "hitRepeaters": null
        });
        let meta = CoverageMetadata::from_value(Some(&stored)).unwrap();
        assert_eq!(
            meta,
            CoverageMetadata {
                lost: 2,
                ..CoverageMetadata::default()
            }
        );
    }

    #[test]
    fn test_coverage_metadata_wire_names() {
        let meta = CoverageMetadata {
            heard: 1,
            lost: 1,
            last_heard: 100,
            updated: 200,
            hit_repeaters: BTreeSet::from(["a".to_string()]),
        };
        assert_eq!(
            meta.to_value().unwrap(),
            json!({"heard": 1, "lost": 1, "lastHeard": 100, "updated": 200, "hitRepeaters": ["a"]})
        );
    }

    #[test]
    fn test_sample_metadata_tolerates_null_path() {
        let value = json!({"time": 100, "path": null, "snr": 7.5});
        let meta = SampleMetadata::from_value(Some(&value)).unwrap();
        assert_eq!(meta.time, 100);
        assert!(meta.path.is_empty());
    }

    #[test]
    fn test_tombstone_copies_stored_time_verbatim() {
        let value = json!({"time": 1234.5, "path": ["A"]});
        let metadata = SampleMetadata::from_value(Some(&value)).unwrap();
        let sample = SampleDescriptor::new("abc123-1", metadata);

        assert_eq!(sample.time, 1234);
        assert_eq!(sample.tombstone_metadata(), value);

        let text = json!({"time": "150", "path": null});
        let metadata = SampleMetadata::from_value(Some(&text)).unwrap();
        let sample = SampleDescriptor::new("abc123-2", metadata);
        assert_eq!(sample.tombstone_metadata(), json!({"time": "150", "path": []}));
    }

    #[test]
    fn test_tombstone_without_stored_time_uses_seconds() {
        let sample = SampleDescriptor {
            key: "abc123-3".into(),
            time: 99,
            path: vec![],
            stored_time: None,
        };
        assert_eq!(sample.tombstone_metadata(), json!({"time": 99, "path": []}));
    }

    #[test]
    fn test_sample_metadata_requires_time() {
        let value = json!({"path": ["A"]});
        assert!(SampleMetadata::from_value(Some(&value)).is_err());
        assert!(SampleMetadata::from_value(None).is_err());
    }
}
