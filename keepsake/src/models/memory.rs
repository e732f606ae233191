//! The memory record and its input shapes.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{KeepsakeError, Result};

pub const MIN_INTENSITY: u8 = 1;
pub const MAX_INTENSITY: u8 = 4;

/// One dated journal entry, the sole persisted entity.
///
/// `id` is assigned by the backend at creation time and is stable for the
/// record's lifetime. Same-date entries are tie-broken by `id` ascending,
/// which is creation order for timestamp-derived ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: String,
    #[serde(with = "date_only")]
    pub date: NaiveDate,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_entry: Option<String>,
    /// Significance rating, 1..=4.
    pub intensity: u8,
    /// Storage path of the normalized photo, never raw bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_style: Option<FrameStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_effect: Option<PhotoEffect>,
}

/// Request body for `POST /memories` (a record minus its `id`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMemory {
    #[serde(with = "date_only")]
    pub date: NaiveDate,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_entry: Option<String>,
    pub intensity: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_style: Option<FrameStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_effect: Option<PhotoEffect>,
}

/// Presentational frame tag, passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStyle {
    Polaroid,
    Vintage,
    Modern,
    Classic,
}

/// Presentational overlay tag, passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoEffect {
    Snow,
    Christmas,
    Sparkles,
    None,
}

/// Creation input, validated before any I/O.
#[derive(Debug, Clone, Validate)]
pub struct MemoryDraft {
    pub date: NaiveDate,
    #[validate(custom(function = "validate_not_blank"))]
    pub description: String,
    pub journal_entry: Option<String>,
    #[validate(range(
        min = MIN_INTENSITY,
        max = MAX_INTENSITY,
        message = "intensity must be between 1 and 4"
    ))]
    pub intensity: u8,
    pub photo: Option<PhotoInput>,
    pub frame_style: Option<FrameStyle>,
    pub photo_effect: Option<PhotoEffect>,
}

impl MemoryDraft {
    pub fn new(date: NaiveDate, description: impl Into<String>, intensity: u8) -> Self {
        Self {
            date,
            description: description.into(),
            journal_entry: None,
            intensity,
            photo: None,
            frame_style: None,
            photo_effect: None,
        }
    }
}

/// Whole-record replacement input for edits. The target `id` travels as the
/// edit argument, not inside the patch.
#[derive(Debug, Clone, Validate)]
pub struct MemoryPatch {
    pub date: NaiveDate,
    #[validate(custom(function = "validate_not_blank"))]
    pub description: String,
    pub journal_entry: Option<String>,
    #[validate(range(
        min = MIN_INTENSITY,
        max = MAX_INTENSITY,
        message = "intensity must be between 1 and 4"
    ))]
    pub intensity: u8,
    pub photo: Option<PhotoInput>,
    pub frame_style: Option<FrameStyle>,
    pub photo_effect: Option<PhotoEffect>,
}

impl MemoryPatch {
    /// Pre-fill a patch from an existing record, carrying its photo forward
    /// as an already-normalized reference.
    pub fn from_record(record: &Memory) -> Self {
        Self {
            date: record.date,
            description: record.description.clone(),
            journal_entry: record.journal_entry.clone(),
            intensity: record.intensity,
            photo: record.photo.clone().map(PhotoInput::Reference),
            frame_style: record.frame_style,
            photo_effect: record.photo_effect,
        }
    }
}

/// A photo attachment as supplied by the caller.
///
/// `Bytes` and `DataUrl` are unprocessed captures that must run through the
/// normalization pipeline; `Reference` is a storage path from an earlier
/// upload and is embedded as-is.
#[derive(Debug, Clone)]
pub enum PhotoInput {
    Bytes(Vec<u8>),
    DataUrl(String),
    Reference(String),
}

impl PhotoInput {
    pub fn is_normalized(&self) -> bool {
        matches!(self, PhotoInput::Reference(_))
    }

    /// Raw capture bytes for the pipeline. `Reference` inputs have no bytes.
    pub(crate) fn raw_bytes(&self) -> Result<Vec<u8>> {
        match self {
            PhotoInput::Bytes(bytes) => Ok(bytes.clone()),
            PhotoInput::DataUrl(url) => decode_data_url(url),
            PhotoInput::Reference(path) => Err(KeepsakeError::Decode(format!(
                "'{path}' is a stored reference, not capture bytes"
            ))),
        }
    }
}

fn validate_not_blank(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut error = ValidationError::new("blank");
        error.message = Some("must not be blank".into());
        return Err(error);
    }
    Ok(())
}

/// Decode a `data:<mime>;base64,<payload>` URL into its raw bytes.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| KeepsakeError::Decode("not a data URL".to_string()))?;
    let (head, payload) = rest
        .split_once(',')
        .ok_or_else(|| KeepsakeError::Decode("data URL has no payload".to_string()))?;
    if !head.ends_with(";base64") {
        return Err(KeepsakeError::Decode(
            "data URL is not base64-encoded".to_string(),
        ));
    }
    STANDARD
        .decode(payload)
        .map_err(|e| KeepsakeError::Decode(format!("Failed to decode base64 payload: {e}")))
}

mod date_only {
    use chrono::NaiveDate;
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    /// Accepts a bare date or a full datetime string; time-of-day is ignored.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        let day = value.split('T').next().unwrap_or(&value);
        NaiveDate::parse_from_str(day, FORMAT).map_err(serde::de::Error::custom)
    }
}
