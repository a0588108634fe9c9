//! Content values exchanged with the store.

use crate::error::{Field, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::path::PathBuf;
use uuid::Uuid;

/// Separator used when a tag set is stored as one column.
pub const TAG_DELIMITER: char = ',';

/// Distinct tags in first-seen order.
///
/// Tags may not be empty or contain [`TAG_DELIMITER`], since the stored form
/// is a plain delimiter-joined string with no escaping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TagSet(Vec<String>);

impl TagSet {
    pub fn new<I, S>(tags: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.into();
            if tag.is_empty() || tag.contains(TAG_DELIMITER) {
                return Err(StoreError::InvalidField(Field::Tags));
            }
            if !set.contains(&tag) {
                set.push(tag);
            }
        }
        Ok(Self(set))
    }

    /// Parse the stored column form.
    pub fn from_stored(stored: &str) -> Self {
        let mut set: Vec<String> = Vec::new();
        for tag in stored.split(TAG_DELIMITER).filter(|t| !t.is_empty()) {
            if !set.iter().any(|t| t == tag) {
                set.push(tag.to_string());
            }
        }
        Self(set)
    }

    /// Stored column form.
    pub fn join(&self) -> String {
        self.0.join(TAG_DELIMITER.to_string().as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

/// Input for creating new content.
#[derive(Debug, Clone)]
pub struct Source {
    pub bytes: Vec<u8>,
    pub data: serde_json::Value,
    pub name: String,
    pub tags: TagSet,
    pub time: DateTime<Utc>,
}

/// Input for updating content. Absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct PartialSource {
    pub bytes: Option<Vec<u8>>,
    pub data: Option<serde_json::Value>,
    pub name: Option<String>,
    pub tags: Option<TagSet>,
    pub time: Option<DateTime<Utc>>,
}

impl PartialSource {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_none()
            && self.data.is_none()
            && self.name.is_none()
            && self.tags.is_none()
            && self.time.is_none()
    }
}

/// A stored item with its primary blob loaded.
#[derive(Debug, Clone)]
pub struct Content {
    pub uuid: Uuid,
    pub data: serde_json::Value,
    pub extension: String,
    pub mime: String,
    pub name: String,
    pub size: u64,
    pub tags: TagSet,
    pub time: DateTime<Utc>,
    pub bytes: Vec<u8>,
    /// Primary blob location
    pub path: PathBuf,
}

/// Read projection of [`Content`] returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub data: serde_json::Value,
    pub extension: String,
    pub mime: String,
    pub name: String,
    pub size: u64,
    pub tags: Vec<String>,
    /// Epoch milliseconds
    pub time: i64,
    pub uuid: Uuid,
}

impl From<&Content> for Summary {
    fn from(content: &Content) -> Self {
        Self {
            data: content.data.clone(),
            extension: content.extension.clone(),
            mime: content.mime.clone(),
            name: content.name.clone(),
            size: content.size,
            tags: content.tags.clone().into_vec(),
            time: content.time.timestamp_millis(),
            uuid: content.uuid,
        }
    }
}

/// Summaries built from the stored type columns, without the blob.
impl TryFrom<&ContentRow> for Summary {
    type Error = StoreError;

    fn try_from(row: &ContentRow) -> StoreResult<Self> {
        Ok(Self {
            data: row.data()?,
            extension: row.extension.clone(),
            mime: row.mime.clone(),
            name: row.name.clone(),
            size: row.size(),
            tags: TagSet::from_stored(&row.tags).into_vec(),
            time: row.time,
            uuid: row.uuid()?,
        })
    }
}

/// Catalog row count and aggregate blob size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    pub length: u64,
    pub size: u64,
}

/// One row of the `Contents` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ContentRow {
    #[sqlx(rename = "ContentId")]
    pub content_id: String,
    #[sqlx(rename = "Data")]
    pub data: String,
    #[sqlx(rename = "Extension")]
    pub extension: String,
    #[sqlx(rename = "Mime")]
    pub mime: String,
    #[sqlx(rename = "Name")]
    pub name: String,
    #[sqlx(rename = "Size")]
    pub size: i64,
    #[sqlx(rename = "Tags")]
    pub tags: String,
    #[sqlx(rename = "Time")]
    pub time: i64,
}

impl ContentRow {
    pub fn uuid(&self) -> StoreResult<Uuid> {
        Uuid::parse_str(&self.content_id)
            .map_err(|e| StoreError::Corrupt(format!("content id {}: {e}", self.content_id)))
    }

    pub fn data(&self) -> StoreResult<serde_json::Value> {
        serde_json::from_str(&self.data)
            .map_err(|e| StoreError::Corrupt(format!("data of {}: {e}", self.content_id)))
    }

    pub fn time(&self) -> StoreResult<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.time)
            .ok_or_else(|| StoreError::Corrupt(format!("time of {}: {}", self.content_id, self.time)))
    }

    pub fn size(&self) -> u64 {
        u64::try_from(self.size).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_set_dedupes_in_order() {
        let tags = TagSet::new(["pet", "cute", "pet"]).unwrap();
        assert_eq!(tags.join(), "pet,cute");
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("cute"));
    }

    #[test]
    fn test_tag_set_rejects_delimiter_and_empty() {
        assert!(matches!(
            TagSet::new(["a,b"]),
            Err(StoreError::InvalidField(Field::Tags))
        ));
        assert!(TagSet::new([""]).is_err());
    }

    #[test]
    fn test_tag_set_from_stored() {
        assert!(TagSet::from_stored("").is_empty());
        assert_eq!(TagSet::from_stored("a,b").into_vec(), vec!["a", "b"]);
    }

    #[test]
    fn test_summary_projection() {
        let time = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap();
        let content = Content {
            uuid: Uuid::now_v7(),
            data: json!({"caption": "hi"}),
            extension: "png".to_string(),
            mime: "image/png".to_string(),
            name: "cat".to_string(),
            size: 3,
            tags: TagSet::new(["pet"]).unwrap(),
            time,
            bytes: vec![1, 2, 3],
            path: PathBuf::from("blobs/x"),
        };

        let summary = Summary::from(&content);
        assert_eq!(summary.time, 1_700_000_000_000);
        assert_eq!(summary.tags, vec!["pet"]);

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["mime"], "image/png");
        assert_eq!(value["uuid"], content.uuid.to_string());
        assert!(value.get("bytes").is_none());
    }

    #[test]
    fn test_partial_source_is_empty() {
        assert!(PartialSource::default().is_empty());
        let partial = PartialSource {
            name: Some("dog".to_string()),
            ..Default::default()
        };
        assert!(!partial.is_empty());
    }
}
