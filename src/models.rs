use std::fmt;

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::files::FileService;

#[derive(Clone)]
pub struct AppState {
    pub files: FileService,
    pub pool: SqlitePool,
    pub config: Config,
}

/// Identifier shared by a blob and its metadata record.
///
/// 128 bits from the OS random source, rendered as 32 lowercase hex
/// characters. Only values of that exact shape parse, so an id is always
/// safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub const BYTES: usize = 16;

    pub fn generate() -> Self {
        let mut bytes = [0u8; Self::BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let well_formed = raw.len() == Self::BYTES * 2
            && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        well_formed.then(|| Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata row describing one uploaded file. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub id: FileId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub size: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

// API Request/Response types

/// Returned by a successful upload: the stored record plus its signed link.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    #[serde(flatten)]
    pub record: FileRecord,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub database: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_parse() {
        let id = FileId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert_eq!(FileId::parse(id.as_str()), Some(id));
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| FileId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        assert!(FileId::parse("").is_none());
        assert!(FileId::parse("../../etc/passwd").is_none());
        assert!(FileId::parse("0123456789ABCDEF0123456789abcdef").is_none());
        assert!(FileId::parse("0123456789abcdef0123456789abcde").is_none());
        assert!(FileId::parse("0123456789abcdef0123456789abcdef0").is_none());
        assert!(FileId::parse("0123456789abcdef0123456789abcdef").is_some());
    }

    #[test]
    fn test_record_serialization_omits_missing_tag() {
        let now = Utc::now();
        let record = FileRecord {
            id: FileId::generate(),
            name: "notes.txt".to_string(),
            tag: None,
            size: 5,
            mime_type: "text/plain".to_string(),
            created_at: now,
            expires_at: now,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("tag").is_none());
        assert_eq!(json["mime_type"], "text/plain");
        assert_eq!(json["id"], record.id.as_str());
    }

    #[test]
    fn test_expiry_is_strict() {
        let now = Utc::now();
        let record = FileRecord {
            id: FileId::generate(),
            name: "a".to_string(),
            tag: None,
            size: 0,
            mime_type: "text/plain".to_string(),
            created_at: now,
            expires_at: now,
        };

        assert!(!record.is_expired_at(now));
        assert!(record.is_expired_at(now + chrono::Duration::microseconds(1)));
    }
}
