use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    /// The only role rule there is: the literal username "admin" is an
    /// admin, everyone else is a user.
    pub fn for_username(username: &str) -> Self {
        if username.eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::User
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: Role,
}

/// Metadata for one stored file, as the API reports it.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: String,
    pub key: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub checksum: String,
    #[serde(default, deserialize_with = "normalize_tags")]
    pub tags: Vec<String>,
    pub created_at_utc: DateTime<Utc>,
    /// None means the file is active; Some means it was soft-deleted.
    #[serde(default)]
    pub deleted_at_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: Option<i64>,
    pub created_by_user_id: String,
}

impl StoredFile {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at_utc.is_some()
    }

    /// Inline preview is only offered for images and PDFs.
    pub fn previewable(&self) -> bool {
        self.content_type.starts_with("image/") || self.content_type.contains("pdf")
    }
}

/// The creation response returned by a finished upload.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub id: String,
    pub key: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub checksum: String,
    #[serde(default, deserialize_with = "normalize_tags")]
    pub tags: Vec<String>,
    pub created_at_utc: DateTime<Utc>,
    #[serde(default)]
    pub version: Option<i64>,
}

/// The API has returned three shapes for `tags` over time: an array, a
/// bare string, and null. All of them decode to a plain Vec.
fn normalize_tags<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tags {
        Many(Vec<String>),
        One(String),
    }

    Ok(match Option::<Tags>::deserialize(de)? {
        Some(Tags::Many(tags)) => tags,
        Some(Tags::One(tag)) if !tag.is_empty() => vec![tag],
        _ => Vec::new(),
    })
}

const SIZE_UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let exp = ((64 - bytes.leading_zeros() - 1) / 10).min(SIZE_UNITS.len() as u32 - 1);
    let value = bytes as f64 / (1u64 << (10 * exp)) as f64;
    format!("{value:.2} {}", SIZE_UNITS[exp as usize])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn stored_file(tags: serde_json::Value) -> serde_json::Value {
        json!({
            "id": "f-1",
            "key": "2024/05/f-1",
            "originalName": "report.pdf",
            "sizeBytes": 2048,
            "contentType": "application/pdf",
            "checksum": "cafe",
            "tags": tags,
            "createdAtUtc": "2024-05-01T10:00:00Z",
            "deletedAtUtc": null,
            "version": 1,
            "createdByUserId": "user-1"
        })
    }

    #[test]
    fn tags_normalization() {
        let tests = [
            (json!(null), Vec::<String>::new()),
            (json!("a"), vec!["a".to_string()]),
            (json!(""), Vec::new()),
            (json!(["a", "b"]), vec!["a".to_string(), "b".to_string()]),
        ];
        for (input, expected) in tests {
            let file: StoredFile = serde_json::from_value(stored_file(input)).unwrap();
            assert_eq!(file.tags, expected);
        }
    }

    #[test]
    fn missing_tags_decode_as_empty() {
        let mut value = stored_file(json!(null));
        value.as_object_mut().unwrap().remove("tags");
        let file: StoredFile = serde_json::from_value(value).unwrap();
        assert!(file.tags.is_empty());
    }

    #[test]
    fn deleted_flag_follows_timestamp() {
        let active: StoredFile = serde_json::from_value(stored_file(json!(null))).unwrap();
        assert!(!active.is_deleted());

        let mut value = stored_file(json!(null));
        value["deletedAtUtc"] = json!("2024-06-01T00:00:00Z");
        let deleted: StoredFile = serde_json::from_value(value).unwrap();
        assert!(deleted.is_deleted());
    }

    #[test]
    fn role_from_username() {
        assert_eq!(Role::for_username("admin"), Role::Admin);
        assert_eq!(Role::for_username("ADMIN"), Role::Admin);
        assert_eq!(Role::for_username("alice"), Role::User);
    }

    #[test]
    fn previewable_content_types() {
        let mut file: StoredFile = serde_json::from_value(stored_file(json!(null))).unwrap();
        assert!(file.previewable());
        file.content_type = "image/png".to_string();
        assert!(file.previewable());
        file.content_type = "application/zip".to_string();
        assert!(!file.previewable());
    }

    #[test]
    fn size_formatting() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KiB");
        assert_eq!(format_size(200 * 1024 * 1024), "200.00 MiB");
    }
}
