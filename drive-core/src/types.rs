use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// MIME type Google Drive uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Prefix shared by all Google-native (non-binary) document types
pub const GOOGLE_APPS_PREFIX: &str = "application/vnd.google-apps.";

/// API key used to read publicly shared Drive content.
///
/// The key never shows up in `Debug` output so it cannot leak into logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Format a Google-native document is exported to on download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    pub mime_type: &'static str,
    pub extension: &'static str,
}

/// A child of a remote folder, as seen by any provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    pub modified_time: Option<DateTime<Utc>>,
    /// Provider-side content checksum (md5 on Drive), absent for native docs
    pub content_hash: Option<String>,
}

impl RemoteEntry {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn is_google_native(&self) -> bool {
        self.mime_type.starts_with(GOOGLE_APPS_PREFIX)
    }

    /// Export target for Google-native documents that can be downloaded
    pub fn export_format(&self) -> Option<ExportFormat> {
        export_format_for(&self.mime_type)
    }

    /// Whether the bytes of this entry can be fetched at all. Forms, sites,
    /// maps and shortcuts have no binary representation.
    pub fn is_downloadable(&self) -> bool {
        !self.is_folder() && (!self.is_google_native() || self.export_format().is_some())
    }

    /// File name used on disk, with the export extension appended for
    /// Google-native documents.
    pub fn local_name(&self) -> String {
        match self.export_format() {
            Some(format) if !self.name.ends_with(&format!(".{}", format.extension)) => {
                format!("{}.{}", self.name, format.extension)
            }
            _ => self.name.clone(),
        }
    }
}

pub fn export_format_for(mime_type: &str) -> Option<ExportFormat> {
    match mime_type {
        "application/vnd.google-apps.document" | "application/vnd.google-apps.presentation" => {
            Some(ExportFormat {
                mime_type: "application/pdf",
                extension: "pdf",
            })
        }
        "application/vnd.google-apps.spreadsheet" => Some(ExportFormat {
            mime_type: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            extension: "xlsx",
        }),
        "application/vnd.google-apps.drawing" => Some(ExportFormat {
            mime_type: "image/png",
            extension: "png",
        }),
        _ => None,
    }
}

/// File resource as returned by the Drive v3 API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Drive encodes int64 values as strings
    pub size: Option<String>,
    pub modified_time: Option<DateTime<Utc>>,
    pub md5_checksum: Option<String>,
}

impl From<DriveFile> for RemoteEntry {
    fn from(file: DriveFile) -> Self {
        RemoteEntry {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            size: file.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            modified_time: file.modified_time,
            content_hash: file.md5_checksum,
        }
    }
}

/// Page of a `files.list` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesListResponse {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    pub next_page_token: Option<String>,
}

/// Query parameters for `files.list` and `files.get`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_all_drives: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_items_from_all_drives: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl DriveQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn q(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    pub fn fields(mut self, fields: impl Into<String>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn page_token(mut self, token: Option<String>) -> Self {
        self.page_token = token;
        self
    }

    pub fn alt_media(mut self) -> Self {
        self.alt = Some("media".to_string());
        self
    }

    pub fn export_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn all_drives(mut self) -> Self {
        self.supports_all_drives = Some(true);
        self
    }

    pub fn list_all_drives(mut self) -> Self {
        self.supports_all_drives = Some(true);
        self.include_items_from_all_drives = Some(true);
        self
    }

    pub fn key(mut self, key: Option<&ApiKey>) -> Self {
        self.key = key.map(|k| k.as_str().to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, mime_type: &str) -> RemoteEntry {
        RemoteEntry {
            id: "1AbCdEfGhIjK".to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size: 0,
            modified_time: None,
            content_hash: None,
        }
    }

    #[test]
    fn test_drive_file_conversion() {
        let json = r#"{
            "id": "1xYz_abcdefg",
            "name": "syllabus.pdf",
            "mimeType": "application/pdf",
            "size": "20480",
            "modifiedTime": "2024-03-01T10:15:00.000Z",
            "md5Checksum": "9e107d9d372bb6826bd81d3542a419d6"
        }"#;

        let file: DriveFile = serde_json::from_str(json).unwrap();
        let entry = RemoteEntry::from(file);

        assert_eq!(entry.size, 20480);
        assert_eq!(entry.content_hash.as_deref(), Some("9e107d9d372bb6826bd81d3542a419d6"));
        assert!(entry.modified_time.is_some());
        assert!(entry.is_downloadable());
        assert_eq!(entry.local_name(), "syllabus.pdf");
    }

    #[test]
    fn test_google_native_documents() {
        let doc = entry("Lecture notes", "application/vnd.google-apps.document");
        assert!(doc.is_downloadable());
        assert_eq!(doc.local_name(), "Lecture notes.pdf");

        let sheet = entry("Grades", "application/vnd.google-apps.spreadsheet");
        assert_eq!(sheet.local_name(), "Grades.xlsx");

        let form = entry("Quiz", "application/vnd.google-apps.form");
        assert!(!form.is_downloadable());

        let folder = entry("Week 1", FOLDER_MIME_TYPE);
        assert!(folder.is_folder());
        assert!(!folder.is_downloadable());
    }

    #[test]
    fn test_query_serialization() {
        let key = ApiKey::new("secret");
        let query = DriveQuery::new()
            .q("'abc' in parents")
            .page_size(100)
            .list_all_drives()
            .key(Some(&key));

        let encoded = serde_urlencoded::to_string(&query).unwrap();
        assert!(encoded.contains("pageSize=100"));
        assert!(encoded.contains("includeItemsFromAllDrives=true"));
        assert!(encoded.contains("key=secret"));
        assert!(!encoded.contains("pageToken"));
    }

    #[test]
    fn test_api_key_is_redacted() {
        let key = ApiKey::new("AIzaSySecretValue");
        assert_eq!(format!("{:?}", key), "ApiKey(***)");
    }
}
