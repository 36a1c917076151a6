//! Extraction and validation of Drive folder identifiers
//!
//! Callers paste either a bare folder id or a sharing URL such as
//! `https://drive.google.com/drive/folders/<id>?usp=sharing`.

use url::Url;

use crate::error::{ProviderError, Result};

const MIN_ID_LEN: usize = 10;

/// Whether `candidate` looks like a Drive resource id
pub fn is_valid_folder_id(candidate: &str) -> bool {
    candidate.len() >= MIN_ID_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extract the folder id from a raw id or a Drive URL.
pub fn parse_folder_id(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ProviderError::InvalidIdentifier(
            "folder id must not be empty".to_string(),
        ));
    }

    if !input.contains("://") {
        return if is_valid_folder_id(input) {
            Ok(input.to_string())
        } else {
            Err(ProviderError::InvalidIdentifier(format!(
                "'{}' is neither a folder id nor a Drive URL",
                input
            )))
        };
    }

    let url = Url::parse(input)
        .map_err(|e| ProviderError::InvalidIdentifier(format!("invalid URL '{}': {}", input, e)))?;
    let from_url = id_from_path(&url).or_else(|| id_from_query(&url));

    match from_url {
        Some(id) if is_valid_folder_id(&id) => Ok(id),
        Some(id) => Err(ProviderError::InvalidIdentifier(format!(
            "malformed folder id '{}' in URL",
            id
        ))),
        None => Err(ProviderError::InvalidIdentifier(format!(
            "no folder id found in URL '{}'",
            input
        ))),
    }
}

// `/drive/folders/<id>` and `/drive/u/<n>/folders/<id>`
fn id_from_path(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?;
    segments
        .by_ref()
        .find(|segment| *segment == "folders")
        .and_then(|_| segments.next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

// `/open?id=<id>` and `/folderview?id=<id>`
fn id_from_query(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
}
