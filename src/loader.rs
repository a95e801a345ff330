//! JSON loading from files, strings and HTTP URLs.
//!
//! Used for field manifests and for content item batches.

use std::path::Path;

use serde_json::Value;

use crate::error::LoadError;
use crate::types::ContentItem;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a JSON document from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_json(path: &Path) -> Result<Value, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    load_json_str(&content)
}

/// Load a JSON document from a string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_json_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a JSON document from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails or the server
/// answers with an error status.
#[cfg(feature = "remote")]
pub fn load_json_url(url: &str) -> Result<Value, LoadError> {
    let network = |source: reqwest::Error| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.json())
        .map_err(network)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load a JSON document from a file path or, with the `remote` feature,
/// a URL.
pub fn load_json_auto(source: &str) -> Result<Value, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_json_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_json(Path::new(source))
    }
}

/// Parse a batch of content items from a JSON array.
///
/// # Errors
///
/// Returns `LoadError::UnexpectedShape` if `value` is not an array and
/// `LoadError::InvalidJson` if an element is not a valid item.
pub fn parse_items(value: Value) -> Result<Vec<ContentItem>, LoadError> {
    if !value.is_array() {
        return Err(LoadError::UnexpectedShape {
            expected: "array of content items",
            actual: crate::types::json_type_name(&value).to_string(),
        });
    }
    serde_json::from_value(value).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a batch of content items from a file path or URL.
pub fn load_items(source: &str) -> Result<Vec<ContentItem>, LoadError> {
    parse_items(load_json_auto(source)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn load_json_missing_file() {
        let result = load_json(Path::new("/nonexistent/items.json"));
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
    }

    #[test]
    fn load_json_invalid_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let result = load_json(file.path());
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn load_json_str_valid() {
        assert_eq!(load_json_str(r#"{"a":1}"#).unwrap(), json!({ "a": 1 }));
    }

    #[test]
    fn is_url_detects_schemes() {
        assert!(is_url("https://example.com/wp-json/posts"));
        assert!(is_url("http://localhost:8080/items.json"));
        assert!(!is_url("items.json"));
        assert!(!is_url("ftp://example.com/items.json"));
    }

    #[test]
    fn parse_items_requires_array() {
        let result = parse_items(json!({ "id": 1, "type": "article" }));
        assert!(matches!(
            result,
            Err(LoadError::UnexpectedShape { actual, .. }) if actual == "object"
        ));
    }

    #[test]
    fn parse_items_reads_flat_records() {
        let items = parse_items(json!([
            { "id": 1, "type": "article", "title": "One" },
            { "ID": "b", "post_type": "page" }
        ]))
        .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get_str("title"), Some("One"));
        assert_eq!(items[1].item_type, "page");
    }

    #[test]
    fn parse_items_rejects_records_without_type() {
        let result = parse_items(json!([{ "id": 1 }]));
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }
}
