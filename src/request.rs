//! Request Snapshot
//!
//! The immutable record of one HTTP request as handed over by the external
//! rule engine. Every field defaults so a partial or sloppy caller payload
//! still deserializes into a usable record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of a single HTTP request under evaluation.
///
/// Created once per request by the bridge and never mutated afterwards
/// (body bounding happens before the pipeline sees the record). Header
/// lookup is case-insensitive; header order is irrelevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Request path, without the query string
    #[serde(default)]
    pub uri: String,
    /// Raw query string, without the leading `?`
    #[serde(default)]
    pub query_string: String,
    /// HTTP method
    #[serde(default = "default_method")]
    pub method: String,
    /// Source address as reported by the proxy layer
    #[serde(default)]
    pub remote_addr: String,
    /// User-Agent header value
    #[serde(default)]
    pub user_agent: String,
    /// Request headers (name -> value)
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Declared Content-Length
    #[serde(default)]
    pub content_length: u64,
    /// Request body, when the caller forwarded one
    #[serde(default)]
    pub body: Option<String>,
    /// Approximate concurrent connections for the source address
    #[serde(default = "default_connection_count")]
    pub connection_count: u32,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_connection_count() -> u32 {
    1
}

impl Default for RequestRecord {
    fn default() -> Self {
        Self {
            uri: String::new(),
            query_string: String::new(),
            method: default_method(),
            remote_addr: String::new(),
            user_agent: String::new(),
            headers: HashMap::new(),
            content_length: 0,
            body: None,
            connection_count: default_connection_count(),
        }
    }
}

impl RequestRecord {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Fill gaps and bound the body before the record enters the pipeline.
    ///
    /// Some callers only forward raw headers; recover the user-agent from
    /// them when the dedicated field is empty. The body is truncated at a
    /// character boundary so oversized uploads cannot inflate extraction
    /// cost.
    pub(crate) fn normalize(&mut self, max_body_bytes: usize) {
        if self.user_agent.is_empty() {
            if let Some(ua) = self.header("user-agent") {
                self.user_agent = ua.to_string();
            }
        }
        if let Some(body) = self.body.as_mut() {
            if body.len() > max_body_bytes {
                let mut cut = max_body_bytes;
                while cut > 0 && !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_missing_fields() {
        let record: RequestRecord = serde_json::from_str(r#"{"uri": "/index.php"}"#).unwrap();
        assert_eq!(record.uri, "/index.php");
        assert_eq!(record.method, "GET");
        assert_eq!(record.connection_count, 1);
        assert!(record.body.is_none());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut record = RequestRecord::default();
        record
            .headers
            .insert("X-Forwarded-For".to_string(), "10.0.0.1".to_string());

        assert_eq!(record.header("x-forwarded-for"), Some("10.0.0.1"));
        assert_eq!(record.header("X-FORWARDED-FOR"), Some("10.0.0.1"));
        assert_eq!(record.header("x-real-ip"), None);
    }

    #[test]
    fn test_normalize_recovers_user_agent_from_headers() {
        let mut record = RequestRecord::default();
        record
            .headers
            .insert("User-Agent".to_string(), "curl/8.5".to_string());

        record.normalize(1024);
        assert_eq!(record.user_agent, "curl/8.5");
    }

    #[test]
    fn test_normalize_bounds_body_at_char_boundary() {
        let mut record = RequestRecord {
            body: Some("héllo wörld".to_string()),
            ..Default::default()
        };

        // byte 2 falls inside the two-byte 'é'
        record.normalize(2);
        let body = record.body.unwrap();
        assert_eq!(body, "h");
    }

    #[test]
    fn test_normalize_keeps_small_body() {
        let mut record = RequestRecord {
            body: Some("id=1".to_string()),
            ..Default::default()
        };

        record.normalize(1024);
        assert_eq!(record.body.as_deref(), Some("id=1"));
    }
}
