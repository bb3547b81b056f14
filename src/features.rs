//! Feature Extraction
//!
//! Maps a request record onto the two fixed-length numeric vectors the
//! detectors were trained on: a 30-element network/metadata vector and a
//! 15-element content vector.
//!
//! Both extractors are total: they never fail, whatever the input looks
//! like. Missing fields contribute zeros, unicode and binary payloads are
//! treated as opaque byte sequences for length purposes, and counts
//! saturate instead of overflowing.

use crate::request::RequestRecord;

/// Length of the network/metadata feature vector
pub const NETWORK_FEATURES: usize = 30;
/// Length of the content feature vector
pub const CONTENT_FEATURES: usize = 15;

/// Counts above this are clamped; f32 represents integers exactly up to 2^24.
const COUNT_CEIL: usize = 1 << 24;

/// Fixed-length ordered sequence of feature values.
///
/// Construction pads or truncates to the requested length, so a vector's
/// length is an invariant of its variant, not of the input it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(mut values: Vec<f32>, len: usize) -> Self {
        values.resize(len, 0.0);
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn length(s: &str) -> f32 {
    s.len().min(COUNT_CEIL) as f32
}

fn count(haystack: &str, needle: &str) -> f32 {
    haystack.matches(needle).count().min(COUNT_CEIL) as f32
}

/// Extract the network/metadata vector.
///
/// Encodes lengths and counts derived from the URI, query string,
/// user-agent, header collection, declared content length and the
/// concurrent-connection estimate. Positions beyond the derived features
/// are zero, keeping the layout the network model was trained on.
pub fn extract_network(record: &RequestRecord) -> FeatureVector {
    let param_count = if record.query_string.is_empty() {
        0.0
    } else {
        count(&record.query_string, "&") + 1.0
    };

    let values = vec![
        length(&record.uri),
        length(&record.user_agent),
        record.content_length.min(COUNT_CEIL as u64) as f32,
        record.headers.len().min(COUNT_CEIL) as f32,
        record.connection_count.min(COUNT_CEIL as u32) as f32,
        length(&record.query_string),
        count(&record.uri, "/"),
        param_count,
        count(&record.uri, "."),
        count(&record.uri, "%") + count(&record.query_string, "%"),
    ];

    FeatureVector::new(values, NETWORK_FEATURES)
}

/// Extract the content vector.
///
/// Injection indicators are counted case-insensitively over the
/// concatenation of URI, query string and body, the input surface an
/// attacker controls.
pub fn extract_content(record: &RequestRecord) -> FeatureVector {
    let body = record.body.as_deref().unwrap_or("");
    let combined = format!("{} {} {}", record.uri, record.query_string, body).to_lowercase();

    let keyword_flag = if ["sql", "xss", "script"].iter().any(|k| combined.contains(k)) {
        1.0
    } else {
        0.0
    };

    let values = vec![
        length(&combined),
        count(&combined, "'"),
        count(&combined, "\""),
        count(&combined, "--"),
        count(&combined, "union"),
        count(&combined, "select"),
        count(&combined, "insert"),
        count(&combined, "delete"),
        count(&combined, "<script>"),
        count(&combined, "javascript:"),
        count(&combined, "onload="),
        count(&combined, "alert("),
        keyword_flag,
        length(&record.query_string),
        length(body),
    ];

    FeatureVector::new(values, CONTENT_FEATURES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_vector_is_always_30_elements() {
        assert_eq!(extract_network(&RequestRecord::default()).len(), NETWORK_FEATURES);

        let big = RequestRecord {
            uri: "/a".repeat(500_000),
            query_string: "x=1&".repeat(100_000),
            content_length: u64::MAX,
            connection_count: u32::MAX,
            ..Default::default()
        };
        assert_eq!(extract_network(&big).len(), NETWORK_FEATURES);
    }

    #[test]
    fn test_content_vector_is_always_15_elements() {
        assert_eq!(extract_content(&RequestRecord::default()).len(), CONTENT_FEATURES);

        let big = RequestRecord {
            body: Some("<script>".repeat(200_000)),
            ..Default::default()
        };
        assert_eq!(extract_content(&big).len(), CONTENT_FEATURES);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let record = RequestRecord {
            uri: "/login.php".to_string(),
            query_string: "id=1' OR '1'='1".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            ..Default::default()
        };

        assert_eq!(extract_network(&record), extract_network(&record));
        assert_eq!(extract_content(&record), extract_content(&record));
    }

    #[test]
    fn test_quote_counting_on_sqli_payload() {
        let record = RequestRecord {
            uri: "/login.php".to_string(),
            query_string: "id=1' OR '1'='1".to_string(),
            ..Default::default()
        };

        let vector = extract_content(&record);
        // single-quote count sits at position 1
        assert!(vector.values()[1] >= 2.0, "quotes: {}", vector.values()[1]);
    }

    #[test]
    fn test_keyword_counting_is_case_insensitive() {
        let record = RequestRecord {
            query_string: "q=1 UnIoN SeLeCt password".to_string(),
            ..Default::default()
        };

        let vector = extract_content(&record);
        assert_eq!(vector.values()[4], 1.0); // union
        assert_eq!(vector.values()[5], 1.0); // select
    }

    #[test]
    fn test_script_tag_and_flag_features() {
        let record = RequestRecord {
            uri: "/comment".to_string(),
            body: Some("<script>alert('xss')</script>".to_string()),
            ..Default::default()
        };

        let vector = extract_content(&record);
        assert_eq!(vector.values()[8], 1.0); // <script>
        assert_eq!(vector.values()[11], 1.0); // alert(
        assert_eq!(vector.values()[12], 1.0); // sql/xss/script flag
    }

    #[test]
    fn test_unicode_body_is_opaque_bytes() {
        let record = RequestRecord {
            body: Some("héllo🚀".to_string()),
            ..Default::default()
        };

        let vector = extract_content(&record);
        // byte length, not char count: 1 + 2 + 3*1 + 4 = 10
        assert_eq!(vector.values()[14], 10.0);
    }

    #[test]
    fn test_empty_query_has_zero_params() {
        let record = RequestRecord {
            uri: "/".to_string(),
            ..Default::default()
        };

        let vector = extract_network(&record);
        assert_eq!(vector.values()[7], 0.0);
    }

    #[test]
    fn test_param_count() {
        let record = RequestRecord {
            query_string: "page=1&limit=10&sort=desc".to_string(),
            ..Default::default()
        };

        let vector = extract_network(&record);
        assert_eq!(vector.values()[7], 3.0);
    }

    #[test]
    fn test_vector_padding_and_truncation() {
        let short = FeatureVector::new(vec![1.0, 2.0], 5);
        assert_eq!(short.values(), &[1.0, 2.0, 0.0, 0.0, 0.0]);

        let long = FeatureVector::new(vec![1.0; 10], 5);
        assert_eq!(long.len(), 5);
    }
}
