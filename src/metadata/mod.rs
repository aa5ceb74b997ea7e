//! Upload metadata codec
//!
//! The `Upload-Metadata` header is a comma-separated list of pairs. Each pair
//! is a bare key, or a key followed by a single space and a base64 value:
//!
//! ```text
//! filename d29ybGRfZG9taW5hdGlvbl9wbGFuLnBkZg==,is_confidential
//! ```
//!
//! Values are only checked for base64 syntax. The raw header string is what
//! gets stored on the session and echoed back on status queries.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Metadata validation errors
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Metadata key '{key}' contains non-ASCII character '{ch}'")]
    NonAsciiKey { key: String, ch: char },

    #[error("Metadata value for key '{key}' is not valid base64: {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: base64::DecodeError,
    },
}

/// Split raw metadata into `(key, value)` pairs.
///
/// Pairs and their parts are trimmed of ASCII whitespace. A pair without a
/// space has no value. Empty pairs (e.g. from `"a,,b"`) yield an empty key.
pub fn pairs(raw: &str) -> impl Iterator<Item = (&str, Option<&str>)> {
    raw.split(',').map(|pair| {
        let pair = trim_ascii(pair);
        match pair.split_once(' ') {
            Some((key, value)) => {
                let value = trim_ascii(value);
                (trim_ascii(key), (!value.is_empty()).then_some(value))
            }
            None => (pair, None),
        }
    })
}

/// Trim ASCII whitespace only, so non-ASCII spaces stay part of the key
fn trim_ascii(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_ascii_whitespace())
}

/// Validate raw `Upload-Metadata` content.
///
/// Rejects on the first key holding a non-ASCII character, or the first
/// value that is not standard padded base64.
pub fn validate(raw: &str) -> Result<(), MetadataError> {
    for (key, value) in pairs(raw) {
        if let Some(ch) = key.chars().find(|c| !c.is_ascii()) {
            return Err(MetadataError::NonAsciiKey {
                key: key.to_string(),
                ch,
            });
        }

        if let Some(value) = value {
            STANDARD
                .decode(value)
                .map_err(|source| MetadataError::InvalidValue {
                    key: key.to_string(),
                    source,
                })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_metadata() {
        let raw = "filename d29ybGRfZG9taW5hdGlvbl9wbGFuLnBkZg==,is_confidential";
        assert!(validate(raw).is_ok());
    }

    #[test]
    fn test_empty_metadata_is_valid() {
        assert!(validate("").is_ok());
    }

    #[test]
    fn test_bare_keys() {
        assert!(validate("a,b,c").is_ok());
    }

    #[test]
    fn test_whitespace_around_pairs() {
        assert!(validate(" name dGVzdA== , flag ").is_ok());
    }

    #[test]
    fn test_non_ascii_key_rejected() {
        let err = validate("fïlename dGVzdA==").unwrap_err();
        match err {
            MetadataError::NonAsciiKey { key, ch } => {
                assert_eq!(key, "fïlename");
                assert_eq!(ch, 'ï');
            }
            other => panic!("Expected NonAsciiKey, got {:?}", other),
        }
    }

    #[test]
    fn test_non_ascii_whitespace_kept_in_key() {
        let err = validate("\u{a0}name dGVzdA==").unwrap_err();
        assert!(matches!(err, MetadataError::NonAsciiKey { ch: '\u{a0}', .. }));

        let err = validate("name\u{85} dGVzdA==").unwrap_err();
        assert!(matches!(err, MetadataError::NonAsciiKey { ch: '\u{85}', .. }));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let err = validate("filename not*base64").unwrap_err();
        assert!(matches!(err, MetadataError::InvalidValue { ref key, .. } if key == "filename"));
    }

    #[test]
    fn test_unpadded_base64_rejected() {
        // "test" encodes to "dGVzdA==" with padding
        assert!(validate("name dGVzdA").is_err());
    }

    #[test]
    fn test_first_bad_pair_wins() {
        let err = validate("ok dGVzdA==,bad !!!,ünicode").unwrap_err();
        assert!(matches!(err, MetadataError::InvalidValue { ref key, .. } if key == "bad"));
    }

    #[test]
    fn test_pairs_split() {
        let parsed: Vec<_> = pairs("filename dGVzdA==,flag").collect();
        assert_eq!(parsed, vec![("filename", Some("dGVzdA==")), ("flag", None)]);
    }
}
