//! tus API Router
//!
//! Parses incoming request lines into tus operations. Paths are matched on
//! segment boundaries under the configured base path (e.g. `/files`).

use thiserror::Error;

/// Router errors
#[derive(Error, Debug, PartialEq)]
pub enum RouterError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method {method} not allowed on {path}")]
    MethodNotAllowed {
        method: String,
        path: String,
        allow: &'static str,
    },
}

impl RouterError {
    /// Value for the `Allow` header on 405 responses
    pub fn allow(&self) -> Option<&'static str> {
        match self {
            RouterError::MethodNotAllowed { allow, .. } => Some(*allow),
            RouterError::NotFound(_) => None,
        }
    }
}

/// tus operation types
#[derive(Debug, Clone, PartialEq)]
pub enum TusOperation {
    /// OPTIONS {base}
    Discover,
    /// POST {base}
    Create,
    /// HEAD {base}/{id}
    Status { id: String },
    /// PATCH {base}/{id}
    Append { id: String },
    /// GET /health
    Health,
    /// GET /metrics
    Metrics,
}

const COLLECTION_METHODS: &str = "OPTIONS, POST";
const UPLOAD_METHODS: &str = "HEAD, PATCH";

/// tus request parser bound to a base path
#[derive(Debug, Clone)]
pub struct TusRequestParser {
    base_path: String,
}

impl TusRequestParser {
    /// Create a parser for uploads under `base_path`
    ///
    /// Trailing slashes are ignored, so `/files/` and `/files` are the same.
    pub fn new(base_path: &str) -> Self {
        let trimmed = base_path.trim_end_matches('/');
        Self {
            base_path: if trimmed.is_empty() {
                String::new()
            } else {
                trimmed.to_string()
            },
        }
    }

    /// Base path uploads live under
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Parse an HTTP method and path into a tus operation
    pub fn parse(&self, method: &str, path: &str) -> Result<TusOperation, RouterError> {
        match (method, path) {
            ("GET", "/health") => return Ok(TusOperation::Health),
            ("GET", "/metrics") => return Ok(TusOperation::Metrics),
            _ => {}
        }

        let Some(rest) = path.strip_prefix(self.base_path.as_str()) else {
            return Err(RouterError::NotFound(path.to_string()));
        };

        match rest.trim_end_matches('/') {
            "" => match method {
                "OPTIONS" => Ok(TusOperation::Discover),
                "POST" => Ok(TusOperation::Create),
                _ => Err(not_allowed(method, path, COLLECTION_METHODS)),
            },
            tail => {
                let id = match tail.strip_prefix('/') {
                    Some(id) if !id.is_empty() && !id.contains('/') => id.to_string(),
                    _ => return Err(RouterError::NotFound(path.to_string())),
                };
                match method {
                    "HEAD" => Ok(TusOperation::Status { id }),
                    "PATCH" => Ok(TusOperation::Append { id }),
                    _ => Err(not_allowed(method, path, UPLOAD_METHODS)),
                }
            }
        }
    }
}

fn not_allowed(method: &str, path: &str, allow: &'static str) -> RouterError {
    RouterError::MethodNotAllowed {
        method: method.to_string(),
        path: path.to_string(),
        allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> TusRequestParser {
        TusRequestParser::new("/files")
    }

    #[test]
    fn test_parse_collection_operations() {
        assert_eq!(parser().parse("OPTIONS", "/files"), Ok(TusOperation::Discover));
        assert_eq!(parser().parse("POST", "/files"), Ok(TusOperation::Create));
        assert_eq!(parser().parse("POST", "/files/"), Ok(TusOperation::Create));
    }

    #[test]
    fn test_parse_upload_operations() {
        assert_eq!(
            parser().parse("HEAD", "/files/abc"),
            Ok(TusOperation::Status { id: "abc".into() })
        );
        assert_eq!(
            parser().parse("PATCH", "/files/abc"),
            Ok(TusOperation::Append { id: "abc".into() })
        );
    }

    #[test]
    fn test_parse_service_endpoints() {
        assert_eq!(parser().parse("GET", "/health"), Ok(TusOperation::Health));
        assert_eq!(parser().parse("GET", "/metrics"), Ok(TusOperation::Metrics));
    }

    #[test]
    fn test_prefix_boundary() {
        // "/files2" is not under "/files"
        assert!(matches!(
            parser().parse("POST", "/files2"),
            Err(RouterError::NotFound(_))
        ));
        assert!(matches!(
            parser().parse("HEAD", "/files2/abc"),
            Err(RouterError::NotFound(_))
        ));
    }

    #[test]
    fn test_nested_path_not_found() {
        assert!(matches!(
            parser().parse("HEAD", "/files/a/b"),
            Err(RouterError::NotFound(_))
        ));
    }

    #[test]
    fn test_method_not_allowed() {
        let err = parser().parse("GET", "/files/abc").unwrap_err();
        assert_eq!(err.allow(), Some("HEAD, PATCH"));

        let err = parser().parse("DELETE", "/files").unwrap_err();
        assert_eq!(err.allow(), Some("OPTIONS, POST"));
    }

    #[test]
    fn test_root_base_path() {
        let parser = TusRequestParser::new("/");
        assert_eq!(parser.base_path(), "");
        assert_eq!(
            parser.parse("PATCH", "/abc"),
            Ok(TusOperation::Append { id: "abc".into() })
        );
        assert_eq!(parser.parse("POST", "/"), Ok(TusOperation::Create));
    }
}
