//! API Router
//!
//! Parses incoming requests into typed API routes. Request bodies are decoded
//! by the handlers; the router only looks at method, path and query.

use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use thiserror::Error;

/// Router errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// API operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRoute {
    /// GET /health
    Health,
    /// POST /api/multipart/init
    MultipartInit,
    /// POST /api/multipart/authorize-part
    MultipartAuthorizePart,
    /// POST /api/multipart/complete
    MultipartComplete,
    /// POST /api/multipart/abort
    MultipartAbort,
    /// GET /api/objects?prefix=P
    ListObjects { prefix: String },
    /// DELETE /api/objects
    DeleteObject,
    /// POST /api/folders
    CreateFolder,
    /// GET /api/download?path=P
    Download { path: String },
}

impl ApiRoute {
    /// Stable label for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            ApiRoute::Health => "health",
            ApiRoute::MultipartInit => "multipart_init",
            ApiRoute::MultipartAuthorizePart => "multipart_authorize_part",
            ApiRoute::MultipartComplete => "multipart_complete",
            ApiRoute::MultipartAbort => "multipart_abort",
            ApiRoute::ListObjects { .. } => "list_objects",
            ApiRoute::DeleteObject => "delete_object",
            ApiRoute::CreateFolder => "create_folder",
            ApiRoute::Download { .. } => "download",
        }
    }

    /// Whether the route modifies the caller's objects
    pub fn requires_write(&self) -> bool {
        matches!(
            self,
            ApiRoute::MultipartInit
                | ApiRoute::MultipartAuthorizePart
                | ApiRoute::MultipartComplete
                | ApiRoute::MultipartAbort
                | ApiRoute::DeleteObject
                | ApiRoute::CreateFolder
        )
    }

    /// Whether the route needs caller identity headers
    pub fn requires_identity(&self) -> bool {
        !matches!(self, ApiRoute::Health)
    }
}

/// API Request Parser
pub struct ApiRequestParser;

impl ApiRequestParser {
    /// Parse an HTTP request line into an API route
    pub fn parse(method: &str, path: &str, query: Option<&str>) -> Result<ApiRoute, RouterError> {
        let path = match path.strip_suffix('/') {
            Some(trimmed) if !trimmed.is_empty() => trimmed,
            _ => path,
        };

        let allowed: &[&str] = match path {
            "/health" => &["GET"],
            "/api/multipart/init"
            | "/api/multipart/authorize-part"
            | "/api/multipart/complete"
            | "/api/multipart/abort"
            | "/api/folders" => &["POST"],
            "/api/objects" => &["GET", "DELETE"],
            "/api/download" => &["GET"],
            _ => return Err(RouterError::NotFound(path.to_string())),
        };

        if !allowed.contains(&method) {
            return Err(RouterError::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
            });
        }

        let params = Self::parse_query(query)?;

        Ok(match (method, path) {
            ("GET", "/health") => ApiRoute::Health,
            ("POST", "/api/multipart/init") => ApiRoute::MultipartInit,
            ("POST", "/api/multipart/authorize-part") => ApiRoute::MultipartAuthorizePart,
            ("POST", "/api/multipart/complete") => ApiRoute::MultipartComplete,
            ("POST", "/api/multipart/abort") => ApiRoute::MultipartAbort,
            ("POST", "/api/folders") => ApiRoute::CreateFolder,
            ("GET", "/api/objects") => ApiRoute::ListObjects {
                prefix: params.get("prefix").cloned().unwrap_or_default(),
            },
            ("DELETE", "/api/objects") => ApiRoute::DeleteObject,
            ("GET", "/api/download") => ApiRoute::Download {
                path: params
                    .get("path")
                    .filter(|p| !p.is_empty())
                    .cloned()
                    .ok_or_else(|| RouterError::InvalidQuery("missing 'path'".into()))?,
            },
            _ => {
                return Err(RouterError::MethodNotAllowed {
                    method: method.to_string(),
                    path: path.to_string(),
                })
            }
        })
    }

    /// Decode `a=b&c=d`, treating `+` as a space
    fn parse_query(query: Option<&str>) -> Result<HashMap<String, String>, RouterError> {
        let mut params = HashMap::new();
        let Some(query) = query else {
            return Ok(params);
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let mut kv = pair.splitn(2, '=');
            let key = decode(kv.next().unwrap_or(""))?;
            let value = decode(kv.next().unwrap_or(""))?;
            params.insert(key, value);
        }
        Ok(params)
    }
}

fn decode(component: &str) -> Result<String, RouterError> {
    let spaced = component.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| RouterError::InvalidQuery(format!("'{}' is not valid UTF-8", component)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multipart_routes() {
        assert_eq!(
            ApiRequestParser::parse("POST", "/api/multipart/init", None).unwrap(),
            ApiRoute::MultipartInit
        );
        assert_eq!(
            ApiRequestParser::parse("POST", "/api/multipart/authorize-part", None).unwrap(),
            ApiRoute::MultipartAuthorizePart
        );
        assert_eq!(
            ApiRequestParser::parse("POST", "/api/multipart/complete/", None).unwrap(),
            ApiRoute::MultipartComplete
        );
    }

    #[test]
    fn test_parse_list_decodes_prefix() {
        let route =
            ApiRequestParser::parse("GET", "/api/objects", Some("prefix=Q1%20reports%2F")).unwrap();
        assert_eq!(
            route,
            ApiRoute::ListObjects {
                prefix: "Q1 reports/".into()
            }
        );

        let route = ApiRequestParser::parse("GET", "/api/objects", Some("prefix=a+b/")).unwrap();
        assert_eq!(route, ApiRoute::ListObjects { prefix: "a b/".into() });

        let route = ApiRequestParser::parse("GET", "/api/objects", None).unwrap();
        assert_eq!(route, ApiRoute::ListObjects { prefix: "".into() });
    }

    #[test]
    fn test_parse_download_requires_path() {
        assert!(matches!(
            ApiRequestParser::parse("GET", "/api/download", None),
            Err(RouterError::InvalidQuery(_))
        ));
        assert_eq!(
            ApiRequestParser::parse("GET", "/api/download", Some("path=docs%2Fa.pdf")).unwrap(),
            ApiRoute::Download {
                path: "docs/a.pdf".into()
            }
        );
    }

    #[test]
    fn test_wrong_method_and_unknown_path() {
        assert!(matches!(
            ApiRequestParser::parse("GET", "/api/multipart/init", None),
            Err(RouterError::MethodNotAllowed { .. })
        ));
        assert!(matches!(
            ApiRequestParser::parse("PUT", "/api/objects", None),
            Err(RouterError::MethodNotAllowed { .. })
        ));
        assert!(matches!(
            ApiRequestParser::parse("GET", "/bucket/key", None),
            Err(RouterError::NotFound(_))
        ));
    }

    #[test]
    fn test_write_routes() {
        assert!(ApiRoute::MultipartAbort.requires_write());
        assert!(ApiRoute::DeleteObject.requires_write());
        assert!(!ApiRoute::ListObjects { prefix: "".into() }.requires_write());
        assert!(!ApiRoute::Health.requires_identity());
    }
}
