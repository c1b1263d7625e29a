//! Request handlers for the HTTP API

use super::AppState;
use crate::metrics;
use crate::namespace::{
    relativize_listing, Caller, NamespaceError, QualifiedKey, Role, TenantNamespace,
};
use crate::router::{ApiRequestParser, ApiRoute, RouterError};
use crate::s3::{CompletedPart, GatewayError};
use crate::upload::transfer::normalize_etag;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Instrument};

pub const NAMESPACE_HEADER: &str = "x-organization-namespace";
pub const ROLE_HEADER: &str = "x-role";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// JSON request bodies are small; anything larger is refused
const MAX_BODY_BYTES: usize = 1024 * 1024;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

type ApiResponse = Response<Full<Bytes>>;

/// An error rendered as `{"error": "..."}` with a status code
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn into_response(self) -> ApiResponse {
        json_response(
            self.status,
            &ErrorBody {
                error: &self.message,
            },
        )
    }
}

impl From<RouterError> for ApiError {
    fn from(e: RouterError) -> Self {
        let status = match e {
            RouterError::NotFound(_) => StatusCode::NOT_FOUND,
            RouterError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            RouterError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, e.to_string())
    }
}

impl From<NamespaceError> for ApiError {
    fn from(e: NamespaceError) -> Self {
        let status = match e {
            NamespaceError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
            NamespaceError::InvalidNamespace(_) | NamespaceError::UnknownRole(_) => {
                StatusCode::UNAUTHORIZED
            }
            NamespaceError::InvalidPath { .. } | NamespaceError::ForeignKey(_) => {
                StatusCode::BAD_REQUEST
            }
        };
        Self::new(status, e.to_string())
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        let status = match e {
            GatewayError::InvalidKey(_) | GatewayError::InvalidParts(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::bad_request(format!("Invalid request body: {}", e))
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitRequest {
    path: String,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    upload_id: String,
    path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizePartRequest {
    path: String,
    upload_id: String,
    part_number: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizePartResponse {
    signed_url: String,
    part_number: u32,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartEntry {
    part_number: u32,
    etag: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest {
    path: String,
    upload_id: String,
    parts: Vec<PartEntry>,
}

#[derive(Serialize)]
struct CompleteResponse {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbortRequest {
    path: String,
    upload_id: String,
}

#[derive(Deserialize)]
struct PathRequest {
    path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectEntry {
    path: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<DateTime<Utc>>,
    is_folder: bool,
}

#[derive(Serialize)]
struct ListResponse {
    objects: Vec<ObjectEntry>,
}

/// Entry point for every API request
pub(super) async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<ApiResponse, Infallible> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let started = Instant::now();
    let span = tracing::info_span!(
        "api.request",
        request_id = %request_id,
        http.method = %req.method(),
        http.path = %req.uri().path(),
        http.status_code = tracing::field::Empty
    );

    async move {
        let route = ApiRequestParser::parse(req.method().as_str(), req.uri().path(), req.uri().query());
        let label = route.as_ref().map(|r| r.name()).unwrap_or("unmatched");

        let result = match route {
            Ok(route) => dispatch(route, req, &state).await,
            Err(e) => Err(e.into()),
        };

        let mut response = match result {
            Ok(response) => response,
            Err(e) => {
                if e.status.is_server_error() {
                    warn!(status = e.status.as_u16(), error = %e.message, "Store call failed");
                } else {
                    info!(status = e.status.as_u16(), error = %e.message, "Request rejected");
                }
                e.into_response()
            }
        };

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        let status = response.status().as_u16();
        tracing::Span::current().record("http.status_code", status);
        metrics::record_api_request(label, status, started.elapsed());

        Ok(response)
    }
    .instrument(span)
    .await
}

async fn dispatch(
    route: ApiRoute,
    req: Request<Incoming>,
    state: &AppState,
) -> Result<ApiResponse, ApiError> {
    if !route.requires_identity() {
        return Ok(text_response(StatusCode::OK, "ok"));
    }

    let caller = caller_from_headers(&req)?;
    if route.requires_write() {
        caller.require_write()?;
    }
    let namespace = caller.namespace();

    match route {
        ApiRoute::Health => Ok(text_response(StatusCode::OK, "ok")),

        ApiRoute::MultipartInit => {
            let body: InitRequest = read_json(req).await?;
            let key = object_key(namespace, &body.path)?;
            let content_type = body
                .content_type
                .filter(|ct| !ct.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

            let upload_id = state.gateway.initiate_upload(&key, &content_type).await?;
            info!(upload_id = %upload_id, key = %key, "Multipart upload initiated");

            Ok(json_response(
                StatusCode::OK,
                &InitResponse {
                    upload_id,
                    path: key.relative().to_string(),
                },
            ))
        }

        ApiRoute::MultipartAuthorizePart => {
            let body: AuthorizePartRequest = read_json(req).await?;
            let key = object_key(namespace, &body.path)?;
            let upload_id = require_upload_id(&body.upload_id)?;

            let authorization = state
                .gateway
                .authorize_part_upload(upload_id, &key, body.part_number)
                .await?;

            Ok(json_response(
                StatusCode::OK,
                &AuthorizePartResponse {
                    signed_url: authorization.url,
                    part_number: authorization.part_number,
                    expires_at: authorization.expires_at,
                },
            ))
        }

        ApiRoute::MultipartComplete => {
            let body: CompleteRequest = read_json(req).await?;
            let key = object_key(namespace, &body.path)?;
            let upload_id = require_upload_id(&body.upload_id)?;

            let parts = body
                .parts
                .into_iter()
                .map(|part| {
                    normalize_etag(&part.etag)
                        .map(|etag| CompletedPart {
                            part_number: part.part_number,
                            etag,
                        })
                        .map_err(|e| {
                            ApiError::bad_request(format!("part {}: {}", part.part_number, e))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let object = state.gateway.complete_upload(upload_id, &key, &parts).await?;
            info!(upload_id = %upload_id, key = %key, parts = parts.len(), "Multipart upload completed");

            Ok(json_response(
                StatusCode::OK,
                &CompleteResponse {
                    path: key.relative().to_string(),
                    etag: object.etag,
                },
            ))
        }

        ApiRoute::MultipartAbort => {
            let body: AbortRequest = read_json(req).await?;
            let key = object_key(namespace, &body.path)?;
            let upload_id = require_upload_id(&body.upload_id)?;

            state.gateway.abort_upload(upload_id, &key).await?;
            info!(upload_id = %upload_id, key = %key, "Multipart upload aborted");

            Ok(json_response(
                StatusCode::OK,
                &serde_json::json!({ "aborted": true }),
            ))
        }

        ApiRoute::ListObjects { prefix } => {
            let prefix = if prefix.is_empty() || prefix.ends_with('/') {
                prefix
            } else {
                format!("{}/", prefix)
            };
            let key = namespace.qualify(&prefix)?;

            let raw = state.listing.list_objects(&key).await?;
            let objects = relativize_listing(namespace, raw)
                .into_iter()
                .map(|object| ObjectEntry {
                    path: object.key,
                    size: object.size,
                    last_modified: object.last_modified,
                    is_folder: object.is_folder,
                })
                .collect();

            Ok(json_response(StatusCode::OK, &ListResponse { objects }))
        }

        ApiRoute::DeleteObject => {
            let body: PathRequest = read_json(req).await?;
            if body.path.is_empty() {
                return Err(ApiError::bad_request("path is required"));
            }
            let key = namespace.qualify(&body.path)?;

            state.listing.delete_object(&key).await?;
            info!(key = %key, "Object deleted");

            Ok(json_response(
                StatusCode::OK,
                &serde_json::json!({ "deleted": true }),
            ))
        }

        ApiRoute::CreateFolder => {
            let body: PathRequest = read_json(req).await?;
            let path = body.path.trim();
            if path.is_empty() || path == "/" {
                return Err(ApiError::bad_request("path is required"));
            }
            let path = if path.ends_with('/') {
                path.to_string()
            } else {
                format!("{}/", path)
            };
            let key = namespace.qualify(&path)?;

            state.listing.create_folder(&key).await?;
            info!(key = %key, "Folder created");

            Ok(json_response(
                StatusCode::OK,
                &serde_json::json!({ "path": key.relative() }),
            ))
        }

        ApiRoute::Download { path } => {
            let key = object_key(namespace, &path)?;
            let url = state.listing.presign_download(&key).await?;

            Ok(json_response(StatusCode::OK, &serde_json::json!({ "url": url })))
        }
    }
}

/// Build the caller from the identity headers set by the trusted upstream
fn caller_from_headers(req: &Request<Incoming>) -> Result<Caller, ApiError> {
    let namespace = TenantNamespace::new(identity_header(req, NAMESPACE_HEADER)?)?;
    let role: Role = identity_header(req, ROLE_HEADER)?.parse()?;
    Ok(Caller::new(namespace, role))
}

fn identity_header<'a>(req: &'a Request<Incoming>, name: &str) -> Result<&'a str, ApiError> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, format!("Missing {} header", name)))
}

/// Qualify a path that must name an object, not a folder or the root
fn object_key(namespace: &TenantNamespace, path: &str) -> Result<QualifiedKey, ApiError> {
    let key = namespace.qualify(path)?;
    if key.is_folder() {
        return Err(ApiError::bad_request(format!(
            "'{}' names a folder, not an object",
            path
        )));
    }
    Ok(key)
}

fn require_upload_id(upload_id: &str) -> Result<&str, ApiError> {
    let upload_id = upload_id.trim();
    if upload_id.is_empty() {
        return Err(ApiError::bad_request("uploadId is required"));
    }
    Ok(upload_id)
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, ApiError> {
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read body: {}", e)))?
        .to_bytes();
    Ok(serde_json::from_slice(&body)?)
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> ApiResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(bytes)))
            .expect("Failed to build JSON response"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode response");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn text_response(status: StatusCode, body: &'static str) -> ApiResponse {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .expect("Failed to build text response")
}
