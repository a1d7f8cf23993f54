//! Request body size guard.

use std::error::Error as StdError;

use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Request, State},
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::config::BodyLimitConfig;
use crate::error::{AppError, AppResult};

/// Ceiling category of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// JSON APIs, 1 MiB by default.
    Json,
    /// File uploads, 10 MiB by default.
    Upload,
    Custom(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct BodyLimits {
    pub json: usize,
    pub upload: usize,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self { json: 1024 * 1024, upload: 10 * 1024 * 1024 }
    }
}

impl From<&BodyLimitConfig> for BodyLimits {
    fn from(cfg: &BodyLimitConfig) -> Self {
        Self { json: cfg.json_bytes, upload: cfg.upload_bytes }
    }
}

impl BodyLimits {
    pub fn for_class(&self, class: RouteClass) -> usize {
        match class {
            RouteClass::Json => self.json,
            RouteClass::Upload => self.upload,
            RouteClass::Custom(bytes) => bytes,
        }
    }
}

/// Byte ceiling handed to [`limit_body`] as middleware state.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimit(pub usize);

fn declared_length(req: &Request) -> Option<u64> {
    req.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Caps the request body at the configured ceiling.
///
/// A declared `Content-Length` over the limit is rejected before anything is
/// read. Otherwise the body is wrapped so that reading past the limit fails,
/// which [`read_body`] reports as 413. A plain-text 413 from a stock extractor
/// such as `axum::Json` is rewritten to the JSON error body on the way out.
pub async fn limit_body(State(BodyLimit(limit)): State<BodyLimit>, req: Request, next: Next) -> Response {
    if let Some(len) = declared_length(&req) {
        if len > limit as u64 {
            info!(
                method = %req.method(),
                path = %req.uri().path(),
                content_length = len,
                limit,
                "Rejected oversized request body"
            );
            return AppError::PayloadTooLarge.into_response();
        }
    }
    let (parts, body) = req.into_parts();
    let req = Request::from_parts(parts, Body::new(Limited::new(body, limit)));
    let res = next.run(req).await;
    if res.status() == StatusCode::PAYLOAD_TOO_LARGE && !is_json(&res) {
        return AppError::PayloadTooLarge.into_response();
    }
    res
}

fn is_json(res: &Response) -> bool {
    res.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

fn is_length_limit_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

/// Reads the whole body, mapping an exceeded limit to [`AppError::PayloadTooLarge`].
pub async fn read_body(body: Body) -> AppResult<Bytes> {
    match body.collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if is_length_limit_error(&e) => Err(AppError::PayloadTooLarge),
        Err(e) => Err(AppError::BadRequest(format!("Failed to read request body: {e}"))),
    }
}

/// JSON extractor that reports an exceeded body limit as 413.
pub struct GuardedJson<T>(pub T);

impl<T, S> FromRequest<S> for GuardedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let bytes = read_body(req.into_body()).await?;
        let Json(value) = Json::<T>::from_bytes(&bytes)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e.body_text())))?;
        Ok(Self(value))
    }
}
