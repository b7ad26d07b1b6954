use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

use crate::error::ApiError;

pub const SESSION_HEADER: &str = "x-session-id";
const MAX_SESSION_LEN: usize = 128;

/// Идентификатор покупателя: непрозрачный id сессии из заголовка `X-Session-Id`.
/// Регистрации нет, сессией управляет фронтенд.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolderId(pub String);

impl HolderId {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty() && id.len() <= MAX_SESSION_LEN)
            .map(|id| HolderId(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for HolderId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("X-Session-Id header is required"))
    }
}
