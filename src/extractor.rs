use axum::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::de::DeserializeOwned;

use crate::auth::SIGNATURE_HEADER;
use crate::error::{AppError, AppResult};

/// Decoded bytes of the request signature header. A missing or non-hex
/// header is rejected the same way as a wrong signature.
pub struct RequestSignature(pub Vec<u8>);

#[async_trait]
impl<S> FromRequestParts<S> for RequestSignature
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::AuthenticationFailure)?;
        let decoded = hex::decode(raw.trim()).map_err(|_| AppError::AuthenticationFailure)?;
        Ok(RequestSignature(decoded))
    }
}

/// Parses a JSON request body that was kept raw for signature checks.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> AppResult<T> {
    serde_json::from_slice(body)
        .map_err(|err| AppError::ValidationFailure(format!("malformed request body: {err}")))
}
