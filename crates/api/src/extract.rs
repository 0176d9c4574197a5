//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::{OrderId, OrganizationId};

use crate::error::ApiError;

/// Header carrying the caller's already-authenticated organization.
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Organization scope of the request, taken from `x-organization-id`.
#[derive(Debug, Clone)]
pub struct OrganizationScope(pub OrganizationId);

impl<S: Send + Sync> FromRequestParts<S> for OrganizationScope {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ORGANIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::MissingOrganization)?;
        Ok(Self(OrganizationId::new(value)))
    }
}

/// Parses an order id path segment.
pub fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id '{raw}': {e}")))
}
