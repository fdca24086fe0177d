use axum::http::{request::Parts, HeaderMap};
use axum::extract::FromRequestParts;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::error::PipelineError;

pub const ORGANIZATION_HEADER: &str = "X-Organization-Id";
pub const USER_HEADER: &str = "X-User-Id";

// ============================================================================
// Tenant Context
// ============================================================================

/// Tenant and acting user of a request. Resolved upstream; this service trusts the
/// headers it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub org_id: Uuid,
    pub user_id: Option<Uuid>,
}

impl TenantContext {
    pub fn new(org_id: Uuid) -> Self {
        Self {
            org_id,
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, PipelineError> {
        let org_id = parse_uuid_header(headers, ORGANIZATION_HEADER)?.ok_or_else(|| {
            PipelineError::Validation(format!("{ORGANIZATION_HEADER} header is required"))
        })?;
        let user_id = parse_uuid_header(headers, USER_HEADER)?;
        Ok(Self { org_id, user_id })
    }
}

fn parse_uuid_header(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, PipelineError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let parsed = value
        .to_str()
        .ok()
        .map(str::trim)
        .and_then(|s| Uuid::parse_str(s).ok());
    match parsed {
        Some(id) => Ok(Some(id)),
        None => Err(PipelineError::Validation(format!(
            "{name} header must be a UUID"
        ))),
    }
}

// ============================================================================
// Extractors
// ============================================================================

#[axum::async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = PipelineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(context) = parts.extensions.get::<TenantContext>() {
            return Ok(*context);
        }
        Self::from_headers(&parts.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_tenant_from_headers() {
        let (org, user) = (Uuid::new_v4(), Uuid::new_v4());
        let mut headers = HeaderMap::new();
        headers.insert(
            ORGANIZATION_HEADER,
            HeaderValue::from_str(&org.to_string()).unwrap(),
        );
        assert_eq!(
            TenantContext::from_headers(&headers).unwrap(),
            TenantContext::new(org)
        );

        headers.insert(USER_HEADER, HeaderValue::from_str(&user.to_string()).unwrap());
        assert_eq!(
            TenantContext::from_headers(&headers).unwrap(),
            TenantContext::new(org).with_user(user)
        );
    }

    #[test]
    fn test_missing_or_bad_headers_are_validation_errors() {
        let headers = HeaderMap::new();
        assert!(matches!(
            TenantContext::from_headers(&headers),
            Err(PipelineError::Validation(_))
        ));

        let mut headers = HeaderMap::new();
        headers.insert(ORGANIZATION_HEADER, HeaderValue::from_static("acme"));
        assert!(matches!(
            TenantContext::from_headers(&headers),
            Err(PipelineError::Validation(_))
        ));
    }
}
