//! Actor identity extraction
//!
//! The upstream identity layer forwards the authenticated principal as
//! an `x-actor-id` header (UUID). Handlers that record an actor take
//! `ActorId` as an extractor and fail with 401 when it is missing or
//! malformed.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use presail_common::errors::AppError;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// The authenticated actor behind a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorId(pub Uuid);

impl<S> FromRequestParts<S> for ActorId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::MissingIdentity)?;

        let id = Uuid::parse_str(raw).map_err(|_| AppError::MissingIdentity)?;
        Ok(ActorId(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<ActorId, AppError> {
        let (mut parts, _) = request.into_parts();
        ActorId::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_valid_header_is_accepted() {
        let actor = Uuid::new_v4();
        let request = Request::builder()
            .header(ACTOR_HEADER, actor.to_string())
            .body(())
            .unwrap();
        assert_eq!(extract(request).await.unwrap(), ActorId(actor));
    }

    #[tokio::test]
    async fn test_missing_header_is_rejected() {
        let request = Request::builder().body(()).unwrap();
        assert!(matches!(
            extract(request).await.unwrap_err(),
            AppError::MissingIdentity
        ));
    }

    #[tokio::test]
    async fn test_malformed_header_is_rejected() {
        let request = Request::builder()
            .header(ACTOR_HEADER, "not-a-uuid")
            .body(())
            .unwrap();
        assert!(matches!(
            extract(request).await.unwrap_err(),
            AppError::MissingIdentity
        ));
    }
}
