use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

/// The identity the surrounding auth layer already verified. This service
/// does not check credentials itself; it reads the identity headers the
/// auth proxy installs on every authenticated request and rejects requests
/// that arrive without them.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub user_id: String,
    pub display_name: String,
}

impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty());
        let Some(user_id) = user_id else {
            return Err((StatusCode::UNAUTHORIZED, "missing authenticated identity"));
        };

        let display_name = parts
            .headers
            .get("x-user-name")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or("Anonymous");

        Ok(UserIdentity {
            user_id: user_id.to_owned(),
            display_name: display_name.to_owned(),
        })
    }
}
