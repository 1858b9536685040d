use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agora_chat::Session;

use crate::AppState;

/// Tokens are issued by the account service; we only verify them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

pub fn create_token(secret: &str, user_id: Uuid, ttl: chrono::Duration) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn decode_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Browsers cannot set headers on a WebSocket upgrade, so the gateway
/// also accepts `?token=`.
fn bearer_token(req: &Request) -> Option<&str> {
    let from_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    from_header.or_else(|| {
        req.uri()
            .query()?
            .split('&')
            .find_map(|pair| pair.strip_prefix("token="))
    })
}

/// Validate the JWT and attach the caller's [`Session`].
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(&req).ok_or(StatusCode::UNAUTHORIZED)?;
    let claims = decode_token(&state.jwt_secret, token).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(Session::new(claims.sub));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_roundtrip_and_wrong_secret() {
        let user = Uuid::new_v4();
        let token = create_token("s3cr3t-value", user, chrono::Duration::hours(1)).unwrap();

        assert_eq!(decode_token("s3cr3t-value", &token).unwrap().sub, user);
        assert!(decode_token("other-secret", &token).is_none());
    }

    #[test]
    fn expired_token_is_refused() {
        let token = create_token("s3cr3t-value", Uuid::new_v4(), chrono::Duration::hours(-2)).unwrap();
        assert!(decode_token("s3cr3t-value", &token).is_none());
    }

    #[test]
    fn token_from_header_or_query() {
        let req = Request::builder()
            .uri("/chats")
            .header(header::AUTHORIZATION, "Bearer abc")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), Some("abc"));

        let req = Request::builder()
            .uri("/gateway?v=1&token=xyz")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), Some("xyz"));
    }
}
