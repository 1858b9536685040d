//! HTTP and WebSocket surface for the chat subsystem.

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;

use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use agora_chat::Backend;
use agora_storage::store::MAX_OBJECT_SIZE;

use crate::routes::{chats, messages};

/// Largest JSON body: one base64-encoded object plus room for the other fields.
pub const MAX_BODY_SIZE: usize = MAX_OBJECT_SIZE.div_ceil(3) * 4 + 64 * 1024;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub backend: Backend,
    pub jwt_secret: String,
}

pub fn router(state: AppState, storage_dir: &Path) -> Router {
    let protected_routes = Router::new()
        .route("/chats", get(chats::list_chats))
        .route("/chats/direct", post(chats::create_direct_chat))
        .route("/chats/group", post(chats::create_group))
        .route("/chats/{chat_id}", delete(chats::delete_chat))
        .route("/chats/{chat_id}/members", post(chats::add_members))
        .route("/chats/{chat_id}/members/{user_id}", delete(chats::remove_member))
        .route(
            "/chats/{chat_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/chats/{chat_id}/messages/{message_id}",
            delete(messages::delete_message),
        )
        .route("/chats/{chat_id}/typing", post(messages::notify_typing))
        .route("/gateway", get(gateway::ws_upgrade))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_auth))
        .with_state(state);

    Router::new()
        .merge(protected_routes)
        .nest_service("/storage", ServeDir::new(storage_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use agora_chat::ChatConfig;
    use agora_db::Database;
    use agora_realtime::Hub;
    use agora_storage::ObjectStore;
    use agora_types::models::Profile;

    const SECRET: &str = "test-secret-value";

    struct TestApp {
        app: Router,
        state: AppState,
        _dir: tempfile::TempDir,
    }

    impl TestApp {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Database::open(&dir.path().join("agora.db"), Hub::new()).unwrap();
            let objects = ObjectStore::new(dir.path().join("storage"), "http://localhost:3000/storage")
                .await
                .unwrap();
            let backend = Backend::new(Arc::new(db), Arc::new(objects), ChatConfig::default());
            let state: AppState = Arc::new(AppStateInner {
                backend,
                jwt_secret: SECRET.into(),
            });
            let app = router(state.clone(), &dir.path().join("storage"));
            Self { app, state, _dir: dir }
        }

        fn user(&self, username: &str) -> Uuid {
            let id = Uuid::new_v4();
            self.state
                .backend
                .db()
                .upsert_profile(&Profile {
                    id,
                    username: username.into(),
                    full_name: None,
                    avatar_url: None,
                })
                .unwrap();
            id
        }

        async fn call(&self, method: &str, uri: &str, user: Uuid, body: Option<Value>) -> (StatusCode, Value) {
            let token = auth::create_token(SECRET, user, chrono::Duration::hours(1)).unwrap();
            let builder = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", token));
            let req = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let res = self.app.clone().oneshot(req).await.unwrap();
            let status = res.status();
            let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }
    }

    #[tokio::test]
    async fn requests_without_token_are_unauthorized() {
        let t = TestApp::new().await;
        let res = t
            .app
            .clone()
            .oneshot(Request::builder().uri("/chats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn direct_chat_message_flow() {
        let t = TestApp::new().await;
        let (ada, bob) = (t.user("ada"), t.user("bob"));

        let (status, created) = t
            .call("POST", "/chats/direct", ada, Some(json!({ "user_id": bob })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let chat_id = created["chat_id"].as_str().unwrap().to_string();

        let (status, again) = t
            .call("POST", "/chats/direct", bob, Some(json!({ "user_id": ada })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["chat_id"].as_str(), Some(chat_id.as_str()));

        let uri = format!("/chats/{}/messages", chat_id);
        let (status, sent) = t.call("POST", &uri, ada, Some(json!({ "content": "hi" }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(sent["edited"], json!(false));

        let (status, _) = t.call("POST", &uri, bob, Some(json!({ "content": " " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, listed) = t.call("GET", &uri, bob, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let outsider = t.user("eve");
        let (status, _) = t.call("GET", &uri, outsider, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, chats) = t.call("GET", "/chats", bob, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chats[0]["partner"]["display_name"], json!("ada"));
    }

    #[tokio::test]
    async fn group_lifecycle_over_http() {
        let t = TestApp::new().await;
        let (ada, bob, cy) = (t.user("ada"), t.user("bob"), t.user("cy"));

        let (status, created) = t
            .call(
                "POST",
                "/chats/group",
                ada,
                Some(json!({
                    "name": "Hikers",
                    "member_ids": [bob],
                    "avatar": { "file_name": "logo.png", "data": "cG5n" }
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let chat_id = created["chat_id"].as_str().unwrap().to_string();

        let (status, added) = t
            .call("POST", &format!("/chats/{}/members", chat_id), ada, Some(json!({ "user_ids": [cy] })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(added.as_array().unwrap().len(), 1);

        let (status, _) = t
            .call("DELETE", &format!("/chats/{}/members/{}", chat_id, cy), cy, None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = t.call("DELETE", &format!("/chats/{}", chat_id), bob, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, report) = t.call("DELETE", &format!("/chats/{}", chat_id), ada, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["attempts"], json!(1));
        assert_eq!(report["removed_objects"], json!(1));

        let (_, chats) = t.call("GET", "/chats", bob, None).await;
        assert!(chats.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn large_attachments_fit_in_the_body_limit() {
        use base64::Engine;

        let t = TestApp::new().await;
        let (ada, bob) = (t.user("ada"), t.user("bob"));
        let (_, created) = t
            .call("POST", "/chats/direct", ada, Some(json!({ "user_id": bob })))
            .await;
        let uri = format!("/chats/{}/messages", created["chat_id"].as_str().unwrap());

        let data = base64::engine::general_purpose::STANDARD.encode(vec![7u8; 3 * 1024 * 1024]);
        let (status, sent) = t
            .call(
                "POST",
                &uri,
                ada,
                Some(json!({ "attachment": { "file_name": "scan.pdf", "data": data } })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(sent["message"]["file_url"].as_str().unwrap().ends_with("-scan.pdf"));
    }

    #[tokio::test]
    async fn bad_attachment_encoding_is_rejected() {
        let t = TestApp::new().await;
        let (ada, bob) = (t.user("ada"), t.user("bob"));
        let (_, created) = t
            .call("POST", "/chats/direct", ada, Some(json!({ "user_id": bob })))
            .await;
        let uri = format!("/chats/{}/messages", created["chat_id"].as_str().unwrap());

        let (status, body) = t
            .call(
                "POST",
                &uri,
                ada,
                Some(json!({ "attachment": { "file_name": "a.png", "data": "not base64!" } })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("base64"));
    }
}
