use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};

use crate::ws::AppState;

pub mod auth;
pub mod handlers;
pub mod storage;
pub mod types;

use handlers::{
    catalog, clear_chats, clear_guest_history, current_session, delete_chat, get_profile,
    guest_history, health, list_chats, list_messages_for_chat, render, sign_in, sign_out, sign_up,
    update_profile,
};
use storage::{get_file, upload_file};

/// REST surface next to the websocket. Account routes take a bearer token.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Auth
        .route("/api/auth/signup", post(sign_up))
        .route("/api/auth/signin", post(sign_in))
        .route("/api/auth/signout", post(sign_out))
        .route("/api/auth/session", get(current_session))
        .route("/api/profile", get(get_profile).patch(update_profile))
        // Account chats
        .route("/api/chats", get(list_chats).delete(clear_chats))
        .route("/api/chats/{chat_id}", delete(delete_chat))
        .route("/api/chats/{chat_id}/messages", get(list_messages_for_chat))
        // Guest device history
        .route(
            "/api/guest/{device_hash}/history",
            get(guest_history).delete(clear_guest_history),
        )
        // Files
        .route(
            "/api/storage/upload",
            post(upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/storage/files/{filename}", get(get_file))
        .route("/api/catalog", get(catalog))
        .route("/api/render", post(render))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use crate::{
        auth::LocalAuth,
        config::AppConfig,
        db::DBLayer,
        inference::{StudyModel, TurnRequest},
        model::{chat::ChatSession, message::Message},
        session::Services,
        storage::StorageService,
        store::GuestStore,
    };

    struct Echo;

    #[async_trait]
    impl StudyModel for Echo {
        async fn reply(&self, turn: &TurnRequest, _: Option<mpsc::Sender<String>>) -> Result<String> {
            Ok(turn.text.clone())
        }

        async fn title(&self, context: &str) -> Result<String> {
            Ok(context.to_string())
        }
    }

    async fn app() -> (TempDir, Arc<DBLayer>, Router) {
        app_with_limit(1024).await
    }

    async fn app_with_limit(max_attachment_bytes: usize) -> (TempDir, Arc<DBLayer>, Router) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(DBLayer::new(dir.path().join("db")).unwrap());
        let mut config = AppConfig::from_lookup(|key| {
            (key == "GEMINI_API_KEY").then(|| "test-key".to_string())
        })
        .unwrap();
        config.storage_dir = dir.path().join("uploads");
        config.max_attachment_bytes = max_attachment_bytes;

        let storage = StorageService::new(&config.storage_dir).await.unwrap();
        let state = AppState {
            config: Arc::new(config),
            storage: Arc::new(storage),
            services: Services {
                model: Arc::new(Echo),
                store: db.clone(),
                guest: db.clone(),
                auth: Arc::new(LocalAuth::new(db.clone(), "test-secret")),
            },
        };
        (dir, db, router().with_state(state))
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let body = res.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn sign_up(app: &Router) -> String {
        let (status, body) = call(
            app,
            json_request(
                "POST",
                "/api/auth/signup",
                None,
                json!({
                    "email": "Ruth@Example.com",
                    "password": "secret1",
                    "full_name": "Ruth Tembo",
                    "university": "Mukuba University",
                    "program": "Bachelor in Nursing"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["email"], "ruth@example.com");
        value["access_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_dir, _db, app) = app().await;
        let (status, body) = call(&app, get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn account_routes_need_a_valid_token() {
        let (_dir, _db, app) = app().await;

        let (status, body) = call(&app, get("/api/chats", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, b"login_required");

        let (status, body) = call(&app, get("/api/chats", Some("forged"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, b"invalid_token");

        let token = sign_up(&app).await;
        let (status, body) = call(&app, get("/api/chats", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert!(value["chats"].as_array().unwrap().is_empty());

        let (status, body) = call(&app, get("/api/auth/session", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["email"], "ruth@example.com");
    }

    #[tokio::test]
    async fn sign_in_and_profile_round_trip() {
        let (_dir, _db, app) = app().await;
        sign_up(&app).await;

        let (status, _) = call(
            &app,
            json_request(
                "POST",
                "/api/auth/signin",
                None,
                json!({ "email": "ruth@example.com", "password": "wrong-one" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &app,
            json_request(
                "POST",
                "/api/auth/signin",
                None,
                json!({ "email": "ruth@example.com", "password": "secret1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = serde_json::from_slice::<Value>(&body).unwrap()["access_token"]
            .as_str()
            .unwrap()
            .to_string();

        let (status, body) = call(
            &app,
            json_request(
                "PATCH",
                "/api/profile",
                Some(&token),
                json!({ "university": "Chalimbana University (CHAU)" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let profile: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(profile["university"], "Chalimbana University (CHAU)");
        assert_eq!(profile["program"], "Bachelor in Nursing");

        let (status, _) = call(&app, get("/api/profile", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_chat_is_not_found() {
        let (_dir, _db, app) = app().await;
        let token = sign_up(&app).await;
        let (status, body) = call(&app, get("/api/chats/nope/messages", Some(&token))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, b"chat_not_found");
    }

    #[tokio::test]
    async fn guest_history_can_be_read_and_cleared() {
        let (_dir, db, app) = app().await;
        let history = vec![ChatSession::new("c1", "Cells", vec![Message::model("hi")])];
        GuestStore::save(db.as_ref(), "dev-9", &history).await.unwrap();

        let (status, body) = call(&app, get("/api/guest/dev-9/history", None)).await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["chats"][0]["title"], "Cells");

        let req = Request::builder()
            .method("DELETE")
            .uri("/api/guest/dev-9/history")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(GuestStore::load(db.as_ref(), "dev-9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn uploads_are_stored_and_served() {
        let (_dir, _db, app) = app().await;
        let (status, body) = call(
            &app,
            json_request(
                "POST",
                "/api/storage/upload",
                None,
                json!({
                    "filename": "notes.pdf",
                    "mime_type": "application/pdf",
                    "data_base64": "data:application/pdf;base64,JVBERi0xLjQ="
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["type"], "pdf");
        let url = value["url"].as_str().unwrap().to_string();
        assert!(url.ends_with(".pdf"));

        let res = app.clone().oneshot(get(&url, None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/pdf");
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"%PDF-1.4");
    }

    #[tokio::test]
    async fn unsupported_or_oversized_uploads_are_rejected() {
        let (_dir, _db, app) = app().await;
        let (status, _) = call(
            &app,
            json_request(
                "POST",
                "/api/storage/upload",
                None,
                json!({ "mime_type": "text/plain", "data_base64": "aGVsbG8=" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        use base64::Engine;
        let big = base64::engine::general_purpose::STANDARD.encode(vec![0u8; 2048]);
        let (status, _) = call(
            &app,
            json_request(
                "POST",
                "/api/storage/upload",
                None,
                json!({ "mime_type": "image/png", "data_base64": big }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    fn multipart_upload(filename: &str, mime: &str, bytes: &[u8]) -> Request<Body> {
        const BOUNDARY: &str = "learnova-boundary";
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {mime}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/storage/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn multipart_uploads_above_two_mib_are_accepted_up_to_the_cap() {
        let (_dir, _db, app) = app_with_limit(4 * 1024 * 1024).await;

        let three_mib = vec![7u8; 3 * 1024 * 1024];
        let (status, body) = call(&app, multipart_upload("scan.png", "image/png", &three_mib)).await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["size"], 3 * 1024 * 1024);
        assert_eq!(value["type"], "image");

        let five_mib = vec![7u8; 5 * 1024 * 1024];
        let (status, body) = call(&app, multipart_upload("scan.png", "image/png", &five_mib)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body, b"file_too_large");
    }

    #[tokio::test]
    async fn catalog_and_render() {
        let (_dir, _db, app) = app().await;
        let (_, body) = call(&app, get("/api/catalog", None)).await;
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert!(value["universities"]
            .as_array()
            .unwrap()
            .iter()
            .any(|u| u == "University of Zambia (UNZA)"));

        let (status, body) = call(
            &app,
            json_request("POST", "/api/render", None, json!({ "text": "# Heading" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert!(value["html"].as_str().unwrap().contains("<h1>Heading</h1>"));
    }
}
