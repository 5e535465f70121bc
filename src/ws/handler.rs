use std::sync::Arc;

use anyhow::{anyhow, bail};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::State;
use axum::{response::IntoResponse, routing::get, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::attachments::{self, IncomingAttachment};
use crate::auth::{self, types::AuthResponse, SignUpMetadata};
use crate::config::AppConfig;
use crate::model::{message::Feedback, user::ProfileUpdate};
use crate::render::{format_time, render_markdown};
use crate::session::{Services, SessionEvent, StudySession};
use crate::storage::StorageService;

// ------------------------------------------------------------
// TYPES
// ------------------------------------------------------------
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: Arc<StorageService>,
    pub services: Services,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    Register {
        device_hash: String,
        #[serde(default)]
        token: Option<String>,
    },
    Prompt {
        #[serde(default)]
        text: String,
        #[serde(default)]
        attachments: Vec<IncomingAttachment>,
    },
    NewChat,
    LoadChat {
        chat_id: String,
    },
    DeleteChat {
        chat_id: String,
    },
    Feedback {
        message_id: String,
        feedback: Feedback,
    },
    ClearHistory,
    UpdateProfile {
        profile: ProfileUpdate,
    },
    SignIn {
        email: String,
        password: String,
    },
    SignUp {
        email: String,
        password: String,
        full_name: String,
        university: String,
        program: String,
    },
    SignOut,
}

impl ClientMsg {
    fn kind(&self) -> &'static str {
        match self {
            ClientMsg::Register { .. } => "register",
            ClientMsg::Prompt { .. } => "prompt",
            ClientMsg::NewChat => "new_chat",
            ClientMsg::LoadChat { .. } => "load_chat",
            ClientMsg::DeleteChat { .. } => "delete_chat",
            ClientMsg::Feedback { .. } => "feedback",
            ClientMsg::ClearHistory => "clear_history",
            ClientMsg::UpdateProfile { .. } => "update_profile",
            ClientMsg::SignIn { .. } => "sign_in",
            ClientMsg::SignUp { .. } => "sign_up",
            ClientMsg::SignOut => "sign_out",
        }
    }
}

// ------------------------------------------------------------
// ROUTER
// ------------------------------------------------------------
pub fn ws_router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(
    ws: axum::extract::WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ------------------------------------------------------------
// WEBSOCKET HANDLER (SPLIT SOCKET)
// ------------------------------------------------------------
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(32);

    // Dedicated writer task keeps websocket flushing smoothly.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match timeout(Duration::from_secs(5), ws_sender.send(msg)).await {
                Ok(Ok(_)) => {}
                Ok(Err(_)) => break,
                Err(_) => continue,
            }
        }
    });

    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(64);
    let session = StudySession::new(state.services.clone(), event_tx);

    // Session events → socket.
    let pump = {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if send_json(&tx, event_payload(&event)).await.is_err() {
                    break;
                }
            }
        })
    };

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            WsMessage::Text(raw) => {
                let parsed: ClientMsg = match serde_json::from_str(raw.as_str()) {
                    Ok(v) => v,
                    Err(err) => {
                        debug!(%err, "unparseable ws message");
                        if send_json(&tx, json_error("Invalid JSON")).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                info!(msg_type = parsed.kind(), "incoming ws message");

                if let Err(err) = dispatch(parsed, &session, &state, &tx).await {
                    warn!(%err, "ws request failed");
                    if send_json(&tx, json_error(&err.to_string())).await.is_err() {
                        break;
                    }
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    debug!("ws connection closed");
    pump.abort();
    writer.abort();
}

async fn dispatch(
    msg: ClientMsg,
    session: &StudySession,
    state: &AppState,
    tx: &mpsc::Sender<WsMessage>,
) -> anyhow::Result<()> {
    match msg {
        ClientMsg::Register { device_hash, token } => {
            if device_hash.trim().is_empty() {
                bail!("device_hash_required");
            }
            session.start(&device_hash, token.as_deref()).await?;
            send_json(
                tx,
                serde_json::json!({
                    "type": "system",
                    "event": "registered",
                    "device_hash": device_hash,
                }),
            )
            .await?;
        }

        ClientMsg::Prompt {
            text,
            attachments: incoming,
        } => {
            if !session.is_registered().await {
                bail!("register_required");
            }

            let mut prepared = Vec::with_capacity(incoming.len());
            for att in &incoming {
                let attachment =
                    attachments::prepare(att, &state.storage, state.config.max_attachment_bytes)
                        .await?;
                debug!(attachment = %attachments::describe(&attachment), "attachment prepared");
                prepared.push(attachment);
            }

            // Detached so the socket keeps reading while the model replies.
            let session = session.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(err) = session.send_message(&text, prepared).await {
                    let _ = send_json(&tx, json_error(&err.to_string())).await;
                }
            });
        }

        ClientMsg::NewChat => session.new_chat().await,
        ClientMsg::LoadChat { chat_id } => session.load_chat(&chat_id).await?,
        ClientMsg::DeleteChat { chat_id } => session.delete_chat(&chat_id).await?,

        ClientMsg::Feedback {
            message_id,
            feedback,
        } => {
            let value = session.feedback(&message_id, feedback).await?;
            send_json(
                tx,
                serde_json::json!({
                    "type": "feedback",
                    "message_id": message_id,
                    "feedback": value,
                }),
            )
            .await?;
        }

        ClientMsg::ClearHistory => session.clear_history().await?,

        ClientMsg::UpdateProfile { profile } => {
            session.update_profile(&profile).await?;
        }

        ClientMsg::SignIn { email, password } => {
            let auth_session =
                auth::sign_in(state.services.auth.as_ref(), &email, &password).await?;
            send_signed_in(tx, AuthResponse::from(auth_session.clone())).await?;
            session.sign_in(auth_session).await?;
        }

        ClientMsg::SignUp {
            email,
            password,
            full_name,
            university,
            program,
        } => {
            let metadata = SignUpMetadata {
                full_name,
                university,
                program,
            };
            let auth_session = auth::register_and_sign_in(
                state.services.auth.as_ref(),
                &email,
                &password,
                &metadata,
            )
            .await?;
            send_signed_in(tx, AuthResponse::from(auth_session.clone())).await?;
            session.sign_in(auth_session).await?;
        }

        ClientMsg::SignOut => session.sign_out().await?,
    }

    Ok(())
}

async fn send_signed_in(
    sender: &mpsc::Sender<WsMessage>,
    auth: AuthResponse,
) -> anyhow::Result<()> {
    let mut value = serde_json::to_value(&auth)?;
    value["type"] = "signed_in".into();
    send_json(sender, value).await
}

/// Wire form of a session event. Appended messages also carry their rendered
/// HTML and a display time.
pub fn event_payload(event: &SessionEvent) -> serde_json::Value {
    let mut value = serde_json::to_value(event).unwrap_or_else(|err| json_error(&err.to_string()));
    if let SessionEvent::Message { message, .. } = event {
        value["html"] = render_markdown(&message.text).into();
        value["time"] = format_time(message.timestamp).into();
    }
    value
}

// ------------------------------------------------------------
// SEND JSON WRAPPER
// ------------------------------------------------------------
async fn send_json(
    sender: &mpsc::Sender<WsMessage>,
    value: serde_json::Value,
) -> anyhow::Result<()> {
    let msg = WsMessage::Text(value.to_string().into());

    match timeout(Duration::from_secs(2), sender.send(msg)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => Err(anyhow!("ws channel closed")),
        Err(_) => Ok(()),
    }
}

fn json_error(msg: &str) -> serde_json::Value {
    serde_json::to_value(SessionEvent::error(msg)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::auth::LocalAuth;
    use crate::db::DBLayer;
    use crate::inference::{StudyModel, TurnRequest};
    use crate::model::message::Message;

    #[derive(Default)]
    struct CountingModel {
        replies: AtomicUsize,
    }

    #[async_trait]
    impl StudyModel for CountingModel {
        async fn reply(
            &self,
            turn: &TurnRequest,
            _: Option<mpsc::Sender<String>>,
        ) -> anyhow::Result<String> {
            self.replies.fetch_add(1, Ordering::SeqCst);
            Ok(turn.text.clone())
        }

        async fn title(&self, context: &str) -> anyhow::Result<String> {
            Ok(context.to_string())
        }
    }

    async fn state(dir: &TempDir, model: Arc<CountingModel>) -> AppState {
        let db = Arc::new(DBLayer::new(dir.path().join("db")).unwrap());
        let mut config = AppConfig::from_lookup(|key| {
            (key == "GEMINI_API_KEY").then(|| "test-key".to_string())
        })
        .unwrap();
        config.storage_dir = dir.path().join("uploads");
        let storage = StorageService::new(&config.storage_dir).await.unwrap();

        AppState {
            config: Arc::new(config),
            storage: Arc::new(storage),
            services: Services {
                model,
                store: db.clone(),
                guest: db.clone(),
                auth: Arc::new(LocalAuth::new(db, "test-secret")),
            },
        }
    }

    #[tokio::test]
    async fn prompt_before_register_is_refused() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(CountingModel::default());
        let state = state(&dir, model.clone()).await;
        let (events_tx, _events_rx) = mpsc::channel(64);
        let session = StudySession::new(state.services.clone(), events_tx);
        let (tx, mut rx) = mpsc::channel(8);

        let prompt = || ClientMsg::Prompt {
            text: "hi".into(),
            attachments: vec![],
        };
        let err = dispatch(prompt(), &session, &state, &tx).await.unwrap_err();

        assert_eq!(err.to_string(), "register_required");
        assert_eq!(json_error(&err.to_string())["message"], "register_required");
        assert!(session.snapshot().await.messages.is_empty());
        assert_eq!(model.replies.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());

        let register = ClientMsg::Register {
            device_hash: "device-1".into(),
            token: None,
        };
        dispatch(register, &session, &state, &tx).await.unwrap();
        match rx.recv().await {
            Some(WsMessage::Text(text)) => assert!(text.as_str().contains("registered")),
            _ => panic!("expected registered frame"),
        }
        dispatch(prompt(), &session, &state, &tx).await.unwrap();
        for _ in 0..100 {
            if model.replies.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(model.replies.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn client_messages_parse_by_type() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"prompt","text":"hi","attachments":[{"mimeType":"image/png","dataBase64":"AA=="}]}"#,
        )
        .unwrap();
        match msg {
            ClientMsg::Prompt { text, attachments } => {
                assert_eq!(text, "hi");
                assert_eq!(attachments[0].mime_type, "image/png");
            }
            _ => panic!("expected prompt"),
        }

        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"feedback","message_id":"m1","feedback":"negative"}"#)
                .unwrap();
        assert_eq!(msg.kind(), "feedback");

        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"update_profile","profile":{"program":"Bachelor in Nursing"}}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMsg::UpdateProfile { profile } if profile.program.is_some()));

        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"unknown"}"#).is_err());
    }

    #[test]
    fn message_events_carry_html_and_time() {
        let event = SessionEvent::Message {
            chat_id: Some("c1".into()),
            message: Message::model("**bold**"),
        };
        let value = event_payload(&event);
        assert_eq!(value["type"], "message");
        assert_eq!(value["message"]["role"], "model");
        assert!(value["html"].as_str().unwrap().contains("<strong>bold</strong>"));
        assert_eq!(value["time"].as_str().unwrap().len(), 5);

        let value = event_payload(&SessionEvent::Loading { loading: true });
        assert!(value.get("html").is_none());

        let value = json_error("register_required");
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "register_required");
    }
}
