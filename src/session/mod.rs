use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::{timeout, Duration},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{AuthSession, Authenticator},
    inference::{generate_chat_title, StudyModel, TurnRequest},
    model::{
        chat::{ChatSession, NEW_CHAT_TITLE, PENDING_CHAT_TITLE},
        message::{Attachment, Feedback, Message},
        now_ms,
        user::{ProfileUpdate, UserProfile},
    },
    prompts, render,
    store::{ChatStore, GuestStore},
};

pub mod events;

pub use events::SessionEvent;

/// External collaborators a session talks to.
#[derive(Clone)]
pub struct Services {
    pub model: Arc<dyn StudyModel>,
    pub store: Arc<dyn ChatStore>,
    pub guest: Arc<dyn GuestStore>,
    pub auth: Arc<dyn Authenticator>,
}

/// Everything one client sees: who it is, the open conversation and its history.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub device_hash: Option<String>,
    pub auth: Option<AuthSession>,
    pub profile: Option<UserProfile>,
    pub messages: Vec<Message>,
    pub history: Vec<ChatSession>,
    pub current_chat_id: Option<String>,
    pub loading: bool,
}

impl SessionState {
    pub fn is_guest(&self) -> bool {
        self.auth.is_none()
    }

    fn entry_mut(&mut self, chat_id: &str) -> Option<&mut ChatSession> {
        self.history.iter_mut().find(|chat| chat.id == chat_id)
    }
}

/// Per-client chat state. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct StudySession {
    services: Services,
    state: Arc<Mutex<SessionState>>,
    events: mpsc::Sender<SessionEvent>,
    titles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    // Serializes guest blob writes so the last snapshot taken is the last saved.
    persist: Arc<Mutex<()>>,
}

impl StudySession {
    pub fn new(services: Services, events: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            services,
            state: Arc::new(Mutex::new(SessionState::default())),
            events,
            titles: Arc::new(Mutex::new(Vec::new())),
            persist: Arc::new(Mutex::new(())),
        }
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    pub async fn is_registered(&self) -> bool {
        self.state.lock().await.device_hash.is_some()
    }

    // ------------------------------------------------------------
    // IDENTITY
    // ------------------------------------------------------------

    /// Bind the session to a device and, when the token resolves, an account.
    pub async fn start(&self, device_hash: &str, token: Option<&str>) -> Result<()> {
        self.state.lock().await.device_hash = Some(device_hash.to_string());

        let auth = match token.filter(|t| !t.trim().is_empty()) {
            Some(token) => match self.services.auth.get_session(token).await {
                Ok(session) => Some(session),
                Err(err) => {
                    warn!(device_hash, %err, "session token rejected, continuing as guest");
                    None
                }
            },
            None => None,
        };

        match auth {
            Some(session) => self.sign_in(session).await,
            None => {
                self.load_guest_data().await;
                self.emit_overview().await;
                Ok(())
            }
        }
    }

    pub async fn sign_in(&self, session: AuthSession) -> Result<()> {
        info!(user_id = session.user_id.as_str(), "session signed in");
        {
            let mut st = self.state.lock().await;
            st.auth = Some(session.clone());
            st.profile = None;
            st.messages.clear();
            st.current_chat_id = None;
        }
        self.load_user_data(&session).await;
        self.emit_overview().await;
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<()> {
        let previous = {
            let mut st = self.state.lock().await;
            let previous = st.auth.take();
            st.profile = None;
            st.history.clear();
            st.messages.clear();
            st.current_chat_id = None;
            previous
        };

        if let Some(session) = previous {
            if let Err(err) = self.services.auth.sign_out(&session).await {
                warn!(user_id = session.user_id.as_str(), %err, "sign out failed");
            }
        }

        self.load_guest_data().await;
        self.emit_overview().await;
        Ok(())
    }

    async fn load_user_data(&self, session: &AuthSession) {
        let profile = match self.services.auth.get_profile(session).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(user_id = session.user_id.as_str(), %err, "failed to load profile");
                None
            }
        };

        let chats = match self.services.store.get_chats(session).await {
            Ok(chats) => chats,
            Err(err) => {
                error!(user_id = session.user_id.as_str(), %err, "failed to fetch chats");
                Vec::new()
            }
        };

        let mut st = self.state.lock().await;
        if profile.is_some() {
            st.profile = profile;
        }
        st.history = chats;
    }

    async fn load_guest_data(&self) {
        let Some(device_hash) = self.state.lock().await.device_hash.clone() else {
            return;
        };

        let history = match self.services.guest.load(&device_hash).await {
            Ok(history) => history,
            Err(err) => {
                error!(device_hash = device_hash.as_str(), %err, "failed to load guest history");
                Vec::new()
            }
        };

        let mut st = self.state.lock().await;
        if st.is_guest() {
            st.history = history;
        }
    }

    // ------------------------------------------------------------
    // CHAT TURN
    // ------------------------------------------------------------

    /// Run one user turn end to end. Only rejected input is an error; model and
    /// persistence failures end up in the conversation or the log.
    pub async fn send_message(&self, text: &str, attachments: Vec<Attachment>) -> Result<()> {
        let (user_msg, turn_messages, current, auth, profile) = {
            let mut st = self.state.lock().await;
            if text.trim().is_empty() && attachments.is_empty() {
                bail!("empty_message");
            }
            if st.loading {
                bail!("turn_in_progress");
            }

            let user_msg = Message::user(text, attachments);
            st.messages.push(user_msg.clone());
            st.loading = true;
            (
                user_msg,
                st.messages.clone(),
                st.current_chat_id.clone(),
                st.auth.clone(),
                st.profile.clone(),
            )
        };

        self.emit(SessionEvent::Message {
            chat_id: current.clone(),
            message: user_msg.clone(),
        })
        .await;
        self.emit(SessionEvent::Loading { loading: true }).await;

        let is_new_chat = current.is_none();
        let chat_id = match current {
            Some(id) => id,
            None => {
                let id = self.open_chat(auth.as_ref()).await;
                self.state.lock().await.current_chat_id = Some(id.clone());
                self.emit(SessionEvent::ChatSelected {
                    chat_id: Some(id.clone()),
                })
                .await;
                id
            }
        };

        if let Some(session) = &auth {
            if let Err(err) = self
                .services
                .store
                .add_message(session, &chat_id, &user_msg)
                .await
            {
                error!(chat_id = chat_id.as_str(), %err, "failed to save user message");
            }
        }

        {
            let mut st = self.state.lock().await;
            if is_new_chat {
                st.history.insert(
                    0,
                    ChatSession::new(chat_id.clone(), PENDING_CHAT_TITLE, turn_messages.clone()),
                );
            } else if let Some(entry) = st.entry_mut(&chat_id) {
                entry.messages = turn_messages.clone();
                entry.timestamp = now_ms();
            }
        }
        self.history_changed().await;

        if is_new_chat {
            let context = prompts::title_context(text, !user_msg.attachments.is_empty());
            self.spawn_title(chat_id.clone(), context, auth.clone()).await;
        }

        let turn = TurnRequest {
            text: text.to_string(),
            attachments: user_msg.attachments.clone(),
            profile,
        };

        match self.stream_reply(&chat_id, &turn).await {
            Ok(reply) => {
                let model_msg = Message::model(reply);
                {
                    let mut st = self.state.lock().await;
                    if st.current_chat_id.as_deref() == Some(chat_id.as_str()) {
                        st.messages.push(model_msg.clone());
                    }
                }
                self.emit(SessionEvent::Message {
                    chat_id: Some(chat_id.clone()),
                    message: model_msg.clone(),
                })
                .await;

                if let Some(session) = &auth {
                    if let Err(err) = self
                        .services
                        .store
                        .add_message(session, &chat_id, &model_msg)
                        .await
                    {
                        error!(chat_id = chat_id.as_str(), %err, "failed to save model message");
                    }
                }

                {
                    let mut st = self.state.lock().await;
                    if let Some(entry) = st.entry_mut(&chat_id) {
                        let mut messages = turn_messages;
                        messages.push(model_msg);
                        entry.messages = messages;
                        entry.timestamp = now_ms();
                    }
                }
                self.history_changed().await;
            }
            Err(err) => {
                error!(chat_id = chat_id.as_str(), %err, "failed to send message");
                let error_msg = Message::error();
                {
                    let mut st = self.state.lock().await;
                    if st.current_chat_id.as_deref() == Some(chat_id.as_str()) {
                        st.messages.push(error_msg.clone());
                    }
                }
                self.emit(SessionEvent::Message {
                    chat_id: Some(chat_id.clone()),
                    message: error_msg,
                })
                .await;
            }
        }

        self.state.lock().await.loading = false;
        self.emit(SessionEvent::Loading { loading: false }).await;
        Ok(())
    }

    /// Id for a brand-new chat: a remote row when signed in, else a local uuid.
    async fn open_chat(&self, auth: Option<&AuthSession>) -> String {
        let Some(session) = auth else {
            return Uuid::new_v4().to_string();
        };

        match self.services.store.create_chat(session, NEW_CHAT_TITLE).await {
            Ok(id) => id,
            Err(err) => {
                error!(user_id = session.user_id.as_str(), %err, "failed to create chat, using local id");
                Uuid::new_v4().to_string()
            }
        }
    }

    async fn stream_reply(&self, chat_id: &str, turn: &TurnRequest) -> Result<String> {
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(64);

        let forwarder = {
            let session = self.clone();
            let chat_id = chat_id.to_string();
            tokio::spawn(async move {
                while let Some(text) = chunk_rx.recv().await {
                    session
                        .emit(SessionEvent::Chunk {
                            chat_id: chat_id.clone(),
                            text,
                        })
                        .await;
                }
            })
        };

        let result = self.services.model.reply(turn, Some(chunk_tx)).await;
        if let Err(err) = forwarder.await {
            warn!(chat_id, %err, "chunk forwarder failed");
        }
        result
    }

    async fn spawn_title(&self, chat_id: String, context: String, auth: Option<AuthSession>) {
        let session = self.clone();
        let handle = tokio::spawn(async move {
            let title = generate_chat_title(session.services.model.as_ref(), &context).await;

            let renamed = {
                let mut st = session.state.lock().await;
                match st.entry_mut(&chat_id) {
                    Some(entry) => {
                        entry.title = title.clone();
                        true
                    }
                    None => false,
                }
            };

            if let Some(user) = &auth {
                if let Err(err) = session
                    .services
                    .store
                    .update_chat_title(user, &chat_id, &title)
                    .await
                {
                    warn!(chat_id = chat_id.as_str(), %err, "failed to update chat title");
                }
            }

            debug!(chat_id = chat_id.as_str(), title = title.as_str(), renamed, "chat titled");
            if renamed {
                session.emit(SessionEvent::Title { chat_id, title }).await;
                session.history_changed().await;
            }
        });

        let mut titles = self.titles.lock().await;
        titles.retain(|h| !h.is_finished());
        titles.push(handle);
    }

    /// Wait until every title request started so far has settled.
    pub async fn wait_for_titles(&self) {
        let handles: Vec<_> = self.titles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(%err, "title task failed");
            }
        }
    }

    // ------------------------------------------------------------
    // CONVERSATION ACTIONS
    // ------------------------------------------------------------

    /// Rate a message. Returns the rating now in effect.
    pub async fn feedback(&self, message_id: &str, requested: Feedback) -> Result<Option<Feedback>> {
        let (value, chat_id, auth) = {
            let mut st = self.state.lock().await;
            let Some(msg) = st.messages.iter_mut().find(|m| m.id == message_id) else {
                bail!("message_not_found");
            };
            let value = Feedback::toggle(msg.feedback, requested);
            msg.feedback = value;

            let chat_id = st.current_chat_id.clone();
            if let Some(id) = &chat_id {
                if let Some(entry) = st.entry_mut(id) {
                    if let Some(m) = entry.messages.iter_mut().find(|m| m.id == message_id) {
                        m.feedback = value;
                    }
                }
            }
            (value, chat_id, st.auth.clone())
        };

        match (&auth, &chat_id) {
            (Some(session), Some(chat_id)) => {
                if let Err(err) = self
                    .services
                    .store
                    .set_feedback(session, chat_id, message_id, value)
                    .await
                {
                    warn!(chat_id = chat_id.as_str(), message_id, %err, "failed to save feedback");
                }
            }
            _ => self.persist_guest().await,
        }

        Ok(value)
    }

    pub async fn new_chat(&self) {
        {
            let mut st = self.state.lock().await;
            st.messages.clear();
            st.current_chat_id = None;
        }
        self.emit(SessionEvent::ChatSelected { chat_id: None }).await;
        self.emit(SessionEvent::Messages {
            chat_id: None,
            messages: Vec::new(),
        })
        .await;
    }

    pub async fn load_chat(&self, chat_id: &str) -> Result<()> {
        let (auth, cached) = {
            let st = self.state.lock().await;
            let cached = st
                .history
                .iter()
                .find(|c| c.id == chat_id)
                .map(|c| c.messages.clone());
            (st.auth.clone(), cached)
        };

        let messages = match &auth {
            Some(session) => {
                self.set_loading(true).await;
                self.state.lock().await.current_chat_id = Some(chat_id.to_string());
                let messages = match self.services.store.get_messages(session, chat_id).await {
                    Ok(messages) => messages,
                    Err(err) => {
                        error!(chat_id, %err, "failed to fetch messages");
                        Vec::new()
                    }
                };
                self.state.lock().await.loading = false;
                messages
            }
            None => match cached {
                Some(messages) => messages,
                None => bail!("chat_not_found"),
            },
        };

        {
            let mut st = self.state.lock().await;
            st.current_chat_id = Some(chat_id.to_string());
            st.messages = messages.clone();
        }

        self.emit(SessionEvent::ChatSelected {
            chat_id: Some(chat_id.to_string()),
        })
        .await;
        self.emit(SessionEvent::Messages {
            chat_id: Some(chat_id.to_string()),
            messages,
        })
        .await;
        if auth.is_some() {
            self.emit(SessionEvent::Loading { loading: false }).await;
        }
        Ok(())
    }

    pub async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        let auth = self.state.lock().await.auth.clone();
        if let Some(session) = &auth {
            if let Err(err) = self.services.store.delete_chat(session, chat_id).await {
                error!(chat_id, %err, "failed to delete chat");
            }
        }

        let was_current = {
            let mut st = self.state.lock().await;
            st.history.retain(|c| c.id != chat_id);
            let was_current = st.current_chat_id.as_deref() == Some(chat_id);
            if was_current {
                st.current_chat_id = None;
                st.messages.clear();
            }
            was_current
        };

        self.history_changed().await;
        if was_current {
            self.emit(SessionEvent::ChatSelected { chat_id: None }).await;
            self.emit(SessionEvent::Messages {
                chat_id: None,
                messages: Vec::new(),
            })
            .await;
        }
        Ok(())
    }

    pub async fn clear_history(&self) -> Result<()> {
        let (auth, device_hash) = {
            let st = self.state.lock().await;
            (st.auth.clone(), st.device_hash.clone())
        };

        match (&auth, &device_hash) {
            (Some(session), _) => {
                if let Err(err) = self.services.store.clear_history(session).await {
                    error!(user_id = session.user_id.as_str(), %err, "failed to clear history");
                }
            }
            (None, Some(device)) => {
                if let Err(err) = self.services.guest.clear(device).await {
                    error!(device_hash = device.as_str(), %err, "failed to clear guest history");
                }
            }
            (None, None) => {}
        }

        {
            let mut st = self.state.lock().await;
            st.history.clear();
            st.messages.clear();
            st.current_chat_id = None;
        }

        self.emit(SessionEvent::history(&[])).await;
        self.emit(SessionEvent::ChatSelected { chat_id: None }).await;
        self.emit(SessionEvent::Messages {
            chat_id: None,
            messages: Vec::new(),
        })
        .await;
        Ok(())
    }

    /// Merge a profile edit locally, then save it. Signed-in users only.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile> {
        let (session, profile) = {
            let mut st = self.state.lock().await;
            let Some(session) = st.auth.clone() else {
                bail!("login_required");
            };
            let Some(profile) = st.profile.as_mut() else {
                bail!("profile_not_loaded");
            };
            update.apply(profile);
            (session, profile.clone())
        };

        self.emit(SessionEvent::Profile {
            profile: Some(profile.clone()),
        })
        .await;
        self.emit(SessionEvent::Welcome {
            signed_in: true,
            welcome: render::welcome(Some(&profile)),
        })
        .await;

        if let Err(err) = self.services.auth.update_profile(&session, update).await {
            error!(user_id = session.user_id.as_str(), %err, "failed to save profile");
        }
        Ok(profile)
    }

    // ------------------------------------------------------------
    // HELPERS
    // ------------------------------------------------------------

    async fn set_loading(&self, loading: bool) {
        self.state.lock().await.loading = loading;
        self.emit(SessionEvent::Loading { loading }).await;
    }

    /// Publish the history and, for guests, write it back to the device blob.
    async fn history_changed(&self) {
        let history = self.state.lock().await.history.clone();
        self.emit(SessionEvent::history(&history)).await;
        self.persist_guest().await;
    }

    async fn persist_guest(&self) {
        let _guard = self.persist.lock().await;
        let (device_hash, history) = {
            let st = self.state.lock().await;
            match (&st.device_hash, st.is_guest()) {
                (Some(device), true) => (device.clone(), st.history.clone()),
                _ => return,
            }
        };

        if let Err(err) = self.services.guest.save(&device_hash, &history).await {
            error!(device_hash = device_hash.as_str(), %err, "failed to persist guest history");
        }
    }

    async fn emit_overview(&self) {
        let st = self.snapshot().await;
        self.emit(SessionEvent::Welcome {
            signed_in: !st.is_guest(),
            welcome: render::welcome(st.profile.as_ref()),
        })
        .await;
        self.emit(SessionEvent::Profile {
            profile: st.profile.clone(),
        })
        .await;
        self.emit(SessionEvent::history(&st.history)).await;
        self.emit(SessionEvent::ChatSelected {
            chat_id: st.current_chat_id.clone(),
        })
        .await;
        self.emit(SessionEvent::Messages {
            chat_id: st.current_chat_id,
            messages: st.messages,
        })
        .await;
    }

    async fn emit(&self, event: SessionEvent) {
        match timeout(Duration::from_secs(2), self.events.send(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => debug!("session event receiver closed"),
            Err(_) => warn!("session event dropped, receiver too slow"),
        }
    }
}
