use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthSession,
    db::DBLayer,
    model::{
        chat::{ChatRecord, ChatSession},
        message::{Feedback, Message},
        now_ms,
    },
};

/// Account-scoped chat persistence.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Chats of the signed-in user, most recently updated first, messages empty.
    async fn get_chats(&self, user: &AuthSession) -> Result<Vec<ChatSession>>;

    /// Messages of one chat, oldest first.
    async fn get_messages(&self, user: &AuthSession, chat_id: &str) -> Result<Vec<Message>>;

    /// Create a chat and return its id.
    async fn create_chat(&self, user: &AuthSession, title: &str) -> Result<String>;

    async fn update_chat_title(&self, user: &AuthSession, chat_id: &str, title: &str)
        -> Result<()>;

    /// Append a message and bump the chat's update time.
    async fn add_message(&self, user: &AuthSession, chat_id: &str, message: &Message)
        -> Result<()>;

    async fn set_feedback(
        &self,
        user: &AuthSession,
        chat_id: &str,
        message_id: &str,
        feedback: Option<Feedback>,
    ) -> Result<()>;

    async fn delete_chat(&self, user: &AuthSession, chat_id: &str) -> Result<()>;

    async fn clear_history(&self, user: &AuthSession) -> Result<()>;
}

/// Device-scoped history for guests, kept as one blob per device.
#[async_trait]
pub trait GuestStore: Send + Sync {
    async fn load(&self, device_hash: &str) -> Result<Vec<ChatSession>>;

    async fn save(&self, device_hash: &str, history: &[ChatSession]) -> Result<()>;

    async fn clear(&self, device_hash: &str) -> Result<()>;
}

impl DBLayer {
    /// The chat row, provided it belongs to `user_id`.
    async fn owned_chat(&self, user_id: &str, chat_id: &str) -> Result<ChatRecord> {
        match self.load_chat(chat_id).await? {
            Some(chat) if chat.user_id == user_id => Ok(chat),
            _ => bail!("chat_not_found"),
        }
    }
}

#[async_trait]
impl ChatStore for DBLayer {
    async fn get_chats(&self, user: &AuthSession) -> Result<Vec<ChatSession>> {
        Ok(self
            .list_chats_for_user(&user.user_id)
            .await?
            .into_iter()
            .map(ChatSession::from)
            .collect())
    }

    async fn get_messages(&self, user: &AuthSession, chat_id: &str) -> Result<Vec<Message>> {
        self.owned_chat(&user.user_id, chat_id).await?;
        self.list_messages_for_chat(chat_id).await
    }

    async fn create_chat(&self, user: &AuthSession, title: &str) -> Result<String> {
        let now = now_ms();
        let chat = ChatRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user.user_id.clone(),
            title: title.to_string(),
            created_ts: now,
            updated_ts: now,
        };
        self.save_chat(&chat).await?;
        info!(chat_id = chat.id.as_str(), user_id = user.user_id.as_str(), "chat created");
        Ok(chat.id)
    }

    async fn update_chat_title(
        &self,
        user: &AuthSession,
        chat_id: &str,
        title: &str,
    ) -> Result<()> {
        self.owned_chat(&user.user_id, chat_id).await?;
        self.rename_chat(chat_id, title).await?;
        Ok(())
    }

    async fn add_message(
        &self,
        user: &AuthSession,
        chat_id: &str,
        message: &Message,
    ) -> Result<()> {
        self.owned_chat(&user.user_id, chat_id).await?;
        self.save_message(chat_id, message).await?;
        self.touch_chat(chat_id, now_ms()).await?;
        Ok(())
    }

    async fn set_feedback(
        &self,
        user: &AuthSession,
        chat_id: &str,
        message_id: &str,
        feedback: Option<Feedback>,
    ) -> Result<()> {
        self.owned_chat(&user.user_id, chat_id).await?;
        if !self.set_message_feedback(chat_id, message_id, feedback).await? {
            bail!("message_not_found");
        }
        Ok(())
    }

    async fn delete_chat(&self, user: &AuthSession, chat_id: &str) -> Result<()> {
        self.owned_chat(&user.user_id, chat_id).await?;
        self.delete_thread(chat_id).await
    }

    async fn clear_history(&self, user: &AuthSession) -> Result<()> {
        let removed = self.delete_chats_for_user(&user.user_id).await?;
        info!(user_id = user.user_id.as_str(), removed, "history cleared");
        Ok(())
    }
}

#[async_trait]
impl GuestStore for DBLayer {
    async fn load(&self, device_hash: &str) -> Result<Vec<ChatSession>> {
        match self.load_guest_history(device_hash).await {
            Ok(history) => Ok(history.unwrap_or_default()),
            Err(err) => {
                warn!(device_hash, %err, "unreadable guest history, starting empty");
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, device_hash: &str, history: &[ChatSession]) -> Result<()> {
        self.save_guest_history(device_hash, history).await
    }

    async fn clear(&self, device_hash: &str) -> Result<()> {
        self.clear_guest_history(device_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, DBLayer) {
        let dir = TempDir::new().unwrap();
        let db = DBLayer::new(dir.path().join("db")).unwrap();
        (dir, db)
    }

    fn user(id: &str) -> AuthSession {
        AuthSession {
            user_id: id.into(),
            email: None,
            access_token: "tok".into(),
        }
    }

    #[tokio::test]
    async fn chats_are_scoped_to_their_owner() {
        let (_dir, db) = open();
        let alice = user("alice");
        let bob = user("bob");

        let chat_id = db.create_chat(&alice, "New Conversation").await.unwrap();
        db.add_message(&alice, &chat_id, &Message::user("hi", Vec::new()))
            .await
            .unwrap();

        assert_eq!(db.get_chats(&alice).await.unwrap().len(), 1);
        assert!(db.get_chats(&bob).await.unwrap().is_empty());
        assert!(db.get_messages(&bob, &chat_id).await.is_err());
        assert!(db.delete_chat(&bob, &chat_id).await.is_err());
        assert!(db
            .add_message(&bob, &chat_id, &Message::model("nope"))
            .await
            .is_err());

        assert_eq!(db.get_messages(&alice, &chat_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn adding_a_message_moves_chat_to_front() {
        let (_dir, db) = open();
        let alice = user("alice");

        let first = db.create_chat(&alice, "first").await.unwrap();
        let second = db.create_chat(&alice, "second").await.unwrap();
        db.touch_chat(&second, 1_000).await.unwrap();
        db.touch_chat(&first, 500).await.unwrap();

        let ids: Vec<_> = db.get_chats(&alice).await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![second.clone(), first.clone()]);

        db.add_message(&alice, &first, &Message::model("update"))
            .await
            .unwrap();
        let chats = db.get_chats(&alice).await.unwrap();
        assert_eq!(chats[0].id, first);
        assert!(chats[0].messages.is_empty());
    }

    #[tokio::test]
    async fn title_feedback_and_clear() {
        let (_dir, db) = open();
        let alice = user("alice");
        let chat_id = db.create_chat(&alice, "New Conversation").await.unwrap();
        let reply = Message::model("answer");
        db.add_message(&alice, &chat_id, &reply).await.unwrap();

        db.update_chat_title(&alice, &chat_id, "Supply and Demand")
            .await
            .unwrap();
        db.set_feedback(&alice, &chat_id, &reply.id, Some(Feedback::Negative))
            .await
            .unwrap();
        assert!(db
            .set_feedback(&alice, &chat_id, "missing", Some(Feedback::Negative))
            .await
            .is_err());

        let chats = db.get_chats(&alice).await.unwrap();
        assert_eq!(chats[0].title, "Supply and Demand");
        let messages = db.get_messages(&alice, &chat_id).await.unwrap();
        assert_eq!(messages[0].feedback, Some(Feedback::Negative));

        ChatStore::clear_history(&db, &alice).await.unwrap();
        assert!(db.get_chats(&alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn guest_history_round_trips_and_tolerates_corruption() {
        let (_dir, db) = open();
        assert!(GuestStore::load(&db, "device-1").await.unwrap().is_empty());

        let history = vec![ChatSession::new(
            "c1",
            "Photosynthesis",
            vec![Message::user("explain", Vec::new())],
        )];
        GuestStore::save(&db, "device-1", &history).await.unwrap();
        assert_eq!(GuestStore::load(&db, "device-1").await.unwrap(), history);
        assert!(GuestStore::load(&db, "device-2").await.unwrap().is_empty());

        db.put_raw("guest_history:device-1", b"{not json").unwrap();
        assert!(GuestStore::load(&db, "device-1").await.unwrap().is_empty());

        GuestStore::save(&db, "device-1", &history).await.unwrap();
        GuestStore::clear(&db, "device-1").await.unwrap();
        assert!(GuestStore::load(&db, "device-1").await.unwrap().is_empty());
    }
}
