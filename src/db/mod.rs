use std::{cmp::Reverse, path::Path, str};

use anyhow::Result;
use rocksdb::{Direction, IteratorMode, Options, DB};
use serde::{de::DeserializeOwned, Serialize};

use crate::model::{
    chat::{ChatRecord, ChatSession},
    message::{Feedback, Message},
    user::{LocalUser, UserProfile},
};

type Entry = (Box<[u8]>, Box<[u8]>);

/// Embedded rocksdb store behind the local backend and guest history.
pub struct DBLayer {
    db: DB,
}

impl DBLayer {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    // ============================================================
    // KEYS
    // ============================================================
    fn msg_prefix(chat_id: &str) -> String {
        format!("chat:{chat_id}:msg:")
    }

    fn msg_key(chat_id: &str, ts: i64, id: &str) -> String {
        // 020 → zero-padded timestamp for correct sorting
        format!("{}{:020}:{id}", Self::msg_prefix(chat_id), ts.max(0))
    }

    fn chat_meta_key(chat_id: &str) -> String {
        format!("chat:meta:{chat_id}")
    }

    fn user_chat_prefix(user_id: &str) -> String {
        format!("user_chat:{user_id}:")
    }

    fn user_chat_key(user_id: &str, chat_id: &str) -> String {
        format!("{}{chat_id}", Self::user_chat_prefix(user_id))
    }

    fn user_key(user_id: &str) -> String {
        format!("user:{user_id}")
    }

    fn email_key(email: &str) -> String {
        format!("user_email:{email}")
    }

    fn profile_key(user_id: &str) -> String {
        format!("profile:{user_id}")
    }

    fn guest_key(device_hash: &str) -> String {
        format!("guest_history:{device_hash}")
    }

    // ============================================================
    // HELPERS
    // ============================================================
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward))
        {
            let (key, val) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            out.push((key, val));
        }
        Ok(out)
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.db
            .get(key)?
            .map(|val| serde_json::from_slice(&val))
            .transpose()
            .map_err(Into::into)
    }

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.db.put(key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    // ============================================================
    // USER STORAGE
    // ============================================================
    pub async fn save_user(&self, user: &LocalUser) -> Result<()> {
        self.put_json(&Self::user_key(&user.id), user)?;
        self.db.put(Self::email_key(&user.email), user.id.as_bytes())?;
        Ok(())
    }

    pub async fn load_user(&self, id: &str) -> Result<Option<LocalUser>> {
        self.get_json(&Self::user_key(id))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<LocalUser>> {
        let Some(id) = self.db.get(Self::email_key(email))? else {
            return Ok(None);
        };
        let id = str::from_utf8(&id)?;
        self.load_user(id).await
    }

    pub async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        self.put_json(&Self::profile_key(&profile.id), profile)
    }

    pub async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        self.get_json(&Self::profile_key(user_id))
    }

    // ============================================================
    // CHAT STORAGE
    // ============================================================
    pub async fn save_chat(&self, chat: &ChatRecord) -> Result<()> {
        if let Some(previous) = self.load_chat(&chat.id).await? {
            if previous.user_id != chat.user_id {
                self.db
                    .delete(Self::user_chat_key(&previous.user_id, &chat.id))?;
            }
        }
        self.put_json(&Self::chat_meta_key(&chat.id), chat)?;
        self.db
            .put(Self::user_chat_key(&chat.user_id, &chat.id), chat.id.as_bytes())?;
        Ok(())
    }

    pub async fn load_chat(&self, id: &str) -> Result<Option<ChatRecord>> {
        self.get_json(&Self::chat_meta_key(id))
    }

    /// Chats owned by a user, most recently updated first.
    pub async fn list_chats_for_user(&self, user_id: &str) -> Result<Vec<ChatRecord>> {
        let prefix = Self::user_chat_prefix(user_id);
        let mut chats = Vec::new();

        for (key, _) in self.scan_prefix(&prefix)? {
            let chat_id = &str::from_utf8(&key)?[prefix.len()..];
            match self.load_chat(chat_id).await? {
                Some(chat) => chats.push(chat),
                // Stale index entry left behind by an interrupted delete.
                None => self.db.delete(&key)?,
            }
        }

        chats.sort_by_key(|c| Reverse(c.updated_ts));
        Ok(chats)
    }

    pub async fn touch_chat(&self, chat_id: &str, ts: i64) -> Result<bool> {
        let Some(mut chat) = self.load_chat(chat_id).await? else {
            return Ok(false);
        };
        chat.updated_ts = ts;
        self.put_json(&Self::chat_meta_key(chat_id), &chat)?;
        Ok(true)
    }

    pub async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<bool> {
        let Some(mut chat) = self.load_chat(chat_id).await? else {
            return Ok(false);
        };
        chat.title = title.to_string();
        self.put_json(&Self::chat_meta_key(chat_id), &chat)?;
        Ok(true)
    }

    /// Delete all messages (and chat metadata) for a chat id.
    pub async fn delete_thread(&self, chat_id: &str) -> Result<()> {
        let existing = self.load_chat(chat_id).await?;

        for (key, _) in self.scan_prefix(&Self::msg_prefix(chat_id))? {
            self.db.delete(key)?;
        }

        self.db.delete(Self::chat_meta_key(chat_id))?;

        if let Some(chat) = existing {
            self.db.delete(Self::user_chat_key(&chat.user_id, chat_id))?;
        }

        Ok(())
    }

    pub async fn delete_chats_for_user(&self, user_id: &str) -> Result<usize> {
        let chats = self.list_chats_for_user(user_id).await?;
        for chat in &chats {
            self.delete_thread(&chat.id).await?;
        }
        Ok(chats.len())
    }

    // ============================================================
    // MESSAGE STORAGE (CHAT-ORDERED)
    // ============================================================
    pub async fn save_message(&self, chat_id: &str, msg: &Message) -> Result<()> {
        self.put_json(&Self::msg_key(chat_id, msg.timestamp, &msg.id), msg)
    }

    pub async fn list_messages_for_chat(&self, chat_id: &str) -> Result<Vec<Message>> {
        self.scan_prefix(&Self::msg_prefix(chat_id))?
            .into_iter()
            .map(|(_, val)| serde_json::from_slice(&val).map_err(Into::into))
            .collect()
    }

    fn find_message_entry(&self, chat_id: &str, message_id: &str) -> Result<Option<(Box<[u8]>, Message)>> {
        for (key, val) in self.scan_prefix(&Self::msg_prefix(chat_id))? {
            let msg: Message = serde_json::from_slice(&val)?;
            if msg.id == message_id {
                return Ok(Some((key, msg)));
            }
        }
        Ok(None)
    }

    pub async fn set_message_feedback(
        &self,
        chat_id: &str,
        message_id: &str,
        feedback: Option<Feedback>,
    ) -> Result<bool> {
        if let Some((key, mut msg)) = self.find_message_entry(chat_id, message_id)? {
            msg.feedback = feedback;
            self.db.put(key, serde_json::to_vec(&msg)?)?;
            return Ok(true);
        }
        Ok(false)
    }

    // ============================================================
    // GUEST HISTORY (ONE BLOB PER DEVICE)
    // ============================================================
    pub async fn load_guest_history(&self, device_hash: &str) -> Result<Option<Vec<ChatSession>>> {
        self.get_json(&Self::guest_key(device_hash))
    }

    pub async fn save_guest_history(&self, device_hash: &str, history: &[ChatSession]) -> Result<()> {
        self.put_json(&Self::guest_key(device_hash), &history)
    }

    pub async fn clear_guest_history(&self, device_hash: &str) -> Result<()> {
        self.db.delete(Self::guest_key(device_hash))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn put_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db.put(key, value)?;
        Ok(())
    }
}
