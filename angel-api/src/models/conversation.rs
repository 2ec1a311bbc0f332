use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Jsonb;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use angel_shared::errors::{AppError, AppResult, ErrorCode};
use angel_shared::jsonb_document;

use crate::models::user::ParticipantSummary;
use crate::schema::{conversations, messages};

/// Per-participant unread counters. A missing key reads as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(transparent)]
pub struct UnreadCounts(pub BTreeMap<Uuid, i32>);

impl UnreadCounts {
    pub fn get(&self, user_id: Uuid) -> i32 {
        self.0.get(&user_id).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, user_id: Uuid) {
        *self.0.entry(user_id).or_insert(0) += 1;
    }

    pub fn reset(&mut self, user_id: Uuid) {
        self.0.insert(user_id, 0);
    }
}

/// Per-participant soft-delete flags. A missing key reads as `false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(transparent)]
pub struct DeletionFlags(pub BTreeMap<Uuid, bool>);

impl DeletionFlags {
    pub fn is_deleted(&self, user_id: Uuid) -> bool {
        self.0.get(&user_id).copied().unwrap_or(false)
    }

    pub fn set(&mut self, user_id: Uuid, deleted: bool) {
        self.0.insert(user_id, deleted);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    #[serde(rename = "sender")]
    pub sender_id: Uuid,
    pub created_at: DateTime<Utc>,
}

jsonb_document!(UnreadCounts, DeletionFlags, LastMessage);

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = conversations, treat_none_as_null = true)]
pub struct Conversation {
    pub id: Uuid,
    pub participants: Vec<Uuid>,
    pub last_message: Option<LastMessage>,
    pub unread_count: UnreadCounts,
    pub is_blocked: bool,
    pub blocked_by: Option<Uuid>,
    pub is_deleted: DeletionFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a participant's delete did to the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionOutcome {
    HiddenForCaller,
    Purge,
}

impl Conversation {
    /// Opens a conversation whose first message is already counted as unread
    /// for the recipient.
    pub fn open(sender_id: Uuid, recipient_id: Uuid, initial_message: &str, now: DateTime<Utc>) -> Self {
        let mut unread = UnreadCounts::default();
        unread.increment(recipient_id);
        Self {
            id: Uuid::now_v7(),
            participants: vec![sender_id, recipient_id],
            last_message: Some(LastMessage {
                content: initial_message.to_string(),
                sender_id,
                created_at: now,
            }),
            unread_count: unread,
            is_blocked: false,
            blocked_by: None,
            is_deleted: DeletionFlags::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        self.has_participant(user_id) && !self.is_deleted.is_deleted(user_id)
    }

    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        self.participants.iter().copied().find(|p| *p != user_id)
    }

    pub fn before_save(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Updates bookkeeping for a message from `sender_id` and returns the recipient.
    /// The conversation reappears for a recipient who had deleted it.
    pub fn record_message(&mut self, sender_id: Uuid, content: &str, now: DateTime<Utc>) -> AppResult<Uuid> {
        if self.is_blocked {
            return Err(AppError::new(ErrorCode::ConversationBlocked, "Conversation is blocked"));
        }
        let recipient_id = self
            .other_participant(sender_id)
            .ok_or_else(|| AppError::new(ErrorCode::RecipientNotFound, "Recipient not found"))?;

        self.last_message = Some(LastMessage { content: content.to_string(), sender_id, created_at: now });
        self.unread_count.increment(recipient_id);
        if self.is_deleted.is_deleted(recipient_id) {
            self.is_deleted.set(recipient_id, false);
        }
        Ok(recipient_id)
    }

    pub fn mark_read_by(&mut self, user_id: Uuid) {
        self.unread_count.reset(user_id);
    }

    pub fn delete_for(&mut self, user_id: Uuid) -> DeletionOutcome {
        self.is_deleted.set(user_id, true);
        let everyone = self.participants.iter().all(|p| self.is_deleted.is_deleted(*p));
        if everyone {
            DeletionOutcome::Purge
        } else {
            DeletionOutcome::HiddenForCaller
        }
    }

    /// Only one participant can hold the block. Re-blocking by the holder is a no-op.
    pub fn block(&mut self, user_id: Uuid) -> AppResult<()> {
        match self.blocked_by {
            Some(holder) if self.is_blocked && holder != user_id => Err(AppError::new(
                ErrorCode::NotBlocker,
                "Conversation is already blocked by the other participant",
            )),
            _ => {
                self.is_blocked = true;
                self.blocked_by = Some(user_id);
                Ok(())
            }
        }
    }

    pub fn unblock(&mut self, user_id: Uuid) -> AppResult<()> {
        if !self.is_blocked || self.blocked_by != Some(user_id) {
            return Err(AppError::new(ErrorCode::NotBlocker, "Conversation not blocked by you"));
        }
        self.is_blocked = false;
        self.blocked_by = None;
        Ok(())
    }

    pub fn view(self, participants: Vec<ParticipantSummary>) -> ConversationView {
        ConversationView {
            id: self.id,
            participants,
            last_message: self.last_message,
            unread_count: self.unread_count,
            is_blocked: self.is_blocked,
            blocked_by: self.blocked_by,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: Uuid,
    pub participants: Vec<ParticipantSummary>,
    pub last_message: Option<LastMessage>,
    pub unread_count: UnreadCounts,
    pub is_blocked: bool,
    pub blocked_by: Option<Uuid>,
    pub is_deleted: DeletionFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = messages)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "conversation")]
    pub conversation_id: Uuid,
    #[serde(rename = "sender")]
    pub sender_id: Uuid,
    #[serde(rename = "recipient")]
    pub recipient_id: Uuid,
    pub content: String,
    pub attachments: Vec<String>,
    pub read_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn new(conversation_id: Uuid, sender_id: Uuid, recipient_id: Uuid, content: String, attachments: Vec<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id,
            recipient_id,
            content,
            attachments,
            created_at: Utc::now(),
        }
    }
}

/// Message with the sender's names resolved.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender_info: Option<SenderSummary>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::users)]
#[serde(rename_all = "camelCase")]
pub struct SenderSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Uuid, Uuid, Conversation) {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let conversation = Conversation::open(a, b, "hi", Utc::now());
        (a, b, conversation)
    }

    #[test]
    fn opening_seeds_recipient_unread() {
        let (a, b, c) = pair();
        assert_eq!(c.unread_count.get(b), 1);
        assert_eq!(c.unread_count.get(a), 0);
        assert_eq!(c.last_message.as_ref().unwrap().sender_id, a);
    }

    #[test]
    fn missing_keys_read_as_defaults() {
        let flags: DeletionFlags = serde_json::from_str("{}").unwrap();
        assert!(!flags.is_deleted(Uuid::now_v7()));
        let counts: UnreadCounts = serde_json::from_str("{}").unwrap();
        assert_eq!(counts.get(Uuid::now_v7()), 0);
    }

    #[test]
    fn message_increments_recipient_and_restores_visibility() {
        let (a, b, mut c) = pair();
        c.delete_for(b);
        assert!(!c.is_visible_to(b));

        let recipient = c.record_message(a, "still there?", Utc::now()).unwrap();
        assert_eq!(recipient, b);
        assert_eq!(c.unread_count.get(b), 2);
        assert!(c.is_visible_to(b));
    }

    #[test]
    fn reading_resets_only_the_reader() {
        let (a, b, mut c) = pair();
        c.record_message(b, "hey", Utc::now()).unwrap();
        c.mark_read_by(b);
        assert_eq!(c.unread_count.get(b), 0);
        assert_eq!(c.unread_count.get(a), 1);
    }

    #[test]
    fn single_delete_hides_dual_delete_purges() {
        let (a, b, mut c) = pair();
        assert_eq!(c.delete_for(a), DeletionOutcome::HiddenForCaller);
        assert!(!c.is_visible_to(a));
        assert!(c.is_visible_to(b));
        assert_eq!(c.unread_count.get(b), 1);
        assert_eq!(c.delete_for(b), DeletionOutcome::Purge);
    }

    #[test]
    fn blocked_conversation_rejects_both_sides() {
        let (a, b, mut c) = pair();
        c.block(a).unwrap();
        for sender in [a, b] {
            let err = c.record_message(sender, "x", Utc::now()).unwrap_err();
            assert!(matches!(err, AppError::Known { code: ErrorCode::ConversationBlocked, .. }));
        }
    }

    #[test]
    fn only_the_blocker_unblocks() {
        let (a, b, mut c) = pair();
        c.block(a).unwrap();
        assert!(c.block(b).is_err());
        assert!(c.unblock(b).is_err());
        assert!(c.is_blocked);

        c.unblock(a).unwrap();
        assert!(!c.is_blocked);
        assert_eq!(c.blocked_by, None);
        assert!(c.unblock(a).is_err());
    }
}
