use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::{ConversationRow, MessageRow, UserRow};
use parley_gateway::dispatcher::Dispatcher;
use parley_types::api::{
    ConversationDetail, ConversationSummary, LastMessage, MessageView, UserSummary,
};
use parley_types::events::{DeleteScope, GatewayEvent};
use parley_types::models::{Message, MessageState, User};

use crate::error::ChatError;

/// Outcome of `create_conversation`. `last_message` echoes the newest message
/// without visibility filtering, welcome message included.
#[derive(Debug)]
pub struct ConversationCreated {
    pub conversation_id: Uuid,
    pub is_new: bool,
    pub last_message: Option<LastMessage>,
}

/// Orchestrates conversation lifecycle, message visibility, and realtime
/// notification. Every operation returns a discriminated result; realtime
/// delivery is best-effort and can never fail a persisted write.
#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl ChatService {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    pub async fn create_conversation(
        &self,
        user_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<ConversationCreated, ChatError> {
        if user_id == recipient_id {
            return Err(ChatError::SelfConversation);
        }

        let (row, is_new, last) = self
            .run_blocking(move |db| {
                let recipient = db
                    .get_user_by_id(&recipient_id.to_string())?
                    .map(|r| user_from_row(&r))
                    .ok_or(ChatError::RecipientNotFound)?;
                let caller = db
                    .get_user_by_id(&user_id.to_string())?
                    .map(|r| user_from_row(&r))
                    .ok_or(ChatError::CallerNotFound)?;

                let welcome = format!(
                    "New conversation between {} and {}",
                    caller.name, recipient.name
                );
                let (row, created) = db.find_or_create_conversation(
                    &Uuid::new_v4().to_string(),
                    &caller.id.to_string(),
                    &recipient.id.to_string(),
                    &Uuid::new_v4().to_string(),
                    &welcome,
                )?;
                let last = db.latest_message(&row.id)?;
                Ok((row, created, last))
            })
            .await?;

        Ok(ConversationCreated {
            conversation_id: parse_uuid(&row.id, "conversation id"),
            is_new,
            last_message: last.map(|m| LastMessage {
                content: m.content,
                sent_at: parse_timestamp(&m.created_at),
            }),
        })
    }

    /// Persist a message, then notify the conversation's room. A failed or
    /// partial fan-out never fails the send once the row exists.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: String,
    ) -> Result<MessageView, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyContent);
        }

        let row = self
            .run_blocking(move |db| {
                db.get_conversation(&conversation_id.to_string())?
                    .ok_or(ChatError::ConversationNotFound)?;
                db.get_user_by_id(&sender_id.to_string())?
                    .ok_or(ChatError::UserNotFound)?;

                let row = db.append_message(
                    &Uuid::new_v4().to_string(),
                    &conversation_id.to_string(),
                    &sender_id.to_string(),
                    &content,
                )?;
                Ok(row)
            })
            .await?;

        let view = message_view(&row);
        let delivered = self
            .dispatcher
            .emit(
                conversation_id,
                GatewayEvent::NewMessage {
                    conversation_id,
                    message: view.clone(),
                },
            )
            .await;
        debug!(
            "newMessage for conversation {} reached {} connections",
            conversation_id, delivered
        );

        Ok(view)
    }

    pub async fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, ChatError> {
        let (conversations, latest, users) = self
            .run_blocking(move |db| {
                let uid = user_id.to_string();
                let conversations = db.list_conversations_for_user(&uid)?;

                let conversation_ids: Vec<String> =
                    conversations.iter().map(|c| c.id.clone()).collect();
                let latest = db.latest_visible_messages(&conversation_ids, &uid)?;

                let mut participant_ids: Vec<String> = conversations
                    .iter()
                    .flat_map(|c| c.participants().map(str::to_string))
                    .collect();
                participant_ids.sort();
                participant_ids.dedup();
                let users = db.users_by_ids(&participant_ids)?;

                Ok((conversations, latest, users))
            })
            .await?;

        let names: HashMap<String, String> =
            users.into_iter().map(|u| (u.id, u.name)).collect();
        let mut latest_by_conversation: HashMap<String, MessageRow> = latest
            .into_iter()
            .map(|m| (m.conversation_id.clone(), m))
            .collect();

        Ok(conversations
            .iter()
            .map(|c| ConversationSummary {
                id: parse_uuid(&c.id, "conversation id"),
                updated_at: parse_timestamp(&c.updated_at),
                users: participant_summaries(c, &names),
                last_visible_message: latest_by_conversation
                    .remove(&c.id)
                    .map(|m| message_view(&m)),
            })
            .collect())
    }

    pub async fn get_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<ConversationDetail, ChatError> {
        let (conversation, messages, users) = self
            .run_blocking(move |db| {
                db.get_user_by_id(&user_id.to_string())?
                    .ok_or(ChatError::UserNotFound)?;

                let conversation = db
                    .get_conversation(&conversation_id.to_string())?
                    .ok_or(ChatError::ConversationNotFound)?;
                let messages =
                    db.visible_messages(&conversation.id, &user_id.to_string())?;

                let participant_ids: Vec<String> =
                    conversation.participants().map(str::to_string).to_vec();
                let users = db.users_by_ids(&participant_ids)?;

                Ok((conversation, messages, users))
            })
            .await?;

        let names: HashMap<String, String> =
            users.into_iter().map(|u| (u.id, u.name)).collect();

        Ok(ConversationDetail {
            id: parse_uuid(&conversation.id, "conversation id"),
            updated_at: parse_timestamp(&conversation.updated_at),
            users: participant_summaries(&conversation, &names),
            messages: messages.iter().map(message_view).collect(),
        })
    }

    /// Participant-only, idempotent; the other participant's view is
    /// untouched.
    pub async fn hide_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<(), ChatError> {
        self.run_blocking(move |db| {
            let conversation = db
                .get_conversation(&conversation_id.to_string())?
                .ok_or(ChatError::ConversationNotFound)?;

            let uid = user_id.to_string();
            if !conversation.participants().contains(&uid.as_str()) {
                return Err(ChatError::AccessDenied);
            }

            db.hide_conversation_for_user(&uid, &conversation.id)?;
            Ok(())
        })
        .await
    }

    /// Any participant may hide any message for themself; the message only
    /// has to belong to the named conversation.
    pub async fn hide_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), ChatError> {
        self.run_blocking(move |db| {
            db.get_message_in_conversation(
                &message_id.to_string(),
                &conversation_id.to_string(),
            )?
            .ok_or(ChatError::MessageNotFound)?;

            db.hide_message_for_user(&user_id.to_string(), &message_id.to_string())?;
            Ok(())
        })
        .await
    }

    /// Sender-only, one-way. A retry on an already-deleted message succeeds
    /// without emitting a second deletion event.
    pub async fn delete_message_for_all(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), ChatError> {
        let transitioned = self
            .run_blocking(move |db| {
                let row = db
                    .get_message_in_conversation(
                        &message_id.to_string(),
                        &conversation_id.to_string(),
                    )?
                    .ok_or(ChatError::MessageNotFound)?;

                let message = message_from_row(&row);
                if message.sender_id != user_id {
                    return Err(ChatError::NotSender);
                }
                if message.state.is_deleted() {
                    return Ok(false);
                }

                Ok(db.mark_message_deleted(&message_id.to_string())?)
            })
            .await?;

        if transitioned {
            let delivered = self
                .dispatcher
                .emit(
                    conversation_id,
                    GatewayEvent::MessageDeleted {
                        conversation_id,
                        message_id,
                        scope: DeleteScope::All,
                    },
                )
                .await;
            debug!(
                "messageDeleted for conversation {} reached {} connections",
                conversation_id, delivered
            );
        }

        Ok(())
    }

    /// Run a blocking repository closure off the async runtime.
    async fn run_blocking<T, F>(&self, f: F) -> Result<T, ChatError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Database>) -> Result<T, ChatError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db))
            .await
            .map_err(|e| ChatError::Storage(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
    }
}

fn participant_summaries(
    conversation: &ConversationRow,
    names: &HashMap<String, String>,
) -> Vec<UserSummary> {
    conversation
        .participants()
        .iter()
        .map(|id| UserSummary {
            id: parse_uuid(id, "user id"),
            name: names.get(*id).cloned().unwrap_or_else(|| "unknown".to_string()),
        })
        .collect()
}

fn message_view(row: &MessageRow) -> MessageView {
    MessageView {
        id: parse_uuid(&row.id, "message id"),
        content: row.content.clone(),
        sender: UserSummary {
            id: parse_uuid(&row.sender_id, "sender id"),
            name: row.sender_name.clone(),
        },
        created_at: parse_timestamp(&row.created_at),
    }
}

fn user_from_row(row: &UserRow) -> User {
    User {
        id: parse_uuid(&row.id, "user id"),
        name: row.name.clone(),
        email: row.email.clone(),
    }
}

fn message_from_row(row: &MessageRow) -> Message {
    Message {
        id: parse_uuid(&row.id, "message id"),
        conversation_id: parse_uuid(&row.conversation_id, "conversation id"),
        sender_id: parse_uuid(&row.sender_id, "sender id"),
        content: row.content.clone(),
        created_at: parse_timestamp(&row.created_at),
        state: match &row.deleted_at {
            Some(at) => MessageState::DeletedForAll {
                deleted_at: parse_timestamp(at),
            },
            None => MessageState::Active,
        },
    }
}

fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
            // Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with_users() -> (ChatService, Uuid, Uuid, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let ada = Uuid::new_v4();
        let grace = Uuid::new_v4();
        let linus = Uuid::new_v4();
        db.create_user(&ada.to_string(), "Ada", "ada@example.com").unwrap();
        db.create_user(&grace.to_string(), "Grace", "grace@example.com").unwrap();
        db.create_user(&linus.to_string(), "Linus", "linus@example.com").unwrap();

        let service = ChatService::new(Arc::new(db), Dispatcher::new());
        (service, ada, grace, linus)
    }

    #[tokio::test]
    async fn create_conversation_is_symmetric() {
        let (service, ada, grace, _) = service_with_users();

        let first = service.create_conversation(ada, grace).await.unwrap();
        assert!(first.is_new);
        let welcome = first.last_message.unwrap();
        assert_eq!(welcome.content, "New conversation between Ada and Grace");

        // The reverse direction finds the same conversation
        let second = service.create_conversation(grace, ada).await.unwrap();
        assert!(!second.is_new);
        assert_eq!(second.conversation_id, first.conversation_id);
        assert_eq!(
            second.last_message.unwrap().content,
            "New conversation between Ada and Grace"
        );
    }

    #[tokio::test]
    async fn self_conversation_is_rejected() {
        let (service, ada, _, _) = service_with_users();

        let err = service.create_conversation(ada, ada).await.unwrap_err();
        assert!(matches!(err, ChatError::SelfConversation));
        assert!(service.list_conversations(ada).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_conversation_requires_known_users() {
        let (service, ada, _, _) = service_with_users();

        let err = service
            .create_conversation(ada, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::RecipientNotFound));

        let err = service
            .create_conversation(Uuid::new_v4(), ada)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::CallerNotFound));
    }

    #[tokio::test]
    async fn send_message_validates_conversation_sender_and_content() {
        let (service, ada, grace, _) = service_with_users();
        let conv = service.create_conversation(ada, grace).await.unwrap();

        let err = service
            .send_message(Uuid::new_v4(), ada, "hello".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ConversationNotFound));

        let err = service
            .send_message(conv.conversation_id, Uuid::new_v4(), "hello".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::UserNotFound));

        let err = service
            .send_message(conv.conversation_id, ada, "   ".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::EmptyContent));
    }

    #[tokio::test]
    async fn hidden_message_disappears_only_for_the_hiding_user() {
        let (service, ada, grace, _) = service_with_users();
        let conv = service.create_conversation(ada, grace).await.unwrap();
        service
            .send_message(conv.conversation_id, ada, "hello".into())
            .await
            .unwrap();

        // Grace sees welcome then hello, in that order
        let history = service
            .get_conversation(grace, conv.conversation_id)
            .await
            .unwrap();
        assert_eq!(history.messages.len(), 2);
        assert_eq!(history.messages[1].content, "hello");
        let welcome_id = history.messages[0].id;

        service
            .hide_message(grace, conv.conversation_id, welcome_id)
            .await
            .unwrap();
        // Idempotent
        service
            .hide_message(grace, conv.conversation_id, welcome_id)
            .await
            .unwrap();

        let grace_view = service
            .get_conversation(grace, conv.conversation_id)
            .await
            .unwrap();
        let contents: Vec<&str> = grace_view.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello"]);

        let ada_view = service
            .get_conversation(ada, conv.conversation_id)
            .await
            .unwrap();
        assert_eq!(ada_view.messages.len(), 2);
    }

    #[tokio::test]
    async fn hide_message_requires_message_in_conversation() {
        let (service, ada, grace, linus) = service_with_users();
        let first = service.create_conversation(ada, grace).await.unwrap();
        let other = service.create_conversation(ada, linus).await.unwrap();

        let msg = service
            .send_message(first.conversation_id, ada, "hello".into())
            .await
            .unwrap();

        // Wrong conversation id for the message
        let err = service
            .hide_message(ada, other.conversation_id, msg.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::MessageNotFound));
    }

    #[tokio::test]
    async fn delete_for_all_is_sender_only_global_and_idempotent() {
        let (service, ada, grace, _) = service_with_users();
        let conv = service.create_conversation(ada, grace).await.unwrap();
        let msg = service
            .send_message(conv.conversation_id, ada, "regrettable".into())
            .await
            .unwrap();

        // Grace did not send it
        let err = service
            .delete_message_for_all(grace, conv.conversation_id, msg.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotSender));
        let view = service
            .get_conversation(grace, conv.conversation_id)
            .await
            .unwrap();
        assert!(view.messages.iter().any(|m| m.id == msg.id));

        service
            .delete_message_for_all(ada, conv.conversation_id, msg.id)
            .await
            .unwrap();

        // Gone for everyone, sender included
        for user in [ada, grace] {
            let view = service
                .get_conversation(user, conv.conversation_id)
                .await
                .unwrap();
            assert!(view.messages.iter().all(|m| m.id != msg.id));
        }

        // Retry lands on the terminal state without erroring
        service
            .delete_message_for_all(ada, conv.conversation_id, msg.id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_retry_emits_no_second_event() {
        let (service, ada, grace, _) = service_with_users();
        let conv = service.create_conversation(ada, grace).await.unwrap();
        let msg = service
            .send_message(conv.conversation_id, ada, "once".into())
            .await
            .unwrap();

        let (conn, mut rx) = service.dispatcher.register().await;
        service.dispatcher.join(conn, conv.conversation_id).await;

        service
            .delete_message_for_all(ada, conv.conversation_id, msg.id)
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            GatewayEvent::MessageDeleted { message_id, .. } if message_id == msg.id
        ));

        service
            .delete_message_for_all(ada, conv.conversation_id, msg.id)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn hidden_conversation_leaves_the_other_listing_intact() {
        let (service, ada, grace, linus) = service_with_users();
        let conv = service.create_conversation(ada, grace).await.unwrap();

        // Non-participant cannot hide it
        let err = service
            .hide_conversation(linus, conv.conversation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AccessDenied));

        service
            .hide_conversation(ada, conv.conversation_id)
            .await
            .unwrap();
        service
            .hide_conversation(ada, conv.conversation_id)
            .await
            .unwrap();

        assert!(service.list_conversations(ada).await.unwrap().is_empty());
        let grace_list = service.list_conversations(grace).await.unwrap();
        assert_eq!(grace_list.len(), 1);
        assert_eq!(grace_list[0].id, conv.conversation_id);
    }

    #[tokio::test]
    async fn listing_carries_last_visible_message_and_participants() {
        let (service, ada, grace, _) = service_with_users();
        let conv = service.create_conversation(ada, grace).await.unwrap();
        service
            .send_message(conv.conversation_id, grace, "newest".into())
            .await
            .unwrap();

        let listed = service.list_conversations(ada).await.unwrap();
        assert_eq!(listed.len(), 1);
        let summary = &listed[0];
        let mut names: Vec<&str> = summary.users.iter().map(|u| u.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["Ada", "Grace"]);
        let last = summary.last_visible_message.as_ref().unwrap();
        assert_eq!(last.content, "newest");
        assert_eq!(last.sender.name, "Grace");

        // Ada hides the newest message; her listing falls back to the welcome
        service
            .hide_message(ada, conv.conversation_id, last.id)
            .await
            .unwrap();
        let listed = service.list_conversations(ada).await.unwrap();
        let last = listed[0].last_visible_message.as_ref().unwrap();
        assert!(last.content.starts_with("New conversation between"));
    }

    #[tokio::test]
    async fn send_message_fans_out_to_every_room_member() {
        let (service, ada, grace, _) = service_with_users();
        let conv = service.create_conversation(ada, grace).await.unwrap();

        let (conn_a, mut rx_a) = service.dispatcher.register().await;
        let (conn_b, mut rx_b) = service.dispatcher.register().await;
        service.dispatcher.join(conn_a, conv.conversation_id).await;
        service.dispatcher.join(conn_b, conv.conversation_id).await;

        let sent = service
            .send_message(conv.conversation_id, ada, "hello room".into())
            .await
            .unwrap();

        let got_a = rx_a.recv().await.unwrap();
        let got_b = rx_b.recv().await.unwrap();
        assert_eq!(
            serde_json::to_string(&got_a).unwrap(),
            serde_json::to_string(&got_b).unwrap()
        );
        match got_a {
            GatewayEvent::NewMessage { conversation_id, message } => {
                assert_eq!(conversation_id, conv.conversation_id);
                assert_eq!(message.id, sent.id);
                assert_eq!(message.content, "hello room");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Exactly one emission per send
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }
}
