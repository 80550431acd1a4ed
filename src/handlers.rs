//! Activity handler table and the per-request turn context.
//!
//! The table is the single authority on which activity types produce a
//! reply: a type with no registered handler is acknowledged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::activity::{Activity, ActivityType};
use crate::connector::ActivitySender;
use crate::error::BotError;

/// One inbound activity bound to the capability to reply to it. Lives for a
/// single request and is owned by the handler invoked for it.
pub struct TurnContext {
    activity: Activity,
    sender: Arc<dyn ActivitySender>,
}

impl TurnContext {
    pub fn new(activity: Activity, sender: Arc<dyn ActivitySender>) -> Self {
        Self { activity, sender }
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Address `content` as a reply to the inbound activity and deliver it.
    /// Returns the delivered activity, carrying the id assigned by the
    /// channel when one was returned.
    pub async fn send_activity(&self, content: Activity) -> Result<Activity, BotError> {
        let mut outbound = self.activity.reply(content);
        let response = self.sender.send(&outbound).await?;
        if response.id.is_some() {
            outbound.id = response.id;
        }
        Ok(outbound)
    }
}

/// Produces zero or one reply for a turn.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn handle(&self, turn: &TurnContext) -> Result<Option<Activity>, BotError>;
}

/// Immutable mapping from activity type to handler. Built once at startup
/// and shared read-only across requests.
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: HashMap<ActivityType, Arc<dyn ActivityHandler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The production table: echo messages, acknowledge conversation
    /// updates (optionally greeting new members). Everything else,
    /// typing indicators included, has no handler.
    pub fn echo(welcome_text: Option<String>) -> Self {
        Self::new()
            .with(ActivityType::Message, EchoHandler)
            .with(
                ActivityType::ConversationUpdate,
                ConversationUpdateHandler::new(welcome_text),
            )
    }

    pub fn with<H>(mut self, kind: ActivityType, handler: H) -> Self
    where
        H: ActivityHandler + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    pub fn get(&self, kind: &ActivityType) -> Option<&Arc<dyn ActivityHandler>> {
        self.handlers.get(kind)
    }

    pub fn handles(&self, kind: &ActivityType) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub struct EchoHandler;

#[async_trait]
impl ActivityHandler for EchoHandler {
    async fn handle(&self, turn: &TurnContext) -> Result<Option<Activity>, BotError> {
        let text = turn.activity().text();
        tracing::info!(text = %text, "processing message");
        let sent = turn
            .send_activity(Activity::message(format!("Echo: {text}")))
            .await?;
        Ok(Some(sent))
    }
}

pub struct ConversationUpdateHandler {
    welcome_text: Option<String>,
}

impl ConversationUpdateHandler {
    pub fn new(welcome_text: Option<String>) -> Self {
        Self { welcome_text }
    }
}

#[async_trait]
impl ActivityHandler for ConversationUpdateHandler {
    async fn handle(&self, turn: &TurnContext) -> Result<Option<Activity>, BotError> {
        let activity = turn.activity();
        tracing::info!(
            members_added = activity.members_added.len(),
            "conversation update received"
        );
        let Some(welcome) = self.welcome_text.as_deref() else {
            return Ok(None);
        };
        let bot_id = activity.recipient.as_ref().map(|r| r.id.as_str());
        let mut last = None;
        for member in &activity.members_added {
            if Some(member.id.as_str()) == bot_id {
                continue;
            }
            tracing::info!(member = %member.id, "greeting new member");
            last = Some(turn.send_activity(Activity::message(welcome)).await?);
        }
        Ok(last)
    }
}
