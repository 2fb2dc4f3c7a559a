//! Platform collaborator seams: message delivery, guild configuration, and
//! card rendering.
//!
//! The chat platform itself is out of scope here; the dispatcher and the
//! interaction watcher only ever talk to these traits, so the bot's real
//! adapter (or a test fake) plugs in behind them.

use crate::anilist::Media;
use crate::error::DeliveryError;
use crate::{ChannelId, GuildId, UserId};
use futures::Stream;
use std::pin::Pin;

/// Stream of component activations on a sent message. Implementations must
/// return an owned stream (e.g. backed by an mpsc receiver) that ends when
/// the message is deleted or the gateway drops the subscription.
pub type ActionStream = Pin<Box<dyn Stream<Item = ComponentAction> + Send>>;

/// A user acting on one of a message's components.
#[derive(Debug, Clone)]
pub struct ComponentAction {
    /// Identifier of the actioned component.
    pub component_id: String,
    /// The acting user.
    pub user_id: UserId,
}

/// Interactive affordances attached to a message. Link components carry no
/// identifier and never produce actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    Link { label: String, url: String },
    Button { id: String, label: String },
}

impl Component {
    /// Identifier for action-producing components; links have none.
    pub fn id(&self) -> Option<&str> {
        match self {
            Component::Link { .. } => None,
            Component::Button { id, .. } => Some(id),
        }
    }
}

/// One horizontal row of components.
pub type ComponentRow = Vec<Component>;

/// An image attachment with its upload filename.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Payload for an airing announcement message.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub content: String,
    pub attachment: Option<Attachment>,
    pub components: Vec<ComponentRow>,
}

/// Handle to a delivered message: its action stream plus the operations the
/// interaction watcher needs for acknowledgement and cleanup.
#[async_trait::async_trait]
pub trait MessageHandle: Send + Sync {
    /// Take the stream of component activations.
    fn actions(&mut self) -> ActionStream;

    /// Reply to the acting user, visible only to them.
    async fn acknowledge(&self, action: &ComponentAction, text: &str)
    -> Result<(), DeliveryError>;

    /// Re-fetch the message's current component layout.
    async fn components(&self) -> Result<Vec<ComponentRow>, DeliveryError>;

    /// Replace the message's component layout.
    async fn set_components(&self, rows: Vec<ComponentRow>) -> Result<(), DeliveryError>;
}

/// Message delivery surface of the chat platform.
#[async_trait::async_trait]
pub trait Gateway: Send + Sync {
    async fn send(
        &self,
        channel_id: &ChannelId,
        message: OutgoingMessage,
    ) -> Result<Box<dyn MessageHandle>, DeliveryError>;
}

/// Read-only per-guild notification settings.
#[async_trait::async_trait]
pub trait GuildConfigProvider: Send + Sync {
    /// The guild's airing announcement channel, if one is configured.
    async fn announcement_channel(
        &self,
        guild_id: &GuildId,
    ) -> Result<Option<ChannelId>, DeliveryError>;
}

/// Renders the shared notification card for a title and episode.
#[async_trait::async_trait]
pub trait CardRenderer: Send + Sync {
    async fn render(&self, media: &Media, episode: u32) -> anyhow::Result<Vec<u8>>;
}
