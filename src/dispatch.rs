//! Notification dispatcher: renders one card per episode event and fans the
//! announcement out to every subscribed guild.

use crate::anilist::Media;
use crate::config::AiringConfig;
use crate::gateway::{
    Attachment, CardRenderer, Component, Gateway, GuildConfigProvider, OutgoingMessage,
};
use crate::interactions;
use crate::store::TrackingStore;
use crate::{GuildId, UserId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-dispatch options.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Deliver to this single guild without mentions, bypassing the
    /// subscriber lookup. Diagnostic hook for testing a guild's channel
    /// wiring end to end.
    pub force_guild_id: Option<GuildId>,
}

/// Poller-facing seam, so tests can swap in a recording fake.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Announce `episode` of `media` to every interested guild. Never
    /// fails outward; per-guild problems are logged and isolated. Does not
    /// deduplicate; the poller's episode-number check is the only guard
    /// against repeat announcements.
    async fn dispatch(&self, media: &Media, episode: u32, options: DispatchOptions);
}

pub struct Dispatcher {
    store: Arc<dyn TrackingStore>,
    gateway: Arc<dyn Gateway>,
    guild_config: Arc<dyn GuildConfigProvider>,
    renderer: Arc<dyn CardRenderer>,
    track_button_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        gateway: Arc<dyn Gateway>,
        guild_config: Arc<dyn GuildConfigProvider>,
        renderer: Arc<dyn CardRenderer>,
        config: &AiringConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            guild_config,
            renderer,
            track_button_timeout: config.track_button_timeout(),
        }
    }

    /// Subscriber user ids grouped by guild. Forced mode yields the one
    /// guild with no users to mention.
    async fn entries_by_guild(
        &self,
        media: &Media,
        options: &DispatchOptions,
    ) -> BTreeMap<GuildId, Vec<UserId>> {
        if let Some(guild_id) = &options.force_guild_id {
            return BTreeMap::from([(guild_id.clone(), Vec::new())]);
        }

        match self.store.subscribers(media.id).await {
            Ok(subscribers) => {
                let mut entries: BTreeMap<GuildId, Vec<UserId>> = BTreeMap::new();
                for subscriber in subscribers {
                    entries
                        .entry(subscriber.guild_id)
                        .or_default()
                        .push(subscriber.user_id);
                }
                entries
            }
            Err(error) => {
                tracing::error!(title_id = media.id, %error, "subscriber lookup failed");
                BTreeMap::new()
            }
        }
    }

    async fn deliver_to_guild(
        &self,
        guild_id: &GuildId,
        user_ids: &[UserId],
        media: &Media,
        attachment: Option<Attachment>,
    ) -> crate::Result<()> {
        let Some(channel_id) = self.guild_config.announcement_channel(guild_id).await? else {
            tracing::debug!(guild_id = %guild_id, "no announcement channel configured, skipping");
            return Ok(());
        };

        let content = if user_ids.is_empty() {
            "🔔 **New Episode detected!**".to_string()
        } else {
            let mentions = user_ids
                .iter()
                .map(|user_id| format!("<@{user_id}>"))
                .collect::<Vec<_>>()
                .join(" ");
            format!("🔔 **New Episode detected!** {mentions}")
        };

        let button_id = format!("track_add_{}", media.id);
        let components = vec![vec![
            Component::Link {
                label: "View on AniList".into(),
                url: media.page_url(),
            },
            Component::Button {
                id: button_id.clone(),
                label: "Track +".into(),
            },
        ]];

        let message = self
            .gateway
            .send(
                &channel_id,
                OutgoingMessage {
                    content,
                    attachment,
                    components,
                },
            )
            .await?;

        // Watch the Track + button; an activation subscribes the clicking
        // user in this guild.
        let store = Arc::clone(&self.store);
        let guild_id = guild_id.clone();
        let title_id = media.id;
        let title = media.display_title().to_string();
        let handler_button_id = button_id.clone();
        // Fire and forget: the watcher owns its own lifecycle and stops on
        // its timeout, so the dispatcher does not retain the handle.
        let _watch = interactions::watch(
            message,
            self.track_button_timeout,
            move |action| {
                let store = Arc::clone(&store);
                let guild_id = guild_id.clone();
                let title = title.clone();
                let button_id = handler_button_id.clone();
                async move {
                    if action.component_id != button_id {
                        return Ok(None);
                    }
                    match store
                        .add_subscription(&guild_id, &action.user_id, title_id, &title)
                        .await
                    {
                        Ok(()) => Ok(Some(format!("✅ You are now tracking **{title}**!"))),
                        Err(error) => {
                            tracing::error!(
                                guild_id = %guild_id,
                                user_id = %action.user_id,
                                title_id,
                                %error,
                                "failed to create subscription"
                            );
                            Ok(Some("❌ Failed to start tracking.".to_string()))
                        }
                    }
                }
            },
            vec![button_id],
        );

        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for Dispatcher {
    async fn dispatch(&self, media: &Media, episode: u32, options: DispatchOptions) {
        let entries = self.entries_by_guild(media, &options).await;
        if entries.is_empty() {
            return;
        }

        // Render the shared card once; delivery proceeds without it on
        // failure.
        let attachment = match self.renderer.render(media, episode).await {
            Ok(bytes) => Some(Attachment {
                filename: format!("airing-{}.png", media.id),
                bytes,
            }),
            Err(error) => {
                tracing::error!(title_id = media.id, %error, "failed to generate airing card");
                None
            }
        };

        tracing::info!(
            title_id = media.id,
            episode,
            guilds = entries.len(),
            "dispatching airing notification"
        );

        for (guild_id, user_ids) in entries {
            if let Err(error) = self
                .deliver_to_guild(&guild_id, &user_ids, media, attachment.clone())
                .await
            {
                tracing::error!(
                    guild_id = %guild_id,
                    title_id = media.id,
                    %error,
                    "failed to notify guild"
                );
            }
        }
    }
}
