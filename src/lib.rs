//! Airing notification engine for an anime tracking bot.
//!
//! Periodically polls AniList for the tracked titles that are due for a
//! check, announces newly airing episodes to every subscribed guild, and
//! lets users join a title's tracking list straight from the notification.
//!
//! The chat platform is abstracted behind the traits in [`gateway`]; the
//! rest of the pipeline is platform-agnostic:
//!
//! - [`store`] keeps per-title polling state and per-user subscriptions.
//! - [`anilist`] batches lookups against the AniList GraphQL API, with
//!   retry and backoff from [`retry`].
//! - [`poller`] decides, per title, whether an episode announcement is due.
//! - [`dispatch`] renders the notification card and fans out per guild.
//! - [`interactions`] watches delivered messages for button activity.
//! - [`scheduler`] drives the whole thing on a warm-up plus interval clock.

pub mod anilist;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod interactions;
pub mod poller;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use error::{Error, Result};

/// AniList media identifier.
pub type TitleId = i64;

/// Platform guild (server) identifier.
pub type GuildId = String;

/// Platform user identifier.
pub type UserId = String;

/// Platform channel identifier.
pub type ChannelId = String;
