//! Batch poller: selects due titles, looks them up in chunks, and decides
//! per title whether an announcement goes out.
//!
//! The episode number is the only dedup key. A title is announced when the
//! looked-up `nextAiringEpisode` is within the airing window AND its episode
//! number is strictly greater than the last notified one; the store write
//! happens only after dispatch so a crash re-announces rather than silently
//! dropping an episode.

use crate::anilist::{Media, MediaLookup};
use crate::config::AiringConfig;
use crate::dispatch::{DispatchOptions, Notifier};
use crate::error::LookupError;
use crate::store::TrackingStore;
use crate::TitleId;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

pub struct Poller {
    store: Arc<dyn TrackingStore>,
    lookup: Arc<dyn MediaLookup>,
    notifier: Arc<dyn Notifier>,
    batch_size: usize,
    airing_window: Duration,
}

impl Poller {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        lookup: Arc<dyn MediaLookup>,
        notifier: Arc<dyn Notifier>,
        config: &AiringConfig,
    ) -> Self {
        Self {
            store,
            lookup,
            notifier,
            batch_size: config.batch_size,
            airing_window: config.airing_window(),
        }
    }

    /// One full poll cycle. Never fails outward; a bad chunk is logged and
    /// skipped so the remaining chunks still run.
    pub async fn run_cycle(&self) {
        let due = match self.store.due_title_ids(self.airing_window).await {
            Ok(due) => due,
            Err(error) => {
                tracing::error!(%error, "failed to select due titles");
                return;
            }
        };
        if due.is_empty() {
            tracing::debug!("no titles due for a check");
            return;
        }

        tracing::info!(due = due.len(), "checking airing titles");
        for chunk in due.chunks(self.batch_size.max(1)) {
            if let Err(error) = self.process_chunk(chunk).await {
                tracing::error!(titles = chunk.len(), %error, "airing lookup batch failed");
            }
        }
    }

    async fn process_chunk(&self, ids: &[TitleId]) -> Result<(), LookupError> {
        let batch = self.lookup.media_by_ids(ids).await?;
        for media in &batch {
            self.process_media(media).await;
        }
        Ok(())
    }

    async fn process_media(&self, media: &Media) {
        let last_notified = match self.store.state(media.id).await {
            Ok(state) => state.map(|s| s.last_notified_episode).unwrap_or(0),
            Err(error) => {
                tracing::error!(title_id = media.id, %error, "failed to read tracking state");
                return;
            }
        };

        // Finished or indefinitely on hold: AniList reports no upcoming
        // episode. Leave the stored state untouched.
        let Some(next) = media.next_airing_episode.as_ref() else {
            tracing::debug!(title_id = media.id, "no upcoming episode");
            return;
        };
        let next_airing_at = next.airing_at_utc();

        if next.time_until_airing > self.airing_window.num_seconds() {
            // Not imminent. Refresh the airing timestamp so the due-set
            // query skips this title until the window opens.
            self.persist(media.id, last_notified, next_airing_at).await;
            return;
        }

        if next.episode > last_notified {
            tracing::info!(
                title_id = media.id,
                episode = next.episode,
                seconds_until_airing = next.time_until_airing,
                "episode airing, dispatching"
            );
            self.notifier
                .dispatch(media, next.episode, DispatchOptions::default())
                .await;
            self.persist(media.id, next.episode, next_airing_at).await;
        } else {
            tracing::debug!(
                title_id = media.id,
                episode = next.episode,
                last_notified,
                "episode already announced"
            );
        }
    }

    async fn persist(
        &self,
        title_id: TitleId,
        last_notified_episode: u32,
        next_airing_at: Option<DateTime<Utc>>,
    ) {
        if let Err(error) = self
            .store
            .upsert_state(title_id, last_notified_episode, next_airing_at)
            .await
        {
            tracing::error!(title_id, %error, "failed to persist tracking state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{Subscriber, Subscription, TrackedState};
    use crate::{GuildId, UserId};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn airing_media(id: TitleId, episode: u32, seconds_until: i64) -> Media {
        let airing_at = Utc::now().timestamp() + seconds_until;
        serde_json::from_value(serde_json::json!({
            "id": id,
            "title": { "romaji": format!("Show {id}") },
            "nextAiringEpisode": {
                "episode": episode,
                "airingAt": airing_at,
                "timeUntilAiring": seconds_until,
            },
        }))
        .expect("test media")
    }

    fn finished_media(id: TitleId) -> Media {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "title": { "romaji": format!("Show {id}") },
            "nextAiringEpisode": null,
        }))
        .expect("test media")
    }

    /// In-memory store with scripted due set and recorded upserts.
    #[derive(Default)]
    struct FakeStore {
        due: Vec<TitleId>,
        due_fails: bool,
        states: Mutex<BTreeMap<TitleId, TrackedState>>,
        upserts: Mutex<Vec<(TitleId, u32)>>,
    }

    #[async_trait::async_trait]
    impl TrackingStore for FakeStore {
        async fn due_title_ids(&self, _window: Duration) -> Result<Vec<TitleId>, StoreError> {
            if self.due_fails {
                return Err(StoreError::Other(anyhow::anyhow!("database locked")));
            }
            Ok(self.due.clone())
        }

        async fn state(&self, title_id: TitleId) -> Result<Option<TrackedState>, StoreError> {
            Ok(self.states.lock().unwrap().get(&title_id).cloned())
        }

        async fn upsert_state(
            &self,
            title_id: TitleId,
            last_notified_episode: u32,
            next_airing_at: Option<DateTime<Utc>>,
        ) -> Result<(), StoreError> {
            let mut states = self.states.lock().unwrap();
            let entry = states.entry(title_id).or_insert(TrackedState {
                last_notified_episode: 0,
                next_airing_at: None,
            });
            // Mirrors the SQL upsert: episode numbers never move backwards.
            entry.last_notified_episode = entry.last_notified_episode.max(last_notified_episode);
            entry.next_airing_at = next_airing_at;
            self.upserts
                .lock()
                .unwrap()
                .push((title_id, last_notified_episode));
            Ok(())
        }

        async fn subscribers(&self, _title_id: TitleId) -> Result<Vec<Subscriber>, StoreError> {
            Ok(Vec::new())
        }

        async fn add_subscription(
            &self,
            _guild_id: &GuildId,
            _user_id: &UserId,
            _title_id: TitleId,
            _title: &str,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn remove_subscription(
            &self,
            _guild_id: &GuildId,
            _user_id: &UserId,
            _title_id: TitleId,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn subscriptions_for(
            &self,
            _guild_id: &GuildId,
            _user_id: &UserId,
        ) -> Result<Vec<Subscription>, StoreError> {
            Ok(Vec::new())
        }
    }

    /// Lookup fake: serves scripted media by id, records requested batches,
    /// and can fail specific batches.
    #[derive(Default)]
    struct FakeLookup {
        media: BTreeMap<TitleId, Media>,
        fail_batches_containing: Vec<TitleId>,
        batches: Mutex<Vec<Vec<TitleId>>>,
    }

    #[async_trait::async_trait]
    impl MediaLookup for FakeLookup {
        async fn media_by_ids(&self, ids: &[TitleId]) -> Result<Vec<Media>, LookupError> {
            self.batches.lock().unwrap().push(ids.to_vec());
            if ids
                .iter()
                .any(|id| self.fail_batches_containing.contains(id))
            {
                return Err(LookupError::Status { status: 500 });
            }
            Ok(ids
                .iter()
                .filter_map(|id| self.media.get(id).cloned())
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        dispatched: Mutex<Vec<(TitleId, u32)>>,
    }

    #[async_trait::async_trait]
    impl Notifier for FakeNotifier {
        async fn dispatch(&self, media: &Media, episode: u32, _options: DispatchOptions) {
            self.dispatched.lock().unwrap().push((media.id, episode));
        }
    }

    struct Fixture {
        store: Arc<FakeStore>,
        lookup: Arc<FakeLookup>,
        notifier: Arc<FakeNotifier>,
        poller: Poller,
    }

    fn fixture(store: FakeStore, lookup: FakeLookup) -> Fixture {
        let store = Arc::new(store);
        let lookup = Arc::new(lookup);
        let notifier = Arc::new(FakeNotifier::default());
        let poller = Poller::new(
            store.clone(),
            lookup.clone(),
            notifier.clone(),
            &AiringConfig::default(),
        );
        Fixture {
            store,
            lookup,
            notifier,
            poller,
        }
    }

    #[tokio::test]
    async fn imminent_new_episode_is_dispatched_and_persisted() {
        let media = airing_media(1, 6, 300);
        let fx = fixture(
            FakeStore {
                due: vec![1],
                ..FakeStore::default()
            },
            FakeLookup {
                media: BTreeMap::from([(1, media)]),
                ..FakeLookup::default()
            },
        );

        fx.poller.run_cycle().await;

        assert_eq!(*fx.notifier.dispatched.lock().unwrap(), vec![(1, 6)]);
        let states = fx.store.states.lock().unwrap();
        let state = states.get(&1).expect("state persisted");
        assert_eq!(state.last_notified_episode, 6);
        assert!(state.next_airing_at.is_some());
    }

    #[tokio::test]
    async fn far_future_episode_refreshes_timestamp_without_dispatching() {
        let fx = fixture(
            FakeStore {
                due: vec![1],
                ..FakeStore::default()
            },
            FakeLookup {
                media: BTreeMap::from([(1, airing_media(1, 7, 5000))]),
                ..FakeLookup::default()
            },
        );

        fx.poller.run_cycle().await;

        assert!(fx.notifier.dispatched.lock().unwrap().is_empty());
        let states = fx.store.states.lock().unwrap();
        let state = states.get(&1).expect("timestamp refreshed");
        assert_eq!(state.last_notified_episode, 0);
        assert!(state.next_airing_at.is_some());
    }

    #[tokio::test]
    async fn finished_series_is_left_untouched() {
        let fx = fixture(
            FakeStore {
                due: vec![1],
                ..FakeStore::default()
            },
            FakeLookup {
                media: BTreeMap::from([(1, finished_media(1))]),
                ..FakeLookup::default()
            },
        );

        fx.poller.run_cycle().await;

        assert!(fx.notifier.dispatched.lock().unwrap().is_empty());
        assert!(fx.store.upserts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn already_announced_episode_is_not_resent() {
        let fx = fixture(
            FakeStore {
                due: vec![1],
                states: Mutex::new(BTreeMap::from([(
                    1,
                    TrackedState {
                        last_notified_episode: 6,
                        next_airing_at: None,
                    },
                )])),
                ..FakeStore::default()
            },
            FakeLookup {
                media: BTreeMap::from([(1, airing_media(1, 6, 120))]),
                ..FakeLookup::default()
            },
        );

        fx.poller.run_cycle().await;

        assert!(fx.notifier.dispatched.lock().unwrap().is_empty());
        assert!(fx.store.upserts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_cycle_does_not_double_send() {
        let fx = fixture(
            FakeStore {
                due: vec![1],
                ..FakeStore::default()
            },
            FakeLookup {
                media: BTreeMap::from([(1, airing_media(1, 6, 300))]),
                ..FakeLookup::default()
            },
        );

        fx.poller.run_cycle().await;
        fx.poller.run_cycle().await;

        assert_eq!(*fx.notifier.dispatched.lock().unwrap(), vec![(1, 6)]);
    }

    #[tokio::test]
    async fn due_set_is_chunked_and_a_bad_chunk_is_isolated() {
        let due: Vec<TitleId> = (1..=130).collect();
        let mut media = BTreeMap::new();
        for id in &due {
            media.insert(*id, airing_media(*id, 2, 60));
        }
        let fx = fixture(
            FakeStore {
                due,
                ..FakeStore::default()
            },
            FakeLookup {
                media,
                // Id 60 sits in the second chunk (51..=100).
                fail_batches_containing: vec![60],
                ..FakeLookup::default()
            },
        );

        fx.poller.run_cycle().await;

        let batches = fx.lookup.batches.lock().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 50);
        assert_eq!(batches[1].len(), 50);
        assert_eq!(batches[2].len(), 30);

        // First and third chunks were processed despite the middle failure.
        let dispatched = fx.notifier.dispatched.lock().unwrap();
        assert_eq!(dispatched.len(), 80);
        assert!(dispatched.iter().all(|(id, _)| *id <= 50 || *id > 100));
    }

    #[tokio::test]
    async fn empty_due_set_skips_the_lookup() {
        let fx = fixture(FakeStore::default(), FakeLookup::default());

        fx.poller.run_cycle().await;

        assert!(fx.lookup.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn due_query_failure_aborts_the_cycle_quietly() {
        let fx = fixture(
            FakeStore {
                due_fails: true,
                ..FakeStore::default()
            },
            FakeLookup::default(),
        );

        fx.poller.run_cycle().await;

        assert!(fx.lookup.batches.lock().unwrap().is_empty());
        assert!(fx.notifier.dispatched.lock().unwrap().is_empty());
    }
}
