//! AniList media lookup client.
//!
//! One batched GraphQL query per chunk of tracked titles. Transient failures
//! (network errors, 5xx, 429) are retried with exponential backoff through
//! [`crate::retry::with_retry`]; everything else surfaces to the caller.

use crate::TitleId;
use crate::error::LookupError;
use crate::retry::{RetryPolicy, with_retry};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

const ANILIST_ENDPOINT: &str = "https://graphql.anilist.co";

/// Batched airing query. Field set matches what the dispatcher and the card
/// renderer consume; `nextAiringEpisode` is the part the poller cares about.
const AIRING_QUERY: &str = r#"
query ($ids: [Int]) {
    Page {
        media(id_in: $ids, type: ANIME) {
            id
            title { romaji english }
            coverImage { extraLarge large color }
            bannerImage
            format
            genres
            studios(isMain: true) { nodes { name } }
            siteUrl
            nextAiringEpisode {
                episode
                airingAt
                timeUntilAiring
            }
        }
    }
}
"#;

/// A media record returned by the lookup service. Sparse fields stay
/// `Option` so the "finished series" and "no imminent episode" branches are
/// explicit at the call site.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: TitleId,
    pub title: MediaTitle,
    #[serde(default)]
    pub cover_image: Option<CoverImage>,
    #[serde(default)]
    pub banner_image: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub studios: Option<StudioConnection>,
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub next_airing_episode: Option<NextAiringEpisode>,
}

impl Media {
    /// English title when AniList has one, romaji otherwise.
    pub fn display_title(&self) -> &str {
        self.title
            .english
            .as_deref()
            .or(self.title.romaji.as_deref())
            .unwrap_or("Unknown title")
    }

    /// The main studio's name, when AniList knows one.
    pub fn main_studio(&self) -> Option<&str> {
        self.studios
            .as_ref()?
            .nodes
            .first()
            .map(|studio| studio.name.as_str())
    }

    /// Canonical AniList page, falling back to the id-based URL.
    pub fn page_url(&self) -> String {
        self.site_url
            .clone()
            .unwrap_or_else(|| format!("https://anilist.co/anime/{}", self.id))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaTitle {
    #[serde(default)]
    pub romaji: Option<String>,
    #[serde(default)]
    pub english: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverImage {
    #[serde(default)]
    pub extra_large: Option<String>,
    #[serde(default)]
    pub large: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudioConnection {
    #[serde(default)]
    pub nodes: Vec<Studio>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Studio {
    pub name: String,
}

/// The upcoming episode as AniList reports it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextAiringEpisode {
    pub episode: u32,
    /// Absolute airing instant, Unix epoch seconds.
    pub airing_at: i64,
    /// Seconds until the episode airs; can dip negative right at the boundary.
    pub time_until_airing: i64,
}

impl NextAiringEpisode {
    /// The airing instant as a UTC timestamp, when in chrono's range.
    pub fn airing_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.airing_at, 0)
    }
}

/// Read-only media lookup service.
#[async_trait::async_trait]
pub trait MediaLookup: Send + Sync {
    /// Fetch media records for a batch of IDs. IDs unknown to the service
    /// are silently absent from the result.
    async fn media_by_ids(&self, ids: &[TitleId]) -> Result<Vec<Media>, LookupError>;
}

/// GraphQL client for the AniList API.
pub struct AniListClient {
    http: reqwest::Client,
    endpoint: String,
    retry: RetryPolicy,
}

impl AniListClient {
    pub fn new() -> Self {
        Self::with_endpoint(ANILIST_ENDPOINT)
    }

    /// Point the client at a different endpoint (test servers).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            retry: RetryPolicy::default(),
        }
    }

    async fn post_airing_query(&self, ids: &[TitleId]) -> Result<Vec<Media>, LookupError> {
        let body = json!({
            "query": AIRING_QUERY,
            "variables": { "ids": ids },
        });

        let response = self.http.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status {
                status: status.as_u16(),
            });
        }

        let envelope: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| LookupError::Malformed(e.to_string()))?;
        let data = envelope
            .data
            .ok_or_else(|| LookupError::Malformed("response missing data".into()))?;
        Ok(data.page.media)
    }
}

impl Default for AniListClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MediaLookup for AniListClient {
    async fn media_by_ids(&self, ids: &[TitleId]) -> Result<Vec<Media>, LookupError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        with_retry(self.retry, LookupError::is_retryable, || {
            self.post_airing_query(ids)
        })
        .await
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<AiringData>,
}

#[derive(Debug, Deserialize)]
struct AiringData {
    #[serde(rename = "Page")]
    page: Page,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    media: Vec<Media>,
}
