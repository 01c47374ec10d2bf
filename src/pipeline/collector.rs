use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::endpoints::{self, ApexTier, ApiRequest, MatchListQuery};
use crate::api::{Platform, Region, RiotClient};
use crate::config::Config;
use crate::db::ResponseCache;
use crate::error::{ApiError, ApiErrorKind, Error, ResolutionError};
use crate::models::{CollectedMatch, RawPayload, SkipStage, SkippedItem};

/// Ranked queue name used by the league endpoints
pub const RANKED_SOLO_QUEUE: &str = "RANKED_SOLO_5x5";

/// A player identified by Riot ID (`game_name#tag_line`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSubject {
    pub game_name: String,
    pub tag_line: String,
}

impl PlayerSubject {
    pub fn new(game_name: &str, tag_line: &str) -> Self {
        Self {
            game_name: game_name.trim().to_string(),
            tag_line: tag_line.trim().to_string(),
        }
    }
}

impl FromStr for PlayerSubject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('#') {
            Some((name, tag)) if !name.trim().is_empty() && !tag.trim().is_empty() => {
                Ok(Self::new(name, tag))
            }
            _ => Err(format!("`{}` is not a Riot ID (expected name#tag)", s)),
        }
    }
}

impl fmt::Display for PlayerSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.game_name, self.tag_line)
    }
}

/// Bounds for one player's collection run
#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Match ids to request (the API caps a page at 100)
    pub count: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Look up the player's ranked tier and tag the matches with it
    pub fetch_league: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            count: 20,
            start_time: None,
            end_time: None,
            fetch_league: true,
        }
    }
}

/// Raw payloads gathered for one subject, plus what could not be fetched
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub subject: String,
    pub puuid: Option<String>,
    /// Competitive tier or league every payload is tagged with
    pub league: Option<String>,
    /// Successful match details, in match-list order
    pub payloads: Vec<CollectedMatch>,
    pub failures: Vec<SkippedItem>,
    /// True when the run stopped early because of cancellation
    pub cancelled: bool,
}

/// Runs the account -> match ids -> match details -> league sequence
pub struct Collector {
    client: Arc<RiotClient>,
    cache: Arc<ResponseCache>,
    region: Region,
    platform: Platform,
    queue_id: Option<i64>,
    max_in_flight: usize,
}

impl Collector {
    pub fn new(
        client: Arc<RiotClient>,
        cache: Arc<ResponseCache>,
        region: Region,
        platform: Platform,
    ) -> Self {
        Self {
            client,
            cache,
            region,
            platform,
            queue_id: None,
            max_in_flight: 4,
        }
    }

    pub fn from_config(client: Arc<RiotClient>, cache: Arc<ResponseCache>, config: &Config) -> Self {
        Self::new(client, cache, config.region.clone(), config.platform.clone())
            .with_queue(Some(config.queue_id))
            .with_max_in_flight(config.max_in_flight)
    }

    /// Restrict match listings to one queue
    pub fn with_queue(mut self, queue_id: Option<i64>) -> Self {
        self.queue_id = queue_id;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Collect recent matches for one player
    pub async fn collect_player(
        &self,
        subject: &PlayerSubject,
        options: &CollectOptions,
        cancel: &CancellationToken,
    ) -> Result<Collection, Error> {
        let mut collection = Collection {
            subject: subject.to_string(),
            ..Default::default()
        };

        let puuid = match self.resolve_puuid(subject, cancel).await {
            Ok(puuid) => puuid,
            Err(Error::Cancelled) => return Ok(stopped_early(collection)),
            Err(e) => return Err(e),
        };
        collection.puuid = Some(puuid.clone());

        let match_ids = match self.match_ids(&puuid, options, cancel).await {
            Ok(ids) => ids,
            Err(Error::Cancelled) => return Ok(stopped_early(collection)),
            Err(e) => return Err(e),
        };
        info!("Found {} matches for {}", match_ids.len(), subject);

        if options.fetch_league && !cancel.is_cancelled() {
            match self.league_tier(&puuid, cancel).await {
                Ok(tier) => collection.league = tier,
                Err(Error::Cancelled) => collection.cancelled = true,
                Err(e) => {
                    warn!("League lookup failed for {}: {}", subject, e);
                    collection
                        .failures
                        .push(SkippedItem::new(puuid.clone(), SkipStage::League, e));
                }
            }
        }

        self.fetch_details(&match_ids, &mut collection, cancel).await;
        log_summary(&collection);

        Ok(collection)
    }

    /// Collect matches played by the top members of an apex league.
    ///
    /// Match ids are de-duplicated across members so a game between two
    /// members is fetched once.
    pub async fn collect_league(
        &self,
        tier: ApexTier,
        players: usize,
        options: &CollectOptions,
        cancel: &CancellationToken,
    ) -> Result<Collection, Error> {
        let mut collection = Collection {
            subject: format!("{} {}", self.platform.as_str(), tier.as_str()),
            league: Some(tier.as_str().to_string()),
            ..Default::default()
        };

        let request = endpoints::apex_league(&self.platform, tier, RANKED_SOLO_QUEUE);
        let standings = match self.client.request_cancellable(&request, cancel).await {
            Ok(standings) => standings,
            Err(Error::Cancelled) => return Ok(stopped_early(collection)),
            Err(e) => return Err(e),
        };

        let members = top_members(&standings, players);
        info!(
            "Collecting {} members of {}",
            members.len(),
            collection.subject
        );

        let mut seen = HashSet::new();
        let mut match_ids = Vec::new();

        for puuid in &members {
            if cancel.is_cancelled() {
                collection.cancelled = true;
                break;
            }

            match self.match_ids(puuid, options, cancel).await {
                Ok(ids) => {
                    for id in ids {
                        if seen.insert(id.clone()) {
                            match_ids.push(id);
                        }
                    }
                }
                Err(Error::Cancelled) => {
                    collection.cancelled = true;
                    break;
                }
                Err(e) => {
                    warn!("Match list failed for {}: {}", puuid, e);
                    collection
                        .failures
                        .push(SkippedItem::new(puuid.clone(), SkipStage::MatchList, e));
                }
            }
        }

        self.fetch_details(&match_ids, &mut collection, cancel).await;
        log_summary(&collection);

        Ok(collection)
    }

    /// Riot ID to puuid. The account lookup is cached; NotFound becomes a resolution error.
    pub async fn resolve_puuid(
        &self,
        subject: &PlayerSubject,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let request = endpoints::account_by_riot_id(&self.region, &subject.game_name, &subject.tag_line);

        let account = match self.cached(&request, cancel).await {
            Ok(account) => account,
            Err(Error::Api(e)) if e.kind == ApiErrorKind::NotFound => {
                return Err(ResolutionError::NotFound(subject.to_string()).into());
            }
            Err(Error::Api(e)) => {
                return Err(ResolutionError::Api {
                    subject: subject.to_string(),
                    source: e,
                }
                .into());
            }
            Err(e) => return Err(e),
        };

        account
            .get_str("puuid")
            .map(str::to_string)
            .ok_or_else(|| ResolutionError::MissingPuuid(subject.to_string()).into())
    }

    /// Match ids for a puuid, newest first. Not cached: the list grows over time.
    pub async fn match_ids(
        &self,
        puuid: &str,
        options: &CollectOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, Error> {
        let query = MatchListQuery {
            count: options.count,
            start: None,
            start_time: options.start_time.map(|t| t.timestamp()),
            end_time: options.end_time.map(|t| t.timestamp()),
            queue: self.queue_id,
        };
        let request = endpoints::match_ids_by_puuid(&self.region, puuid, &query);
        let payload = self.client.request_cancellable(&request, cancel).await?;

        let malformed = || ApiError::malformed(format!("match id list for {} is not an array of ids", puuid));

        let ids = payload
            .value()
            .as_array()
            .ok_or_else(malformed)?
            .iter()
            .map(|id| id.as_str().map(str::to_string).ok_or_else(malformed))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ids)
    }

    /// Tier of the player's entry in the configured ranked queue, if ranked
    pub async fn league_tier(
        &self,
        puuid: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, Error> {
        let request = endpoints::league_entries_by_puuid(&self.platform, puuid);
        let entries = self.client.request_cancellable(&request, cancel).await?;

        let tier = entries.value().as_array().and_then(|entries| {
            entries
                .iter()
                .find(|e| e.get("queueType").and_then(Value::as_str) == Some(RANKED_SOLO_QUEUE))
                .and_then(|e| e.get("tier"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        debug!("Ranked tier for {}: {:?}", puuid, tier);
        Ok(tier)
    }

    /// Match detail through the cache
    pub async fn match_detail(&self, match_id: &str, cancel: &CancellationToken) -> Result<RawPayload, Error> {
        self.cached(&endpoints::match_detail(&self.region, match_id), cancel)
            .await
    }

    /// Match timeline through the cache
    pub async fn match_timeline(&self, match_id: &str, cancel: &CancellationToken) -> Result<RawPayload, Error> {
        self.cached(&endpoints::match_timeline(&self.region, match_id), cancel)
            .await
    }

    /// Champion mastery entries through the cache
    pub async fn champion_mastery(&self, puuid: &str, cancel: &CancellationToken) -> Result<RawPayload, Error> {
        self.cached(&endpoints::champion_mastery(&self.platform, puuid), cancel)
            .await
    }

    async fn cached(&self, request: &ApiRequest, cancel: &CancellationToken) -> Result<RawPayload, Error> {
        self.cache
            .get_or_fetch(&request.key(), || self.client.request_cancellable(request, cancel))
            .await
    }

    /// Fetch details with bounded concurrency, recording failures instead of aborting
    async fn fetch_details(
        &self,
        match_ids: &[String],
        collection: &mut Collection,
        cancel: &CancellationToken,
    ) {
        let outcomes: Vec<(String, Result<RawPayload, Error>)> = stream::iter(match_ids.iter().cloned())
            .map(|match_id| async move {
                if cancel.is_cancelled() {
                    return (match_id, Err(Error::Cancelled));
                }
                let result = self.match_detail(&match_id, cancel).await;
                (match_id, result)
            })
            .buffered(self.max_in_flight)
            .collect()
            .await;

        for (match_id, outcome) in outcomes {
            match outcome {
                Ok(payload) => collection.payloads.push(CollectedMatch {
                    match_id,
                    payload,
                    league: collection.league.clone(),
                }),
                Err(Error::Cancelled) => {
                    collection.cancelled = true;
                    collection.failures.push(SkippedItem::new(
                        match_id,
                        SkipStage::Cancelled,
                        "not fetched before cancellation",
                    ));
                }
                Err(e) => {
                    warn!("Skipping match {}: {}", match_id, e);
                    collection
                        .failures
                        .push(SkippedItem::new(match_id, SkipStage::MatchDetail, e));
                }
            }
        }
    }
}

/// puuids of the `limit` highest entries by league points
fn top_members(standings: &RawPayload, limit: usize) -> Vec<String> {
    let mut entries: Vec<(i64, String)> = standings
        .get_path("entries")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| {
                    let puuid = e.get("puuid").and_then(Value::as_str)?;
                    let points = e.get("leaguePoints").and_then(Value::as_i64).unwrap_or(0);
                    Some((points, puuid.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    // Highest points first, puuid as a stable tie-break
    entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    entries.into_iter().take(limit).map(|(_, puuid)| puuid).collect()
}

/// Cancelled before any match detail was requested
fn stopped_early(mut collection: Collection) -> Collection {
    collection.cancelled = true;
    log_summary(&collection);
    collection
}

fn log_summary(collection: &Collection) {
    info!(
        "Collected {}: {} matches, {} failures{}",
        collection.subject,
        collection.payloads.len(),
        collection.failures.len(),
        if collection.cancelled { " (cancelled)" } else { "" }
    );
}
