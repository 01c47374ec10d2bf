use std::collections::BTreeMap;
use std::fmt;

/// Broad routing value used by the account and match families
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region(String);

/// Narrow routing value used by the league and mastery families
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform(String);

impl Region {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Platform {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Host the request is sent to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Routing {
    Region(Region),
    Platform(Platform),
}

impl Routing {
    pub fn host(&self) -> &str {
        match self {
            Routing::Region(r) => r.as_str(),
            Routing::Platform(p) => p.as_str(),
        }
    }
}

impl fmt::Display for Routing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.host())
    }
}

/// Deterministic identity of a request, used as the cache key.
///
/// Parameters are sorted by name so logically identical requests collide.
/// Names and values are percent-encoded so distinct parameter sets never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn new(routing: &Routing, path: &str, params: &BTreeMap<String, String>) -> Self {
        let mut key = format!("{}:{}", routing.host(), path);
        if !params.is_empty() {
            let query: Vec<String> = params
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect();
            key.push('?');
            key.push_str(&query.join("&"));
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully specified API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub routing: Routing,
    /// Path with identifiers already substituted and escaped
    pub path: String,
    pub params: BTreeMap<String, String>,
}

impl ApiRequest {
    pub fn new(routing: Routing, path: impl Into<String>) -> Self {
        Self {
            routing,
            path: path.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.insert(name.trim().to_string(), value.to_string());
        self
    }

    pub fn param_opt(self, name: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.param(name, v),
            None => self,
        }
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.routing, &self.path, &self.params)
    }

    pub fn url(&self, base_url_template: &str) -> String {
        format!(
            "{}{}",
            base_url_template.replace("{host}", self.routing.host()),
            self.path
        )
    }

    pub fn query(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Bounds for a match-id listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchListQuery {
    pub count: u32,
    pub start: Option<u32>,
    /// Epoch seconds, inclusive
    pub start_time: Option<i64>,
    /// Epoch seconds, inclusive
    pub end_time: Option<i64>,
    pub queue: Option<i64>,
}

/// Account-V1: Riot ID to account
pub fn account_by_riot_id(region: &Region, game_name: &str, tag_line: &str) -> ApiRequest {
    ApiRequest::new(
        Routing::Region(region.clone()),
        format!(
            "/riot/account/v1/accounts/by-riot-id/{}/{}",
            urlencoding::encode(game_name),
            urlencoding::encode(tag_line)
        ),
    )
}

/// Match-V5: match ids played by a puuid, newest first
pub fn match_ids_by_puuid(region: &Region, puuid: &str, query: &MatchListQuery) -> ApiRequest {
    ApiRequest::new(
        Routing::Region(region.clone()),
        format!("/lol/match/v5/matches/by-puuid/{}/ids", urlencoding::encode(puuid)),
    )
    .param("count", query.count.min(100))
    .param_opt("start", query.start)
    .param_opt("startTime", query.start_time)
    .param_opt("endTime", query.end_time)
    .param_opt("queue", query.queue)
}

/// Match-V5: full match detail
pub fn match_detail(region: &Region, match_id: &str) -> ApiRequest {
    ApiRequest::new(
        Routing::Region(region.clone()),
        format!("/lol/match/v5/matches/{}", urlencoding::encode(match_id)),
    )
}

/// Match-V5: per-minute timeline
pub fn match_timeline(region: &Region, match_id: &str) -> ApiRequest {
    ApiRequest::new(
        Routing::Region(region.clone()),
        format!("/lol/match/v5/matches/{}/timeline", urlencoding::encode(match_id)),
    )
}

/// League-V4: ranked entries (one per queue) for a puuid
pub fn league_entries_by_puuid(platform: &Platform, puuid: &str) -> ApiRequest {
    ApiRequest::new(
        Routing::Platform(platform.clone()),
        format!("/lol/league/v4/entries/by-puuid/{}", urlencoding::encode(puuid)),
    )
}

/// Apex tiers that have a single league per queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApexTier {
    Challenger,
    Grandmaster,
    Master,
}

impl ApexTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApexTier::Challenger => "CHALLENGER",
            ApexTier::Grandmaster => "GRANDMASTER",
            ApexTier::Master => "MASTER",
        }
    }

    fn path_segment(&self) -> &'static str {
        match self {
            ApexTier::Challenger => "challengerleagues",
            ApexTier::Grandmaster => "grandmasterleagues",
            ApexTier::Master => "masterleagues",
        }
    }
}

/// League-V4: standings of an apex league
pub fn apex_league(platform: &Platform, tier: ApexTier, queue: &str) -> ApiRequest {
    ApiRequest::new(
        Routing::Platform(platform.clone()),
        format!(
            "/lol/league/v4/{}/by-queue/{}",
            tier.path_segment(),
            urlencoding::encode(queue)
        ),
    )
}

/// Champion-Mastery-V4: mastery entries for a puuid
pub fn champion_mastery(platform: &Platform, puuid: &str) -> ApiRequest {
    ApiRequest::new(
        Routing::Platform(platform.clone()),
        format!(
            "/lol/champion-mastery/v4/champion-masteries/by-puuid/{}",
            urlencoding::encode(puuid)
        ),
    )
}
