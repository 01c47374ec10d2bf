use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use champion_trends::api::{HttpResponse, RetryPolicy, RiotClient, Transport, WindowLimit};
use champion_trends::error::ApiError;

/// Answers by URL path; a path may be scripted with several answers, the last one repeats
#[derive(Default)]
pub struct ScriptedTransport {
    answers: Mutex<HashMap<String, Vec<HttpResponse>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(self, path: &str, body: Value) -> Self {
        self.push(path, 200, None, body.to_string())
    }

    pub fn status(self, path: &str, status: u16) -> Self {
        self.push(path, status, None, String::new())
    }

    pub fn rate_limited(self, path: &str, retry_after_secs: u64) -> Self {
        self.push(path, 429, Some(Duration::from_secs(retry_after_secs)), String::new())
    }

    fn push(self, path: &str, status: u16, retry_after: Option<Duration>, body: String) -> Self {
        self.answers
            .lock()
            .entry(path.to_string())
            .or_default()
            .push(HttpResponse {
                status,
                retry_after,
                body,
            });
        self
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls.lock().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, _query: &[(String, String)]) -> Result<HttpResponse, ApiError> {
        let path = url.split_once(".test").map(|(_, p)| p).unwrap_or(url).to_string();

        let call = {
            let mut calls = self.calls.lock();
            let n = calls.entry(path.clone()).or_default();
            *n += 1;
            *n
        };

        let answers = self.answers.lock();
        let response = answers
            .get(&path)
            .and_then(|list| list.get(call - 1).or_else(|| list.last()))
            .cloned()
            .unwrap_or(HttpResponse {
                status: 404,
                retry_after: None,
                body: format!("no script for {}", path),
            });

        Ok(response)
    }
}

pub fn client(transport: Arc<ScriptedTransport>) -> RiotClient {
    RiotClient::new(
        transport,
        vec![
            WindowLimit::new(20, Duration::from_secs(1)),
            WindowLimit::new(100, Duration::from_secs(120)),
        ],
        RetryPolicy::default(),
    )
    .with_base_url("http://{host}.test")
}

pub const ACCOUNT_PATH: &str = "/riot/account/v1/accounts/by-riot-id/Doublelift/NA1";
pub const IDS_PATH: &str = "/lol/match/v5/matches/by-puuid/dl-puuid/ids";
pub const ENTRIES_PATH: &str = "/lol/league/v4/entries/by-puuid/dl-puuid";

pub fn detail_path(match_id: &str) -> String {
    format!("/lol/match/v5/matches/{}", match_id)
}

/// Two-player v5 payload: `champion` on the winning or losing side against Garen
pub fn match_payload(match_id: &str, version: &str, champion: i64, win: bool) -> Value {
    json!({
        "metadata": { "dataVersion": "2", "matchId": match_id },
        "info": {
            "gameVersion": version,
            "gameStartTimestamp": 1_705_000_000_000i64,
            "queueId": 420,
            "platformId": "NA1",
            "participants": [
                {
                    "participantId": 1,
                    "puuid": "dl-puuid",
                    "championId": champion,
                    "win": win,
                    "teamPosition": "BOTTOM"
                },
                {
                    "participantId": 2,
                    "puuid": format!("{}-opponent", match_id),
                    "championId": 86,
                    "win": !win,
                    "teamPosition": "TOP"
                }
            ]
        }
    })
}

pub fn ranked_entries(tier: &str) -> Value {
    json!([
        { "queueType": "RANKED_SOLO_5x5", "tier": tier, "rank": "I", "leaguePoints": 75 }
    ])
}
