use std::fmt;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SchemaError;
use crate::models::payload::lookup;
use crate::models::{MatchRecord, RawPayload};

/// League assigned when neither the payload nor the collector supplies one
pub const UNRANKED_LEAGUE: &str = "UNRANKED";

/// Role assigned when no position field is usable
pub const UNKNOWN_ROLE: &str = "UNKNOWN";

/// Shape of a match payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    /// Match-V4 era: flat `gameId`, stats nested per participant
    Legacy,
    /// Match-V5: `metadata` + `info`, puuid on every participant
    V5,
}

impl SchemaVersion {
    /// Guess the version from `metadata.dataVersion`, falling back to shape
    pub fn detect(payload: &RawPayload) -> Self {
        if payload.get_path("metadata.dataVersion").is_some() || payload.get_path("info").is_some() {
            SchemaVersion::V5
        } else if payload.get_path("gameId").is_some() {
            SchemaVersion::Legacy
        } else {
            SchemaVersion::V5
        }
    }
}

/// Candidate paths for one logical field
struct FieldPaths {
    name: &'static str,
    modern: &'static [&'static str],
    legacy: &'static [&'static str],
}

impl FieldPaths {
    /// Candidates in priority order for the given version
    fn candidates(&self, version: SchemaVersion) -> impl Iterator<Item = &'static str> {
        let (first, second) = match version {
            SchemaVersion::V5 => (self.modern, self.legacy),
            SchemaVersion::Legacy => (self.legacy, self.modern),
        };
        first.iter().chain(second.iter()).copied()
    }

    fn tried(&self, version: SchemaVersion) -> Vec<String> {
        self.candidates(version).map(str::to_string).collect()
    }

    /// First candidate that is present and converts with `extract`
    fn resolve<'a, T>(
        &self,
        root: &'a Value,
        version: SchemaVersion,
        extract: impl Fn(&'a Value) -> Option<T>,
    ) -> Option<T> {
        self.candidates(version)
            .filter_map(|path| lookup(root, path))
            .find_map(extract)
    }

    fn require<'a, T>(
        &self,
        root: &'a Value,
        version: SchemaVersion,
        extract: impl Fn(&'a Value) -> Option<T>,
    ) -> Result<T, SchemaError> {
        self.resolve(root, version, extract).ok_or_else(|| SchemaError {
            field: self.name.to_string(),
            tried: self.tried(version),
        })
    }
}

// Payload-level fields

const MATCH_ID: FieldPaths = FieldPaths {
    name: "match_id",
    modern: &["metadata.matchId"],
    legacy: &["gameId", "info.gameId"],
};

const GAME_VERSION: FieldPaths = FieldPaths {
    name: "patch",
    modern: &["info.gameVersion"],
    legacy: &["gameVersion"],
};

const QUEUE: FieldPaths = FieldPaths {
    name: "queue_type",
    modern: &["info.queueId"],
    legacy: &["queueId", "queue"],
};

const PLATFORM: FieldPaths = FieldPaths {
    name: "region",
    modern: &["info.platformId"],
    legacy: &["platformId"],
};

const GAME_START: FieldPaths = FieldPaths {
    name: "game_start",
    modern: &["info.gameStartTimestamp", "info.gameCreation"],
    legacy: &["gameCreation", "gameStartTimestamp"],
};

const LEAGUE: FieldPaths = FieldPaths {
    name: "league",
    modern: &["info.league", "metadata.league"],
    legacy: &["league", "tournament"],
};

const PARTICIPANTS: FieldPaths = FieldPaths {
    name: "participants",
    modern: &["info.participants"],
    legacy: &["participants"],
};

// Participant-level fields, relative to one participant object

const PARTICIPANT_ID: FieldPaths = FieldPaths {
    name: "participant_id",
    modern: &["participantId"],
    legacy: &["participantId"],
};

const PUUID: FieldPaths = FieldPaths {
    name: "puuid",
    modern: &["puuid"],
    legacy: &["player.puuid", "summonerPuuid"],
};

const CHAMPION: FieldPaths = FieldPaths {
    name: "champion_id",
    modern: &["championId"],
    legacy: &["championId", "champion"],
};

const WIN: FieldPaths = FieldPaths {
    name: "win",
    modern: &["win"],
    legacy: &["stats.win"],
};

const ROLE: FieldPaths = FieldPaths {
    name: "role",
    modern: &["teamPosition", "individualPosition"],
    legacy: &["timeline.lane", "lane", "role"],
};

/// Why a participant record was left out
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    Schema(SchemaError),
    /// Match belongs to a queue the pipeline is not scoped to
    OtherQueue(i64),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Schema(e) => write!(f, "{}", e),
            DropReason::OtherQueue(q) => write!(f, "queue {} is out of scope", q),
        }
    }
}

/// A participant that did not become a record
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedRecord {
    /// Known when the payload-level match id resolved
    pub match_id: Option<String>,
    /// Position in the participant list, when the failure was per participant
    pub participant_index: Option<usize>,
    pub reason: DropReason,
}

impl DroppedRecord {
    /// Identifier suitable for a failure manifest
    pub fn item(&self) -> String {
        let match_id = self.match_id.as_deref().unwrap_or("<unknown match>");
        match self.participant_index {
            Some(i) => format!("{}#{}", match_id, i + 1),
            None => match_id.to_string(),
        }
    }
}

/// Output of one normalization pass over a payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    /// In payload participant order
    pub records: Vec<MatchRecord>,
    pub dropped: Vec<DroppedRecord>,
}

/// Turns raw match payloads into participant records.
///
/// Pure: the same payload and settings always yield the same output.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    /// Only keep matches from this queue
    pub queue_filter: Option<i64>,
}

impl Normalizer {
    pub fn new(queue_filter: Option<i64>) -> Self {
        Self { queue_filter }
    }

    /// Normalize one payload. `league_hint` tags records whose payload carries no league.
    pub fn normalize(
        &self,
        payload: &RawPayload,
        version: SchemaVersion,
        league_hint: Option<&str>,
    ) -> Normalized {
        let root = payload.value();
        let match_id = MATCH_ID.resolve(root, version, as_string);

        let context = match MatchContext::resolve(root, version, league_hint) {
            Ok(context) => context,
            Err(e) => return Normalized::whole_payload_dropped(match_id, root, version, DropReason::Schema(e)),
        };

        if let Some(wanted) = self.queue_filter {
            if context.queue_type != wanted {
                debug!(
                    "Skipping match {} from queue {}",
                    context.match_id, context.queue_type
                );
                return Normalized::whole_payload_dropped(
                    Some(context.match_id),
                    root,
                    version,
                    DropReason::OtherQueue(context.queue_type),
                );
            }
        }

        let participants = match PARTICIPANTS.require(root, version, Value::as_array) {
            Ok(p) => p,
            Err(e) => {
                return Normalized::whole_payload_dropped(
                    Some(context.match_id),
                    root,
                    version,
                    DropReason::Schema(e),
                )
            }
        };

        let mut output = Normalized::default();

        for (index, participant) in participants.iter().enumerate() {
            match normalize_participant(root, participant, index, version, &context) {
                Ok(record) => output.records.push(record),
                Err(e) => {
                    warn!(
                        "Dropping participant {} of match {}: {}",
                        index + 1,
                        context.match_id,
                        e
                    );
                    output.dropped.push(DroppedRecord {
                        match_id: Some(context.match_id.clone()),
                        participant_index: Some(index),
                        reason: DropReason::Schema(e),
                    });
                }
            }
        }

        output
    }
}

/// Normalize with default settings and no league hint
pub fn normalize(payload: &RawPayload, version: SchemaVersion) -> Normalized {
    Normalizer::default().normalize(payload, version, None)
}

impl Normalized {
    fn whole_payload_dropped(
        match_id: Option<String>,
        root: &Value,
        version: SchemaVersion,
        reason: DropReason,
    ) -> Self {
        let count = PARTICIPANTS
            .resolve(root, version, Value::as_array)
            .map_or(0, Vec::len);

        warn!(
            "Dropping match {} ({} participants): {}",
            match_id.as_deref().unwrap_or("<unknown>"),
            count,
            reason
        );

        // One entry per participant when we can count them, otherwise one for the payload
        let dropped = if count == 0 {
            vec![DroppedRecord {
                match_id,
                participant_index: None,
                reason,
            }]
        } else {
            (0..count)
                .map(|i| DroppedRecord {
                    match_id: match_id.clone(),
                    participant_index: Some(i),
                    reason: reason.clone(),
                })
                .collect()
        };

        Self {
            records: Vec::new(),
            dropped,
        }
    }
}

/// Fields shared by every participant of a match
struct MatchContext {
    match_id: String,
    patch: String,
    league: String,
    queue_type: i64,
    region: String,
    game_start_ms: Option<i64>,
}

impl MatchContext {
    fn resolve(root: &Value, version: SchemaVersion, league_hint: Option<&str>) -> Result<Self, SchemaError> {
        let match_id = MATCH_ID.require(root, version, as_string)?;
        let patch = GAME_VERSION.require(root, version, |v| as_string(v).and_then(|s| patch_of(&s)))?;
        let queue_type = QUEUE.require(root, version, as_i64)?;

        let league = LEAGUE
            .resolve(root, version, as_string)
            .or_else(|| league_hint.map(str::to_string))
            .unwrap_or_else(|| UNRANKED_LEAGUE.to_string());

        Ok(Self {
            match_id,
            patch,
            league,
            queue_type,
            region: PLATFORM.resolve(root, version, as_string).unwrap_or_default(),
            game_start_ms: GAME_START.resolve(root, version, |v| as_i64(v).and_then(to_millis)),
        })
    }
}

fn normalize_participant(
    root: &Value,
    participant: &Value,
    index: usize,
    version: SchemaVersion,
    context: &MatchContext,
) -> Result<MatchRecord, SchemaError> {
    let participant_id = PARTICIPANT_ID
        .resolve(participant, version, as_i64)
        .and_then(|id| u32::try_from(id).ok())
        .unwrap_or(index as u32 + 1);

    // Legacy payloads keep identities in a separate list keyed by participantId
    let puuid = PUUID
        .resolve(participant, version, as_string)
        .or_else(|| legacy_identity(root, participant_id))
        .ok_or_else(|| SchemaError {
            field: PUUID.name.to_string(),
            tried: PUUID.tried(version),
        })?;

    let champion_id = CHAMPION.require(participant, version, as_i64)?;
    let win = WIN.require(participant, version, as_win)?;

    let role = ROLE
        .resolve(participant, version, |v| as_string(v).filter(|r| is_known_role(r)))
        .unwrap_or_else(|| UNKNOWN_ROLE.to_string());

    Ok(MatchRecord {
        match_id: context.match_id.clone(),
        participant_id,
        puuid,
        patch: context.patch.clone(),
        league: context.league.clone(),
        queue_type: context.queue_type,
        region: context.region.clone(),
        champion_id,
        win,
        role,
        game_start_ms: context.game_start_ms,
    })
}

fn legacy_identity(root: &Value, participant_id: u32) -> Option<String> {
    lookup(root, "participantIdentities")?
        .as_array()?
        .iter()
        .find(|identity| lookup(identity, "participantId").and_then(as_i64) == Some(participant_id as i64))
        .and_then(|identity| lookup(identity, "player.puuid"))
        .and_then(as_string)
}

/// Non-empty string, or a number rendered as a string
fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Booleans, or the "Win"/"Fail" strings of older payloads
fn as_win(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "win" | "true" => Some(true),
            "fail" | "loss" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn is_known_role(role: &str) -> bool {
    !matches!(role.to_ascii_uppercase().as_str(), "" | "NONE" | "INVALID")
}

/// "14.1.555.1234" -> "14.1"
pub fn patch_of(game_version: &str) -> Option<String> {
    let mut parts = game_version.trim().split('.');
    let major = parts.next().filter(|p| !p.is_empty())?;
    match parts.next() {
        Some(minor) if !minor.is_empty() => Some(format!("{}.{}", major, minor)),
        _ => Some(major.to_string()),
    }
}

/// Riot timestamps are milliseconds; anything small enough to be seconds is scaled up.
/// Non-positive values are not timestamps.
fn to_millis(timestamp: i64) -> Option<i64> {
    if timestamp <= 0 {
        None
    } else if timestamp > 10_000_000_000 {
        Some(timestamp)
    } else {
        timestamp.checked_mul(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v5_payload() -> RawPayload {
        RawPayload::new(json!({
            "metadata": { "dataVersion": "2", "matchId": "LA1_1500" },
            "info": {
                "gameVersion": "14.1.555.1234",
                "gameStartTimestamp": 1_704_000_000_000i64,
                "queueId": 420,
                "platformId": "LA1",
                "participants": [
                    { "participantId": 1, "puuid": "p1", "championId": 103, "win": true, "teamPosition": "MIDDLE" },
                    { "participantId": 2, "puuid": "p2", "championId": 64, "win": false, "teamPosition": "", "individualPosition": "JUNGLE" },
                    { "participantId": 3, "championId": 12, "win": false },
                    { "participantId": 4, "puuid": "p4", "championId": 22, "win": true, "teamPosition": "Invalid" }
                ]
            }
        }))
    }

    fn legacy_payload() -> RawPayload {
        RawPayload::new(json!({
            "gameId": 987654,
            "platformId": "NA1",
            "gameCreation": 1_600_000_000i64,
            "gameVersion": "10.19.337.6669",
            "queueId": 420,
            "participantIdentities": [
                { "participantId": 1, "player": { "puuid": "legacy-1" } },
                { "participantId": 2, "player": { "puuid": "legacy-2" } }
            ],
            "participants": [
                { "participantId": 1, "championId": 1, "stats": { "win": true }, "timeline": { "lane": "MIDDLE" } },
                { "participantId": 2, "championId": 2, "stats": { "win": "Fail" }, "timeline": { "lane": "NONE" } }
            ]
        }))
    }

    #[test]
    fn test_v5_records_in_participant_order() {
        let out = normalize(&v5_payload(), SchemaVersion::V5);

        let champions: Vec<i64> = out.records.iter().map(|r| r.champion_id).collect();
        assert_eq!(champions, vec![103, 64, 22]);

        let first = &out.records[0];
        assert_eq!(first.match_id, "LA1_1500");
        assert_eq!(first.patch, "14.1");
        assert_eq!(first.queue_type, 420);
        assert_eq!(first.region, "LA1");
        assert_eq!(first.league, UNRANKED_LEAGUE);
        assert_eq!(first.role, "MIDDLE");
        assert_eq!(first.game_start_ms, Some(1_704_000_000_000));

        // Empty teamPosition falls through to individualPosition
        assert_eq!(out.records[1].role, "JUNGLE");
        assert_eq!(out.records[2].role, UNKNOWN_ROLE);
    }

    #[test]
    fn test_missing_puuid_drops_only_that_record() {
        let out = normalize(&v5_payload(), SchemaVersion::V5);

        assert_eq!(out.dropped.len(), 1);
        let dropped = &out.dropped[0];
        assert_eq!(dropped.participant_index, Some(2));
        assert_eq!(dropped.item(), "LA1_1500#3");
        match &dropped.reason {
            DropReason::Schema(e) => {
                assert_eq!(e.field, "puuid");
                assert_eq!(e.tried, vec!["puuid", "player.puuid", "summonerPuuid"]);
            }
            other => panic!("unexpected reason {:?}", other),
        }
    }

    #[test]
    fn test_legacy_payload() {
        let payload = legacy_payload();
        assert_eq!(SchemaVersion::detect(&payload), SchemaVersion::Legacy);

        let out = normalize(&payload, SchemaVersion::Legacy);
        assert!(out.dropped.is_empty());
        assert_eq!(out.records.len(), 2);

        let first = &out.records[0];
        assert_eq!(first.match_id, "987654");
        assert_eq!(first.puuid, "legacy-1");
        assert_eq!(first.patch, "10.19");
        assert!(first.win);
        assert_eq!(first.game_start_ms, Some(1_600_000_000_000));
        assert!(!out.records[1].win);
        assert_eq!(out.records[1].role, UNKNOWN_ROLE);
    }

    #[test]
    fn test_legacy_fields_found_under_v5_priority() {
        // Modern candidates come first but legacy ones still resolve
        let out = normalize(&legacy_payload(), SchemaVersion::V5);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].match_id, "987654");
    }

    #[test]
    fn test_missing_patch_drops_whole_payload() {
        let payload = RawPayload::new(json!({
            "metadata": { "matchId": "LA1_2" },
            "info": {
                "queueId": 420,
                "participants": [ { "puuid": "a", "championId": 1, "win": true }, { "puuid": "b", "championId": 2, "win": false } ]
            }
        }));

        let out = normalize(&payload, SchemaVersion::V5);
        assert!(out.records.is_empty());
        assert_eq!(out.dropped.len(), 2);
        assert!(out
            .dropped
            .iter()
            .all(|d| matches!(&d.reason, DropReason::Schema(e) if e.field == "patch")));
        assert_eq!(out.dropped[0].match_id.as_deref(), Some("LA1_2"));
    }

    #[test]
    fn test_queue_filter() {
        let normalizer = Normalizer::new(Some(440));
        let out = normalizer.normalize(&v5_payload(), SchemaVersion::V5, None);

        assert!(out.records.is_empty());
        assert_eq!(out.dropped.len(), 4);
        assert_eq!(out.dropped[0].reason, DropReason::OtherQueue(420));
    }

    #[test]
    fn test_league_hint_and_payload_league() {
        let normalizer = Normalizer::new(Some(420));
        let out = normalizer.normalize(&v5_payload(), SchemaVersion::V5, Some("CHALLENGER"));
        assert!(out.records.iter().all(|r| r.league == "CHALLENGER"));

        let with_league = RawPayload::new(json!({
            "metadata": { "matchId": "ESPORTS_1", "league": "LCK" },
            "info": {
                "gameVersion": "14.2.1",
                "queueId": 420,
                "participants": [ { "puuid": "a", "championId": 1, "win": true } ]
            }
        }));
        let out = normalizer.normalize(&with_league, SchemaVersion::V5, Some("CHALLENGER"));
        assert_eq!(out.records[0].league, "LCK");
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let payload = v5_payload();
        let first = serde_json::to_vec(&normalize(&payload, SchemaVersion::V5).records).unwrap();
        let second = serde_json::to_vec(&normalize(&payload, SchemaVersion::V5).records).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_bad_start_timestamp_is_ignored() {
        let mut value = v5_payload().value().clone();
        value["info"]["gameStartTimestamp"] = json!(-9_000_000_000_000_000_000i64);
        value["info"]["gameCreation"] = json!(1_703_999_000i64);

        let out = normalize(&RawPayload::new(value.clone()), SchemaVersion::V5);
        assert_eq!(out.records.len(), 3);
        // Falls through to the next candidate, read as seconds
        assert_eq!(out.records[0].game_start_ms, Some(1_703_999_000_000));

        if let Some(info) = value["info"].as_object_mut() {
            info.remove("gameCreation");
        }
        let out = normalize(&RawPayload::new(value), SchemaVersion::V5);
        assert_eq!(out.records.len(), 3);
        assert_eq!(out.records[0].game_start_ms, None);
    }

    #[test]
    fn test_to_millis() {
        assert_eq!(to_millis(1_700_000_000), Some(1_700_000_000_000));
        assert_eq!(to_millis(1_700_000_000_000), Some(1_700_000_000_000));
        assert_eq!(to_millis(0), None);
        assert_eq!(to_millis(i64::MIN), None);
    }

    #[test]
    fn test_patch_of() {
        assert_eq!(patch_of("14.1.555.1234").as_deref(), Some("14.1"));
        assert_eq!(patch_of("14.10").as_deref(), Some("14.10"));
        assert_eq!(patch_of("14").as_deref(), Some("14"));
        assert_eq!(patch_of(""), None);
    }
}
