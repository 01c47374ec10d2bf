use serde::{Deserialize, Serialize};

/// One participant's view of one match, in the uniform schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,

    /// Participant slot within the match (1-based)
    pub participant_id: u32,

    pub puuid: String,

    /// Major.minor game version, e.g. "14.1"
    pub patch: String,

    /// League or competitive tier the record is scoped to
    pub league: String,

    /// Numeric queue id (420 = ranked solo/duo)
    pub queue_type: i64,

    /// Platform the match was played on, e.g. "LA1"
    pub region: String,

    /// Champion identifier. Display names are resolved at presentation time.
    pub champion_id: i64,

    pub win: bool,

    pub role: String,

    /// Game start, milliseconds since the Unix epoch
    pub game_start_ms: Option<i64>,
}

impl MatchRecord {
    /// Key of the (patch, league) population this record belongs to
    pub fn population(&self) -> (&str, &str) {
        (&self.patch, &self.league)
    }
}
