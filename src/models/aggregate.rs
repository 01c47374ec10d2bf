use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Win/pick statistics for one (champion, patch, league) group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub champion_id: i64,
    pub patch: String,
    pub league: String,
    pub games_played: u64,
    pub wins: u64,
    pub win_rate: f64,
    pub pick_rate_within_patch_league: f64,
    /// Lower bound of the 95% Wilson interval on win rate
    pub win_rate_low: f64,
    /// Upper bound of the 95% Wilson interval on win rate
    pub win_rate_high: f64,
}

impl AggregateRow {
    /// Deterministic output order: league, then patch (numerically), then champion
    pub fn sort_order(&self, other: &Self) -> Ordering {
        self.league
            .cmp(&other.league)
            .then_with(|| compare_patches(&self.patch, &other.patch))
            .then_with(|| self.champion_id.cmp(&other.champion_id))
    }
}

/// Compare patch strings segment by segment so that "14.9" < "14.10".
/// Non-numeric segments fall back to string comparison.
pub fn compare_patches(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');

    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
