use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::models::{AggregateRow, MatchRecord};

/// z for a two-sided 95% interval
const Z_95: f64 = 1.959_963_984_540_054;

/// Aggregated table plus the threshold used to hide tiny samples
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateTable {
    rows: Vec<AggregateRow>,
    min_sample_size: u64,
}

impl AggregateTable {
    /// Rows with at least `min_sample_size` games, in output order
    pub fn rows(&self) -> Vec<&AggregateRow> {
        self.rows
            .iter()
            .filter(|r| r.games_played >= self.min_sample_size)
            .collect()
    }

    /// Every group regardless of sample size
    pub fn all_rows(&self) -> &[AggregateRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<AggregateRow> {
        let min = self.min_sample_size;
        self.rows.into_iter().filter(|r| r.games_played >= min).collect()
    }

    pub fn min_sample_size(&self) -> u64 {
        self.min_sample_size
    }

    /// Same counts, different visibility threshold
    pub fn with_min_sample_size(mut self, min_sample_size: u64) -> Self {
        self.min_sample_size = min_sample_size;
        self
    }

    /// Number of groups hidden by the threshold
    pub fn hidden_count(&self) -> usize {
        self.rows.len() - self.rows().len()
    }

    /// Win-rate series for one champion in one league, oldest patch first
    pub fn trend(&self, champion_id: i64, league: &str) -> Vec<&AggregateRow> {
        self.rows()
            .into_iter()
            .filter(|r| r.champion_id == champion_id && r.league == league)
            .collect()
    }
}

/// Groups participant records by (champion, patch, league)
#[derive(Debug, Clone)]
pub struct Aggregator {
    pub min_sample_size: u64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self { min_sample_size: 10 }
    }
}

#[derive(Default)]
struct Tally {
    games: u64,
    wins: u64,
}

impl Aggregator {
    pub fn new(min_sample_size: u64) -> Self {
        Self { min_sample_size }
    }

    /// Recompute the whole table from `records`.
    ///
    /// Pick rate is a champion's games over the number of distinct matches in
    /// its (patch, league) population, so it reads as "picked in X% of games".
    pub fn aggregate(&self, records: &[MatchRecord]) -> AggregateTable {
        // BTreeMap keys make grouping independent of input order
        let mut groups: BTreeMap<(i64, &str, &str), Tally> = BTreeMap::new();
        let mut matches: HashMap<(&str, &str), HashSet<&str>> = HashMap::new();

        for record in records {
            let tally = groups
                .entry((record.champion_id, record.patch.as_str(), record.league.as_str()))
                .or_default();
            tally.games += 1;
            if record.win {
                tally.wins += 1;
            }

            matches
                .entry(record.population())
                .or_default()
                .insert(record.match_id.as_str());
        }

        let mut rows: Vec<AggregateRow> = groups
            .into_iter()
            .map(|((champion_id, patch, league), tally)| {
                let population = matches.get(&(patch, league)).map_or(0, HashSet::len) as u64;
                let (low, high) = wilson_interval(tally.wins, tally.games);

                AggregateRow {
                    champion_id,
                    patch: patch.to_string(),
                    league: league.to_string(),
                    games_played: tally.games,
                    wins: tally.wins,
                    win_rate: ratio(tally.wins, tally.games),
                    pick_rate_within_patch_league: ratio(tally.games, population),
                    win_rate_low: low,
                    win_rate_high: high,
                }
            })
            .collect();

        rows.sort_by(|a, b| a.sort_order(b));

        debug!(
            "Aggregated {} records into {} groups",
            records.len(),
            rows.len()
        );

        AggregateTable {
            rows,
            min_sample_size: self.min_sample_size,
        }
    }
}

/// `num / den`, or 0 when there is nothing to divide by
fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// 95% Wilson score interval for a binomial proportion
pub fn wilson_interval(wins: u64, games: u64) -> (f64, f64) {
    if games == 0 {
        return (0.0, 0.0);
    }

    let n = games as f64;
    let p = wins as f64 / n;
    let z2 = Z_95 * Z_95;

    let denom = 1.0 + z2 / n;
    let center = p + z2 / (2.0 * n);
    let margin = Z_95 * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt();

    (
        ((center - margin) / denom).clamp(0.0, 1.0),
        ((center + margin) / denom).clamp(0.0, 1.0),
    )
}
