pub mod aggregator;
pub mod collector;
pub mod normalizer;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::db::SnapshotStore;
use crate::error::CacheError;
use crate::models::{MatchRecord, SkipStage, SkippedItem};

pub use aggregator::{AggregateTable, Aggregator};
pub use collector::{CollectOptions, Collection, Collector, PlayerSubject};
pub use normalizer::{Normalized, Normalizer, SchemaVersion};

/// Result of one end-to-end run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub table: AggregateTable,
    /// Normalized records that fed the table
    pub record_count: usize,
    /// Everything that was skipped, from collection or normalization
    pub skipped: Vec<SkippedItem>,
    /// At least one collection stopped early
    pub cancelled: bool,
}

/// Normalizes collected payloads and aggregates them into a table
pub struct Pipeline {
    normalizer: Normalizer,
    aggregator: Aggregator,
    snapshots: Option<Arc<SnapshotStore>>,
}

impl Pipeline {
    pub fn new(normalizer: Normalizer, aggregator: Aggregator) -> Self {
        Self {
            normalizer,
            aggregator,
            snapshots: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Normalizer::new(Some(config.queue_id)),
            Aggregator::new(config.min_sample_size),
        )
    }

    /// Persist every computed table to `store`
    pub fn with_snapshots(mut self, store: Arc<SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    /// Normalize every payload in `collections`, in collection order.
    ///
    /// A participant is kept once per match even when several collections
    /// fetched the same game; the first collection's copy wins.
    pub fn records(&self, collections: &[Collection]) -> (Vec<MatchRecord>, Vec<SkippedItem>) {
        let mut records = Vec::new();
        let mut skipped = Vec::new();
        let mut seen: HashSet<(String, u32)> = HashSet::new();

        for collection in collections {
            skipped.extend(collection.failures.iter().cloned());

            for collected in &collection.payloads {
                let version = SchemaVersion::detect(&collected.payload);
                let normalized =
                    self.normalizer
                        .normalize(&collected.payload, version, collected.league.as_deref());

                for record in normalized.records {
                    if seen.insert((record.match_id.clone(), record.participant_id)) {
                        records.push(record);
                    } else {
                        skipped.push(SkippedItem::new(
                            format!("{}#{}", record.match_id, record.participant_id),
                            SkipStage::Duplicate,
                            "participant already counted",
                        ));
                    }
                }
                skipped.extend(normalized.dropped.into_iter().map(|dropped| {
                    SkippedItem::new(dropped.item(), SkipStage::Normalize, dropped.reason)
                }));
            }
        }

        (records, skipped)
    }

    /// Recompute the aggregate table from scratch
    pub fn run(&self, collections: &[Collection]) -> PipelineReport {
        let (records, skipped) = self.records(collections);
        let table = self.aggregator.aggregate(&records);
        let cancelled = collections.iter().any(|c| c.cancelled);

        if !skipped.is_empty() {
            warn!("{} items skipped during the run", skipped.len());
        }
        info!(
            "Aggregated {} records into {} visible groups ({} hidden below {} games)",
            records.len(),
            table.rows().len(),
            table.hidden_count(),
            table.min_sample_size()
        );

        PipelineReport {
            table,
            record_count: records.len(),
            skipped,
            cancelled,
        }
    }

    /// Run, then replace the stored snapshot with the visible rows
    pub async fn run_and_save(&self, collections: &[Collection]) -> Result<PipelineReport, CacheError> {
        let report = self.run(collections);

        if let Some(store) = &self.snapshots {
            let rows: Vec<_> = report.table.rows().into_iter().cloned().collect();
            store.save(&rows, report.table.min_sample_size()).await?;
        }

        Ok(report)
    }
}
