pub mod aggregate;
pub mod match_record;
pub mod payload;

pub use aggregate::AggregateRow;
pub use match_record::MatchRecord;
pub use payload::{CacheEntry, CollectedMatch, RawPayload, SkipStage, SkippedItem};
