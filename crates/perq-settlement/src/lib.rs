pub mod aggregate;
pub mod baseline;
pub mod engine;
pub mod graph;
pub mod ledger;
pub mod schedule;

pub use aggregate::PgRevenueAggregator;
pub use baseline::{
    BaselineInput, compute_next_period, ensure_publishable, ensure_unpublished,
    fetch_open_baseline, latest_published_baseline, lock_open_baseline, open_or_roll_baseline,
    roll_from_latest_published,
};
pub use engine::{PublishOutcome, baseline_value, compute_settlement, publish_and_distribute, settle};
pub use graph::AffiliateSnapshot;
pub use schedule::CommissionSchedule;
