pub mod config;
pub mod contracts;
pub mod db;
pub mod redis_bus;

pub use config::ServiceConfig;
pub use contracts::{
    AFFILIATE_STATUS_CHANNEL, AffiliateDownlineResponse, AffiliateStatusChangedEvent,
    BASELINE_PUBLISHED_CHANNEL, BalanceView, BaselinePublishedEvent,
    BaselineView, CreateBaselineRequest, LedgerEntryView, LedgerHistoryResponse,
    OpenBaselineResponse, PlanTiersResponse, PublishBaselineResponse, RevenueRecordView,
    SettleBaselineResponse, TierView, UpgradeAffiliateStatusRequest,
    UpgradeAffiliateStatusResponse, UserBalancesResponse,
};
pub use db::connect_database;
pub use redis_bus::{RedisBus, RedisNotificationGateway};
