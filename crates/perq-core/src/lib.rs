pub mod errors;
pub mod models;
pub mod traits;

pub use errors::SettlementError;
pub use models::{
    AccountingBaseline, Affiliate, AffiliateStatus, BalanceLedgerEntry, BenefitPlan,
    CommissionTier, CurrencyKind, UserRevenueRecord,
};
pub use traits::{NoopNotificationGateway, NotificationGateway, RevenueAggregator};
