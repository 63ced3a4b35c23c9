use chrono::{DateTime, NaiveDate, Utc};
use perq_core::{AccountingBaseline, AffiliateStatus, BalanceLedgerEntry, UserRevenueRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const BASELINE_PUBLISHED_CHANNEL: &str = "baselines.published";
pub const AFFILIATE_STATUS_CHANNEL: &str = "affiliates.status-changed";

/// Payload for `POST /revenue-baselines`: creates the open baseline, or
/// applies an in-place correction when one already exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBaselineRequest {
    pub cpm_rate: Decimal,
    pub prize_pool_deduction: Decimal,
    pub platform_rate: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineView {
    pub id: Uuid,
    pub cpm_rate: Decimal,
    pub prize_pool_deduction: Decimal,
    pub platform_rate: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AccountingBaseline> for BaselineView {
    fn from(baseline: AccountingBaseline) -> Self {
        Self {
            id: baseline.id,
            cpm_rate: baseline.cpm_rate,
            prize_pool_deduction: baseline.prize_pool_deduction,
            platform_rate: baseline.platform_rate,
            start_date: baseline.start_date,
            end_date: baseline.end_date,
            is_published: baseline.is_published,
            created_at: baseline.created_at,
            updated_at: baseline.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenBaselineResponse {
    pub baseline: BaselineView,
    /// True when an existing open baseline was corrected in place rather
    /// than a new one created.
    pub updated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueRecordView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub baseline_id: Uuid,
    pub total_ads_revenue: Decimal,
    pub total_purchase_revenue: Decimal,
    pub withdrawable_from_ads: Decimal,
    pub withdrawable_from_purchases: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<UserRevenueRecord> for RevenueRecordView {
    fn from(record: UserRevenueRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            baseline_id: record.baseline_id,
            total_ads_revenue: record.total_ads_revenue,
            total_purchase_revenue: record.total_purchase_revenue,
            withdrawable_from_ads: record.withdrawable_from_ads,
            withdrawable_from_purchases: record.withdrawable_from_purchases,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleBaselineResponse {
    pub baseline_id: Uuid,
    pub records_staged: i64,
    pub total_ads_revenue: Decimal,
    pub total_purchase_revenue: Decimal,
    pub total_withdrawable: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishBaselineResponse {
    pub baseline_id: Uuid,
    pub users_credited: i64,
    pub total_credited: Decimal,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierView {
    pub referral_threshold: i64,
    pub rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTiersResponse {
    pub plan_id: Uuid,
    pub plan_name: String,
    pub tiers: Vec<TierView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliateDownlineResponse {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub downline: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceView {
    pub currency_kind: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBalancesResponse {
    pub user_id: Uuid,
    pub balances: Vec<BalanceView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeAffiliateStatusRequest {
    pub status: String,
    /// Target benefit plan for an approved upgrade; defaults to the
    /// affiliate's current plan when omitted.
    pub plan_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeAffiliateStatusResponse {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: AffiliateStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntryView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency_kind: String,
    pub delta: Decimal,
    pub previous_value: Decimal,
    pub new_value: Decimal,
    pub reason_code: String,
    pub recorded_at: DateTime<Utc>,
}

impl From<BalanceLedgerEntry> for LedgerEntryView {
    fn from(entry: BalanceLedgerEntry) -> Self {
        Self {
            id: entry.id,
            user_id: entry.user_id,
            currency_kind: entry.currency_kind.as_str().to_string(),
            delta: entry.delta,
            previous_value: entry.previous_value,
            new_value: entry.new_value,
            reason_code: entry.reason_code,
            recorded_at: entry.recorded_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerHistoryResponse {
    pub items: Vec<LedgerEntryView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselinePublishedEvent {
    pub baseline_id: Uuid,
    pub users_credited: i64,
    pub total_credited: Decimal,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliateStatusChangedEvent {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: AffiliateStatus,
}
