use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One accounting period. At most one baseline is unpublished at any time;
/// the unpublished row is mutable in place, a published row never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingBaseline {
    pub id: Uuid,
    /// Money earned per 1000 ad impressions before deductions.
    pub cpm_rate: Decimal,
    /// Subtracted from cpm_rate before the platform takes its cut.
    pub prize_pool_deduction: Decimal,
    /// Fraction (0..=1) retained by the platform.
    pub platform_rate: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenefitPlan {
    pub id: Uuid,
    pub name: String,
}

/// Threshold-keyed rate band within a benefit plan. Thresholds are distinct
/// within a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionTier {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub referral_threshold: i64,
    /// Fraction (0..=1), carried at 4 decimal places.
    pub rate: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AffiliateStatus {
    None,
    Pending,
    Approved,
    Rejected,
}

impl AffiliateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AffiliateStatus::None => "NONE",
            AffiliateStatus::Pending => "PENDING",
            AffiliateStatus::Approved => "APPROVED",
            AffiliateStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(AffiliateStatus::None),
            "PENDING" => Ok(AffiliateStatus::Pending),
            "APPROVED" => Ok(AffiliateStatus::Approved),
            "REJECTED" => Ok(AffiliateStatus::Rejected),
            other => anyhow::bail!("unsupported affiliate status: {other}"),
        }
    }
}

/// A user enrolled in the referral program. Owns its referred-user links;
/// a platform user is linked to at most one affiliate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Affiliate {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: AffiliateStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Settlement output for one user in one baseline. Replaced wholesale when
/// an unpublished baseline is re-settled, frozen once the baseline publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRevenueRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub baseline_id: Uuid,
    pub total_ads_revenue: Decimal,
    pub total_purchase_revenue: Decimal,
    pub withdrawable_from_ads: Decimal,
    pub withdrawable_from_purchases: Decimal,
    pub created_at: DateTime<Utc>,
}

impl UserRevenueRecord {
    pub fn total_withdrawable(&self) -> Decimal {
        self.withdrawable_from_ads + self.withdrawable_from_purchases
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CurrencyKind {
    Withdrawable,
    Coin,
    Coupon,
    ActivityPoint,
}

impl CurrencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurrencyKind::Withdrawable => "WITHDRAWABLE",
            CurrencyKind::Coin => "COIN",
            CurrencyKind::Coupon => "COUPON",
            CurrencyKind::ActivityPoint => "ACTIVITY_POINT",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "WITHDRAWABLE" => Ok(CurrencyKind::Withdrawable),
            "COIN" => Ok(CurrencyKind::Coin),
            "COUPON" => Ok(CurrencyKind::Coupon),
            "ACTIVITY_POINT" => Ok(CurrencyKind::ActivityPoint),
            other => anyhow::bail!("unsupported currency kind: {other}"),
        }
    }
}

/// Append-only audit row for a balance change. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceLedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency_kind: CurrencyKind,
    pub delta: Decimal,
    pub previous_value: Decimal,
    pub new_value: Decimal,
    pub reason_code: String,
    pub recorded_at: DateTime<Utc>,
}

impl BalanceLedgerEntry {
    /// Builds an entry from the stored balance before the change, keeping
    /// `new_value == previous_value + delta` by construction.
    pub fn credit(
        user_id: Uuid,
        currency_kind: CurrencyKind,
        previous_value: Decimal,
        delta: Decimal,
        reason_code: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            currency_kind,
            delta,
            previous_value,
            new_value: previous_value + delta,
            reason_code: reason_code.to_string(),
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_entry_balances() {
        let user_id = Uuid::new_v4();
        let entry = BalanceLedgerEntry::credit(
            user_id,
            CurrencyKind::Withdrawable,
            Decimal::new(1050, 2),
            Decimal::new(725, 2),
            "REVENUE_SETTLEMENT",
        );

        assert_eq!(entry.new_value, entry.previous_value + entry.delta);
        assert_eq!(entry.new_value, Decimal::new(1775, 2));
    }

    #[test]
    fn ledger_deltas_sum_to_balance_change() {
        let user_id = Uuid::new_v4();
        let initial = Decimal::ZERO;
        let mut balance = initial;
        let mut deltas = Decimal::ZERO;
        for raw in [1200, 300, 4575] {
            let delta = Decimal::new(raw, 2);
            let entry = BalanceLedgerEntry::credit(
                user_id,
                CurrencyKind::Withdrawable,
                balance,
                delta,
                "REVENUE_SETTLEMENT",
            );
            balance = entry.new_value;
            deltas += entry.delta;
        }

        assert_eq!(deltas, balance - initial);
    }

    #[test]
    fn currency_kind_round_trips() {
        for kind in [
            CurrencyKind::Withdrawable,
            CurrencyKind::Coin,
            CurrencyKind::Coupon,
            CurrencyKind::ActivityPoint,
        ] {
            assert_eq!(CurrencyKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(CurrencyKind::parse("GEMS").is_err());
    }
}
