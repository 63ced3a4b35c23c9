use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::AffiliateStatus;

/// Read-only view over the external ad-view and purchase logs. Date ranges
/// are inclusive; an empty user-id set must aggregate to zero, never to an
/// unfiltered total.
#[async_trait]
pub trait RevenueAggregator: Send + Sync {
    async fn total_ad_impressions(
        &self,
        user_ids: &[Uuid],
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<i64>;

    /// Sums completed purchase amounts only; pending and failed purchases
    /// do not count.
    async fn total_purchase_amount(
        &self,
        user_ids: &[Uuid],
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Decimal>;
}

/// Fire-and-forget outbound notifications. Failures are logged by the
/// caller and never roll back a financial transaction.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn affiliate_status_changed(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        status: AffiliateStatus,
    ) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct NoopNotificationGateway;

#[async_trait]
impl NotificationGateway for NoopNotificationGateway {
    async fn affiliate_status_changed(
        &self,
        _user_id: Uuid,
        _plan_id: Uuid,
        _status: AffiliateStatus,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
