use async_trait::async_trait;
use chrono::NaiveDate;
use perq_core::{AffiliateStatus, NotificationGateway, RevenueAggregator};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AdImpression {
    pub user_id: Uuid,
    pub viewed_on: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseStatus {
    Completed,
    Pending,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Purchase {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub status: PurchaseStatus,
    pub purchased_on: NaiveDate,
}

/// Revenue aggregator backed by in-memory ad-view and purchase logs. Used
/// by the settlement engine tests and by local development without the
/// external log stores.
#[derive(Default)]
pub struct InMemoryRevenueAggregator {
    impressions: RwLock<Vec<AdImpression>>,
    purchases: RwLock<Vec<Purchase>>,
}

impl InMemoryRevenueAggregator {
    pub async fn record_impressions(&self, user_id: Uuid, viewed_on: NaiveDate, count: usize) {
        let mut impressions = self.impressions.write().await;
        for _ in 0..count {
            impressions.push(AdImpression { user_id, viewed_on });
        }
    }

    pub async fn record_purchase(
        &self,
        user_id: Uuid,
        amount: Decimal,
        status: PurchaseStatus,
        purchased_on: NaiveDate,
    ) {
        self.purchases.write().await.push(Purchase {
            user_id,
            amount,
            status,
            purchased_on,
        });
    }
}

#[async_trait]
impl RevenueAggregator for InMemoryRevenueAggregator {
    async fn total_ad_impressions(
        &self,
        user_ids: &[Uuid],
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<i64> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        let impressions = self.impressions.read().await;
        let total = impressions
            .iter()
            .filter(|entry| entry.viewed_on >= start && entry.viewed_on <= end)
            .filter(|entry| user_ids.contains(&entry.user_id))
            .count();

        Ok(total as i64)
    }

    async fn total_purchase_amount(
        &self,
        user_ids: &[Uuid],
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Decimal> {
        if user_ids.is_empty() {
            return Ok(Decimal::ZERO);
        }

        let purchases = self.purchases.read().await;
        let total = purchases
            .iter()
            .filter(|entry| entry.status == PurchaseStatus::Completed)
            .filter(|entry| entry.purchased_on >= start && entry.purchased_on <= end)
            .filter(|entry| user_ids.contains(&entry.user_id))
            .fold(Decimal::ZERO, |acc, entry| acc + entry.amount);

        Ok(total)
    }
}

/// Aggregator that always fails; stands in for an unreachable log store.
#[derive(Default)]
pub struct FailingRevenueAggregator;

#[async_trait]
impl RevenueAggregator for FailingRevenueAggregator {
    async fn total_ad_impressions(
        &self,
        _user_ids: &[Uuid],
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> anyhow::Result<i64> {
        anyhow::bail!("ad log store unavailable")
    }

    async fn total_purchase_amount(
        &self,
        _user_ids: &[Uuid],
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> anyhow::Result<Decimal> {
        anyhow::bail!("purchase log store unavailable")
    }
}

/// Notification double that records every dispatch instead of sending it.
#[derive(Default)]
pub struct RecordingNotificationGateway {
    sent: RwLock<Vec<(Uuid, Uuid, AffiliateStatus)>>,
}

impl RecordingNotificationGateway {
    pub async fn sent(&self) -> Vec<(Uuid, Uuid, AffiliateStatus)> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl NotificationGateway for RecordingNotificationGateway {
    async fn affiliate_status_changed(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        status: AffiliateStatus,
    ) -> anyhow::Result<()> {
        self.sent.write().await.push((user_id, plan_id, status));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[tokio::test]
    async fn empty_user_set_aggregates_to_zero() {
        let aggregator = InMemoryRevenueAggregator::default();
        let user_id = Uuid::new_v4();
        aggregator
            .record_impressions(user_id, date(2024, 1, 3), 10)
            .await;
        aggregator
            .record_purchase(
                user_id,
                Decimal::new(500, 2),
                PurchaseStatus::Completed,
                date(2024, 1, 3),
            )
            .await;

        let impressions = aggregator
            .total_ad_impressions(&[], date(2024, 1, 1), date(2024, 1, 7))
            .await
            .unwrap();
        let purchases = aggregator
            .total_purchase_amount(&[], date(2024, 1, 1), date(2024, 1, 7))
            .await
            .unwrap();

        assert_eq!(impressions, 0);
        assert_eq!(purchases, Decimal::ZERO);
    }

    #[tokio::test]
    async fn window_edges_are_inclusive() {
        let aggregator = InMemoryRevenueAggregator::default();
        let user_id = Uuid::new_v4();
        aggregator
            .record_impressions(user_id, date(2024, 1, 1), 1)
            .await;
        aggregator
            .record_impressions(user_id, date(2024, 1, 7), 2)
            .await;
        aggregator
            .record_impressions(user_id, date(2024, 1, 8), 4)
            .await;

        let total = aggregator
            .total_ad_impressions(&[user_id], date(2024, 1, 1), date(2024, 1, 7))
            .await
            .unwrap();

        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn recording_gateway_keeps_dispatch_order() {
        let gateway = RecordingNotificationGateway::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let plan_id = Uuid::new_v4();

        gateway
            .affiliate_status_changed(first, plan_id, AffiliateStatus::Approved)
            .await
            .unwrap();
        gateway
            .affiliate_status_changed(second, plan_id, AffiliateStatus::Rejected)
            .await
            .unwrap();

        let sent = gateway.sent().await;
        assert_eq!(
            sent,
            vec![
                (first, plan_id, AffiliateStatus::Approved),
                (second, plan_id, AffiliateStatus::Rejected),
            ]
        );
    }

    #[tokio::test]
    async fn only_completed_purchases_count() {
        let aggregator = InMemoryRevenueAggregator::default();
        let user_id = Uuid::new_v4();
        for status in [
            PurchaseStatus::Completed,
            PurchaseStatus::Pending,
            PurchaseStatus::Failed,
        ] {
            aggregator
                .record_purchase(user_id, Decimal::new(10_00, 2), status, date(2024, 1, 2))
                .await;
        }

        let total = aggregator
            .total_purchase_amount(&[user_id], date(2024, 1, 1), date(2024, 1, 7))
            .await
            .unwrap();

        assert_eq!(total, Decimal::new(10_00, 2));
    }
}
