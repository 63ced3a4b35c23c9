use chrono::{DateTime, Utc};
use perq_core::{
    AccountingBaseline, CurrencyKind, RevenueAggregator, SettlementError, UserRevenueRecord,
};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::baseline::{self, ensure_publishable, ensure_unpublished};
use crate::graph::{self, AffiliateSnapshot};
use crate::ledger;
use crate::schedule::{self, CommissionSchedule};

pub const REASON_REVENUE_SETTLEMENT: &str = "REVENUE_SETTLEMENT";

const IMPRESSIONS_PER_CPM_UNIT: i64 = 1000;

/// Money earned per 1000 impressions after the prize-pool deduction and the
/// platform cut.
pub fn baseline_value(baseline: &AccountingBaseline) -> Decimal {
    (baseline.cpm_rate - baseline.prize_pool_deduction) * (Decimal::ONE - baseline.platform_rate)
}

/// Summary of one exactly-once publish.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub baseline_id: Uuid,
    pub users_credited: i64,
    pub total_credited: Decimal,
    pub published_at: DateTime<Utc>,
    pub records: Vec<UserRevenueRecord>,
}

/// Computes per-affiliate revenue and withdrawable amounts for one period.
/// Pure with respect to the settlement store: the population and schedule
/// are passed in, activity comes from the aggregator.
///
/// Affiliates with an empty downline or no in-period revenue produce
/// nothing. A missing commission tier recovers to rate 0 so uncommissioned
/// revenue still leaves an auditable record. Intermediate values stay
/// unrounded; money is rounded to 4 decimal places at staging.
pub async fn compute_settlement<A>(
    baseline: &AccountingBaseline,
    affiliates: &[AffiliateSnapshot],
    schedule: &CommissionSchedule,
    aggregator: &A,
) -> Result<Vec<UserRevenueRecord>, SettlementError>
where
    A: RevenueAggregator + ?Sized,
{
    let value_per_mille = baseline_value(baseline);
    let mut records = Vec::new();

    for affiliate in affiliates {
        if affiliate.downline.is_empty() {
            continue;
        }

        let impressions = aggregator
            .total_ad_impressions(&affiliate.downline, baseline.start_date, baseline.end_date)
            .await
            .map_err(SettlementError::aggregation)?;
        let purchase_total = aggregator
            .total_purchase_amount(&affiliate.downline, baseline.start_date, baseline.end_date)
            .await
            .map_err(SettlementError::aggregation)?;

        let ads_revenue =
            value_per_mille * Decimal::from(impressions) / Decimal::from(IMPRESSIONS_PER_CPM_UNIT);
        if ads_revenue <= Decimal::ZERO && purchase_total <= Decimal::ZERO {
            continue;
        }

        let rate = match schedule.rate_for_revenue(affiliate.plan_id, ads_revenue + purchase_total)
        {
            Ok(rate) => rate,
            Err(SettlementError::NoTierFound { plan_id, revenue }) => {
                warn!(
                    "no commission tier in plan {plan_id} covers revenue {revenue} \
                     for affiliate {}; settling at rate 0",
                    affiliate.user_id
                );
                Decimal::ZERO
            }
            Err(other) => return Err(other),
        };

        records.push(UserRevenueRecord {
            id: Uuid::new_v4(),
            user_id: affiliate.user_id,
            baseline_id: baseline.id,
            total_ads_revenue: ads_revenue.round_dp(4),
            total_purchase_revenue: purchase_total.round_dp(4),
            withdrawable_from_ads: (ads_revenue * rate).round_dp(4),
            withdrawable_from_purchases: (purchase_total * rate).round_dp(4),
            created_at: Utc::now(),
        });
    }

    Ok(records)
}

/// Recomputes the baseline's revenue records and atomically replaces the
/// existing set. Safe to re-run any number of times while the baseline is
/// unpublished; rejected once it has published. Callers must pass a
/// row-locked baseline (`lock_open_baseline` / `lock_baseline`) so a
/// concurrent publish cannot land between the check and the replace.
pub async fn settle<A>(
    tx: &mut Transaction<'_, Postgres>,
    aggregator: &A,
    baseline: &AccountingBaseline,
) -> Result<Vec<UserRevenueRecord>, SettlementError>
where
    A: RevenueAggregator + ?Sized,
{
    ensure_unpublished(baseline)?;

    let population = graph::load_settlement_population(tx).await?;
    let schedule = schedule::load_commission_schedule(tx).await?;
    let records = compute_settlement(baseline, &population, &schedule, aggregator).await?;
    replace_revenue_records(tx, baseline.id, &records).await?;

    info!(
        "settled baseline {} over {} affiliates into {} revenue records",
        baseline.id,
        population.len(),
        records.len()
    );

    Ok(records)
}

async fn replace_revenue_records(
    tx: &mut Transaction<'_, Postgres>,
    baseline_id: Uuid,
    records: &[UserRevenueRecord],
) -> Result<(), SettlementError> {
    sqlx::query("DELETE FROM user_revenue_records WHERE baseline_id = $1")
        .bind(baseline_id)
        .execute(&mut **tx)
        .await
        .map_err(SettlementError::storage)?;

    for record in records {
        sqlx::query(
            r#"
            INSERT INTO user_revenue_records (
                id, user_id, baseline_id, total_ads_revenue, total_purchase_revenue,
                withdrawable_from_ads, withdrawable_from_purchases, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.baseline_id)
        .bind(record.total_ads_revenue)
        .bind(record.total_purchase_revenue)
        .bind(record.withdrawable_from_ads)
        .bind(record.withdrawable_from_purchases)
        .bind(record.created_at)
        .execute(&mut **tx)
        .await
        .map_err(SettlementError::storage)?;
    }

    Ok(())
}

/// The exactly-once publish transition: re-settle, credit every positive
/// withdrawable amount with one ledger entry each, and flip the published
/// flag, all in one transaction against the row-locked baseline. A crash
/// before commit leaves the baseline unpublished and nothing credited; a
/// second call fails with `AlreadyPublished` and mutates nothing.
pub async fn publish_and_distribute<A>(
    pool: &PgPool,
    aggregator: &A,
    baseline_id: Uuid,
) -> Result<PublishOutcome, SettlementError>
where
    A: RevenueAggregator + ?Sized,
{
    let mut tx = pool.begin().await.map_err(SettlementError::storage)?;

    let Some(current) = baseline::lock_baseline(&mut tx, baseline_id).await? else {
        return Err(SettlementError::validation(format!(
            "baseline {baseline_id} not found"
        )));
    };
    ensure_publishable(&current, Utc::now().date_naive())?;

    let records = settle(&mut tx, aggregator, &current).await?;

    let mut users_credited = 0_i64;
    let mut total_credited = Decimal::ZERO;
    for record in &records {
        let payout = record.total_withdrawable();
        if payout <= Decimal::ZERO {
            continue;
        }

        ledger::credit_balance(
            &mut tx,
            record.user_id,
            CurrencyKind::Withdrawable,
            payout,
            REASON_REVENUE_SETTLEMENT,
        )
        .await?;
        users_credited += 1;
        total_credited += payout;
    }

    let published_at = Utc::now();
    sqlx::query(
        r#"
        UPDATE accounting_baselines
        SET is_published = TRUE,
            updated_at = $2
        WHERE id = $1
        "#,
    )
    .bind(current.id)
    .bind(published_at)
    .execute(&mut *tx)
    .await
    .map_err(SettlementError::storage)?;

    tx.commit().await.map_err(SettlementError::storage)?;

    info!(
        "published baseline {} crediting {} users with {} total",
        current.id, users_credited, total_credited
    );

    Ok(PublishOutcome {
        baseline_id: current.id,
        users_credited,
        total_credited: total_credited.round_dp(4),
        published_at,
        records,
    })
}

pub async fn list_revenue_records(
    pool: &PgPool,
    baseline_id: Uuid,
) -> Result<Vec<UserRevenueRecord>, SettlementError> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, baseline_id, total_ads_revenue, total_purchase_revenue,
               withdrawable_from_ads, withdrawable_from_purchases, created_at
        FROM user_revenue_records
        WHERE baseline_id = $1
        ORDER BY user_id
        "#,
    )
    .bind(baseline_id)
    .fetch_all(pool)
    .await
    .map_err(SettlementError::storage)?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(UserRevenueRecord {
            id: row.try_get("id").map_err(SettlementError::storage)?,
            user_id: row.try_get("user_id").map_err(SettlementError::storage)?,
            baseline_id: row
                .try_get("baseline_id")
                .map_err(SettlementError::storage)?,
            total_ads_revenue: row
                .try_get("total_ads_revenue")
                .map_err(SettlementError::storage)?,
            total_purchase_revenue: row
                .try_get("total_purchase_revenue")
                .map_err(SettlementError::storage)?,
            withdrawable_from_ads: row
                .try_get("withdrawable_from_ads")
                .map_err(SettlementError::storage)?,
            withdrawable_from_purchases: row
                .try_get("withdrawable_from_purchases")
                .map_err(SettlementError::storage)?,
            created_at: row.try_get("created_at").map_err(SettlementError::storage)?,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use perq_core::CommissionTier;
    use perq_memstore::{FailingRevenueAggregator, InMemoryRevenueAggregator, PurchaseStatus};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn test_baseline() -> AccountingBaseline {
        AccountingBaseline {
            id: Uuid::new_v4(),
            cpm_rate: Decimal::from(10_000),
            prize_pool_deduction: Decimal::from(2_000),
            platform_rate: Decimal::new(1, 1),
            start_date: date(2024, 1, 1),
            end_date: date(2024, 1, 7),
            is_published: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn schedule_with_tier(plan_id: Uuid, threshold: i64, rate: Decimal) -> CommissionSchedule {
        CommissionSchedule::from_tiers(vec![CommissionTier {
            id: Uuid::new_v4(),
            plan_id,
            referral_threshold: threshold,
            rate,
        }])
    }

    #[test]
    fn baseline_value_applies_deduction_and_platform_cut() {
        assert_eq!(baseline_value(&test_baseline()), Decimal::from(7_200));
    }

    #[tokio::test]
    async fn settles_the_basic_scenario() {
        let baseline = test_baseline();
        let plan_id = Uuid::new_v4();
        let affiliate_id = Uuid::new_v4();
        let referred_id = Uuid::new_v4();

        let aggregator = InMemoryRevenueAggregator::default();
        aggregator
            .record_impressions(referred_id, date(2024, 1, 3), 5_000)
            .await;

        let affiliates = [AffiliateSnapshot {
            user_id: affiliate_id,
            plan_id,
            downline: vec![referred_id],
        }];
        let schedule = schedule_with_tier(plan_id, 50_000, Decimal::new(2, 1));

        let records = compute_settlement(&baseline, &affiliates, &schedule, &aggregator)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.user_id, affiliate_id);
        assert_eq!(record.total_ads_revenue, Decimal::from(36_000));
        assert_eq!(record.withdrawable_from_ads, Decimal::from(7_200));
        assert_eq!(record.total_purchase_revenue, Decimal::ZERO);
        assert_eq!(record.withdrawable_from_purchases, Decimal::ZERO);
    }

    #[tokio::test]
    async fn commissions_purchases_alongside_ads() {
        let baseline = test_baseline();
        let plan_id = Uuid::new_v4();
        let referred_id = Uuid::new_v4();

        let aggregator = InMemoryRevenueAggregator::default();
        aggregator
            .record_impressions(referred_id, date(2024, 1, 2), 1_000)
            .await;
        aggregator
            .record_purchase(
                referred_id,
                Decimal::from(500),
                PurchaseStatus::Completed,
                date(2024, 1, 4),
            )
            .await;
        // Out-of-window and non-completed activity must not count.
        aggregator
            .record_impressions(referred_id, date(2024, 1, 9), 9_000)
            .await;
        aggregator
            .record_purchase(
                referred_id,
                Decimal::from(9_999),
                PurchaseStatus::Pending,
                date(2024, 1, 4),
            )
            .await;

        let affiliates = [AffiliateSnapshot {
            user_id: Uuid::new_v4(),
            plan_id,
            downline: vec![referred_id],
        }];
        let schedule = schedule_with_tier(plan_id, 50_000, Decimal::new(2, 1));

        let records = compute_settlement(&baseline, &affiliates, &schedule, &aggregator)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.total_ads_revenue, Decimal::from(7_200));
        assert_eq!(record.total_purchase_revenue, Decimal::from(500));
        assert_eq!(record.withdrawable_from_ads, Decimal::from(1_440));
        assert_eq!(record.withdrawable_from_purchases, Decimal::from(100));
    }

    #[tokio::test]
    async fn zero_downline_affiliates_never_settle() {
        let baseline = test_baseline();
        let plan_id = Uuid::new_v4();

        let aggregator = InMemoryRevenueAggregator::default();
        let affiliates = [AffiliateSnapshot {
            user_id: Uuid::new_v4(),
            plan_id,
            downline: Vec::new(),
        }];
        let schedule = schedule_with_tier(plan_id, 50_000, Decimal::new(2, 1));

        let records = compute_settlement(&baseline, &affiliates, &schedule, &aggregator)
            .await
            .unwrap();

        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn idle_downlines_stage_no_records() {
        let baseline = test_baseline();
        let plan_id = Uuid::new_v4();

        let aggregator = InMemoryRevenueAggregator::default();
        let affiliates = [AffiliateSnapshot {
            user_id: Uuid::new_v4(),
            plan_id,
            downline: vec![Uuid::new_v4(), Uuid::new_v4()],
        }];
        let schedule = schedule_with_tier(plan_id, 50_000, Decimal::new(2, 1));

        let records = compute_settlement(&baseline, &affiliates, &schedule, &aggregator)
            .await
            .unwrap();

        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn revenue_above_every_tier_is_recorded_but_unpaid() {
        let baseline = test_baseline();
        let plan_id = Uuid::new_v4();
        let referred_id = Uuid::new_v4();

        let aggregator = InMemoryRevenueAggregator::default();
        // 10000 impressions -> 72000 ads revenue, above the only threshold.
        aggregator
            .record_impressions(referred_id, date(2024, 1, 5), 10_000)
            .await;

        let affiliates = [AffiliateSnapshot {
            user_id: Uuid::new_v4(),
            plan_id,
            downline: vec![referred_id],
        }];
        let schedule = schedule_with_tier(plan_id, 50_000, Decimal::new(2, 1));

        let records = compute_settlement(&baseline, &affiliates, &schedule, &aggregator)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.total_ads_revenue, Decimal::from(72_000));
        assert_eq!(record.withdrawable_from_ads, Decimal::ZERO);
        assert_eq!(record.total_withdrawable(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn recompute_is_idempotent_over_unchanged_activity() {
        let baseline = test_baseline();
        let plan_id = Uuid::new_v4();
        let referred_id = Uuid::new_v4();

        let aggregator = InMemoryRevenueAggregator::default();
        aggregator
            .record_impressions(referred_id, date(2024, 1, 3), 5_000)
            .await;
        aggregator
            .record_purchase(
                referred_id,
                Decimal::from(250),
                PurchaseStatus::Completed,
                date(2024, 1, 6),
            )
            .await;

        let affiliates = [AffiliateSnapshot {
            user_id: Uuid::new_v4(),
            plan_id,
            downline: vec![referred_id],
        }];
        let schedule = schedule_with_tier(plan_id, 50_000, Decimal::new(2, 1));

        let first = compute_settlement(&baseline, &affiliates, &schedule, &aggregator)
            .await
            .unwrap();
        let second = compute_settlement(&baseline, &affiliates, &schedule, &aggregator)
            .await
            .unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.user_id, b.user_id);
            assert_eq!(a.total_ads_revenue, b.total_ads_revenue);
            assert_eq!(a.total_purchase_revenue, b.total_purchase_revenue);
            assert_eq!(a.withdrawable_from_ads, b.withdrawable_from_ads);
            assert_eq!(a.withdrawable_from_purchases, b.withdrawable_from_purchases);
        }
    }

    #[tokio::test]
    async fn aggregator_failure_aborts_the_whole_computation() {
        let baseline = test_baseline();
        let plan_id = Uuid::new_v4();

        let affiliates = [AffiliateSnapshot {
            user_id: Uuid::new_v4(),
            plan_id,
            downline: vec![Uuid::new_v4()],
        }];
        let schedule = schedule_with_tier(plan_id, 50_000, Decimal::new(2, 1));

        let err = compute_settlement(
            &baseline,
            &affiliates,
            &schedule,
            &FailingRevenueAggregator,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SettlementError::Aggregation(_)));
    }
}
