use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use perq_core::RevenueAggregator;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

/// Read adapter over the ad-view and purchase log stores. These stores are
/// external collaborators: the adapter only ever reads, outside the
/// settlement transaction.
#[derive(Clone)]
pub struct PgRevenueAggregator {
    pool: PgPool,
}

impl PgRevenueAggregator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Converts an inclusive date range into half-open timestamp bounds,
/// `[start 00:00, end + 1 day 00:00)`.
pub fn period_bounds(start: NaiveDate, end: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start_naive = start
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("invalid period start"))?;
    let end_day = end
        .succ_opt()
        .ok_or_else(|| anyhow::anyhow!("invalid period end"))?;
    let end_naive = end_day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("invalid period end"))?;

    Ok((
        DateTime::<Utc>::from_naive_utc_and_offset(start_naive, Utc),
        DateTime::<Utc>::from_naive_utc_and_offset(end_naive, Utc),
    ))
}

#[async_trait]
impl RevenueAggregator for PgRevenueAggregator {
    async fn total_ad_impressions(
        &self,
        user_ids: &[Uuid],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<i64> {
        // An empty downline aggregates to zero, never to an unfiltered scan.
        if user_ids.is_empty() {
            return Ok(0);
        }

        let (window_start, window_end) = period_bounds(start, end)?;
        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM ad_impressions
            WHERE user_id = ANY($1)
              AND viewed_at >= $2
              AND viewed_at < $3
            "#,
        )
        .bind(user_ids)
        .bind(window_start)
        .bind(window_end)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn total_purchase_amount(
        &self,
        user_ids: &[Uuid],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Decimal> {
        if user_ids.is_empty() {
            return Ok(Decimal::ZERO);
        }

        let (window_start, window_end) = period_bounds(start, end)?;
        let total = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(amount), 0)::numeric
            FROM purchases
            WHERE user_id = ANY($1)
              AND status = 'COMPLETED'
              AND purchased_at >= $2
              AND purchased_at < $3
            "#,
        )
        .bind(user_ids)
        .bind(window_start)
        .bind(window_end)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_bounds_cover_the_end_date() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();

        let (window_start, window_end) = period_bounds(start, end).unwrap();

        assert_eq!(window_start.date_naive(), start);
        assert_eq!(
            window_end.date_naive(),
            NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
        );
    }
}
