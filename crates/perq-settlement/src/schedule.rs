use std::collections::HashMap;

use perq_core::{BenefitPlan, CommissionTier, SettlementError};
use rust_decimal::Decimal;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

/// In-memory view of every plan's commission tiers, loaded once per
/// settlement run so per-affiliate lookups stay off the database.
#[derive(Debug, Default)]
pub struct CommissionSchedule {
    tiers_by_plan: HashMap<Uuid, Vec<CommissionTier>>,
}

impl CommissionSchedule {
    pub fn from_tiers(tiers: Vec<CommissionTier>) -> Self {
        let mut tiers_by_plan: HashMap<Uuid, Vec<CommissionTier>> = HashMap::new();
        for tier in tiers {
            tiers_by_plan.entry(tier.plan_id).or_default().push(tier);
        }
        for plan_tiers in tiers_by_plan.values_mut() {
            plan_tiers.sort_by_key(|tier| tier.referral_threshold);
        }

        Self { tiers_by_plan }
    }

    /// Tier policy: among tiers whose threshold is strictly greater than
    /// the revenue amount, pick the lowest threshold. Revenue at or above
    /// every threshold finds no tier; callers treat that as rate 0.
    pub fn rate_for_revenue(
        &self,
        plan_id: Uuid,
        revenue: Decimal,
    ) -> Result<Decimal, SettlementError> {
        let tiers = self
            .tiers_by_plan
            .get(&plan_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        select_tier(tiers, revenue)
            .map(|tier| tier.rate)
            .ok_or(SettlementError::NoTierFound { plan_id, revenue })
    }

    pub fn tiers_for_plan(&self, plan_id: Uuid) -> &[CommissionTier] {
        self.tiers_by_plan
            .get(&plan_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// "Next tier above" selection, preserved deliberately: the lowest
/// threshold strictly greater than the revenue amount wins.
pub fn select_tier(tiers: &[CommissionTier], revenue: Decimal) -> Option<&CommissionTier> {
    tiers
        .iter()
        .filter(|tier| Decimal::from(tier.referral_threshold) > revenue)
        .min_by_key(|tier| tier.referral_threshold)
}

pub async fn load_commission_schedule(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<CommissionSchedule, SettlementError> {
    let rows = sqlx::query(
        r#"
        SELECT id, plan_id, referral_threshold, rate
        FROM commission_tiers
        ORDER BY plan_id, referral_threshold
        "#,
    )
    .fetch_all(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    let mut tiers = Vec::with_capacity(rows.len());
    for row in rows {
        tiers.push(CommissionTier {
            id: row.try_get("id").map_err(SettlementError::storage)?,
            plan_id: row.try_get("plan_id").map_err(SettlementError::storage)?,
            referral_threshold: row
                .try_get("referral_threshold")
                .map_err(SettlementError::storage)?,
            rate: row.try_get("rate").map_err(SettlementError::storage)?,
        });
    }

    Ok(CommissionSchedule::from_tiers(tiers))
}

pub async fn benefit_plan(
    tx: &mut Transaction<'_, Postgres>,
    plan_id: Uuid,
) -> Result<Option<BenefitPlan>, SettlementError> {
    let row = sqlx::query(
        r#"
        SELECT id, name
        FROM benefit_plans
        WHERE id = $1
        "#,
    )
    .bind(plan_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    row.map(|row| {
        Ok(BenefitPlan {
            id: row.try_get("id").map_err(SettlementError::storage)?,
            name: row.try_get("name").map_err(SettlementError::storage)?,
        })
    })
    .transpose()
}

/// Ordered (threshold, rate) list for one plan, for display and reporting.
pub async fn plan_tiers(
    tx: &mut Transaction<'_, Postgres>,
    plan_id: Uuid,
) -> Result<Vec<CommissionTier>, SettlementError> {
    let rows = sqlx::query(
        r#"
        SELECT id, plan_id, referral_threshold, rate
        FROM commission_tiers
        WHERE plan_id = $1
        ORDER BY referral_threshold
        "#,
    )
    .bind(plan_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    let mut tiers = Vec::with_capacity(rows.len());
    for row in rows {
        tiers.push(CommissionTier {
            id: row.try_get("id").map_err(SettlementError::storage)?,
            plan_id: row.try_get("plan_id").map_err(SettlementError::storage)?,
            referral_threshold: row
                .try_get("referral_threshold")
                .map_err(SettlementError::storage)?,
            rate: row.try_get("rate").map_err(SettlementError::storage)?,
        });
    }

    Ok(tiers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(plan_id: Uuid, threshold: i64, rate_hundredths: i64) -> CommissionTier {
        CommissionTier {
            id: Uuid::new_v4(),
            plan_id,
            referral_threshold: threshold,
            rate: Decimal::new(rate_hundredths, 2),
        }
    }

    fn schedule_with(plan_id: Uuid) -> CommissionSchedule {
        CommissionSchedule::from_tiers(vec![
            tier(plan_id, 100_000, 30),
            tier(plan_id, 10_000, 10),
            tier(plan_id, 50_000, 20),
        ])
    }

    #[test]
    fn picks_the_lowest_threshold_above_revenue() {
        let plan_id = Uuid::new_v4();
        let schedule = schedule_with(plan_id);

        let rate = schedule
            .rate_for_revenue(plan_id, Decimal::from(36_000))
            .unwrap();
        assert_eq!(rate, Decimal::new(20, 2));

        let rate = schedule
            .rate_for_revenue(plan_id, Decimal::from(5_000))
            .unwrap();
        assert_eq!(rate, Decimal::new(10, 2));
    }

    #[test]
    fn revenue_equal_to_a_threshold_moves_to_the_next_band() {
        let plan_id = Uuid::new_v4();
        let schedule = schedule_with(plan_id);

        // Strictly-greater comparison: 50000 is not above 50000.
        let rate = schedule
            .rate_for_revenue(plan_id, Decimal::from(50_000))
            .unwrap();
        assert_eq!(rate, Decimal::new(30, 2));
    }

    #[test]
    fn revenue_at_or_above_the_top_threshold_finds_no_tier() {
        let plan_id = Uuid::new_v4();
        let schedule = schedule_with(plan_id);

        let err = schedule
            .rate_for_revenue(plan_id, Decimal::from(100_000))
            .unwrap_err();
        assert!(matches!(err, SettlementError::NoTierFound { .. }));

        let err = schedule
            .rate_for_revenue(plan_id, Decimal::from(250_000))
            .unwrap_err();
        assert!(matches!(err, SettlementError::NoTierFound { .. }));
    }

    #[test]
    fn unknown_plan_has_no_tiers() {
        let schedule = schedule_with(Uuid::new_v4());

        let err = schedule
            .rate_for_revenue(Uuid::new_v4(), Decimal::ONE)
            .unwrap_err();
        assert!(matches!(err, SettlementError::NoTierFound { .. }));
    }
}
