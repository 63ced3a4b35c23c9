use perq_core::{Affiliate, AffiliateStatus, SettlementError};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

/// One affiliate's slice of the settlement population: their plan and the
/// users they referred. The referral graph is single-level, so the downline
/// is a direct link lookup, never a traversal.
#[derive(Debug, Clone)]
pub struct AffiliateSnapshot {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub downline: Vec<Uuid>,
}

/// Referred-user ids only; the affiliate's own activity is not
/// commissionable.
pub async fn downline_of(
    tx: &mut Transaction<'_, Postgres>,
    affiliate_user_id: Uuid,
) -> Result<Vec<Uuid>, SettlementError> {
    let rows = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT user_id
        FROM referred_users
        WHERE affiliate_user_id = $1
          AND user_id <> $1
        ORDER BY user_id
        "#,
    )
    .bind(affiliate_user_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    Ok(rows)
}

pub async fn current_plan_of(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<Option<Uuid>, SettlementError> {
    let plan_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT plan_id
        FROM affiliates
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    Ok(plan_id)
}

/// Approved affiliates with their downlines, in one pass. Affiliates with
/// an empty downline are still returned; the engine skips them.
pub async fn load_settlement_population(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Vec<AffiliateSnapshot>, SettlementError> {
    let rows = sqlx::query(
        r#"
        SELECT a.user_id, a.plan_id, r.user_id AS referred_user_id
        FROM affiliates a
        LEFT JOIN referred_users r
          ON r.affiliate_user_id = a.user_id
         AND r.user_id <> a.user_id
        WHERE a.status = 'APPROVED'
        ORDER BY a.user_id, r.user_id
        "#,
    )
    .fetch_all(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    let mut population: Vec<AffiliateSnapshot> = Vec::new();
    for row in rows {
        let user_id: Uuid = row.try_get("user_id").map_err(SettlementError::storage)?;
        let plan_id: Uuid = row.try_get("plan_id").map_err(SettlementError::storage)?;
        let referred: Option<Uuid> = row
            .try_get("referred_user_id")
            .map_err(SettlementError::storage)?;

        match population.last_mut() {
            Some(snapshot) if snapshot.user_id == user_id => {
                if let Some(referred) = referred {
                    snapshot.downline.push(referred);
                }
            }
            _ => population.push(AffiliateSnapshot {
                user_id,
                plan_id,
                downline: referred.into_iter().collect(),
            }),
        }
    }

    Ok(population)
}

fn affiliate_from_row(row: &sqlx::postgres::PgRow) -> Result<Affiliate, SettlementError> {
    let status_raw: String = row.try_get("status").map_err(SettlementError::storage)?;
    Ok(Affiliate {
        user_id: row.try_get("user_id").map_err(SettlementError::storage)?,
        plan_id: row.try_get("plan_id").map_err(SettlementError::storage)?,
        status: AffiliateStatus::parse(&status_raw).map_err(SettlementError::storage)?,
        created_at: row.try_get("created_at").map_err(SettlementError::storage)?,
        updated_at: row.try_get("updated_at").map_err(SettlementError::storage)?,
    })
}

/// Upgrade approval path: sets the new status and, when given, reassigns
/// the benefit plan. Returns `None` for an unknown affiliate.
pub async fn update_affiliate_status(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    plan_id: Option<Uuid>,
    status: AffiliateStatus,
) -> Result<Option<Affiliate>, SettlementError> {
    let row = sqlx::query(
        r#"
        UPDATE affiliates
        SET status = $2,
            plan_id = COALESCE($3, plan_id),
            updated_at = $4
        WHERE user_id = $1
        RETURNING user_id, plan_id, status, created_at, updated_at
        "#,
    )
    .bind(user_id)
    .bind(status.as_str())
    .bind(plan_id)
    .bind(chrono::Utc::now())
    .fetch_optional(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    row.as_ref().map(affiliate_from_row).transpose()
}
