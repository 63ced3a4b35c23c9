use chrono::Utc;
use perq_core::{BalanceLedgerEntry, CurrencyKind, SettlementError};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// Applies a balance change as an atomic add against the stored value and
/// appends the matching audit entry in the same transaction. The balance is
/// never read into application memory before the update.
pub async fn credit_balance(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    currency_kind: CurrencyKind,
    delta: Decimal,
    reason_code: &str,
) -> Result<BalanceLedgerEntry, SettlementError> {
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO user_balances (user_id, currency_kind, amount, updated_at)
        VALUES ($1, $2, 0, $3)
        ON CONFLICT (user_id, currency_kind) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(currency_kind.as_str())
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    let new_value = sqlx::query_scalar::<_, Decimal>(
        r#"
        UPDATE user_balances
        SET amount = amount + $3,
            updated_at = $4
        WHERE user_id = $1
          AND currency_kind = $2
        RETURNING amount
        "#,
    )
    .bind(user_id)
    .bind(currency_kind.as_str())
    .bind(delta)
    .bind(now)
    .fetch_one(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    let entry = BalanceLedgerEntry::credit(
        user_id,
        currency_kind,
        new_value - delta,
        delta,
        reason_code,
    );

    sqlx::query(
        r#"
        INSERT INTO balance_ledger_entries (
            id, user_id, currency_kind, delta, previous_value, new_value,
            reason_code, recorded_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(entry.user_id)
    .bind(entry.currency_kind.as_str())
    .bind(entry.delta)
    .bind(entry.previous_value)
    .bind(entry.new_value)
    .bind(&entry.reason_code)
    .bind(entry.recorded_at)
    .execute(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    Ok(entry)
}

pub async fn balance_of(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    currency_kind: CurrencyKind,
) -> Result<Decimal, SettlementError> {
    let amount = sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT amount
        FROM user_balances
        WHERE user_id = $1
          AND currency_kind = $2
        "#,
    )
    .bind(user_id)
    .bind(currency_kind.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    Ok(amount.unwrap_or(Decimal::ZERO))
}

/// Most recent ledger entries for one user.
pub async fn ledger_for_user(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
) -> Result<Vec<BalanceLedgerEntry>, SettlementError> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, currency_kind, delta, previous_value, new_value,
               reason_code, recorded_at
        FROM balance_ledger_entries
        WHERE user_id = $1
        ORDER BY recorded_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(SettlementError::storage)?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let kind_raw: String = row
            .try_get("currency_kind")
            .map_err(SettlementError::storage)?;
        entries.push(BalanceLedgerEntry {
            id: row.try_get("id").map_err(SettlementError::storage)?,
            user_id: row.try_get("user_id").map_err(SettlementError::storage)?,
            currency_kind: CurrencyKind::parse(&kind_raw).map_err(SettlementError::storage)?,
            delta: row.try_get("delta").map_err(SettlementError::storage)?,
            previous_value: row
                .try_get("previous_value")
                .map_err(SettlementError::storage)?,
            new_value: row.try_get("new_value").map_err(SettlementError::storage)?,
            reason_code: row
                .try_get("reason_code")
                .map_err(SettlementError::storage)?,
            recorded_at: row
                .try_get("recorded_at")
                .map_err(SettlementError::storage)?,
        });
    }

    Ok(entries)
}
