use chrono::{Duration, NaiveDate, Utc};
use perq_core::{AccountingBaseline, SettlementError};
use rust_decimal::Decimal;
use sqlx::{Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

/// Administrative input for creating or correcting the open baseline.
#[derive(Debug, Clone)]
pub struct BaselineInput {
    pub cpm_rate: Decimal,
    pub prize_pool_deduction: Decimal,
    pub platform_rate: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

pub fn validate_baseline_input(input: &BaselineInput) -> Result<(), SettlementError> {
    if input.end_date <= input.start_date {
        return Err(SettlementError::validation(
            "end_date must be strictly after start_date",
        ));
    }
    if input.cpm_rate < Decimal::ZERO {
        return Err(SettlementError::validation("cpm_rate must be non-negative"));
    }
    if input.prize_pool_deduction < Decimal::ZERO || input.prize_pool_deduction > input.cpm_rate {
        return Err(SettlementError::validation(
            "prize_pool_deduction must be between 0 and cpm_rate",
        ));
    }
    if input.platform_rate < Decimal::ZERO || input.platform_rate > Decimal::ONE {
        return Err(SettlementError::validation(
            "platform_rate must be between 0 and 1",
        ));
    }

    Ok(())
}

/// Guard for the exactly-once publish transition.
pub fn ensure_publishable(
    baseline: &AccountingBaseline,
    today: NaiveDate,
) -> Result<(), SettlementError> {
    if baseline.is_published {
        return Err(SettlementError::AlreadyPublished {
            baseline_id: baseline.id,
        });
    }
    if today < baseline.end_date {
        return Err(SettlementError::PeriodNotElapsed {
            end_date: baseline.end_date,
        });
    }

    Ok(())
}

/// Guard for re-settlement: a published baseline's revenue records are
/// frozen and must never be replaced. Check this on a row-locked read so a
/// concurrent publish cannot slip in between the check and the rewrite.
pub fn ensure_unpublished(baseline: &AccountingBaseline) -> Result<(), SettlementError> {
    if baseline.is_published {
        return Err(SettlementError::AlreadyPublished {
            baseline_id: baseline.id,
        });
    }

    Ok(())
}

/// Next period starts the day after the previous published period ends and
/// keeps its length, so rolling periods stay contiguous and constant-sized.
pub fn compute_next_period(previous: &AccountingBaseline) -> (NaiveDate, NaiveDate) {
    let length = previous.end_date - previous.start_date;
    let start = previous.end_date + Duration::days(1);
    (start, start + length)
}

fn baseline_from_row(row: &PgRow) -> Result<AccountingBaseline, SettlementError> {
    Ok(AccountingBaseline {
        id: row.try_get("id").map_err(SettlementError::storage)?,
        cpm_rate: row.try_get("cpm_rate").map_err(SettlementError::storage)?,
        prize_pool_deduction: row
            .try_get("prize_pool_deduction")
            .map_err(SettlementError::storage)?,
        platform_rate: row
            .try_get("platform_rate")
            .map_err(SettlementError::storage)?,
        start_date: row.try_get("start_date").map_err(SettlementError::storage)?,
        end_date: row.try_get("end_date").map_err(SettlementError::storage)?,
        is_published: row
            .try_get("is_published")
            .map_err(SettlementError::storage)?,
        created_at: row.try_get("created_at").map_err(SettlementError::storage)?,
        updated_at: row.try_get("updated_at").map_err(SettlementError::storage)?,
    })
}

/// Returns the unique unpublished baseline, if any.
pub async fn fetch_open_baseline(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Option<AccountingBaseline>, SettlementError> {
    let row = sqlx::query(
        r#"
        SELECT id, cpm_rate, prize_pool_deduction, platform_rate,
               start_date, end_date, is_published, created_at, updated_at
        FROM accounting_baselines
        WHERE is_published = FALSE
        LIMIT 1
        "#,
    )
    .fetch_optional(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    row.as_ref().map(baseline_from_row).transpose()
}

/// Row-locked fetch of the open baseline; serializes dry-run settlement
/// against a concurrent publish.
pub async fn lock_open_baseline(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Option<AccountingBaseline>, SettlementError> {
    let row = sqlx::query(
        r#"
        SELECT id, cpm_rate, prize_pool_deduction, platform_rate,
               start_date, end_date, is_published, created_at, updated_at
        FROM accounting_baselines
        WHERE is_published = FALSE
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .fetch_optional(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    row.as_ref().map(baseline_from_row).transpose()
}

/// Row-locked read of one baseline; the open baseline row is the
/// serialization point for publish.
pub async fn lock_baseline(
    tx: &mut Transaction<'_, Postgres>,
    baseline_id: Uuid,
) -> Result<Option<AccountingBaseline>, SettlementError> {
    let row = sqlx::query(
        r#"
        SELECT id, cpm_rate, prize_pool_deduction, platform_rate,
               start_date, end_date, is_published, created_at, updated_at
        FROM accounting_baselines
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(baseline_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    row.as_ref().map(baseline_from_row).transpose()
}

pub async fn latest_published_baseline(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Option<AccountingBaseline>, SettlementError> {
    let row = sqlx::query(
        r#"
        SELECT id, cpm_rate, prize_pool_deduction, platform_rate,
               start_date, end_date, is_published, created_at, updated_at
        FROM accounting_baselines
        WHERE is_published = TRUE
        ORDER BY end_date DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    row.as_ref().map(baseline_from_row).transpose()
}

/// Applies `input` to the open baseline when one exists (administrative
/// correction overwrites the open period), otherwise creates a new
/// unpublished baseline. The returned flag reports updated vs created.
pub async fn open_or_roll_baseline(
    tx: &mut Transaction<'_, Postgres>,
    input: &BaselineInput,
) -> Result<(AccountingBaseline, bool), SettlementError> {
    validate_baseline_input(input)?;
    let now = Utc::now();

    let open = sqlx::query(
        r#"
        SELECT id, cpm_rate, prize_pool_deduction, platform_rate,
               start_date, end_date, is_published, created_at, updated_at
        FROM accounting_baselines
        WHERE is_published = FALSE
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .fetch_optional(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    let (row, updated) = if let Some(open) = open {
        let open_id: Uuid = open.try_get("id").map_err(SettlementError::storage)?;
        sqlx::query(
            r#"
            UPDATE accounting_baselines
            SET cpm_rate = $2,
                prize_pool_deduction = $3,
                platform_rate = $4,
                start_date = $5,
                end_date = $6,
                updated_at = $7
            WHERE id = $1
            RETURNING id, cpm_rate, prize_pool_deduction, platform_rate,
                      start_date, end_date, is_published, created_at, updated_at
            "#,
        )
        .bind(open_id)
        .bind(input.cpm_rate)
        .bind(input.prize_pool_deduction)
        .bind(input.platform_rate)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(now)
        .fetch_one(&mut **tx)
        .await
        .map_err(SettlementError::storage)
        .map(|row| (row, true))?
    } else {
        sqlx::query(
            r#"
            INSERT INTO accounting_baselines (
                id, cpm_rate, prize_pool_deduction, platform_rate,
                start_date, end_date, is_published, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $7)
            RETURNING id, cpm_rate, prize_pool_deduction, platform_rate,
                      start_date, end_date, is_published, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.cpm_rate)
        .bind(input.prize_pool_deduction)
        .bind(input.platform_rate)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(now)
        .fetch_one(&mut **tx)
        .await
        .map_err(SettlementError::storage)
        .map(|row| (row, false))?
    };

    Ok((baseline_from_row(&row)?, updated))
}

/// Opens the next period from the latest published baseline, carrying its
/// financial constants forward. Returns the already-open baseline untouched
/// when one exists, and `None` when nothing has ever been published.
pub async fn roll_from_latest_published(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Option<AccountingBaseline>, SettlementError> {
    if let Some(open) = fetch_open_baseline(tx).await? {
        return Ok(Some(open));
    }

    let Some(previous) = latest_published_baseline(tx).await? else {
        return Ok(None);
    };

    let (start_date, end_date) = compute_next_period(&previous);
    let input = BaselineInput {
        cpm_rate: previous.cpm_rate,
        prize_pool_deduction: previous.prize_pool_deduction,
        platform_rate: previous.platform_rate,
        start_date,
        end_date,
    };
    let (baseline, _) = open_or_roll_baseline(tx, &input).await?;

    Ok(Some(baseline))
}

pub async fn list_baselines(
    tx: &mut Transaction<'_, Postgres>,
    limit: i64,
) -> Result<Vec<AccountingBaseline>, SettlementError> {
    let rows = sqlx::query(
        r#"
        SELECT id, cpm_rate, prize_pool_deduction, platform_rate,
               start_date, end_date, is_published, created_at, updated_at
        FROM accounting_baselines
        ORDER BY start_date DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(&mut **tx)
    .await
    .map_err(SettlementError::storage)?;

    rows.iter().map(baseline_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn published_baseline(start: NaiveDate, end: NaiveDate) -> AccountingBaseline {
        AccountingBaseline {
            id: Uuid::new_v4(),
            cpm_rate: Decimal::from(10_000),
            prize_pool_deduction: Decimal::from(2_000),
            platform_rate: Decimal::new(1, 1),
            start_date: start,
            end_date: end,
            is_published: true,
            created_at: DateTime::<Utc>::MIN_UTC,
            updated_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    fn input(start: NaiveDate, end: NaiveDate) -> BaselineInput {
        BaselineInput {
            cpm_rate: Decimal::from(10_000),
            prize_pool_deduction: Decimal::from(2_000),
            platform_rate: Decimal::new(1, 1),
            start_date: start,
            end_date: end,
        }
    }

    #[test]
    fn next_period_is_contiguous_and_constant_length() {
        let previous = published_baseline(date(2024, 1, 1), date(2024, 1, 7));
        let (start, end) = compute_next_period(&previous);

        assert_eq!(start, date(2024, 1, 8));
        assert_eq!(end, date(2024, 1, 14));
    }

    #[test]
    fn rejects_inverted_or_empty_date_range() {
        let inverted = input(date(2024, 1, 7), date(2024, 1, 1));
        assert!(matches!(
            validate_baseline_input(&inverted),
            Err(SettlementError::Validation(_))
        ));

        let empty = input(date(2024, 1, 1), date(2024, 1, 1));
        assert!(matches!(
            validate_baseline_input(&empty),
            Err(SettlementError::Validation(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_rates() {
        let mut bad_platform = input(date(2024, 1, 1), date(2024, 1, 7));
        bad_platform.platform_rate = Decimal::new(11, 1);
        assert!(validate_baseline_input(&bad_platform).is_err());

        let mut bad_deduction = input(date(2024, 1, 1), date(2024, 1, 7));
        bad_deduction.prize_pool_deduction = Decimal::from(20_000);
        assert!(validate_baseline_input(&bad_deduction).is_err());

        assert!(validate_baseline_input(&input(date(2024, 1, 1), date(2024, 1, 7))).is_ok());
    }

    #[test]
    fn publish_guard_rejects_open_period() {
        let mut baseline = published_baseline(date(2024, 1, 1), date(2024, 1, 7));
        baseline.is_published = false;

        let err = ensure_publishable(&baseline, date(2024, 1, 6)).unwrap_err();
        assert!(matches!(err, SettlementError::PeriodNotElapsed { end_date } if end_date == date(2024, 1, 7)));

        assert!(ensure_publishable(&baseline, date(2024, 1, 7)).is_ok());
        assert!(ensure_publishable(&baseline, date(2024, 1, 8)).is_ok());
    }

    #[test]
    fn resettle_guard_freezes_published_records() {
        let published = published_baseline(date(2024, 1, 1), date(2024, 1, 7));
        let err = ensure_unpublished(&published).unwrap_err();
        assert!(
            matches!(err, SettlementError::AlreadyPublished { baseline_id } if baseline_id == published.id)
        );

        let mut open = published;
        open.is_published = false;
        assert!(ensure_unpublished(&open).is_ok());
    }

    #[test]
    fn publish_guard_rejects_double_publish() {
        let baseline = published_baseline(date(2024, 1, 1), date(2024, 1, 7));

        let err = ensure_publishable(&baseline, date(2024, 2, 1)).unwrap_err();
        assert!(
            matches!(err, SettlementError::AlreadyPublished { baseline_id } if baseline_id == baseline.id)
        );
    }
}
