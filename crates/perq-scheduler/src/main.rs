use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use perq_core::SettlementError;
use perq_platform::{
    BASELINE_PUBLISHED_CHANNEL, BaselinePublishedEvent, RedisBus, ServiceConfig, connect_database,
};
use perq_settlement::{PgRevenueAggregator, baseline, engine};
use sqlx::PgPool;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "perq_scheduler=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let pool = connect_database(&config).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let aggregator = PgRevenueAggregator::new(pool.clone());

    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.settlement_tick_seconds));

    info!(
        "settlement scheduler ticking every {}s",
        config.settlement_tick_seconds
    );

    loop {
        ticker.tick().await;
        if let Err(err) = run_tick(&pool, &redis, &aggregator).await {
            if err.is_retryable() {
                error!("settlement tick failed, retrying next tick: {err}");
            } else {
                error!("settlement tick failed: {err}");
            }
        }
    }
}

/// One scheduler pass. Publishes the open baseline once its period has
/// elapsed and rolls the next period open; errors leave the state untouched
/// for the next tick to retry.
async fn run_tick(
    pool: &PgPool,
    redis: &RedisBus,
    aggregator: &PgRevenueAggregator,
) -> Result<(), SettlementError> {
    let mut tx = pool.begin().await.map_err(SettlementError::storage)?;
    let open = baseline::fetch_open_baseline(&mut tx).await?;
    tx.commit().await.map_err(SettlementError::storage)?;

    let Some(open) = open else {
        open_next_period(pool).await?;
        return Ok(());
    };

    match engine::publish_and_distribute(pool, aggregator, open.id).await {
        Ok(outcome) => {
            redis
                .publish_json_best_effort(
                    BASELINE_PUBLISHED_CHANNEL,
                    &BaselinePublishedEvent {
                        baseline_id: outcome.baseline_id,
                        users_credited: outcome.users_credited,
                        total_credited: outcome.total_credited,
                        published_at: outcome.published_at,
                    },
                )
                .await;
            open_next_period(pool).await?;
        }
        Err(SettlementError::PeriodNotElapsed { end_date }) => {
            info!(
                "baseline {} still open until {end_date}, today is {}",
                open.id,
                Utc::now().date_naive()
            );
        }
        // Another publisher won the row lock race; nothing left to do.
        Err(SettlementError::AlreadyPublished { baseline_id }) => {
            info!("baseline {baseline_id} was already published");
            open_next_period(pool).await?;
        }
        Err(other) => return Err(other),
    }

    Ok(())
}

/// Rolls a fresh open baseline from the latest published one, carrying its
/// rate constants over a contiguous next period. A no-op when a baseline is
/// already open or nothing has ever published.
async fn open_next_period(pool: &PgPool) -> Result<(), SettlementError> {
    let mut tx = pool.begin().await.map_err(SettlementError::storage)?;
    let rolled = baseline::roll_from_latest_published(&mut tx).await?;
    tx.commit().await.map_err(SettlementError::storage)?;

    match rolled {
        Some(next) => info!(
            "open baseline {} covers {} through {}",
            next.id, next.start_date, next.end_date
        ),
        None => info!("no published baseline to roll the next period from"),
    }

    Ok(())
}
