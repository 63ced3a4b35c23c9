use std::net::SocketAddr;

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
};
use perq_core::{AffiliateStatus, CurrencyKind, NotificationGateway, SettlementError};
use perq_platform::{
    AffiliateDownlineResponse, BASELINE_PUBLISHED_CHANNEL, BalanceView, BaselinePublishedEvent,
    BaselineView, CreateBaselineRequest, LedgerEntryView, LedgerHistoryResponse,
    OpenBaselineResponse, PlanTiersResponse, PublishBaselineResponse, RedisBus,
    RedisNotificationGateway, RevenueRecordView, ServiceConfig, SettleBaselineResponse, TierView,
    UpgradeAffiliateStatusRequest, UpgradeAffiliateStatusResponse, UserBalancesResponse,
    connect_database,
};
use perq_settlement::{
    PgRevenueAggregator,
    baseline::{self, BaselineInput},
    engine, graph, ledger, schedule,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    redis: RedisBus,
    notifier: RedisNotificationGateway,
}

#[derive(Debug, Clone, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "perq_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let notifier = RedisNotificationGateway::new(redis.clone());
    let state = AppState {
        pool,
        redis,
        notifier,
    };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/revenue-baselines",
            get(list_baselines).post(upsert_baseline),
        )
        .route("/revenue-baselines/open", get(get_open_baseline))
        .route("/revenue-baselines/settle", post(settle_open_baseline))
        .route("/revenue-baselines/publish", post(publish_open_baseline))
        .route(
            "/revenue-baselines/{baseline_id}/records",
            get(list_revenue_records),
        )
        .route("/benefit-plans/{plan_id}/tiers", get(list_plan_tiers))
        .route(
            "/affiliates/upgrade/{user_id}/status",
            put(upgrade_affiliate_status),
        )
        .route("/affiliates/{user_id}/downline", get(get_affiliate_downline))
        .route("/users/{user_id}/balances", get(get_user_balances))
        .route("/users/{user_id}/ledger", get(get_ledger_history))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn upsert_baseline(
    State(state): State<AppState>,
    Json(payload): Json<CreateBaselineRequest>,
) -> Result<Json<OpenBaselineResponse>, (StatusCode, String)> {
    let input = BaselineInput {
        cpm_rate: payload.cpm_rate,
        prize_pool_deduction: payload.prize_pool_deduction,
        platform_rate: payload.platform_rate,
        start_date: payload.start_date,
        end_date: payload.end_date,
    };
    baseline::validate_baseline_input(&input).map_err(settlement_error)?;

    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let (saved, updated) = baseline::open_or_roll_baseline(&mut tx, &input)
        .await
        .map_err(settlement_error)?;
    tx.commit().await.map_err(internal_error)?;

    Ok(Json(OpenBaselineResponse {
        baseline: saved.into(),
        updated,
    }))
}

async fn list_baselines(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BaselineView>>, (StatusCode, String)> {
    let limit = clamp_limit(query.limit);

    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let baselines = baseline::list_baselines(&mut tx, limit)
        .await
        .map_err(settlement_error)?;
    tx.commit().await.map_err(internal_error)?;

    Ok(Json(baselines.into_iter().map(BaselineView::from).collect()))
}

async fn get_open_baseline(
    State(state): State<AppState>,
) -> Result<Json<BaselineView>, (StatusCode, String)> {
    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let open = baseline::fetch_open_baseline(&mut tx)
        .await
        .map_err(settlement_error)?;
    tx.commit().await.map_err(internal_error)?;

    match open {
        Some(found) => Ok(Json(found.into())),
        None => Err((
            StatusCode::NOT_FOUND,
            "no open accounting baseline".to_string(),
        )),
    }
}

/// Dry-run settlement: recomputes and stages revenue records for the open
/// baseline without crediting anyone. Callable any number of times before
/// publish. The baseline row is locked for the whole transaction so a
/// concurrent publish cannot freeze the records mid-replace.
async fn settle_open_baseline(
    State(state): State<AppState>,
) -> Result<Json<SettleBaselineResponse>, (StatusCode, String)> {
    let aggregator = PgRevenueAggregator::new(state.pool.clone());

    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let Some(open) = baseline::lock_open_baseline(&mut tx)
        .await
        .map_err(settlement_error)?
    else {
        return Err((
            StatusCode::NOT_FOUND,
            "no open accounting baseline".to_string(),
        ));
    };

    let records = engine::settle(&mut tx, &aggregator, &open)
        .await
        .map_err(settlement_error)?;
    tx.commit().await.map_err(internal_error)?;

    let mut total_ads = Decimal::ZERO;
    let mut total_purchases = Decimal::ZERO;
    let mut total_withdrawable = Decimal::ZERO;
    for record in &records {
        total_ads += record.total_ads_revenue;
        total_purchases += record.total_purchase_revenue;
        total_withdrawable += record.total_withdrawable();
    }

    Ok(Json(SettleBaselineResponse {
        baseline_id: open.id,
        records_staged: records.len() as i64,
        total_ads_revenue: total_ads,
        total_purchase_revenue: total_purchases,
        total_withdrawable,
    }))
}

async fn publish_open_baseline(
    State(state): State<AppState>,
) -> Result<Json<PublishBaselineResponse>, (StatusCode, String)> {
    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let Some(open) = baseline::fetch_open_baseline(&mut tx)
        .await
        .map_err(settlement_error)?
    else {
        return Err((
            StatusCode::NOT_FOUND,
            "no open accounting baseline".to_string(),
        ));
    };
    tx.commit().await.map_err(internal_error)?;

    let aggregator = PgRevenueAggregator::new(state.pool.clone());
    let outcome = engine::publish_and_distribute(&state.pool, &aggregator, open.id)
        .await
        .map_err(settlement_error)?;

    state
        .redis
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

    Ok(Json(PublishBaselineResponse {
        baseline_id: outcome.baseline_id,
        users_credited: outcome.users_credited,
        total_credited: outcome.total_credited,
        published_at: outcome.published_at,
    }))
}

async fn list_revenue_records(
    State(state): State<AppState>,
    Path(baseline_id): Path<Uuid>,
) -> Result<Json<Vec<RevenueRecordView>>, (StatusCode, String)> {
    let records = engine::list_revenue_records(&state.pool, baseline_id)
        .await
        .map_err(settlement_error)?;

    Ok(Json(
        records.into_iter().map(RevenueRecordView::from).collect(),
    ))
}

async fn list_plan_tiers(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<PlanTiersResponse>, (StatusCode, String)> {
    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let Some(plan) = schedule::benefit_plan(&mut tx, plan_id)
        .await
        .map_err(settlement_error)?
    else {
        return Err((
            StatusCode::NOT_FOUND,
            format!("benefit plan {plan_id} not found"),
        ));
    };
    let tiers = schedule::plan_tiers(&mut tx, plan_id)
        .await
        .map_err(settlement_error)?;
    tx.commit().await.map_err(internal_error)?;

    Ok(Json(PlanTiersResponse {
        plan_id: plan.id,
        plan_name: plan.name,
        tiers: tiers
            .into_iter()
            .map(|tier| TierView {
                referral_threshold: tier.referral_threshold,
                rate: tier.rate,
            })
            .collect(),
    }))
}

async fn upgrade_affiliate_status(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpgradeAffiliateStatusRequest>,
) -> Result<Json<UpgradeAffiliateStatusResponse>, (StatusCode, String)> {
    let status = AffiliateStatus::parse(&payload.status)
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;

    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let affiliate = graph::update_affiliate_status(&mut tx, user_id, payload.plan_id, status)
        .await
        .map_err(settlement_error)?;
    tx.commit().await.map_err(internal_error)?;

    let Some(affiliate) = affiliate else {
        return Err((
            StatusCode::NOT_FOUND,
            format!("affiliate {user_id} not found"),
        ));
    };

    // Notification failure never fails the status change itself.
    if let Err(err) = state
        .notifier
        .affiliate_status_changed(affiliate.user_id, affiliate.plan_id, affiliate.status)
        .await
    {
        error!(
            "failed to dispatch status notification for affiliate {}: {err:#}",
            affiliate.user_id
        );
    }

    Ok(Json(UpgradeAffiliateStatusResponse {
        user_id: affiliate.user_id,
        plan_id: affiliate.plan_id,
        status: affiliate.status,
        updated_at: affiliate.updated_at,
    }))
}

async fn get_affiliate_downline(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<AffiliateDownlineResponse>, (StatusCode, String)> {
    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let Some(plan_id) = graph::current_plan_of(&mut tx, user_id)
        .await
        .map_err(settlement_error)?
    else {
        return Err((
            StatusCode::NOT_FOUND,
            format!("affiliate {user_id} not found"),
        ));
    };
    let downline = graph::downline_of(&mut tx, user_id)
        .await
        .map_err(settlement_error)?;
    tx.commit().await.map_err(internal_error)?;

    Ok(Json(AffiliateDownlineResponse {
        user_id,
        plan_id,
        downline,
    }))
}

async fn get_user_balances(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserBalancesResponse>, (StatusCode, String)> {
    let kinds = [
        CurrencyKind::Withdrawable,
        CurrencyKind::Coin,
        CurrencyKind::Coupon,
        CurrencyKind::ActivityPoint,
    ];

    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let mut balances = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let amount = ledger::balance_of(&mut tx, user_id, kind)
            .await
            .map_err(settlement_error)?;
        balances.push(BalanceView {
            currency_kind: kind.as_str().to_string(),
            amount,
        });
    }
    tx.commit().await.map_err(internal_error)?;

    Ok(Json(UserBalancesResponse { user_id, balances }))
}

async fn get_ledger_history(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<LedgerHistoryResponse>, (StatusCode, String)> {
    let limit = clamp_limit(query.limit);
    let entries = ledger::ledger_for_user(&state.pool, user_id, limit)
        .await
        .map_err(settlement_error)?;

    Ok(Json(LedgerHistoryResponse {
        items: entries.into_iter().map(LedgerEntryView::from).collect(),
    }))
}

fn clamp_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT)
}

fn settlement_error(err: SettlementError) -> (StatusCode, String) {
    let status = match &err {
        SettlementError::Validation(_) => StatusCode::BAD_REQUEST,
        SettlementError::PeriodNotElapsed { .. } | SettlementError::AlreadyPublished { .. } => {
            StatusCode::CONFLICT
        }
        SettlementError::NoTierFound { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SettlementError::Aggregation(_) => StatusCode::BAD_GATEWAY,
        SettlementError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
