use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Typed failure taxonomy for the settlement core. Validation and lifecycle
/// errors surface to the caller; aggregation and storage failures abort the
/// whole run via transaction rollback.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("invalid baseline input: {0}")]
    Validation(String),

    #[error("accounting period is still in progress until {end_date}")]
    PeriodNotElapsed { end_date: NaiveDate },

    #[error("baseline {baseline_id} is already published")]
    AlreadyPublished { baseline_id: Uuid },

    #[error("no commission tier in plan {plan_id} qualifies for revenue {revenue}")]
    NoTierFound { plan_id: Uuid, revenue: Decimal },

    #[error("revenue aggregation failed: {0}")]
    Aggregation(anyhow::Error),

    #[error("storage failure: {0}")]
    Storage(anyhow::Error),
}

impl SettlementError {
    pub fn validation(message: impl Into<String>) -> Self {
        SettlementError::Validation(message.into())
    }

    pub fn aggregation(err: impl Into<anyhow::Error>) -> Self {
        SettlementError::Aggregation(err.into())
    }

    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        SettlementError::Storage(err.into())
    }

    /// Retryable failures leave the world unchanged; the caller should try
    /// the same call again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlementError::PeriodNotElapsed { .. }
                | SettlementError::Aggregation(_)
                | SettlementError::Storage(_)
        )
    }
}
