use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    gateways::ledger::LedgerError,
    state::{group::GroupError, quiz::QuizError, tod::TodError},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Session, pairing or queue entry absent.
    #[error("not found: {0}")]
    NotFound(String),
    /// Action submitted against a state that does not accept it.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Non-host using a host control, or acting out of turn.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Ledger debit refused.
    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds {
        /// Balance at the time of the refusal.
        balance: i64,
        /// Amount the operation needed.
        required: i64,
    },
    /// The user already has a queue entry.
    #[error("already queued")]
    AlreadyQueued,
    /// Replayed action token or duplicate idempotency key.
    #[error("duplicate action")]
    DuplicateAction,
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Unexpected failure inside the engine.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Races between triggers that the dispatcher drops silently.
    pub fn is_absorbed(&self) -> bool {
        matches!(
            self,
            ServiceError::InvalidState(_) | ServiceError::DuplicateAction
        )
    }

    /// Errors reported back to the acting user only.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ServiceError::Unauthorized(_)
                | ServiceError::InsufficientFunds { .. }
                | ServiceError::InvalidInput(_)
                | ServiceError::AlreadyQueued
                | ServiceError::NotFound(_)
        )
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds { balance, required } => {
                ServiceError::InsufficientFunds { balance, required }
            }
            LedgerError::InvalidAmount(amount) => {
                ServiceError::InvalidInput(format!("invalid amount {amount}"))
            }
            LedgerError::Storage(source) => ServiceError::Unavailable(source),
            LedgerError::Degraded => ServiceError::Degraded,
        }
    }
}

impl From<QuizError> for ServiceError {
    fn from(err: QuizError) -> Self {
        match err {
            QuizError::NotParticipant(user) => {
                ServiceError::Unauthorized(format!("user {user} is not part of this quiz"))
            }
            QuizError::NotChooser { .. } => ServiceError::Unauthorized(err.to_string()),
            QuizError::InvalidChoice { .. } => ServiceError::InvalidInput(err.to_string()),
            QuizError::WrongState { .. } | QuizError::StaleQuestion { .. } => {
                ServiceError::InvalidState(err.to_string())
            }
        }
    }
}

impl From<TodError> for ServiceError {
    fn from(err: TodError) -> Self {
        match err {
            TodError::NotParticipant(_) | TodError::NotYourTurn { .. } => {
                ServiceError::Unauthorized(err.to_string())
            }
            TodError::ProofMismatch { .. } => ServiceError::InvalidInput(err.to_string()),
            TodError::WrongState { .. } => ServiceError::InvalidState(err.to_string()),
        }
    }
}

impl From<GroupError> for ServiceError {
    fn from(err: GroupError) -> Self {
        match err {
            GroupError::NotHost(_) | GroupError::NotTurnUser { .. } => {
                ServiceError::Unauthorized(err.to_string())
            }
            GroupError::NotEnoughPlayers { .. } => ServiceError::InvalidInput(err.to_string()),
            GroupError::WrongStatus { .. } => ServiceError::InvalidState(err.to_string()),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Ledger refused a debit.
    #[error("payment required: {0}")]
    PaymentRequired(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::AlreadyQueued => AppError::Conflict("already queued".into()),
            ServiceError::DuplicateAction => AppError::Conflict("duplicate action".into()),
            err @ ServiceError::InsufficientFunds { .. } => {
                AppError::PaymentRequired(err.to_string())
            }
            ServiceError::Internal(message) => AppError::Internal(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Unauthorized(_) => (StatusCode::FORBIDDEN, "not_allowed"),
            AppError::PaymentRequired(_) => (StatusCode::PAYMENT_REQUIRED, "insufficient_funds"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();
        let payload = Json(ErrorBody {
            code,
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn races_are_absorbed_and_not_user_facing() {
        let race = ServiceError::InvalidState("question already advanced".into());
        assert!(race.is_absorbed());
        assert!(!race.is_user_facing());
        assert!(ServiceError::DuplicateAction.is_absorbed());
    }

    #[test]
    fn funds_errors_reach_the_acting_user() {
        let err = ServiceError::InsufficientFunds {
            balance: 2,
            required: 5,
        };
        assert!(err.is_user_facing());
        assert!(!err.is_absorbed());
        let app = AppError::from(err);
        assert_eq!(
            app.status_and_code(),
            (StatusCode::PAYMENT_REQUIRED, "insufficient_funds")
        );
    }

    #[test]
    fn ledger_refusal_maps_to_insufficient_funds() {
        let err: ServiceError = LedgerError::InsufficientFunds {
            balance: 1,
            required: 4,
        }
        .into();
        assert!(matches!(
            err,
            ServiceError::InsufficientFunds {
                balance: 1,
                required: 4
            }
        ));
    }
}
