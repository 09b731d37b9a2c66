//! Caller-facing error taxonomy.
//!
//! Every variant carries structured fields and maps to one stable numeric
//! code that frontends (chat bot, HTTP router) surface unchanged.

use crate::data::ProviderError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PairwatchError {
    #[error("pair '{pair}' is not a valid 'asset-quote' name")]
    InvalidPair { pair: String },

    #[error("vs_currency '{vs_currency}' is incorrect")]
    VsCurrencyIncorrect { vs_currency: String },

    #[error("coin id '{coin_id}' is incorrect")]
    CoinIdIncorrect { coin_id: String },

    #[error("user {user_id} already exists")]
    UserAlreadyExists { user_id: i64 },

    #[error("user {user_id} not found")]
    UserNotFound { user_id: i64 },

    #[error("user creation error: {reason}")]
    UserCreationError { reason: String },

    #[error("user update error: {reason}")]
    UserUpdateError { reason: String },

    #[error("pair limit of {quota} is over for user {user_id}")]
    PairListIsOver { user_id: i64, quota: u32 },

    #[error("pair '{pair}' not found in pair list of user {user_id}")]
    PairNotInUserList { user_id: i64, pair: String },

    #[error("pair '{pair}' not found in database")]
    PairNotInDataBase { pair: String },

    #[error("artifact generation failed: {reason}")]
    GenerationFailed { reason: String },

    #[error("artifact delivery failed: {reason}")]
    DeliveryFailed { reason: String },

    #[error("transaction aborted by a concurrent write")]
    TransactionAborted,

    #[error("provider returned no data for '{pair}'")]
    ProviderDataEmpty { pair: String },

    #[error("provider error: {0}")]
    Provider(ProviderError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl PairwatchError {
    /// Stable code surfaced to callers.
    pub fn code(&self) -> u16 {
        match self {
            PairwatchError::InvalidPair { .. } => 431,
            PairwatchError::VsCurrencyIncorrect { .. } => 432,
            PairwatchError::CoinIdIncorrect { .. } => 433,
            PairwatchError::UserAlreadyExists { .. } => 434,
            PairwatchError::UserNotFound { .. } => 435,
            PairwatchError::UserUpdateError { .. } => 436,
            PairwatchError::PairNotInUserList { .. } => 437,
            PairwatchError::ProviderDataEmpty { .. } => 438,
            PairwatchError::PairListIsOver { .. } => 439,
            PairwatchError::PairNotInDataBase { .. } => 440,
            PairwatchError::UserCreationError { .. } => 441,
            PairwatchError::GenerationFailed { .. } => 442,
            PairwatchError::DeliveryFailed { .. } => 443,
            PairwatchError::TransactionAborted => 444,
            PairwatchError::Provider(_) => 502,
            PairwatchError::Store(_) => 503,
        }
    }
}

impl From<StoreError> for PairwatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TransactionAborted => PairwatchError::TransactionAborted,
            other => PairwatchError::Store(other),
        }
    }
}

impl From<ProviderError> for PairwatchError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::DataEmpty { pair } => PairwatchError::ProviderDataEmpty { pair },
            other => PairwatchError::Provider(other),
        }
    }
}

/// Errors that may be resolved by re-running the whole unit of work.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for PairwatchError {
    fn is_retryable(&self) -> bool {
        matches!(self, PairwatchError::TransactionAborted)
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::TransactionAborted)
    }
}
