//! Pool error taxonomy (spec.md §4.D).

use thiserror::Error;
use xapiand_core::backend::BackendError;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("pool is closed to further checkouts")]
    PoolClosed,

    #[error("no remote endpoint is active for this endpoint set")]
    EndpointNotAvailable,

    #[error("writable checkout conflict: wait timed out")]
    Conflict,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

pub type CheckoutResult<T> = std::result::Result<T, CheckoutError>;

impl From<CheckoutError> for xapiand_core::XapiandError {
    fn from(e: CheckoutError) -> Self {
        match e {
            CheckoutError::Io(io) => xapiand_core::XapiandError::Io(io),
            CheckoutError::PoolClosed => xapiand_core::XapiandError::ShutdownInProgress,
            other => xapiand_core::XapiandError::Checkout(other.to_string()),
        }
    }
}
