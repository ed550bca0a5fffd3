//! Schema cache error taxonomy (spec.md §4.E, §7).

use thiserror::Error;
use xapiand_pool::CheckoutError;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    #[error("schema metadata is not valid MsgPack: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("schema document version conflict")]
    DocVersionConflict,

    #[error("cyclic foreign schema reference at {0}")]
    CyclicReference(String),

    #[error("foreign schema recursion limit exceeded (> {0})")]
    RecursionLimit(usize),

    #[error("schema error: {0}")]
    Other(String),
}

pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

impl From<SchemaError> for xapiand_core::XapiandError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::DocVersionConflict => xapiand_core::XapiandError::DocVersionConflict,
            SchemaError::Checkout(c) => c.into(),
            other => xapiand_core::XapiandError::Schema(other.to_string()),
        }
    }
}
