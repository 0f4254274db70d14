//! Error types for the dispatch engine.
//!
//! Apart from the configuration variants, every error here marks a
//! programming mistake in the caller. None of them is meant to be retried.

use crate::types::{StoreId, SubscriptionToken, Topic};
use thiserror::Error;

/// Main error type for dispatch operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid subscription key: {0:?}")]
    InvalidKey(String),

    #[error("Unknown subscription token: {0}")]
    UnknownToken(SubscriptionToken),

    #[error("Auto-subscription not found for key {0}")]
    SubscriptionNotFound(Topic),

    #[error("Trigger block stack popped without a matching push")]
    ImbalancedBlockStack,

    #[error("Auto-subscription belongs to {owner}, not {store}")]
    StoreMismatch { owner: StoreId, store: StoreId },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for DispatchError {
    fn from(e: serde_json::Error) -> Self {
        DispatchError::Config(e.to_string())
    }
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
