use crate::primitives::Hash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use thiserror::Error;

/// Errors raised at the chain boundary.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Network error. {0}")]
    Network(String),
    #[error("Request timed out. {0}")]
    Timeout(String),
    #[error("Gas estimation failed. {0}")]
    GasEstimation(String),
    #[error("Nonce has already been used. {0}")]
    NonceConflict(String),
    #[error("Replacement transaction underpriced. {0}")]
    ReplacementUnderpriced(String),
    #[error("Contract call reverted. {0}")]
    Reverted(String),
    #[error("Chain error. {0}")]
    Other(String),
}

impl ChainError {
    /// Connectivity errors. These are retried indefinitely.
    pub fn is_network(&self) -> bool {
        matches!(self, ChainError::Network(_) | ChainError::Timeout(_))
    }

    /// Transaction submission errors caused by stale gas, allowance or nonce estimates.
    pub fn is_recoverable_tx(&self) -> bool {
        matches!(
            self,
            ChainError::GasEstimation(_) | ChainError::NonceConflict(_) | ChainError::ReplacementUnderpriced(_)
        )
    }
}

/// Stable codes for the business-rule failures of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    UdcDepositOutdated,
    UdcPlanWithdrawGtZero,
    UdcPlanWithdrawExceedsAvailable,
    UdcPlanWithdrawFailed,
    UdcWithdrawNoBalance,
    UdcWithdrawFailed,
    DepositTransactionFailed,
    ApproveTransactionFailed,
    InsufficientBalance,
    ChannelNotFound,
    ChannelNotOpen,
    InsufficientCapacity,
    TransferInvalid,
    TransferNotFound,
    SecretMismatch,
    MessageSignatureMismatch,
    TransportUnavailable,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ErrorCode::UdcDepositOutdated => "The requested total deposit is outdated",
            ErrorCode::UdcPlanWithdrawGtZero => "The planned withdraw amount must be greater than zero",
            ErrorCode::UdcPlanWithdrawExceedsAvailable => "The planned withdraw amount exceeds the UDC balance",
            ErrorCode::UdcPlanWithdrawFailed => "The plan withdraw transaction failed",
            ErrorCode::UdcWithdrawNoBalance => "There is no UDC balance to withdraw",
            ErrorCode::UdcWithdrawFailed => "The UDC withdraw transaction failed",
            ErrorCode::DepositTransactionFailed => "The deposit transaction failed",
            ErrorCode::ApproveTransactionFailed => "The approve transaction failed",
            ErrorCode::InsufficientBalance => "Insufficient token balance",
            ErrorCode::ChannelNotFound => "No channel with the partner",
            ErrorCode::ChannelNotOpen => "The channel is not open",
            ErrorCode::InsufficientCapacity => "The channel capacity is insufficient",
            ErrorCode::TransferInvalid => "The transfer is invalid",
            ErrorCode::TransferNotFound => "The transfer is unknown",
            ErrorCode::SecretMismatch => "The secret does not match the secrethash",
            ErrorCode::MessageSignatureMismatch => "The message signer does not match the sender",
            ErrorCode::TransportUnavailable => "The peer transport is unavailable",
        };
        write!(f, "{msg}")
    }
}

pub type ErrorDetails = BTreeMap<String, String>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0}")]
    Chain(#[from] ChainError),
    #[error("{code}. {details:?}")]
    Assertion { code: ErrorCode, details: ErrorDetails },
    #[error("{code}: {label} transaction {tx_hash} failed")]
    TxFailed { code: ErrorCode, label: String, tx_hash: Hash },
    #[error("The engine is shutting down")]
    Shutdown,
    #[error("The action subscriber fell behind and lost {0} actions")]
    Lagged(u64),
}

impl EngineError {
    pub fn assertion<I, K, V>(code: ErrorCode, details: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let details = details.into_iter().map(|(k, v)| (k.into(), v.to_string())).collect();
        EngineError::Assertion { code, details }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            EngineError::Assertion { code, .. } | EngineError::TxFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, EngineError::Chain(e) if e.is_network())
    }

    pub fn is_recoverable_tx(&self) -> bool {
        matches!(self, EngineError::Chain(e) if e.is_recoverable_tx())
    }
}

/// Fails with an [`EngineError::Assertion`] carrying `code` and `details` unless `condition` holds.
pub fn ensure<I, K, V>(condition: bool, code: ErrorCode, details: I) -> Result<(), EngineError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: ToString,
{
    if condition {
        Ok(())
    } else {
        Err(EngineError::assertion(code, details))
    }
}

/// The serialisable form of an error, as carried by failure actions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: Option<ErrorCode>,
    pub message: String,
    pub details: ErrorDetails,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ErrorInfo { code: Some(code), message: message.into(), details: ErrorDetails::new() }
    }
}

impl From<&EngineError> for ErrorInfo {
    fn from(error: &EngineError) -> Self {
        let details = match error {
            EngineError::Assertion { details, .. } => details.clone(),
            EngineError::TxFailed { label, tx_hash, .. } => {
                [("label".to_string(), label.clone()), ("txHash".to_string(), tx_hash.to_string())].into()
            }
            _ => ErrorDetails::new(),
        };
        ErrorInfo { code: error.code(), message: error.to_string(), details }
    }
}

impl From<EngineError> for ErrorInfo {
    fn from(error: EngineError) -> Self {
        ErrorInfo::from(&error)
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
