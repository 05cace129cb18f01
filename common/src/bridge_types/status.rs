//! Ledger transaction status types
//!
//! This module defines the `TransactionStatus` enum stored in the
//! `transaction_history` table, along with the legal status transitions.

use serde::{Serialize, Deserialize};
use std::fmt;
use std::str::FromStr;

/// Status of a bridge deposit row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Deposit broadcast on the source chain, claim not yet observed
    Pending,
    /// Claim observed on the destination chain
    Completed,
    /// Deposit failed
    Failed,
}

impl TransactionStatus {
    /// Check if the status is terminal (Completed or Failed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Only pending rows may move, and only forward.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Completed) | (Self::Pending, Self::Failed) => true,
            (current, next) => *current == next,
        }
    }

    /// Column value used by the store
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl Default for TransactionStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown transaction status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_properties() {
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(!TransactionStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_transitions() {
        use TransactionStatus::*;

        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn test_status_serde() {
        assert_eq!(TransactionStatus::Pending.to_string(), "pending");
        assert_eq!("COMPLETED".parse::<TransactionStatus>(), Ok(TransactionStatus::Completed));
        assert!("confirmed".parse::<TransactionStatus>().is_err());

        let json = serde_json::to_string(&TransactionStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }
}
