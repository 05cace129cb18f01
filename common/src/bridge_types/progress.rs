//! Bridge progress state machine
//!
//! Tracks the phases a single bridge operation goes through:
//! `idle → approving (optional) → bridging → success | error`.
//! Phases only move forward. A phase may repeat with a new message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Phase of a bridge operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgePhase {
    Idle,
    Approving,
    Bridging,
    Success,
    Error,
}

impl BridgePhase {
    fn rank(&self) -> u8 {
        match self {
            BridgePhase::Idle => 0,
            BridgePhase::Approving => 1,
            BridgePhase::Bridging => 2,
            BridgePhase::Success | BridgePhase::Error => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgePhase::Success | BridgePhase::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgePhase::Idle => "idle",
            BridgePhase::Approving => "approving",
            BridgePhase::Bridging => "bridging",
            BridgePhase::Success => "success",
            BridgePhase::Error => "error",
        }
    }
}

impl fmt::Display for BridgePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One status update published by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeUpdate {
    /// Id of the bridge operation this update belongs to
    pub operation_id: String,
    pub phase: BridgePhase,
    /// Human-readable message
    pub message: String,
    /// Hash of the transaction this update refers to, if any
    pub tx_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Lỗi chuyển trạng thái không hợp lệ
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressError {
    #[error("Invalid bridge phase transition: {from} -> {to}")]
    InvalidTransition { from: BridgePhase, to: BridgePhase },
}

/// Forward-only progress tracker for one bridge operation
#[derive(Debug, Clone)]
pub struct BridgeProgress {
    operation_id: String,
    phase: BridgePhase,
}

impl BridgeProgress {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            phase: BridgePhase::Idle,
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn phase(&self) -> BridgePhase {
        self.phase
    }

    /// Check whether `next` is reachable from the current phase
    pub fn can_advance(&self, next: BridgePhase) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        match next {
            BridgePhase::Idle => false,
            // lỗi có thể xảy ra ở bất kỳ bước nào
            BridgePhase::Error => true,
            // success chỉ đến sau bridging
            BridgePhase::Success => self.phase == BridgePhase::Bridging,
            _ => next.rank() >= self.phase.rank(),
        }
    }

    /// Move to `next` and produce the update to publish
    pub fn advance(
        &mut self,
        next: BridgePhase,
        message: impl Into<String>,
        tx_hash: Option<String>,
    ) -> Result<BridgeUpdate, ProgressError> {
        if !self.can_advance(next) {
            return Err(ProgressError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }

        self.phase = next;
        Ok(BridgeUpdate {
            operation_id: self.operation_id.clone(),
            phase: next,
            message: message.into(),
            tx_hash,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erc20_sequence() {
        let mut progress = BridgeProgress::new("op-1");

        assert!(progress.advance(BridgePhase::Approving, "Approving token for bridge...", None).is_ok());
        assert!(progress.advance(BridgePhase::Approving, "Approval submitted!", None).is_ok());
        assert!(progress.advance(BridgePhase::Bridging, "Sending bridge transaction...", None).is_ok());
        let update = progress
            .advance(BridgePhase::Success, "Bridge transaction successful!", Some("0xabc".into()))
            .unwrap();

        assert_eq!(update.phase, BridgePhase::Success);
        assert_eq!(update.operation_id, "op-1");
        assert!(progress.phase().is_terminal());
    }

    #[test]
    fn test_no_backward_transitions() {
        let mut progress = BridgeProgress::new("op-2");
        progress.advance(BridgePhase::Bridging, "bridging", None).unwrap();

        let err = progress.advance(BridgePhase::Approving, "late approve", None).unwrap_err();
        assert_eq!(
            err,
            ProgressError::InvalidTransition { from: BridgePhase::Bridging, to: BridgePhase::Approving }
        );
    }

    #[test]
    fn test_success_requires_bridging() {
        let mut progress = BridgeProgress::new("op-3");
        assert!(!progress.can_advance(BridgePhase::Success));

        progress.advance(BridgePhase::Approving, "approving", None).unwrap();
        assert!(!progress.can_advance(BridgePhase::Success));
        assert!(progress.can_advance(BridgePhase::Error));
    }

    #[test]
    fn test_terminal_phases_are_final() {
        let mut progress = BridgeProgress::new("op-4");
        progress.advance(BridgePhase::Error, "Bridge failed: rejected", None).unwrap();

        assert!(progress.advance(BridgePhase::Bridging, "retry", None).is_err());
        assert!(progress.advance(BridgePhase::Error, "again", None).is_err());
    }
}
