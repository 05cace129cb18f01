// Common library for the Katana bridge backend
//
// Shared data types used by the service crate: ledger records, status enums
// and the bridge progress state machine.

// Bridge types for cross-chain operations
pub mod bridge_types;

// Re-export bridge_types để dễ dàng sử dụng
pub use bridge_types::{
    BridgePhase, BridgeProgress, BridgeTransaction, BridgeUpdate, Network, NewBridgeTransaction,
    NewWithdrawRecord, TransactionStatus, WithdrawRecord,
};
