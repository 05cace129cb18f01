//! # Bridge Types Module
//!
//! Định nghĩa các kiểu dữ liệu dùng chung cho bridge Sepolia -> Katana:
//! bản ghi ledger, trạng thái giao dịch và state machine tiến trình bridge.

pub mod network;
pub mod status;
pub mod transaction;
pub mod progress;

pub use network::Network;
pub use status::TransactionStatus;
pub use transaction::{BridgeTransaction, NewBridgeTransaction, NewWithdrawRecord, WithdrawRecord};
pub use progress::{BridgePhase, BridgeProgress, BridgeUpdate, ProgressError};
