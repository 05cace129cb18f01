/// Withdrawal Service
///
/// Xử lý yêu cầu rút từ vault trên destination chain. Thứ tự cố định:
/// validate → kiểm tra admin → kiểm tra thanh khoản → simulate → gửi →
/// chờ receipt → ghi ledger. Không có tương tác chain nào trước khi
/// validate xong.

use std::sync::Arc;

use ethers::types::{Address, Bytes, U256};
use ethers::utils::format_units;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use common::bridge_types::{Network, NewWithdrawRecord};

use crate::chain::{wait_for_confirmation, ChainError, ChainReader, ConfirmationPolicy, TransactionSender};
use crate::contracts::{Erc20Token, RequestWithdrawArgs, VaultContract};
use crate::ledger::Ledger;

static ADDRESS_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").ok());

/// Check the `0x` + 40 hex form
pub fn is_valid_address(value: &str) -> bool {
    ADDRESS_PATTERN
        .as_ref()
        .map_or(false, |pattern| pattern.is_match(value))
}

/// Lỗi khi xử lý withdraw
#[derive(Debug, Clone, Error)]
pub enum WithdrawError {
    #[error("Missing required fields: amount, destinationNetwork, destinationAddress, token")]
    MissingFields,

    #[error("Invalid amount format")]
    InvalidAmount,

    #[error("Amount must be greater than 0")]
    NonPositiveAmount,

    #[error("Invalid destination network")]
    InvalidNetwork,

    #[error("Invalid destination address format")]
    InvalidDestination,

    #[error("Invalid token address format")]
    InvalidToken,

    #[error("Invalid user address format")]
    InvalidUser,

    #[error("Invalid permitData format")]
    InvalidPermitData,

    #[error("Unauthorized: Only admin can execute withdrawals")]
    Unauthorized,

    #[error("Insufficient vault balance")]
    InsufficientBalance { requested: U256, available: U256 },

    #[error("Operator key is not configured")]
    NotConfigured,

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl WithdrawError {
    pub fn status_code(&self) -> u16 {
        match self {
            WithdrawError::Unauthorized => 403,
            WithdrawError::NotConfigured | WithdrawError::Chain(_) => 500,
            _ => 400,
        }
    }
}

/// Body of `POST /api/withdraw`. `amount` and `destinationNetwork` may be
/// JSON strings or numbers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub user: Option<String>,
    pub amount: Option<Value>,
    pub destination_network: Option<Value>,
    pub destination_address: Option<String>,
    pub token: Option<String>,
    #[serde(default)]
    pub force_update_global_exit_root: bool,
    pub permit_data: Option<String>,
}

/// Request after validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedWithdraw {
    pub user: Option<Address>,
    pub amount: U256,
    pub destination_network: Network,
    pub destination_address: Address,
    pub token: Address,
    pub force_update_global_exit_root: bool,
    pub permit_data: Bytes,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_amount(value: &Value) -> Result<U256, WithdrawError> {
    let amount = match value {
        Value::String(text) => {
            let text = text.trim();
            if let Some(digits) = text.strip_prefix('-') {
                if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                    return Err(WithdrawError::NonPositiveAmount);
                }
                return Err(WithdrawError::InvalidAmount);
            }
            if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
                return Err(WithdrawError::InvalidAmount);
            }
            U256::from_dec_str(text).map_err(|_| WithdrawError::InvalidAmount)?
        }
        Value::Number(number) => {
            if let Some(n) = number.as_u64() {
                U256::from(n)
            } else if number.as_i64().is_some() {
                return Err(WithdrawError::NonPositiveAmount);
            } else {
                return Err(WithdrawError::InvalidAmount);
            }
        }
        _ => return Err(WithdrawError::InvalidAmount),
    };

    if amount.is_zero() {
        return Err(WithdrawError::NonPositiveAmount);
    }
    Ok(amount)
}

/// Bridge network id, number or string; only networks the bridge serves
fn parse_network(value: &Value) -> Result<Network, WithdrawError> {
    let id = match value {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse::<u32>().ok(),
        _ => None,
    };
    id.and_then(Network::from_id).ok_or(WithdrawError::InvalidNetwork)
}

fn parse_checked_address(value: &str, err: WithdrawError) -> Result<Address, WithdrawError> {
    if !is_valid_address(value) {
        return Err(err);
    }
    value.parse::<Address>().map_err(|_| err)
}

impl WithdrawRequest {
    /// Validate without touching the chain
    pub fn validate(&self) -> Result<ValidatedWithdraw, WithdrawError> {
        let (amount, network, destination, token) = match (
            self.amount.as_ref().filter(|v| !v.is_null()),
            self.destination_network.as_ref().filter(|v| !v.is_null()),
            present(&self.destination_address),
            present(&self.token),
        ) {
            (Some(amount), Some(network), Some(destination), Some(token)) => {
                (amount, network, destination, token)
            }
            _ => return Err(WithdrawError::MissingFields),
        };

        let amount = parse_amount(amount)?;
        let destination_address = parse_checked_address(destination, WithdrawError::InvalidDestination)?;
        let destination_network = parse_network(network)?;
        let token = parse_checked_address(token, WithdrawError::InvalidToken)?;

        let user = present(&self.user)
            .map(|user| parse_checked_address(user, WithdrawError::InvalidUser))
            .transpose()?;

        let permit_data = present(&self.permit_data)
            .unwrap_or("0x")
            .parse::<Bytes>()
            .map_err(|_| WithdrawError::InvalidPermitData)?;

        Ok(ValidatedWithdraw {
            user,
            amount,
            destination_network,
            destination_address,
            token,
            force_update_global_exit_root: self.force_update_global_exit_root,
            permit_data,
        })
    }
}

/// Success body of `POST /api/withdraw`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawReceipt {
    pub success: bool,
    pub transaction_hash: String,
    pub block_number: String,
    pub message: String,
}

/// Body of `GET /api/vault-balance`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultBalance {
    pub contract_address: String,
    pub vault_address: String,
    pub weth_address: String,
    /// WETH held by the vault, base units
    pub balance: String,
    /// Same, in ether units
    pub formatted: String,
}

/// Body of `GET /api/contract-info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    pub contract_address: String,
    pub admin_address: String,
    pub bridge_address: String,
    pub vault_address: String,
    pub weth_address: String,
}

/// Dịch vụ rút tiền từ vault
pub struct WithdrawalService {
    reader: Arc<dyn ChainReader>,
    sender: Option<Arc<dyn TransactionSender>>,
    vault: VaultContract,
    ledger: Arc<dyn Ledger>,
    policy: ConfirmationPolicy,
}

impl WithdrawalService {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        sender: Option<Arc<dyn TransactionSender>>,
        vault_address: Address,
        ledger: Arc<dyn Ledger>,
        policy: ConfirmationPolicy,
    ) -> Self {
        let vault = VaultContract::new(vault_address, reader.clone());
        Self {
            reader,
            sender,
            vault,
            ledger,
            policy,
        }
    }

    /// WETH balance held at the vault's `VAULT_ADDRESS()`
    async fn liquidity(&self) -> Result<(Address, Address, U256), ChainError> {
        let (vault_address, weth_address) =
            futures::try_join!(self.vault.vault_address(), self.vault.weth_address())?;
        let balance = Erc20Token::new(weth_address, self.reader.clone())
            .balance_of(vault_address)
            .await?;
        Ok((vault_address, weth_address, balance))
    }

    /// Validate, authorize, check liquidity, then send `requestWithdraw`
    pub async fn process(&self, request: &WithdrawRequest) -> Result<WithdrawReceipt, WithdrawError> {
        let withdraw = request.validate()?;
        info!(
            "Processing withdrawal: {} to {:?} on {}",
            withdraw.amount, withdraw.destination_address, withdraw.destination_network
        );

        let sender = self.sender.as_ref().ok_or(WithdrawError::NotConfigured)?;
        let operator = sender.address();

        let admin = self.vault.admin_address().await?;
        if admin != operator {
            warn!("Signer {:?} is not the vault admin {:?}", operator, admin);
            return Err(WithdrawError::Unauthorized);
        }

        let (_, _, available) = self.liquidity().await?;
        if available < withdraw.amount {
            warn!("Insufficient vault balance: requested {}, available {}", withdraw.amount, available);
            return Err(WithdrawError::InsufficientBalance {
                requested: withdraw.amount,
                available,
            });
        }

        let tx = self.vault.request_withdraw_request(&RequestWithdrawArgs {
            amount: withdraw.amount,
            destination_network: withdraw.destination_network.id(),
            destination_address: withdraw.destination_address,
            token: withdraw.token,
            force_update_global_exit_root: withdraw.force_update_global_exit_root,
            permit_data: withdraw.permit_data.clone(),
        })?;

        // simulate trước khi gửi
        self.reader.call(tx.to, tx.data.clone(), Some(operator)).await?;
        debug!("requestWithdraw simulation passed");

        let hash = sender.send(tx).await?;
        info!("Withdrawal transaction hash: {:?}", hash);

        let receipt = wait_for_confirmation(self.reader.as_ref(), hash, &self.policy).await?;
        let block_number = receipt.block_number.map(|n| n.as_u64()).unwrap_or_default();
        info!("Withdrawal confirmed in block {}", block_number);

        let user = withdraw.user.unwrap_or(withdraw.destination_address);
        let record = NewWithdrawRecord {
            user_address: format!("{:?}", user),
            amount: withdraw.amount.to_string(),
            token_address: format!("{:?}", withdraw.token),
            transaction_hash: format!("{:?}", hash),
            destination_network: withdraw.destination_network.id(),
        };
        if let Err(e) = self.ledger.insert_withdrawal(record).await {
            error!("Failed to record withdrawal {:?}: {}", hash, e);
        }

        Ok(WithdrawReceipt {
            success: true,
            transaction_hash: format!("{:?}", hash),
            block_number: block_number.to_string(),
            message: "Withdrawal request processed successfully".to_string(),
        })
    }

    pub async fn vault_balance(&self) -> Result<VaultBalance, ChainError> {
        let (vault_address, weth_address, balance) = self.liquidity().await?;
        let formatted = format_units(balance, 18u32).map_err(|e| ChainError::Abi(e.to_string()))?;

        Ok(VaultBalance {
            contract_address: format!("{:?}", self.vault.address),
            vault_address: format!("{:?}", vault_address),
            weth_address: format!("{:?}", weth_address),
            balance: balance.to_string(),
            formatted,
        })
    }

    pub async fn contract_info(&self) -> Result<ContractInfo, ChainError> {
        let (admin, bridge, vault, weth) = futures::try_join!(
            self.vault.admin_address(),
            self.vault.bridge_address(),
            self.vault.vault_address(),
            self.vault.weth_address(),
        )?;

        Ok(ContractInfo {
            contract_address: format!("{:?}", self.vault.address),
            admin_address: format!("{:?}", admin),
            bridge_address: format!("{:?}", bridge),
            vault_address: format!("{:?}", vault),
            weth_address: format!("{:?}", weth),
        })
    }
}
