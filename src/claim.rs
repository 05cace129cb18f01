//! Operator claim
//!
//! Fetches the merkle proof of a deposit from the bridge service and submits
//! `claimAndRedeem` on the bank contract with the operator key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use common::bridge_types::Network;

use crate::chain::{wait_for_confirmation, ChainError, ChainReader, ConfirmationPolicy, TransactionSender};
use crate::contracts::{BankContract, ClaimAndRedeemArgs};

/// Depth of the local and rollup exit trees
pub const PROOF_DEPTH: usize = 32;

/// Lỗi khi lấy proof
#[derive(Debug, Clone, Error)]
pub enum ProofError {
    #[error("Proof request failed: {0}")]
    Request(String),

    #[error("Proof service returned HTTP {0}")]
    Status(u16),

    #[error("Failed to decode proof: {0}")]
    Decode(String),

    #[error("{field} has {len} nodes, expected 32")]
    Depth { field: &'static str, len: usize },
}

#[derive(Debug, Clone, Error)]
pub enum ClaimError {
    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Leaf locator of a claim.
///
/// Mainnet deposits set bit 64; rollup deposits put `net_id - 1` in bits 32..64.
pub fn global_index(net_id: u32, deposit_count: u32) -> U256 {
    if Network::from_id(net_id).map_or(false, |network| network.is_mainnet()) {
        (U256::one() << 64) | U256::from(deposit_count)
    } else {
        (U256::from(net_id - 1) << 32) | U256::from(deposit_count)
    }
}

/// ABI encoding of `(string name, string symbol, uint8 decimals)`
pub fn encode_token_metadata(name: &str, symbol: &str, decimals: u8) -> Bytes {
    Bytes::from(encode(&[
        Token::String(name.to_string()),
        Token::String(symbol.to_string()),
        Token::Uint(U256::from(decimals)),
    ]))
}

#[derive(Debug, Deserialize)]
struct ProofResponse {
    proof: RawProof,
}

#[derive(Debug, Deserialize)]
struct RawProof {
    merkle_proof: Vec<H256>,
    rollup_merkle_proof: Vec<H256>,
    main_exit_root: H256,
    rollup_exit_root: H256,
}

/// Proof of one deposit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub merkle_proof: [H256; PROOF_DEPTH],
    pub rollup_merkle_proof: [H256; PROOF_DEPTH],
    pub main_exit_root: H256,
    pub rollup_exit_root: H256,
}

fn fixed_depth(nodes: Vec<H256>, field: &'static str) -> Result<[H256; PROOF_DEPTH], ProofError> {
    let len = nodes.len();
    nodes.try_into().map_err(|_| ProofError::Depth { field, len })
}

/// Parse a `/merkle-proof` response body
pub fn parse_proof(body: &str) -> Result<MerkleProof, ProofError> {
    let response: ProofResponse =
        serde_json::from_str(body).map_err(|e| ProofError::Decode(e.to_string()))?;
    let raw = response.proof;

    Ok(MerkleProof {
        merkle_proof: fixed_depth(raw.merkle_proof, "merkle_proof")?,
        rollup_merkle_proof: fixed_depth(raw.rollup_merkle_proof, "rollup_merkle_proof")?,
        main_exit_root: raw.main_exit_root,
        rollup_exit_root: raw.rollup_exit_root,
    })
}

/// Nguồn merkle proof
#[async_trait]
pub trait ProofSource: Send + Sync {
    async fn merkle_proof(&self, deposit_count: u32, net_id: u32) -> Result<MerkleProof, ProofError>;
}

/// Client of the bridge service's `/merkle-proof`
pub struct MerkleProofClient {
    client: Client,
    base_url: String,
}

impl MerkleProofClient {
    pub fn new(base_url: &str) -> Result<Self, ProofError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProofError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn proof_url(&self, deposit_count: u32, net_id: u32) -> String {
        format!(
            "{}/merkle-proof?deposit_cnt={}&net_id={}",
            self.base_url, deposit_count, net_id
        )
    }
}

#[async_trait]
impl ProofSource for MerkleProofClient {
    async fn merkle_proof(&self, deposit_count: u32, net_id: u32) -> Result<MerkleProof, ProofError> {
        let url = self.proof_url(deposit_count, net_id);
        debug!("Fetching merkle proof: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProofError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProofError::Status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProofError::Request(e.to_string()))?;
        parse_proof(&body)
    }
}

/// What to claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    pub deposit_count: u32,
    /// Network the deposit was made on
    pub net_id: u32,
    pub destination: Address,
    pub amount: U256,
    pub origin_token: Address,
    pub metadata: Bytes,
}

/// Gửi claimAndRedeem bằng operator key
pub struct ClaimService {
    proofs: Arc<dyn ProofSource>,
    reader: Arc<dyn ChainReader>,
    sender: Arc<dyn TransactionSender>,
    bank: BankContract,
    policy: ConfirmationPolicy,
}

impl ClaimService {
    pub fn new(
        proofs: Arc<dyn ProofSource>,
        reader: Arc<dyn ChainReader>,
        sender: Arc<dyn TransactionSender>,
        bank: Address,
        policy: ConfirmationPolicy,
    ) -> Self {
        Self {
            proofs,
            reader,
            sender,
            bank: BankContract::new(bank),
            policy,
        }
    }

    pub async fn claim_and_redeem(&self, request: &ClaimRequest) -> Result<TransactionReceipt, ClaimError> {
        let proof = self
            .proofs
            .merkle_proof(request.deposit_count, request.net_id)
            .await?;
        let index = global_index(request.net_id, request.deposit_count);
        info!(
            "Claiming deposit {} from network {} (global index {})",
            request.deposit_count, request.net_id, index
        );

        let tx = self.bank.claim_and_redeem_request(&ClaimAndRedeemArgs {
            smt_proof_local_exit_root: proof.merkle_proof,
            smt_proof_rollup_exit_root: proof.rollup_merkle_proof,
            global_index: index,
            mainnet_exit_root: proof.main_exit_root,
            rollup_exit_root: proof.rollup_exit_root,
            destination_address: request.destination,
            amount: request.amount,
            origin_token_address: request.origin_token,
            metadata: request.metadata.clone(),
        })?;

        let hash = self.sender.send(tx).await?;
        info!("claimAndRedeem submitted: {:?}", hash);

        let receipt = wait_for_confirmation(self.reader.as_ref(), hash, &self.policy).await?;
        info!("Claim confirmed in block {:?}", receipt.block_number);
        Ok(receipt)
    }
}
