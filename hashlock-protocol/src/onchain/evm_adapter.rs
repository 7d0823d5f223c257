// Account/contract-chain adapter driven through the Foundry `cast` CLI.
//
// Every value-moving submission is preceded by a balance pre-check and a
// read-only `cast call` dry-run, so doomed transactions fail before any
// funds are spent on gas.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use ethers::abi::{self, ParamType};
use ethers::types::U256;
use ethers::utils::parse_units;
use log::{debug, warn};
use regex::Regex;
use tokio::process::Command;

use crate::onchain::interface::{
    ChainAdapter, ChainAdapterError, LockOutcome, LockParams, Receipt, ReleaseParams, TxHash,
};

// Selector of Solidity's Error(string)
const ERROR_STRING_SELECTOR: &str = "08c379a0";

/// Configuration for one EVM chain. RPC endpoint and keys come from
/// deployment configuration, never from code.
#[derive(Debug, Clone)]
pub struct EvmChainConfig {
    pub cast_path: PathBuf,
    pub rpc_url: String,
    pub chain_id: u64,
    /// Address of the deployed hash-time-locked escrow contract.
    pub htlc_address: String,
    pub operator_address: String,
    pub operator_private_key: String,
    /// Decimals of the native asset moved by this adapter.
    pub decimals: u32,
    pub gas_limit: u64,
}

#[derive(Debug, Clone)]
pub struct EvmAdapter {
    config: EvmChainConfig,
}

impl EvmAdapter {
    pub fn new(config: EvmChainConfig) -> Self {
        EvmAdapter { config }
    }

    fn to_base_units(&self, amount: &str) -> Result<U256, ChainAdapterError> {
        let parsed = parse_units(amount, self.config.decimals).map_err(|e| {
            ChainAdapterError::InvalidAmount {
                amount: amount.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(parsed.into())
    }

    async fn run_cast(&self, args: &[String]) -> Result<std::process::Output, ChainAdapterError> {
        let mut cmd = Command::new(&self.config.cast_path);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        debug!("[EvmAdapter chain={}] exec: {:?}", self.config.chain_id, cmd);
        cmd.output()
            .await
            .map_err(|e| ChainAdapterError::Rpc(format!("failed to execute cast: {}", e)))
    }

    /// Read-only execution of the exact call about to be sent. A failure
    /// here means the submitted transaction would revert.
    async fn simulate(&self, call_args: &[String]) -> Result<(), ChainAdapterError> {
        let mut args = vec!["call".to_string()];
        args.extend_from_slice(call_args);
        args.push("--from".to_string());
        args.push(self.config.operator_address.clone());
        args.push("--rpc-url".to_string());
        args.push(self.config.rpc_url.clone());

        let output = self.run_cast(&args).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let reason = self
            .decode_revert_reason(&stderr)
            .unwrap_or_else(|| stderr.trim().to_string());
        Err(ChainAdapterError::ContractWouldRevert(reason))
    }

    async fn send(&self, call_args: &[String]) -> Result<TxHash, ChainAdapterError> {
        let mut args = vec!["send".to_string()];
        args.extend_from_slice(call_args);
        args.push("--private-key".to_string());
        args.push(self.config.operator_private_key.clone());
        args.push("--gas-limit".to_string());
        args.push(self.config.gas_limit.to_string());
        args.push("--rpc-url".to_string());
        args.push(self.config.rpc_url.clone());

        let output = self.run_cast(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ChainAdapterError::Submission(format!(
                "cast send failed: status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_transaction_hash(&stdout)
    }

    async fn current_block_number(&self) -> Result<u64, ChainAdapterError> {
        let args = vec![
            "block-number".to_string(),
            "--rpc-url".to_string(),
            self.config.rpc_url.clone(),
        ];
        let output = self.run_cast(&args).await?;
        if !output.status.success() {
            return Err(ChainAdapterError::Rpc(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<u64>()
            .map_err(|e| ChainAdapterError::Parse(format!("block number '{}': {}", stdout.trim(), e)))
    }
}

// cast prints a key/value receipt block; the hash is on the
// "transactionHash" line.
fn parse_transaction_hash(stdout: &str) -> Result<TxHash, ChainAdapterError> {
    if let Some(line) = stdout
        .lines()
        .find(|line| line.trim_start().starts_with("transactionHash"))
    {
        if let Some(hash) = line.split_whitespace().last() {
            if hash.starts_with("0x") && hash.len() == 66 {
                return Ok(hash.to_string());
            }
        }
    }
    Err(ChainAdapterError::Parse(format!(
        "no transaction hash in cast send output: {}",
        stdout.trim()
    )))
}

fn parse_quantity(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x") {
                u64::from_str_radix(hex, 16).ok()
            } else {
                s.parse::<u64>().ok()
            }
        }
        _ => None,
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn operator_address(&self) -> String {
        self.config.operator_address.clone()
    }

    async fn lock_funds(&self, params: &LockParams) -> Result<LockOutcome, ChainAdapterError> {
        let value = self.to_base_units(&params.amount)?;

        // Balance pre-check: surface InsufficientBalance before any
        // network write.
        let available = self.get_balance(&self.config.operator_address).await?;
        if available < value {
            return Err(ChainAdapterError::InsufficientBalance {
                needed: value,
                available,
            });
        }

        let call_args = vec![
            self.config.htlc_address.clone(),
            "lock(bytes32,address,bytes32,uint256)".to_string(),
            format!("0x{}", hex::encode(params.swap_id)),
            params.recipient.clone(),
            format!("0x{}", hex::encode(params.hash_lock)),
            params.timelock_expiry.to_string(),
            "--value".to_string(),
            value.to_string(),
        ];

        self.simulate(&call_args).await?;
        let tx_hash = self.send(&call_args).await?;
        Ok(LockOutcome {
            tx_hash,
            order_ref: hex::encode(params.swap_id),
        })
    }

    async fn release_with_secret(
        &self,
        params: &ReleaseParams,
    ) -> Result<TxHash, ChainAdapterError> {
        // The contract checks sha256(secret) against the stored hash; a
        // wrong secret reverts deterministically.
        let call_args = vec![
            self.config.htlc_address.clone(),
            "withdraw(bytes32,bytes32)".to_string(),
            format!("0x{}", hex::encode(params.swap_id)),
            format!("0x{}", hex::encode(params.secret)),
        ];

        self.simulate(&call_args).await?;
        self.send(&call_args).await
    }

    async fn transfer_direct(
        &self,
        recipient: &str,
        amount: &str,
    ) -> Result<TxHash, ChainAdapterError> {
        let value = self.to_base_units(amount)?;
        let available = self.get_balance(&self.config.operator_address).await?;
        if available < value {
            return Err(ChainAdapterError::InsufficientBalance {
                needed: value,
                available,
            });
        }
        warn!(
            "[EvmAdapter chain={}] direct transfer of {} to {} (no hash-lock guarantees)",
            self.config.chain_id, amount, recipient
        );
        let call_args = vec![
            recipient.to_string(),
            "--value".to_string(),
            value.to_string(),
        ];
        self.send(&call_args).await
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, ChainAdapterError> {
        let args = vec![
            "receipt".to_string(),
            tx_hash.to_string(),
            "--json".to_string(),
            "--rpc-url".to_string(),
            self.config.rpc_url.clone(),
        ];
        let output = self.run_cast(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
            if stderr.contains("not found") || stderr.contains("pending") {
                return Ok(None);
            }
            return Err(ChainAdapterError::Rpc(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: serde_json::Value = serde_json::from_str(stdout.trim())
            .map_err(|e| ChainAdapterError::Parse(format!("receipt json: {}", e)))?;

        let block_number = parsed
            .get("blockNumber")
            .and_then(parse_quantity)
            .ok_or_else(|| ChainAdapterError::Parse("receipt missing blockNumber".to_string()))?;
        let status = parsed.get("status").and_then(parse_quantity).unwrap_or(0);
        let gas_used = parsed.get("gasUsed").and_then(parse_quantity).unwrap_or(0);

        let head = self.current_block_number().await?;
        let confirmations = head.saturating_sub(block_number) + 1;

        let success = status == 1;
        Ok(Some(Receipt {
            tx_hash: tx_hash.to_string(),
            block_number,
            success,
            gas_used,
            confirmations,
            // cast receipts do not carry revert text; the reconciler
            // falls back to decode_revert_reason on the raw payload.
            error: if success {
                None
            } else {
                Some("execution reverted".to_string())
            },
        }))
    }

    async fn get_balance(&self, address: &str) -> Result<U256, ChainAdapterError> {
        let args = vec![
            "balance".to_string(),
            address.to_string(),
            "--rpc-url".to_string(),
            self.config.rpc_url.clone(),
        ];
        let output = self.run_cast(&args).await?;
        if !output.status.success() {
            return Err(ChainAdapterError::Rpc(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        U256::from_dec_str(stdout.trim())
            .map_err(|e| ChainAdapterError::Parse(format!("balance '{}': {}", stdout.trim(), e)))
    }

    fn decode_revert_reason(&self, payload: &str) -> Option<String> {
        // Prefer the ABI-encoded Error(string) blob when present.
        let hex_re = Regex::new(r"0x[0-9a-fA-F]{8,}").ok()?;
        for candidate in hex_re.find_iter(payload) {
            let blob = candidate.as_str().trim_start_matches("0x");
            if !blob.to_lowercase().starts_with(ERROR_STRING_SELECTOR) {
                continue;
            }
            let data = hex::decode(&blob[ERROR_STRING_SELECTOR.len()..]).ok()?;
            if let Ok(tokens) = abi::decode(&[ParamType::String], &data) {
                if let Some(abi::Token::String(reason)) = tokens.into_iter().next() {
                    return Some(reason);
                }
            }
        }
        // Otherwise take the human text after the standard marker.
        let lowered = payload.to_lowercase();
        if let Some(idx) = lowered.find("execution reverted") {
            let tail = payload[idx + "execution reverted".len()..]
                .trim_start_matches(|c: char| c == ':' || c == ' ')
                .lines()
                .next()
                .unwrap_or("")
                .trim();
            if !tail.is_empty() {
                return Some(tail.to_string());
            }
            return Some("execution reverted".to_string());
        }
        None
    }
}
