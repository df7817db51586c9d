//! L2 transaction status inspection

use super::BridgeContext;
use crate::chain::{L2Phase, L2TxStatus};
use crate::coordination::StatusPoller;
use crate::error::BridgeResult;

use ethers::types::H256;
use serde::Serialize;

/// Where an L2 transaction stands in the L2 finality model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct L2TransactionStatus {
    pub hash: H256,
    pub block_number: Option<u64>,
    pub l1_batch_number: Option<u64>,
    pub status: Option<L2TxStatus>,
    pub phase: L2Phase,
    pub is_l1_originated: bool,
    pub eth_commit_tx_hash: Option<H256>,
    pub eth_prove_tx_hash: Option<H256>,
    pub eth_execute_tx_hash: Option<H256>,
}

impl L2TransactionStatus {
    /// Combine the receipt and the transaction details of `hash`.
    ///
    /// `None` when the L2 node knows neither.
    pub async fn inspect(
        ctx: &BridgeContext,
        poller: &StatusPoller,
        hash: H256,
    ) -> BridgeResult<Option<Self>> {
        let l2 = ctx.l2.as_ref();
        let zk = ctx.zk.as_ref();

        let receipt = poller.read("l2 receipt", || l2.get_receipt(hash)).await?;
        let details = poller
            .read("transaction details", || zk.transaction_details(hash))
            .await?;

        if receipt.is_none() && details.is_none() {
            return Ok(None);
        }

        let phase = match (&details, &receipt) {
            (Some(details), _) => L2Phase::from_details(details),
            (None, Some(receipt)) if !receipt.success => L2Phase::Failed,
            (None, Some(_)) => L2Phase::Included,
            (None, None) => L2Phase::Pending,
        };

        Ok(Some(Self {
            hash,
            block_number: receipt.as_ref().and_then(|r| r.block_number),
            l1_batch_number: receipt.as_ref().and_then(|r| r.l1_batch_number),
            status: details.as_ref().map(|d| d.status),
            phase,
            is_l1_originated: details.as_ref().map_or(false, |d| d.is_l1_originated),
            eth_commit_tx_hash: details.as_ref().and_then(|d| d.eth_commit_tx_hash),
            eth_prove_tx_hash: details.as_ref().and_then(|d| d.eth_prove_tx_hash),
            eth_execute_tx_hash: details.as_ref().and_then(|d| d.eth_execute_tx_hash),
        }))
    }
}
