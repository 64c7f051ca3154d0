use crate::error::Result;
use crate::transaction::{Transaction, TransactionRequest};
use crate::utils::{canonical_json, current_timestamp, hash_data};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub const GENESIS_PREVIOUS_HASH: &str = "0";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    pub timestamp: f64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub hash: String,
}

/// Everything a block hash covers: all block fields except the hash itself.
#[derive(Serialize)]
struct BlockContent<'a> {
    timestamp: f64,
    transactions: &'a [Transaction],
    previous_hash: &'a str,
}

fn block_digest(
    timestamp: f64,
    transactions: &[Transaction],
    previous_hash: &str,
) -> Result<String> {
    let content = BlockContent {
        timestamp,
        transactions,
        previous_hash,
    };
    Ok(hash_data(&canonical_json(&content)?))
}

impl Block {
    pub fn new(
        timestamp: f64,
        transactions: Vec<Transaction>,
        previous_hash: String,
    ) -> Result<Self> {
        let hash = block_digest(timestamp, &transactions, &previous_hash)?;
        Ok(Self {
            timestamp,
            transactions,
            previous_hash,
            hash,
        })
    }

    /// Recompute the digest from the current field values.
    pub fn calculate_hash(&self) -> Result<String> {
        block_digest(self.timestamp, &self.transactions, &self.previous_hash)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status")]
pub enum MineOutcome {
    #[serde(rename = "no_transactions")]
    NoTransactions,
    #[serde(rename = "success")]
    Success {
        block_hash: String,
        transactions_count: usize,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: f64,
    pub amount: f64,
    pub block_hash: String,
}

/// Append-only, hash-linked record of habitat resource transactions.
///
/// Transactions wait in a pending buffer until `mine_block` seals all of them
/// into one block. State lives in memory only and is gone on restart.
#[derive(Debug)]
pub struct ResourceLedger {
    chain: Vec<Block>,
    pending_transactions: Vec<Transaction>,
}

impl ResourceLedger {
    pub fn new() -> Result<Self> {
        let genesis_block =
            Block::new(current_timestamp(), vec![], GENESIS_PREVIOUS_HASH.to_string())?;
        Ok(Self {
            chain: vec![genesis_block],
            pending_transactions: Vec::new(),
        })
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    pub fn latest_block(&self) -> &Block {
        // The genesis block is created in `new` and blocks are never removed.
        &self.chain[self.chain.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Queue a transaction for the next block. Returns `false` without touching
    /// any state when a field is missing or unusable.
    pub fn add_transaction(&mut self, request: TransactionRequest) -> bool {
        let invalid = request.invalid_fields();
        match request.into_transaction(current_timestamp()) {
            Some(transaction) => {
                self.pending_transactions.push(transaction);
                true
            }
            None => {
                warn!("Failed to add transaction: invalid {}", invalid.join(", "));
                false
            }
        }
    }

    pub fn mine_block(&mut self) -> Result<MineOutcome> {
        if self.pending_transactions.is_empty() {
            return Ok(MineOutcome::NoTransactions);
        }

        let previous_hash = self.latest_block().hash.clone();
        let timestamp = current_timestamp();
        // Hash before taking the pending list so a failure leaves it intact.
        let hash = block_digest(timestamp, &self.pending_transactions, &previous_hash).map_err(|e| {
            error!("Block mining failed: {}", e);
            e
        })?;

        let transactions = std::mem::take(&mut self.pending_transactions);
        let transactions_count = transactions.len();
        self.chain.push(Block {
            timestamp,
            transactions,
            previous_hash,
            hash: hash.clone(),
        });
        info!("New block {} mined with {} transactions", hash, transactions_count);

        Ok(MineOutcome::Success {
            block_hash: hash,
            transactions_count,
        })
    }

    pub fn get_resource_history(&self, resource_id: &str) -> Vec<HistoryEntry> {
        self.chain
            .iter()
            .flat_map(|block| {
                block
                    .transactions
                    .iter()
                    .filter(move |tx| tx.resource == resource_id)
                    .map(move |tx| HistoryEntry {
                        timestamp: tx.timestamp,
                        amount: tx.amount,
                        block_hash: block.hash.clone(),
                    })
            })
            .collect()
    }

    /// Check every link and every non-genesis self-hash.
    ///
    /// The genesis block is only covered as the link target of block 1, so a
    /// chain holding just the genesis block is trivially valid.
    pub fn verify_chain(&self) -> bool {
        for i in 1..self.chain.len() {
            let current = &self.chain[i];
            let previous = &self.chain[i - 1];

            if current.previous_hash != previous.hash {
                warn!("Chain broken at block {}: previous hash mismatch", i);
                return false;
            }
            match current.calculate_hash() {
                Ok(hash) if hash == current.hash => {}
                _ => {
                    warn!("Chain broken at block {}: stored hash does not match content", i);
                    return false;
                }
            }
        }
        true
    }
}
