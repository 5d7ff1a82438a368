//! Transaction submission and receipt polling.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, Log, B256, U256};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::ChainError;
use crate::gas::GasParams;
use crate::scheduler::{PollPolicy, PollStep, Poller, Scheduler};

/// A fully specified transaction ready to sign and broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub nonce: u64,
    pub gas: GasParams,
    /// `None` uses the sender's default limit.
    pub gas_limit: Option<u64>,
}

/// Mined transaction outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub success: bool,
    pub logs: Vec<Log>,
}

/// Confirmed (`latest`) and pending transaction counts of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountNonces {
    pub confirmed: u64,
    pub pending: u64,
}

/// Signing account plus the RPC calls needed to deliver its transactions.
#[async_trait]
pub trait TxBackend: Send + Sync {
    fn address(&self) -> Address;

    /// Take the next local nonce.
    fn reserve_nonce(&self) -> u64;

    /// Fee parameters for a first submission.
    async fn gas_params(&self) -> Result<GasParams, ChainError>;

    /// Current `eth_gasPrice`.
    async fn network_gas_price(&self) -> Result<u128, ChainError>;

    /// Sign and broadcast. Returns the transaction hash.
    async fn broadcast(&self, tx: &TxRequest) -> Result<B256, ChainError>;

    async fn receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError>;

    async fn nonces(&self) -> Result<AccountNonces, ChainError>;

    /// Reset the local nonce from the chain's pending count.
    async fn sync_nonce(&self) -> Result<u64, ChainError>;
}

/// A broadcast transaction that has not produced a receipt yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub hash: B256,
    pub nonce: u64,
    pub to: Address,
    pub data: Bytes,
    pub gas: GasParams,
    /// Unix seconds of the first broadcast.
    pub submitted_at: u64,
    pub cycles_waited: u32,
    /// Earlier hashes broadcast for the same nonce, oldest first.
    pub superseded: Vec<B256>,
}

impl PendingTransaction {
    /// Every hash that may still be mined for this nonce, newest first.
    pub fn hashes(&self) -> impl Iterator<Item = B256> + '_ {
        std::iter::once(self.hash).chain(self.superseded.iter().rev().copied())
    }

    /// Same payload at the same nonce with new fees.
    pub fn replacement(&self, gas: GasParams) -> TxRequest {
        TxRequest {
            to: self.to,
            data: self.data.clone(),
            value: U256::ZERO,
            nonce: self.nonce,
            gas,
            gas_limit: None,
        }
    }
}

/// Default receipt polling: once per second, two minutes at most.
pub const DEFAULT_RECEIPT_POLL: PollPolicy = PollPolicy {
    interval: Duration::from_secs(1),
    max_attempts: Some(120),
};

/// Broadcasts transactions and polls for their receipts.
#[derive(Clone)]
pub struct TransactionSubmitter {
    backend: Arc<dyn TxBackend>,
    scheduler: Arc<dyn Scheduler>,
    poll: PollPolicy,
}

impl TransactionSubmitter {
    pub fn new(backend: Arc<dyn TxBackend>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            backend,
            scheduler,
            poll: DEFAULT_RECEIPT_POLL,
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn backend(&self) -> &Arc<dyn TxBackend> {
        &self.backend
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    /// Broadcast `data` to `to` with a fresh nonce.
    ///
    /// `gas` overrides the backend's fee parameters. A failed broadcast
    /// resyncs the local nonce so it is not skipped.
    pub async fn submit(
        &self,
        to: Address,
        data: Bytes,
        gas: Option<GasParams>,
    ) -> Result<PendingTransaction, ChainError> {
        let gas = match gas {
            Some(gas) => gas,
            None => self.backend.gas_params().await?,
        };
        let nonce = self.backend.reserve_nonce();

        let request = TxRequest {
            to,
            data,
            value: U256::ZERO,
            nonce,
            gas,
            gas_limit: None,
        };

        let hash = match self.backend.broadcast(&request).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(to = %to, nonce = nonce, error = %e, "Broadcast failed, syncing nonce");
                if let Err(sync_err) = self.backend.sync_nonce().await {
                    warn!(error = %sync_err, "Nonce sync failed");
                }
                return Err(e);
            }
        };

        info!(
            tx_hash = %hash,
            to = %to,
            nonce = nonce,
            gas_gwei = request.gas.gwei(),
            "Transaction submitted"
        );

        Ok(PendingTransaction {
            hash,
            nonce,
            to,
            data: request.data,
            gas: request.gas,
            submitted_at: self.scheduler.now_unix(),
            cycles_waited: 0,
            superseded: Vec::new(),
        })
    }

    /// Look for a receipt of any hash broadcast for this nonce.
    ///
    /// RPC errors are logged and read as "not mined yet".
    pub async fn poll_once(&self, pending: &PendingTransaction) -> Option<Receipt> {
        for hash in pending.hashes() {
            match self.backend.receipt(hash).await {
                Ok(Some(receipt)) => return Some(receipt),
                Ok(None) => {}
                Err(e) => {
                    debug!(tx_hash = %hash, error = %e, "Receipt query failed");
                }
            }
        }
        None
    }

    /// Poll until a receipt appears or the poll policy is exhausted.
    pub async fn await_receipt(&self, pending: &PendingTransaction) -> Result<Receipt, ChainError> {
        let mut poller = Poller::new(self.poll);
        loop {
            match poller.tick(self.scheduler.as_ref()).await {
                PollStep::Attempt(_) => {
                    if let Some(receipt) = self.poll_once(pending).await {
                        return self.check_status(receipt).await;
                    }
                }
                PollStep::Exhausted | PollStep::Cancelled => {
                    return Err(ChainError::Timeout {
                        operation: "await_receipt",
                        elapsed_ms: self.poll.interval.as_millis()
                            * u128::from(poller.attempts().saturating_sub(1)),
                    });
                }
            }
        }
    }

    /// Map a failed receipt to [`ChainError::TransactionRevert`].
    ///
    /// A revert consumes the nonce on chain, so the local nonce is resynced.
    pub async fn check_status(&self, receipt: Receipt) -> Result<Receipt, ChainError> {
        if receipt.success {
            info!(
                tx_hash = %receipt.tx_hash,
                block = receipt.block_number.unwrap_or(0),
                gas_used = receipt.gas_used,
                "Transaction confirmed"
            );
            return Ok(receipt);
        }

        warn!(tx_hash = %receipt.tx_hash, "Transaction reverted, syncing nonce");
        if let Err(e) = self.backend.sync_nonce().await {
            warn!(error = %e, "Nonce sync failed");
        }
        Err(ChainError::TransactionRevert {
            hash: receipt.tx_hash,
            block: receipt.block_number,
        })
    }
}

impl std::fmt::Debug for TransactionSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSubmitter")
            .field("address", &self.backend.address())
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{Mining, MockBackend};
    use super::*;
    use crate::scheduler::ManualScheduler;
    use std::sync::atomic::Ordering;

    fn submitter(backend: Arc<MockBackend>) -> (TransactionSubmitter, Arc<ManualScheduler>) {
        let scheduler = Arc::new(ManualScheduler::new(1_700_000_000));
        let submitter = TransactionSubmitter::new(backend, scheduler.clone())
            .with_poll_policy(PollPolicy::new(Duration::from_secs(1), Some(5)));
        (submitter, scheduler)
    }

    #[tokio::test]
    async fn test_submit_and_await_success() {
        let backend = Arc::new(MockBackend::new(7).mine(Mining {
            broadcast_index: 0,
            after_polls: 2,
            success: true,
        }));
        let (submitter, scheduler) = submitter(backend.clone());

        let pending = submitter
            .submit(Address::repeat_byte(1), Bytes::from(vec![1, 2, 3]), None)
            .await
            .unwrap();
        assert_eq!(pending.nonce, 7);
        assert_eq!(pending.submitted_at, 1_700_000_000);

        let receipt = submitter.await_receipt(&pending).await.unwrap();
        assert_eq!(receipt.tx_hash, pending.hash);
        assert_eq!(scheduler.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_revert_surfaces_error_and_syncs_nonce() {
        let backend = Arc::new(MockBackend::new(0).mine(Mining {
            broadcast_index: 0,
            after_polls: 0,
            success: false,
        }));
        let (submitter, _) = submitter(backend.clone());

        let pending = submitter
            .submit(Address::repeat_byte(1), Bytes::from(vec![1]), None)
            .await
            .unwrap();
        let err = submitter.await_receipt(&pending).await.unwrap_err();

        assert!(matches!(err, ChainError::TransactionRevert { hash, .. } if hash == pending.hash));
        assert_eq!(backend.syncs.load(Ordering::SeqCst), 1);
        // Not retried.
        assert_eq!(backend.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_await_receipt_times_out() {
        let backend = Arc::new(MockBackend::new(0));
        let (submitter, scheduler) = submitter(backend);

        let pending = submitter
            .submit(Address::repeat_byte(1), Bytes::from(vec![1]), None)
            .await
            .unwrap();
        let err = submitter.await_receipt(&pending).await.unwrap_err();

        assert!(matches!(
            err,
            ChainError::Timeout {
                operation: "await_receipt",
                ..
            }
        ));
        assert_eq!(scheduler.sleeps().len(), 4);
    }

    #[tokio::test]
    async fn test_poll_checks_newest_hash_first() {
        let backend = Arc::new(MockBackend::new(0));
        let (submitter, _) = submitter(backend.clone());

        let pending = PendingTransaction {
            hash: B256::repeat_byte(3),
            nonce: 0,
            to: Address::ZERO,
            data: Bytes::new(),
            gas: GasParams::Legacy { gas_price: 1 },
            submitted_at: 0,
            cycles_waited: 0,
            superseded: vec![B256::repeat_byte(1), B256::repeat_byte(2)],
        };

        assert!(submitter.poll_once(&pending).await.is_none());
        assert_eq!(
            *backend.receipt_polls.lock(),
            vec![B256::repeat_byte(3), B256::repeat_byte(2), B256::repeat_byte(1)]
        );
    }
}
