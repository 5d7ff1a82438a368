//! Guaranteed delivery for keeper transactions.
//!
//! The escalator owns a [`PendingTransaction`] until one of its hashes is
//! mined. Past `speed_up_threshold` empty poll cycles it rebroadcasts the
//! same nonce, target and calldata at a higher fee. When a rebroadcast is
//! rejected, or escalation runs out, it clears the nonce with zero-value
//! self-transfers and reports [`ChainError::EscalationFailure`].

use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use tracing::{error, info, warn};

use crate::error::ChainError;
use crate::gas::GasParams;
use crate::scheduler::{PollPolicy, PollStep, Poller};
use crate::submitter::{PendingTransaction, Receipt, TransactionSubmitter, TxRequest};

/// Gas limit of a plain value transfer.
const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Escalation tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationConfig {
    pub enabled: bool,
    /// Empty poll cycles tolerated before a speed-up.
    pub speed_up_threshold: u32,
    /// Applied to the network gas price when computing a replacement fee.
    pub gas_multiplier: f64,
    /// Speed-ups before the transaction is abandoned.
    pub max_escalations: u32,
    /// Self-transfer rounds tried by drop-pending.
    pub drop_pending_attempts: u32,
    /// Nonce checks after each drop-pending self-transfer.
    pub drop_pending_wait_cycles: u32,
    /// Upper bound on poll cycles while escalation is disabled.
    pub max_wait_cycles: u32,
    pub poll_interval: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            speed_up_threshold: 10,
            gas_multiplier: 1.5,
            max_escalations: 5,
            drop_pending_attempts: 5,
            drop_pending_wait_cycles: 10,
            max_wait_cycles: 300,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Wraps a [`TransactionSubmitter`] with speed-up and drop-pending recovery.
#[derive(Debug, Clone)]
pub struct TransactionEscalator {
    submitter: TransactionSubmitter,
    config: EscalationConfig,
}

impl TransactionEscalator {
    pub fn new(submitter: TransactionSubmitter, config: EscalationConfig) -> Self {
        Self { submitter, config }
    }

    pub fn submitter(&self) -> &TransactionSubmitter {
        &self.submitter
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Submit `data` to `to` and drive it until a receipt is observed.
    pub async fn submit_and_confirm(&self, to: Address, data: Bytes) -> Result<Receipt, ChainError> {
        let pending = self.submitter.submit(to, data, None).await?;
        self.confirm(pending).await
    }

    /// Wait for `pending`, escalating as needed.
    pub async fn confirm(&self, mut pending: PendingTransaction) -> Result<Receipt, ChainError> {
        let scheduler = self.submitter.scheduler().clone();
        let mut poller = Poller::new(PollPolicy::new(self.config.poll_interval, None));
        let mut escalations = 0u32;

        loop {
            if let PollStep::Attempt(cycle) = poller.tick(scheduler.as_ref()).await {
                if let Some(receipt) = self.submitter.poll_once(&pending).await {
                    return self.submitter.check_status(receipt).await;
                }
                pending.cycles_waited += 1;

                if !self.config.enabled {
                    if cycle >= self.config.max_wait_cycles {
                        warn!(
                            tx_hash = %pending.hash,
                            nonce = pending.nonce,
                            cycles = cycle,
                            "Transaction still pending and escalation is disabled"
                        );
                        return Err(ChainError::Timeout {
                            operation: "confirm",
                            elapsed_ms: self.config.poll_interval.as_millis() * u128::from(cycle),
                        });
                    }
                    continue;
                }

                if pending.cycles_waited <= self.config.speed_up_threshold {
                    continue;
                }

                if escalations >= self.config.max_escalations {
                    let reason = format!("not mined after {escalations} speed-ups");
                    return self.abandon(pending, reason).await;
                }

                match self.speed_up(&mut pending).await {
                    Ok(()) => escalations += 1,
                    Err(e) => return self.abandon(pending, e.to_string()).await,
                }
            }
        }
    }

    /// Rebroadcast at the same nonce with escalated fees.
    async fn speed_up(&self, pending: &mut PendingTransaction) -> Result<(), ChainError> {
        let backend = self.submitter.backend();
        let network = match backend.network_gas_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!(error = %e, "eth_gasPrice failed, escalating from last price");
                pending.gas.effective_gas_price()
            }
        };
        let gas = pending.gas.escalate(network, self.config.gas_multiplier);
        let replacement = pending.replacement(gas.clone());

        let hash = backend.broadcast(&replacement).await?;

        info!(
            old_hash = %pending.hash,
            new_hash = %hash,
            nonce = pending.nonce,
            cycles_waited = pending.cycles_waited,
            old_gas_gwei = pending.gas.gwei(),
            new_gas_gwei = gas.gwei(),
            "Transaction sped up"
        );

        pending.superseded.push(pending.hash);
        pending.hash = hash;
        pending.gas = gas;
        pending.cycles_waited = 0;
        Ok(())
    }

    /// Give up on the payload and clear its nonce.
    async fn abandon(
        &self,
        pending: PendingTransaction,
        reason: String,
    ) -> Result<Receipt, ChainError> {
        // Any hash may have landed while the rebroadcast was being rejected.
        if let Some(receipt) = self.submitter.poll_once(&pending).await {
            return self.submitter.check_status(receipt).await;
        }

        warn!(
            tx_hash = %pending.hash,
            nonce = pending.nonce,
            reason = %reason,
            "Abandoning transaction, dropping pending nonce"
        );
        let nonce_cleared = self.drop_pending(&pending).await;

        if let Err(e) = self.submitter.backend().sync_nonce().await {
            warn!(error = %e, "Nonce sync failed after drop-pending");
        }

        // A cleared nonce may belong to the payload itself rather than the
        // self-transfer.
        if let Some(receipt) = self.submitter.poll_once(&pending).await {
            info!(
                tx_hash = %receipt.tx_hash,
                nonce = pending.nonce,
                "Payload mined during drop-pending"
            );
            return self.submitter.check_status(receipt).await;
        }

        error!(
            nonce = pending.nonce,
            nonce_cleared = nonce_cleared,
            hashes = pending.superseded.len() + 1,
            "Escalation failed"
        );

        Err(ChainError::EscalationFailure {
            nonce: pending.nonce,
            reason,
            nonce_cleared,
        })
    }

    /// Replace the stuck nonce with zero-value self-transfers at rising fees
    /// until the account's nonce moves past it or the pending pool is empty.
    pub async fn drop_pending(&self, pending: &PendingTransaction) -> bool {
        let backend = self.submitter.backend();
        let scheduler = self.submitter.scheduler();
        let mut gas: GasParams = pending.gas.clone();

        for attempt in 1..=self.config.drop_pending_attempts {
            let network = backend
                .network_gas_price()
                .await
                .unwrap_or_else(|_| gas.effective_gas_price());
            gas = gas.escalate(network, self.config.gas_multiplier);

            let transfer = TxRequest {
                to: backend.address(),
                data: Bytes::new(),
                value: U256::ZERO,
                nonce: pending.nonce,
                gas: gas.clone(),
                gas_limit: Some(TRANSFER_GAS_LIMIT),
            };

            match backend.broadcast(&transfer).await {
                Ok(hash) => info!(
                    tx_hash = %hash,
                    nonce = pending.nonce,
                    attempt = attempt,
                    gas_gwei = gas.gwei(),
                    "Drop-pending self-transfer sent"
                ),
                Err(e) => warn!(
                    nonce = pending.nonce,
                    attempt = attempt,
                    error = %e,
                    "Drop-pending self-transfer rejected"
                ),
            }

            let mut poller = Poller::new(PollPolicy::new(
                self.config.poll_interval,
                Some(self.config.drop_pending_wait_cycles.max(1)),
            ));
            while let PollStep::Attempt(_) = poller.tick(scheduler.as_ref()).await {
                match backend.nonces().await {
                    Ok(n) if n.confirmed > pending.nonce || n.pending == n.confirmed => {
                        info!(
                            nonce = pending.nonce,
                            confirmed = n.confirmed,
                            pending = n.pending,
                            "Pending nonce cleared"
                        );
                        return true;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Nonce query failed during drop-pending"),
                }
            }
        }

        false
    }
}
