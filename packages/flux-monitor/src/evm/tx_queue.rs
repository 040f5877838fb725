use alloy_network::ReceiptResponse as _;
use alloy_primitives::{Address, I256, U256};
use alloy_provider::DynProvider;
use async_trait::async_trait;
use flux_types::RoundId;
use tokio::sync::mpsc;
use tracing::instrument;

use super::bindings::IFluxAggregator;
use crate::apis::{TransactionQueue, TxQueueError};

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedSubmission {
    aggregator: Address,
    round_id: RoundId,
    answer: I256,
}

/// Accepts submissions into a bounded queue and sends them one at a time from
/// a background task, so the coordinator never waits on the chain
#[derive(Clone)]
pub struct EvmTransactionQueue {
    sender: mpsc::Sender<QueuedSubmission>,
}

impl EvmTransactionQueue {
    pub const CAPACITY: usize = 64;

    /// `provider` must sign with the oracle key
    pub fn spawn(
        provider: DynProvider,
        gas_limit: u64,
        mut kill_receiver: tokio::sync::broadcast::Receiver<()>,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<QueuedSubmission>(Self::CAPACITY);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = kill_receiver.recv() => {
                        tracing::debug!("Transaction queue shutting down");
                        break;
                    }
                    submission = receiver.recv() => {
                        match submission {
                            Some(submission) => send(&provider, gas_limit, submission).await,
                            None => break,
                        }
                    }
                }
            }
        });

        Self { sender }
    }
}

#[instrument(skip(provider), fields(subsys = "TxQueue"))]
async fn send(provider: &DynProvider, gas_limit: u64, submission: QueuedSubmission) {
    let contract = IFluxAggregator::new(submission.aggregator, provider.clone());

    let pending = contract
        .submit(U256::from(submission.round_id), submission.answer)
        .gas(gas_limit)
        .send()
        .await;

    match pending {
        Ok(pending) => {
            let tx_hash = *pending.tx_hash();
            match pending.get_receipt().await {
                Ok(receipt) if receipt.status() => {
                    tracing::info!(%tx_hash, "Submission confirmed");
                }
                Ok(_) => tracing::error!(%tx_hash, "Submission reverted"),
                Err(err) => tracing::error!(%tx_hash, "Unable to get submission receipt: {}", err),
            }
        }
        Err(err) => tracing::error!("Unable to send submission: {}", err),
    }
}

#[async_trait]
impl TransactionQueue for EvmTransactionQueue {
    async fn submit(
        &self,
        aggregator: Address,
        round_id: RoundId,
        answer: I256,
    ) -> Result<(), TxQueueError> {
        self.sender
            .try_send(QueuedSubmission {
                aggregator,
                round_id,
                answer,
            })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => {
                    TxQueueError::Rejected(format!("queue is full ({} pending)", Self::CAPACITY))
                }
                mpsc::error::TrySendError::Closed(_) => TxQueueError::Closed,
            })
    }
}
