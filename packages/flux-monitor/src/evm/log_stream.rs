use std::{pin::Pin, time::Duration};

use alloy_primitives::{Address, U256};
use alloy_provider::{DynProvider, Provider};
use alloy_rpc_types_eth::{Filter, Log};
use alloy_sol_types::SolEvent;
use flux_types::{AnswerUpdatedLog, FlagLog, FluxLog, LogBroadcast, LogId, NewRoundLog, RoundId};
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tracing::instrument;

use super::bindings::{IFlags, IFluxAggregator};
use crate::{apis::LogSourceError, store::MemoryLogBroadcaster};

const MIN_RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(10_000);

enum StreamEvent {
    Subscribed,
    Log(Box<Log>),
    Dropped(LogSourceError),
}

/// Feeds contract logs from a websocket subscription into the in-process broadcaster.
///
/// The broadcaster is marked disconnected whenever the subscription is down,
/// and connected again once resubscribed. After a resubscription the logs since
/// the last seen block are fetched again.
pub struct EvmLogStream {
    provider: DynProvider,
    contracts: Vec<Address>,
    broadcaster: MemoryLogBroadcaster,
}

impl EvmLogStream {
    pub fn new(
        provider: DynProvider,
        contracts: Vec<Address>,
        broadcaster: MemoryLogBroadcaster,
    ) -> Self {
        Self {
            provider,
            contracts,
            broadcaster,
        }
    }

    fn filter(&self) -> Filter {
        Filter::new().address(self.contracts.clone()).event_signature(vec![
            IFluxAggregator::NewRound::SIGNATURE_HASH,
            IFluxAggregator::AnswerUpdated::SIGNATURE_HASH,
            IFlags::FlagRaised::SIGNATURE_HASH,
            IFlags::FlagLowered::SIGNATURE_HASH,
        ])
    }

    fn subscribe(&self) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send>> {
        let provider = self.provider.clone();
        let filter = self.filter();

        let stream = async_stream::stream! {
            let mut backoff = MIN_RESUBSCRIBE_BACKOFF;
            loop {
                tracing::info!("Subscribing to logs with filter: {:?}", filter);
                match provider.subscribe_logs(&filter).await {
                    Ok(sub) => {
                        backoff = MIN_RESUBSCRIBE_BACKOFF;
                        yield StreamEvent::Subscribed;

                        let mut inner = sub.into_stream();
                        while let Some(log) = inner.next().await {
                            yield StreamEvent::Log(Box::new(log));
                        }

                        tracing::warn!("Log subscription ended; reconnecting...");
                        yield StreamEvent::Dropped(LogSourceError::Subscription(anyhow::anyhow!(
                            "log subscription ended"
                        )));
                    }
                    Err(e) => {
                        tracing::error!("subscribe_logs error: {:?}", e);
                        yield StreamEvent::Dropped(LogSourceError::Subscription(e.into()));
                    }
                }

                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2).min(MAX_RESUBSCRIBE_BACKOFF);
            }
        };

        Box::pin(stream)
    }

    /// Fetches everything from `from_block` on, publishing is idempotent for consumed logs
    async fn backfill(&self, from_block: u64) -> Option<u64> {
        let filter = self.filter().from_block(from_block);
        match self.provider.get_logs(&filter).await {
            Ok(logs) => {
                tracing::info!(from_block, count = logs.len(), "backfilled logs after resubscribing");
                logs.iter().filter_map(|log| self.publish(log)).max()
            }
            Err(err) => {
                tracing::error!(from_block, "unable to backfill logs: {:?}", err);
                None
            }
        }
    }

    /// Returns the block number of the published log
    fn publish(&self, log: &Log) -> Option<u64> {
        match decode_log(log) {
            Some(broadcast) => {
                let block_number = broadcast.id.block_number;
                let delivered = self.broadcaster.publish(broadcast);
                tracing::debug!(delivered, block_number, "published log");
                Some(block_number)
            }
            None => {
                tracing::debug!("Dropping unusable log: {:?}", log);
                None
            }
        }
    }

    /// Runs until killed
    #[instrument(skip_all, fields(subsys = "LogStream"))]
    pub async fn run(self, mut kill_receiver: broadcast::Receiver<()>) {
        let mut events = self.subscribe();
        let mut last_block: Option<u64> = None;

        loop {
            tokio::select! {
                biased;
                _ = kill_receiver.recv() => {
                    tracing::info!("Log stream received shutdown signal");
                    break;
                }
                event = events.next() => {
                    match event {
                        Some(StreamEvent::Subscribed) => {
                            if let Some(from_block) = last_block {
                                if let Some(seen) = self.backfill(from_block).await {
                                    last_block = Some(seen.max(from_block));
                                }
                            }
                            self.broadcaster.set_connected(true);
                        }
                        Some(StreamEvent::Dropped(err)) => {
                            tracing::warn!("Log source disconnected: {}", err);
                            self.broadcaster.set_connected(false);
                        }
                        Some(StreamEvent::Log(log)) => {
                            if let Some(block_number) = self.publish(&log) {
                                last_block = Some(last_block.map_or(block_number, |last| last.max(block_number)));
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        self.broadcaster.set_connected(false);
    }
}

fn to_round_id(value: U256) -> Option<RoundId> {
    RoundId::try_from(value).ok()
}

/// Turns a raw log into a broadcast, `None` for removed, incomplete or unknown logs
pub fn decode_log(log: &Log) -> Option<LogBroadcast> {
    if log.removed {
        return None;
    }

    let id = LogId {
        block_hash: log.block_hash?,
        block_number: log.block_number?,
        log_index: log.log_index?,
    };

    let flux_log = match *log.topic0()? {
        IFluxAggregator::NewRound::SIGNATURE_HASH => {
            let event = IFluxAggregator::NewRound::decode_log_data(log.data()).ok()?;
            FluxLog::NewRound(NewRoundLog {
                round_id: to_round_id(event.roundId)?,
                started_by: event.startedBy,
                started_at: u64::try_from(event.startedAt).ok()?,
            })
        }
        IFluxAggregator::AnswerUpdated::SIGNATURE_HASH => {
            let event = IFluxAggregator::AnswerUpdated::decode_log_data(log.data()).ok()?;
            FluxLog::AnswerUpdated(AnswerUpdatedLog {
                current: event.current,
                round_id: to_round_id(event.roundId)?,
                updated_at: u64::try_from(event.updatedAt).ok()?,
            })
        }
        IFlags::FlagRaised::SIGNATURE_HASH => {
            let event = IFlags::FlagRaised::decode_log_data(log.data()).ok()?;
            FluxLog::FlagRaised(FlagLog {
                subject: event.subject,
            })
        }
        IFlags::FlagLowered::SIGNATURE_HASH => {
            let event = IFlags::FlagLowered::decode_log_data(log.data()).ok()?;
            FluxLog::FlagLowered(FlagLog {
                subject: event.subject,
            })
        }
        _ => return None,
    };

    Some(LogBroadcast {
        id,
        contract: log.address(),
        log: flux_log,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, I256};

    fn rpc_log(address: Address, data: alloy_primitives::LogData) -> Log {
        Log {
            inner: alloy_primitives::Log { address, data },
            block_hash: Some(B256::repeat_byte(1)),
            block_number: Some(10),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(2)),
            transaction_index: Some(0),
            log_index: Some(3),
            removed: false,
        }
    }

    #[test]
    fn decodes_new_round() {
        let aggregator = Address::repeat_byte(0xaa);
        let event = IFluxAggregator::NewRound {
            roundId: U256::from(5),
            startedBy: Address::repeat_byte(0x01),
            startedAt: U256::from(1_700_000_000u64),
        };
        let log = rpc_log(aggregator, event.encode_log_data());

        let broadcast = decode_log(&log).unwrap();
        assert_eq!(broadcast.contract, aggregator);
        assert_eq!(broadcast.id.block_number, 10);
        assert_eq!(broadcast.id.log_index, 3);
        assert_eq!(
            broadcast.log,
            FluxLog::NewRound(NewRoundLog {
                round_id: 5,
                started_by: Address::repeat_byte(0x01),
                started_at: 1_700_000_000,
            })
        );
    }

    #[test]
    fn decodes_answer_updated_and_flags() {
        let event = IFluxAggregator::AnswerUpdated {
            current: I256::try_from(-42i64).unwrap(),
            roundId: U256::from(9),
            updatedAt: U256::from(100),
        };
        let broadcast = decode_log(&rpc_log(Address::ZERO, event.encode_log_data())).unwrap();
        assert_eq!(
            broadcast.log,
            FluxLog::AnswerUpdated(AnswerUpdatedLog {
                current: I256::try_from(-42i64).unwrap(),
                round_id: 9,
                updated_at: 100,
            })
        );

        let subject = Address::repeat_byte(0xbb);
        let raised = IFlags::FlagRaised { subject }.encode_log_data();
        let lowered = IFlags::FlagLowered { subject }.encode_log_data();
        assert_eq!(
            decode_log(&rpc_log(Address::ZERO, raised)).unwrap().log,
            FluxLog::FlagRaised(FlagLog { subject })
        );
        assert_eq!(
            decode_log(&rpc_log(Address::ZERO, lowered)).unwrap().log,
            FluxLog::FlagLowered(FlagLog { subject })
        );
    }

    #[test]
    fn drops_removed_incomplete_and_oversized_logs() {
        let event = IFluxAggregator::NewRound {
            roundId: U256::from(1),
            startedBy: Address::ZERO,
            startedAt: U256::ZERO,
        };

        let mut removed = rpc_log(Address::ZERO, event.encode_log_data());
        removed.removed = true;
        assert!(decode_log(&removed).is_none());

        let mut pending = rpc_log(Address::ZERO, event.encode_log_data());
        pending.block_hash = None;
        assert!(decode_log(&pending).is_none());

        let oversized = IFluxAggregator::NewRound {
            roundId: U256::from(u64::from(u32::MAX) + 1),
            ..event
        };
        assert!(decode_log(&rpc_log(Address::ZERO, oversized.encode_log_data())).is_none());
    }
}
