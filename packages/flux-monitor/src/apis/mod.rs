// Seams between the coordinator and everything it talks to.
//
// The coordinator only ever holds `Arc<dyn ...>` handles to these, so the
// binary wires in the EVM and in-memory implementations while the tests wire
// in the mocks from `test_utils`.

pub mod contract;
pub mod keystore;
pub mod log_broadcaster;
pub mod pipeline;
pub mod store;
pub mod tx_queue;

pub use contract::{ContractError, FlagsContract, FluxAggregator};
pub use keystore::{KeyStore, KeyStoreError};
pub use log_broadcaster::{ListenerOpts, LogBroadcaster, LogSourceError};
pub use pipeline::{PipelineError, PipelineRunner};
pub use store::{PendingSubmission, RoundStatsStore, StoreError};
pub use tx_queue::{TransactionQueue, TxQueueError};
