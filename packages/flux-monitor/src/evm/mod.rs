// EVM-backed implementations of the coordinator's seams

pub mod bindings;
pub mod contracts;
pub mod keystore;
pub mod log_stream;
pub mod tx_queue;

pub use contracts::{EvmFlags, EvmFluxAggregator};
pub use keystore::LocalKeyStore;
pub use log_stream::EvmLogStream;
pub use tx_queue::EvmTransactionQueue;
