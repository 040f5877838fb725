#![allow(clippy::uninlined_format_args)]

pub mod async_transaction;
pub mod config;
pub mod context;
pub mod error;
pub mod evm_client;
pub mod serde;
pub mod storage;
pub mod telemetry;
