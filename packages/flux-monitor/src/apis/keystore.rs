use alloy_primitives::Address;
use async_trait::async_trait;
use thiserror::Error;

#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Addresses this node may sign submissions with
    async fn sending_keys(&self) -> Result<Vec<Address>, KeyStoreError>;
}

#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("key store unavailable: {0:?}")]
    Unavailable(anyhow::Error),
}
