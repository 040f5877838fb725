use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;

use crate::apis::{KeyStore, KeyStoreError};

/// Keys held in process, derived from the configured credential
#[derive(Debug, Clone, Default)]
pub struct LocalKeyStore {
    addresses: Vec<Address>,
}

impl LocalKeyStore {
    pub fn new(signers: &[PrivateKeySigner]) -> Self {
        Self {
            addresses: signers.iter().map(|signer| signer.address()).collect(),
        }
    }
}

#[async_trait]
impl KeyStore for LocalKeyStore {
    async fn sending_keys(&self) -> Result<Vec<Address>, KeyStoreError> {
        Ok(self.addresses.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exposes_signer_addresses_in_order() {
        let first = PrivateKeySigner::random();
        let second = PrivateKeySigner::random();
        let store = LocalKeyStore::new(&[first.clone(), second.clone()]);

        assert_eq!(
            store.sending_keys().await.unwrap(),
            vec![first.address(), second.address()]
        );
        assert!(LocalKeyStore::default().sending_keys().await.unwrap().is_empty());
    }
}
