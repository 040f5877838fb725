use alloy_provider::{DynProvider, ProviderBuilder, WsConnect};
use alloy_signer::k256::SecretKey;
use alloy_signer_local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use std::str::FromStr;

use crate::error::EvmClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvmEndpoint {
    WebSocket(reqwest::Url),
    Http(reqwest::Url),
}

impl FromStr for EvmEndpoint {
    type Err = EvmClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url =
            reqwest::Url::parse(s).map_err(|e| EvmClientError::ParseEndpoint(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(EvmEndpoint::WebSocket(url)),
            "http" | "https" => Ok(EvmEndpoint::Http(url)),
            scheme => Err(EvmClientError::ParseEndpoint(format!(
                "could not determine endpoint from scheme {scheme} (full url: {s})"
            ))),
        }
    }
}

impl std::fmt::Display for EvmEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvmEndpoint::WebSocket(url) => write!(f, "{}", url),
            EvmEndpoint::Http(url) => write!(f, "{}", url),
        }
    }
}

impl EvmEndpoint {
    pub fn is_websocket(&self) -> bool {
        matches!(self, EvmEndpoint::WebSocket(_))
    }

    /// Read-only provider
    pub async fn to_provider(&self) -> Result<DynProvider, EvmClientError> {
        Ok(match self {
            EvmEndpoint::WebSocket(url) => {
                let ws = WsConnect::new(url.clone());
                DynProvider::new(
                    ProviderBuilder::new()
                        .connect_ws(ws)
                        .await
                        .map_err(|e| EvmClientError::WebSocketProvider(e.into()))?,
                )
            }
            EvmEndpoint::Http(url) => {
                DynProvider::new(ProviderBuilder::new().connect_http(url.clone()))
            }
        })
    }

    /// Provider which signs and sends with `signer`
    pub async fn to_signing_provider(
        &self,
        signer: PrivateKeySigner,
    ) -> Result<DynProvider, EvmClientError> {
        let builder = ProviderBuilder::new().wallet(signer);

        Ok(match self {
            EvmEndpoint::WebSocket(url) => DynProvider::new(
                builder
                    .connect_ws(WsConnect::new(url.clone()))
                    .await
                    .map_err(|e| EvmClientError::WebSocketProvider(e.into()))?,
            ),
            EvmEndpoint::Http(url) => DynProvider::new(builder.connect_http(url.clone())),
        })
    }
}

/// `0x`-prefixed strings are raw private keys, anything else is a mnemonic
pub fn make_signer(
    credential: &str,
    hd_index: Option<u32>,
) -> Result<PrivateKeySigner, EvmClientError> {
    let hd_index = hd_index.unwrap_or_default();

    match credential.strip_prefix("0x") {
        Some(stripped) => {
            if hd_index > 0 {
                return Err(EvmClientError::DerivationWithPrivateKey);
            }
            let private_key = const_hex::decode(stripped)
                .map_err(|e| EvmClientError::PrivateKey(e.to_string()))?;
            let secret_key = SecretKey::from_slice(&private_key)
                .map_err(|e| EvmClientError::PrivateKey(e.to_string()))?;
            Ok(PrivateKeySigner::from_signing_key(secret_key.into()))
        }
        None => MnemonicBuilder::<English>::default()
            .phrase(credential)
            .index(hd_index)
            .map_err(|e| EvmClientError::Mnemonic(e.into()))?
            .build()
            .map_err(|e| EvmClientError::Mnemonic(e.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_scheme_detection() {
        assert!("ws://localhost:8545"
            .parse::<EvmEndpoint>()
            .unwrap()
            .is_websocket());
        assert!(!"https://rpc.example.org"
            .parse::<EvmEndpoint>()
            .unwrap()
            .is_websocket());
        assert!("ftp://example.org".parse::<EvmEndpoint>().is_err());
    }

    #[test]
    fn signer_from_mnemonic_and_private_key() {
        let mnemonic = "test test test test test test test test test test test junk";
        let from_mnemonic = make_signer(mnemonic, None).unwrap();

        // first anvil account
        assert_eq!(
            from_mnemonic.address().to_string().to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );

        let from_key = make_signer(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            None,
        )
        .unwrap();
        assert_eq!(from_key.address(), from_mnemonic.address());

        assert!(matches!(
            make_signer(
                "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
                Some(1)
            ),
            Err(EvmClientError::DerivationWithPrivateKey)
        ));
    }
}
