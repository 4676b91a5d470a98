use std::{
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use serde::Deserialize;
use serde_json::{
    Value,
    json,
};

const USER_REJECTED: i64 = 4001;
const UNRECOGNIZED_CHAIN: i64 = 4902;

#[derive(Clone, Copy, Debug)]
pub struct ChainDescriptor {
    pub chain_id: &'static str,
    pub chain_name: &'static str,
    pub currency_name: &'static str,
    pub currency_symbol: &'static str,
    pub currency_decimals: u8,
    pub rpc_urls: &'static [&'static str],
    pub block_explorer_urls: &'static [&'static str],
}

// Official chain id 420420422; see the Polkadot smart-contract network table.
pub const POLKADOT_HUB_TESTNET: ChainDescriptor = ChainDescriptor {
    chain_id: "0x19191916",
    chain_name: "Polkadot Hub TestNet",
    currency_name: "PAS",
    currency_symbol: "PAS",
    currency_decimals: 18,
    rpc_urls: &["https://testnet-passet-hub-eth-rpc.polkadot.io"],
    block_explorer_urls: &["https://blockscout-passet-hub.parity-testnet.parity.io/"],
};

// Some providers refuse the hub chain outright; Goerli is the compatibility
// escape hatch.
pub const FALLBACK_TESTNET: ChainDescriptor = ChainDescriptor {
    chain_id: "0x5",
    chain_name: "Goerli Test Network",
    currency_name: "GoerliETH",
    currency_symbol: "GoerliETH",
    currency_decimals: 18,
    rpc_urls: &["https://goerli.infura.io/v3/"],
    block_explorer_urls: &["https://goerli.etherscan.io/"],
};

impl ChainDescriptor {
    fn add_chain_params(&self) -> Value {
        json!({
            "chainId": self.chain_id,
            "chainName": self.chain_name,
            "nativeCurrency": {
                "name": self.currency_name,
                "symbol": self.currency_symbol,
                "decimals": self.currency_decimals,
            },
            "rpcUrls": self.rpc_urls,
            "blockExplorerUrls": self.block_explorer_urls,
        })
    }
}

#[derive(Debug)]
pub enum WalletError {
    Absent,
    Rejected,
    UnrecognizedChain,
    Rpc { code: i64, message: String },
    Transport(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletError::Absent => write!(f, "no wallet provider available"),
            WalletError::Rejected => write!(f, "request rejected by user"),
            WalletError::UnrecognizedChain => {
                write!(f, "chain not recognized by provider")
            }
            WalletError::Rpc { code, message } => {
                write!(f, "provider error {code}: {message}")
            }
            WalletError::Transport(msg) => write!(f, "provider unreachable: {msg}"),
        }
    }
}

impl std::error::Error for WalletError {}

impl WalletError {
    fn from_rpc(code: i64, message: String) -> Self {
        match code {
            USER_REJECTED => WalletError::Rejected,
            UNRECOGNIZED_CHAIN => WalletError::UnrecognizedChain,
            _ => WalletError::Rpc { code, message },
        }
    }
}

/// The external wallet the player may or may not have running. Absence is a
/// first-class implementation (`NoProvider`), not a scattering of existence
/// checks at call sites.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn available(&self) -> bool;
    /// Accounts already exposed without prompting (startup probe).
    async fn accounts(&self) -> Result<Vec<String>, WalletError>;
    /// Prompts the user to expose accounts.
    async fn request_accounts(&self) -> Result<Vec<String>, WalletError>;
    async fn chain_id(&self) -> Result<String, WalletError>;
    async fn switch_chain(&self, chain_id: &str) -> Result<(), WalletError>;
    async fn add_chain(&self, chain: &ChainDescriptor) -> Result<(), WalletError>;
    /// Balance in the chain's smallest unit.
    async fn balance(&self, address: &str) -> Result<u128, WalletError>;
    async fn personal_sign(
        &self,
        message: &str,
        address: &str,
    ) -> Result<String, WalletError>;
}

pub struct NoProvider;

#[async_trait]
impl WalletProvider for NoProvider {
    fn available(&self) -> bool {
        false
    }

    async fn accounts(&self) -> Result<Vec<String>, WalletError> {
        Err(WalletError::Absent)
    }

    async fn request_accounts(&self) -> Result<Vec<String>, WalletError> {
        Err(WalletError::Absent)
    }

    async fn chain_id(&self) -> Result<String, WalletError> {
        Err(WalletError::Absent)
    }

    async fn switch_chain(&self, _chain_id: &str) -> Result<(), WalletError> {
        Err(WalletError::Absent)
    }

    async fn add_chain(&self, _chain: &ChainDescriptor) -> Result<(), WalletError> {
        Err(WalletError::Absent)
    }

    async fn balance(&self, _address: &str) -> Result<u128, WalletError> {
        Err(WalletError::Absent)
    }

    async fn personal_sign(
        &self,
        _message: &str,
        _address: &str,
    ) -> Result<String, WalletError> {
        Err(WalletError::Absent)
    }
}

/// Ethereum-style JSON-RPC wallet endpoint.
pub struct RpcWalletProvider {
    endpoint: String,
    http: reqwest::Client,
}

impl RpcWalletProvider {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .wrap_err("failed to build HTTP client for wallet provider")?;
        Ok(Self {
            endpoint: endpoint.into(),
            http,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        #[derive(Deserialize)]
        struct RpcError {
            code: i64,
            message: String,
        }
        #[derive(Deserialize)]
        struct RpcResponse {
            result: Option<Value>,
            error: Option<RpcError>,
        }

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let res = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| WalletError::Transport(e.to_string()))?;
        let response: RpcResponse = res
            .json()
            .await
            .map_err(|e| WalletError::Transport(e.to_string()))?;
        if let Some(err) = response.error {
            return Err(WalletError::from_rpc(err.code, err.message));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn string_list(&self, method: &str) -> Result<Vec<String>, WalletError> {
        let value = self.call(method, json!([])).await?;
        serde_json::from_value(value)
            .map_err(|e| WalletError::Transport(format!("bad account list: {e}")))
    }
}

#[async_trait]
impl WalletProvider for RpcWalletProvider {
    fn available(&self) -> bool {
        true
    }

    async fn accounts(&self) -> Result<Vec<String>, WalletError> {
        self.string_list("eth_accounts").await
    }

    async fn request_accounts(&self) -> Result<Vec<String>, WalletError> {
        self.string_list("eth_requestAccounts").await
    }

    async fn chain_id(&self) -> Result<String, WalletError> {
        let value = self.call("eth_chainId", json!([])).await?;
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| WalletError::Transport("chain id was not a string".into()))
    }

    async fn switch_chain(&self, chain_id: &str) -> Result<(), WalletError> {
        self.call(
            "wallet_switchEthereumChain",
            json!([{ "chainId": chain_id }]),
        )
        .await
        .map(|_| ())
    }

    async fn add_chain(&self, chain: &ChainDescriptor) -> Result<(), WalletError> {
        self.call("wallet_addEthereumChain", json!([chain.add_chain_params()]))
            .await
            .map(|_| ())
    }

    async fn balance(&self, address: &str) -> Result<u128, WalletError> {
        let value = self
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        let hex_value = value
            .as_str()
            .ok_or_else(|| WalletError::Transport("balance was not a string".into()))?;
        u128::from_str_radix(hex_value.trim_start_matches("0x"), 16)
            .map_err(|e| WalletError::Transport(format!("bad balance {hex_value}: {e}")))
    }

    async fn personal_sign(
        &self,
        message: &str,
        address: &str,
    ) -> Result<String, WalletError> {
        let value = self
            .call("personal_sign", json!([message, address]))
            .await?;
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| WalletError::Transport("signature was not a string".into()))
    }
}

impl fmt::Display for RpcWalletProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint)
    }
}

pub fn detect_provider(endpoint: Option<&str>) -> Result<Arc<dyn WalletProvider>> {
    match endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint, "wallet provider configured");
            Ok(Arc::new(RpcWalletProvider::new(endpoint)?))
        }
        None => {
            tracing::info!("no wallet provider configured; wallet features disabled");
            Ok(Arc::new(NoProvider))
        }
    }
}

/// Connection state handed to the UI; replaces ambient connected/address
/// globals.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WalletConnection {
    pub address: Option<String>,
    pub balance: Option<f64>,
}

impl WalletConnection {
    pub fn connected(&self) -> bool {
        self.address.is_some()
    }

    pub fn short_address(&self) -> Option<String> {
        self.address.as_ref().map(|addr| {
            if addr.len() > 10 {
                format!("{}...{}", &addr[..6], &addr[addr.len() - 4..])
            } else {
                addr.clone()
            }
        })
    }
}

pub fn to_native_units(smallest: u128, decimals: u8) -> f64 {
    smallest as f64 / 10f64.powi(decimals as i32)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkOutcome {
    OnTarget,
    AddedTarget,
    FellBack,
}

/// Moves the provider onto the target chain, adding it when unknown, and
/// dropping to the fallback descriptor when the target cannot be added.
pub async fn ensure_network(
    provider: &dyn WalletProvider,
) -> Result<NetworkOutcome, WalletError> {
    let current = provider.chain_id().await?;
    if current == POLKADOT_HUB_TESTNET.chain_id {
        return Ok(NetworkOutcome::OnTarget);
    }
    match provider.switch_chain(POLKADOT_HUB_TESTNET.chain_id).await {
        Ok(()) => Ok(NetworkOutcome::OnTarget),
        Err(WalletError::UnrecognizedChain) => {
            match provider.add_chain(&POLKADOT_HUB_TESTNET).await {
                Ok(()) => Ok(NetworkOutcome::AddedTarget),
                Err(err) => {
                    tracing::warn!(%err, "target chain rejected; adding fallback");
                    provider.add_chain(&FALLBACK_TESTNET).await?;
                    Ok(NetworkOutcome::FellBack)
                }
            }
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use std::sync::Mutex;

    struct FakeProvider {
        chain: &'static str,
        switch_result: Result<(), i64>,
        add_target_result: Result<(), i64>,
        add_fallback_result: Result<(), i64>,
        added: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn on_chain(chain: &'static str) -> Self {
            FakeProvider {
                chain,
                switch_result: Ok(()),
                add_target_result: Ok(()),
                add_fallback_result: Ok(()),
                added: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl WalletProvider for FakeProvider {
        fn available(&self) -> bool {
            true
        }

        async fn accounts(&self) -> Result<Vec<String>, WalletError> {
            Ok(vec![])
        }

        async fn request_accounts(&self) -> Result<Vec<String>, WalletError> {
            Ok(vec!["0xabc".into()])
        }

        async fn chain_id(&self) -> Result<String, WalletError> {
            Ok(self.chain.to_string())
        }

        async fn switch_chain(&self, _chain_id: &str) -> Result<(), WalletError> {
            self.switch_result
                .map_err(|code| WalletError::from_rpc(code, "switch failed".into()))
        }

        async fn add_chain(&self, chain: &ChainDescriptor) -> Result<(), WalletError> {
            let result = if chain.chain_id == POLKADOT_HUB_TESTNET.chain_id {
                self.add_target_result
            } else {
                self.add_fallback_result
            };
            result
                .map(|_| {
                    self.added.lock().unwrap().push(chain.chain_id.to_string());
                })
                .map_err(|code| WalletError::from_rpc(code, "add failed".into()))
        }

        async fn balance(&self, _address: &str) -> Result<u128, WalletError> {
            Ok(0)
        }

        async fn personal_sign(
            &self,
            _message: &str,
            _address: &str,
        ) -> Result<String, WalletError> {
            Ok("0xsig".into())
        }
    }

    #[tokio::test]
    async fn ensure_network__already_on_target_is_a_noop() {
        let provider = FakeProvider::on_chain(POLKADOT_HUB_TESTNET.chain_id);
        let outcome = ensure_network(&provider).await.unwrap();
        assert_eq!(outcome, NetworkOutcome::OnTarget);
        assert!(provider.added.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ensure_network__switches_when_on_another_chain() {
        let provider = FakeProvider::on_chain("0x1");
        let outcome = ensure_network(&provider).await.unwrap();
        assert_eq!(outcome, NetworkOutcome::OnTarget);
    }

    #[tokio::test]
    async fn ensure_network__adds_target_chain_when_unrecognized() {
        let mut provider = FakeProvider::on_chain("0x1");
        provider.switch_result = Err(UNRECOGNIZED_CHAIN);
        let outcome = ensure_network(&provider).await.unwrap();
        assert_eq!(outcome, NetworkOutcome::AddedTarget);
        assert_eq!(
            provider.added.lock().unwrap().as_slice(),
            [POLKADOT_HUB_TESTNET.chain_id]
        );
    }

    #[tokio::test]
    async fn ensure_network__falls_back_when_target_cannot_be_added() {
        let mut provider = FakeProvider::on_chain("0x1");
        provider.switch_result = Err(UNRECOGNIZED_CHAIN);
        provider.add_target_result = Err(-32603);
        let outcome = ensure_network(&provider).await.unwrap();
        assert_eq!(outcome, NetworkOutcome::FellBack);
        assert_eq!(
            provider.added.lock().unwrap().as_slice(),
            [FALLBACK_TESTNET.chain_id]
        );
    }

    #[tokio::test]
    async fn ensure_network__user_rejection_propagates() {
        let mut provider = FakeProvider::on_chain("0x1");
        provider.switch_result = Err(USER_REJECTED);
        let err = ensure_network(&provider).await.unwrap_err();
        assert!(matches!(err, WalletError::Rejected));
    }

    #[test]
    fn to_native_units__converts_with_decimals() {
        assert_eq!(to_native_units(1_000_000_000_000_000_000, 18), 1.0);
        assert_eq!(to_native_units(500_000_000_000_000_000, 18), 0.5);
    }

    #[test]
    fn short_address__elides_the_middle() {
        let connection = WalletConnection {
            address: Some("0x1234567890abcdef1234567890abcdef12345678".into()),
            balance: None,
        };
        assert_eq!(connection.short_address().unwrap(), "0x1234...5678");
    }
}
