//! Node-backed covenant compilation.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use flash_core::address::{Address, Network};
use flash_core::error::CompileError;
use flash_core::traits::CovenantCompiler;

/// [`CovenantCompiler`] calling the node's `POST /script/p2sAddress`.
pub struct NodeCompiler {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CompileRequest<'a> {
    source: &'a str,
}

#[derive(Deserialize)]
struct CompileResponse {
    address: String,
}

impl NodeCompiler {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CovenantCompiler for NodeCompiler {
    async fn compile(&self, source: &str, network: Network) -> Result<Address, CompileError> {
        let url = format!("{}/script/p2sAddress", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&CompileRequest { source })
            .send()
            .await
            .map_err(|e| CompileError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CompileError::Unavailable(e.to_string()))?;
        let address = parse_response(status, &body, network)?;
        debug!(%address, "node compiled script");
        Ok(address)
    }
}

/// Map a node reply to a compiled address.
///
/// 4xx means the node refused the source; any other non-success status or
/// an unreadable body means it could not compile. The node answers for its
/// own network, so an address for another network is an error.
fn parse_response(status: StatusCode, body: &str, network: Network) -> Result<Address, CompileError> {
    if status.is_client_error() {
        return Err(CompileError::Rejected(format!("{status}: {body}")));
    }
    if !status.is_success() {
        return Err(CompileError::Unavailable(format!("node returned {status}")));
    }
    let reply: CompileResponse = serde_json::from_str(body)
        .map_err(|e| CompileError::Unavailable(format!("bad response: {e}")))?;
    Ok(Address::decode_for(&reply.address, network)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flash_core::error::AddressError;
    use flash_core::types::ErgoTree;

    fn encoded(network: Network) -> String {
        Address::p2s(ErgoTree(vec![0x10, 0x01, 0x0e, 0x20]), network).encode()
    }

    #[test]
    fn success_decodes_address() {
        let body = format!(r#"{{"address": "{}"}}"#, encoded(Network::Mainnet));
        let address = parse_response(StatusCode::OK, &body, Network::Mainnet).unwrap();
        assert_eq!(address.to_string(), encoded(Network::Mainnet));
        assert_eq!(address.network(), Network::Mainnet);
    }

    #[test]
    fn client_error_is_rejected() {
        let err = parse_response(StatusCode::BAD_REQUEST, "syntax error", Network::Mainnet).unwrap_err();
        assert!(matches!(err, CompileError::Rejected(ref m) if m.contains("syntax error")));
    }

    #[test]
    fn server_error_is_unavailable() {
        for status in [StatusCode::INTERNAL_SERVER_ERROR, StatusCode::SERVICE_UNAVAILABLE] {
            let err = parse_response(status, "", Network::Mainnet).unwrap_err();
            assert!(matches!(err, CompileError::Unavailable(_)));
        }
    }

    #[test]
    fn malformed_body_is_unavailable() {
        let err = parse_response(StatusCode::OK, "{}", Network::Mainnet).unwrap_err();
        assert!(matches!(err, CompileError::Unavailable(_)));
    }

    #[test]
    fn wrong_network_address_is_error() {
        let body = format!(r#"{{"address": "{}"}}"#, encoded(Network::Testnet));
        let err = parse_response(StatusCode::OK, &body, Network::Mainnet).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Address(AddressError::NetworkMismatch { .. })
        ));
    }
}
