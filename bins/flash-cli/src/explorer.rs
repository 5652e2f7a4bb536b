//! Explorer-backed chain data.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use flash_core::address::Address;
use flash_core::error::NetworkError;
use flash_core::register;
use flash_core::traits::ChainDataProvider;
use flash_core::types::{Digest32, ErgoTree, RegisterId, Registers, Token, UnspentBox};

/// Boxes requested per page.
const PAGE_LIMIT: usize = 100;

/// [`ChainDataProvider`] over the explorer REST API.
pub struct ExplorerClient {
    http: reqwest::Client,
    base_url: String,
}

impl ExplorerClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, NetworkError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| NetworkError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status(status.as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| NetworkError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ChainDataProvider for ExplorerClient {
    async fn fetch_unspent_boxes(&self, address: &Address) -> Result<Vec<UnspentBox>, NetworkError> {
        let mut boxes = Vec::new();
        let mut offset = 0usize;
        loop {
            let url = format!(
                "{}/api/v1/boxes/unspent/byAddress/{address}?offset={offset}&limit={PAGE_LIMIT}",
                self.base_url
            );
            let page: Page<ExplorerBox> = self.get(&url).await?;
            let count = page.items.len();
            for item in page.items {
                boxes.push(item.into_box()?);
            }
            offset += count;
            debug!(%address, fetched = offset, total = ?page.total, "explorer page");
            if count < PAGE_LIMIT || page.total.is_some_and(|t| offset >= t) {
                break;
            }
        }
        Ok(boxes)
    }

    async fn fetch_latest_height(&self) -> Result<u32, NetworkError> {
        let url = format!("{}/api/v1/blocks?limit=1", self.base_url);
        let page: Page<BlockSummary> = self.get(&url).await?;
        page.items
            .first()
            .map(|b| b.height)
            .ok_or_else(|| NetworkError::InvalidResponse("no blocks returned".into()))
    }
}

// ------------------------------------------------------------------
// Wire model
// ------------------------------------------------------------------

#[derive(Deserialize)]
struct Page<T> {
    items: Vec<T>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Deserialize)]
struct BlockSummary {
    height: u32,
}

/// Integers arrive as JSON numbers or as decimal strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Amount {
    Number(u64),
    Text(String),
}

impl Amount {
    fn get(&self) -> Result<u64, NetworkError> {
        match self {
            Amount::Number(n) => Ok(*n),
            Amount::Text(s) => s
                .parse()
                .map_err(|_| NetworkError::InvalidResponse(format!("bad amount {s:?}"))),
        }
    }
}

/// Registers arrive as raw hex or as rendered objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum RegisterValue {
    Hex(String),
    Rendered {
        #[serde(rename = "serializedValue")]
        serialized_value: String,
    },
}

impl RegisterValue {
    fn hex(&self) -> &str {
        match self {
            RegisterValue::Hex(s) => s,
            RegisterValue::Rendered { serialized_value } => serialized_value,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerAsset {
    token_id: String,
    amount: Amount,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerBox {
    box_id: String,
    value: Amount,
    ergo_tree: String,
    creation_height: u32,
    #[serde(default)]
    assets: Vec<ExplorerAsset>,
    #[serde(default)]
    additional_registers: HashMap<String, RegisterValue>,
    transaction_id: String,
    index: u16,
}

fn digest(field: &str, s: &str) -> Result<Digest32, NetworkError> {
    s.parse()
        .map_err(|e| NetworkError::InvalidResponse(format!("{field}: {e}")))
}

impl ExplorerBox {
    fn into_box(self) -> Result<UnspentBox, NetworkError> {
        let ergo_tree = hex::decode(&self.ergo_tree)
            .map(ErgoTree)
            .map_err(|e| NetworkError::InvalidResponse(format!("ergoTree: {e}")))?;

        let mut assets = Vec::with_capacity(self.assets.len());
        for a in &self.assets {
            assets.push(Token::new(digest("tokenId", &a.token_id)?, a.amount.get()?));
        }

        let mut registers = Registers::new();
        for (name, value) in &self.additional_registers {
            let id: RegisterId = name
                .parse()
                .map_err(|e| NetworkError::InvalidResponse(format!("{e}")))?;
            let bytes = register::from_hex(value.hex())
                .map_err(|e| NetworkError::InvalidResponse(format!("{id}: {e}")))?;
            registers.insert(id, bytes);
        }

        Ok(UnspentBox {
            box_id: digest("boxId", &self.box_id)?,
            value: self.value.get()?,
            ergo_tree,
            creation_height: self.creation_height,
            assets,
            registers,
            transaction_id: digest("transactionId", &self.transaction_id)?,
            index: self.index,
        })
    }
}
