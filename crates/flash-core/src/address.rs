//! Ergo address encoding.
//!
//! An address is `base58(head || content || checksum)` where:
//! - `head` is the network prefix (0x00 mainnet, 0x10 testnet) plus the
//!   address type (1 = P2PK, 3 = P2S)
//! - `content` is the 33-byte compressed key (P2PK) or the serialized
//!   ErgoTree (P2S)
//! - `checksum` is the first 4 bytes of Blake2b-256 over `head || content`
//!
//! Pay-to-script-hash addresses decode to [`AddressError::UnsupportedType`]:
//! their tree cannot be reconstructed from the address alone.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::{ADDRESS_CHECKSUM_LENGTH, PUBLIC_KEY_LENGTH};
use crate::crypto::{blake2b256, PublicKey};
use crate::error::AddressError;
use crate::types::ErgoTree;

const TYPE_P2PK: u8 = 0x01;
const TYPE_P2SH: u8 = 0x02;
const TYPE_P2S: u8 = 0x03;

/// Network tag determining the address prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Mainnet (P2PK addresses start with `9`).
    #[default]
    Mainnet,
    /// Testnet (P2PK addresses start with `3`).
    Testnet,
}

impl Network {
    /// Prefix byte added to the address type.
    pub fn prefix(&self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x10,
        }
    }

    /// Look up the network from a prefix byte.
    pub fn from_prefix(prefix: u8) -> Result<Self, AddressError> {
        match prefix {
            0x00 => Ok(Network::Mainnet),
            0x10 => Ok(Network::Testnet),
            other => Err(AddressError::UnknownNetwork(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            _ => Err(AddressError::UnknownNetworkName(s.to_string())),
        }
    }
}

/// What an address pays to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// Pay to a single public key.
    P2pk(PublicKey),
    /// Pay to an arbitrary script.
    P2s(ErgoTree),
}

/// An Ergo address: a network tag plus a P2PK key or P2S script.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    kind: AddressKind,
}

impl Address {
    pub fn p2pk(key: PublicKey, network: Network) -> Self {
        Self { network, kind: AddressKind::P2pk(key) }
    }

    pub fn p2s(tree: ErgoTree, network: Network) -> Self {
        Self { network, kind: AddressKind::P2s(tree) }
    }

    /// Classify a tree: P2PK trees become P2PK addresses, everything else P2S.
    pub fn from_ergo_tree(tree: &ErgoTree, network: Network) -> Self {
        match tree.p2pk_key() {
            Some(key) => Self::p2pk(key, network),
            None => Self::p2s(tree.clone(), network),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn kind(&self) -> &AddressKind {
        &self.kind
    }

    /// The locking script of boxes sent to this address.
    pub fn ergo_tree(&self) -> ErgoTree {
        match &self.kind {
            AddressKind::P2pk(key) => ErgoTree::p2pk(key),
            AddressKind::P2s(tree) => tree.clone(),
        }
    }

    fn head(&self) -> u8 {
        let kind = match self.kind {
            AddressKind::P2pk(_) => TYPE_P2PK,
            AddressKind::P2s(_) => TYPE_P2S,
        };
        self.network.prefix() + kind
    }

    /// Encode as a base58 string.
    pub fn encode(&self) -> String {
        let content: &[u8] = match &self.kind {
            AddressKind::P2pk(key) => key.as_bytes(),
            AddressKind::P2s(tree) => tree.as_bytes(),
        };
        let mut raw = Vec::with_capacity(1 + content.len() + ADDRESS_CHECKSUM_LENGTH);
        raw.push(self.head());
        raw.extend_from_slice(content);
        let checksum = blake2b256(&raw);
        raw.extend_from_slice(&checksum[..ADDRESS_CHECKSUM_LENGTH]);
        bs58::encode(raw).into_string()
    }

    /// Decode a base58 address string, verifying its checksum.
    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let raw = bs58::decode(s)
            .into_vec()
            .map_err(|e| AddressError::InvalidBase58(e.to_string()))?;
        if raw.len() <= 1 + ADDRESS_CHECKSUM_LENGTH {
            return Err(AddressError::InvalidLength(raw.len()));
        }

        let (body, checksum) = raw.split_at(raw.len() - ADDRESS_CHECKSUM_LENGTH);
        if blake2b256(body)[..ADDRESS_CHECKSUM_LENGTH] != *checksum {
            return Err(AddressError::InvalidChecksum);
        }

        let head = body[0];
        let content = &body[1..];
        let network = Network::from_prefix(head & 0xF0)?;
        match head & 0x0F {
            TYPE_P2PK => {
                if content.len() != PUBLIC_KEY_LENGTH {
                    return Err(AddressError::InvalidLength(content.len()));
                }
                Ok(Self::p2pk(PublicKey::from_slice(content)?, network))
            }
            TYPE_P2S => Ok(Self::p2s(ErgoTree(content.to_vec()), network)),
            other @ TYPE_P2SH => Err(AddressError::UnsupportedType(other)),
            other => Err(AddressError::UnsupportedType(other)),
        }
    }

    /// Decode and require a specific network.
    pub fn decode_for(s: &str, network: Network) -> Result<Self, AddressError> {
        let address = Self::decode(s)?;
        if address.network != network {
            return Err(AddressError::NetworkMismatch {
                expected: network.to_string(),
                got: address.network.to_string(),
            });
        }
        Ok(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(byte: u8) -> PublicKey {
        let sk = secp256k1::SecretKey::from_slice(&[byte; 32]).unwrap();
        PublicKey::from(secp256k1::PublicKey::from_secret_key_global(&sk))
    }

    #[test]
    fn p2pk_roundtrip_mainnet() {
        let addr = Address::p2pk(test_key(1), Network::Mainnet);
        let encoded = addr.encode();
        assert!(encoded.starts_with('9'), "mainnet P2PK should start with 9: {encoded}");
        assert_eq!(Address::decode(&encoded).unwrap(), addr);
    }

    #[test]
    fn p2pk_roundtrip_testnet() {
        let addr = Address::p2pk(test_key(2), Network::Testnet);
        let encoded = addr.encode();
        assert!(encoded.starts_with('3'), "testnet P2PK should start with 3: {encoded}");
        assert_eq!(Address::decode(&encoded).unwrap(), addr);
    }

    #[test]
    fn p2s_roundtrip() {
        let tree = ErgoTree(vec![0x10, 0x04, 0x00, 0x05, 0x02, 0xd1, 0x93]);
        let addr = Address::p2s(tree.clone(), Network::Mainnet);
        let decoded = Address::decode(&addr.encode()).unwrap();
        assert_eq!(decoded.ergo_tree(), tree);
        assert!(matches!(decoded.kind(), AddressKind::P2s(_)));
    }

    #[test]
    fn ergo_tree_of_p2pk_address_is_p2pk_tree() {
        let key = test_key(3);
        let addr = Address::p2pk(key, Network::Mainnet);
        assert_eq!(addr.ergo_tree(), ErgoTree::p2pk(&key));
        assert_eq!(Address::from_ergo_tree(&addr.ergo_tree(), Network::Mainnet), addr);
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let encoded = Address::p2pk(test_key(4), Network::Mainnet).encode();
        let mut raw = bs58::decode(&encoded).into_vec().unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = bs58::encode(raw).into_string();
        assert_eq!(Address::decode(&tampered), Err(AddressError::InvalidChecksum));
    }

    #[test]
    fn invalid_base58_rejected() {
        assert!(matches!(
            Address::decode("0OIl"),
            Err(AddressError::InvalidBase58(_))
        ));
    }

    #[test]
    fn too_short_rejected() {
        let short = bs58::encode([0x01, 0x02, 0x03]).into_string();
        assert_eq!(Address::decode(&short), Err(AddressError::InvalidLength(3)));
    }

    #[test]
    fn p2sh_unsupported() {
        let mut raw = vec![TYPE_P2SH];
        raw.extend_from_slice(&[0x11; 24]);
        let checksum = blake2b256(&raw);
        raw.extend_from_slice(&checksum[..4]);
        let encoded = bs58::encode(raw).into_string();
        assert_eq!(Address::decode(&encoded), Err(AddressError::UnsupportedType(TYPE_P2SH)));
    }

    #[test]
    fn decode_for_checks_network() {
        let encoded = Address::p2pk(test_key(5), Network::Testnet).encode();
        assert!(Address::decode_for(&encoded, Network::Testnet).is_ok());
        assert!(matches!(
            Address::decode_for(&encoded, Network::Mainnet),
            Err(AddressError::NetworkMismatch { .. })
        ));
    }

    #[test]
    fn network_from_str() {
        assert_eq!("MAINNET".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("testnet".parse::<Network>().unwrap(), Network::Testnet);
        assert_eq!(
            "regtest".parse::<Network>(),
            Err(AddressError::UnknownNetworkName("regtest".into()))
        );
    }
}
