//! WireGuard device configuration payload

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use base64::prelude::*;
use ipnet::IpNet;

use crate::error::{Error, Result};

/// Length of a Curve25519 key in bytes
pub const KEY_LEN: usize = 32;

/// A WireGuard public, private or preshared key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a key from its standard base64 form
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidKey(e.to_string()))?;

        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            Error::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, v.len()))
        })?;

        Ok(Self(bytes))
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_base64(s)
    }
}

// Never print key material.
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}

/// Per-peer settings pushed to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub public_key: Key,
    pub preshared_key: Option<Key>,
    pub endpoint: Option<SocketAddr>,
    /// Keepalive interval in seconds
    pub persistent_keepalive: Option<u16>,
    /// Replace the peer's allowed-IP set instead of appending to it
    pub replace_allowed_ips: bool,
    /// Crypto-routing prefixes for this peer (both families)
    pub allowed_ips: Vec<IpNet>,
}

impl PeerConfig {
    pub fn new(public_key: Key) -> Self {
        Self {
            public_key,
            preshared_key: None,
            endpoint: None,
            persistent_keepalive: None,
            replace_allowed_ips: true,
            allowed_ips: Vec::new(),
        }
    }
}

/// Full device configuration as accepted by the kernel's SET_DEVICE command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    pub private_key: Option<Key>,
    pub listen_port: Option<u16>,
    pub fwmark: Option<u32>,
    /// Replace the whole peer set instead of merging into it
    pub replace_peers: bool,
    pub peers: Vec<PeerConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KEY: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";

    #[test]
    fn test_key_base64_round_trip() {
        let key = Key::from_base64(SAMPLE_KEY).unwrap();
        assert_eq!(key.to_base64(), SAMPLE_KEY);
        assert_eq!(key.as_bytes().len(), KEY_LEN);
    }

    #[test]
    fn test_key_rejects_wrong_length() {
        let err = Key::from_base64("AAAA").unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
        assert!(err.to_string().contains("expected 32 bytes"));
    }

    #[test]
    fn test_key_rejects_invalid_base64() {
        assert!("not base64!!".parse::<Key>().is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key: Key = SAMPLE_KEY.parse().unwrap();
        assert_eq!(format!("{:?}", key), "Key(..)");
    }

    #[test]
    fn test_peer_defaults_replace_allowed_ips() {
        let peer = PeerConfig::new(Key::new([1; KEY_LEN]));
        assert!(peer.replace_allowed_ips);
        assert!(peer.allowed_ips.is_empty());
    }
}
