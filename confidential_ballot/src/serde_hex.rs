use ed25519_dalek::Signature;
use std::borrow::Cow;
use std::convert::TryFrom;

pub use hex_buffer_serde::Hex;

// a single-purpose type for use in `#[serde(with)]`
pub enum EdSignatureHex {}

impl Hex<Signature> for EdSignatureHex {
    type Error = String;

    fn create_bytes(sig: &Signature) -> Cow<[u8]> {
        let bytes = sig.to_bytes().to_vec();
        Cow::from(bytes)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Signature, String> {
        Signature::try_from(bytes).map_err(|e| format!("{}", e))
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum X25519PublicKeyHex {}

impl Hex<x25519_dalek::PublicKey> for X25519PublicKeyHex {
    type Error = String;

    fn create_bytes(public_key: &x25519_dalek::PublicKey) -> Cow<[u8]> {
        Cow::from(public_key.as_bytes().to_vec())
    }

    fn from_bytes(bytes: &[u8]) -> Result<x25519_dalek::PublicKey, String> {
        let bytes = <[u8; 32]>::try_from(bytes)
            .map_err(|_| format!("expected 32 bytes, found {}", bytes.len()))?;
        Ok(x25519_dalek::PublicKey::from(bytes))
    }
}
