use crate::*;
use digest::Digest;
use ed25519_dalek::PublicKey;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::convert::TryInto;
use std::str::FromStr;

/// The identity of a caller.
///
/// For people this is the 32 bytes of their ed25519 public key. A ledger
/// instance gets a principal derived from its ledger id so it can be granted
/// decrypt capability like anyone else.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Principal([u8; 32]);

impl Principal {
    /// Principal for the holder of an ed25519 key
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Principal(public_key.to_bytes())
    }

    /// Principal for a ledger instance
    pub fn for_ledger(ledger_id: uuid::Uuid) -> Self {
        let mut hasher = sha2::Sha256::new();
        hasher.update(b"confidential_ballot/ledger");
        hasher.update(ledger_id.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Principal(bytes)
    }

    /// The ed25519 public key behind this principal.
    ///
    /// Ledger principals are hashes, not keys, and never verify a signature.
    pub fn public_key(&self) -> Result<PublicKey, Error> {
        Ok(PublicKey::from_bytes(&self.0)?)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<&PublicKey> for Principal {
    fn from(public_key: &PublicKey) -> Self {
        Principal::from_public_key(public_key)
    }
}

impl FromStr for Principal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| Error::PrincipalBadHex)?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::PrincipalBadLen)?;
        Ok(Principal(bytes))
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Principal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Principal::from_str(&s).map_err(de::Error::custom)
    }
}

impl Serialize for Principal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_string_form() {
        let (_secret, public) = generate_keypair();
        let principal = Principal::from_public_key(&public);

        let stringed = principal.to_string();
        assert_eq!(stringed.len(), 64);
        assert_eq!(Principal::from_str(&stringed).unwrap(), principal);
        assert_eq!(principal.public_key().unwrap(), public);

        assert!(matches!(
            Principal::from_str("zz"),
            Err(Error::PrincipalBadHex)
        ));
        assert!(matches!(
            Principal::from_str("abcd"),
            Err(Error::PrincipalBadLen)
        ));
    }

    #[test]
    fn test_ledger_principal_is_stable() {
        let ledger_id = uuid::Uuid::new_v4();
        assert_eq!(
            Principal::for_ledger(ledger_id),
            Principal::for_ledger(ledger_id)
        );
        assert_ne!(
            Principal::for_ledger(ledger_id),
            Principal::for_ledger(uuid::Uuid::new_v4())
        );
    }
}
