use crate::*;
use digest::Digest;
use ed25519_dalek::SecretKey;
use rand_core::{CryptoRng, RngCore};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::convert::TryInto;
use std::str::FromStr;

/// Opaque reference to an encrypted 32-bit value held by the gateway.
///
/// A handle is only a name. Who may see the value behind it is decided by the
/// gateway's grants, never by holding the handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CiphertextHandle([u8; 32]);

impl CiphertextHandle {
    /// Derive the handle for a ciphertext minted in `context`
    pub(crate) fn derive(context: &MintContext, ciphertext_digest: &[u8; 32]) -> Self {
        let mut hasher = sha2::Sha256::new();
        hasher.update(b"confidential_ballot/handle");
        hasher.update(context.ledger_id.as_bytes());
        hasher.update(context.ballot_id.0.to_be_bytes());
        hasher.update(context.sender.as_bytes());
        hasher.update(ciphertext_digest);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        CiphertextHandle(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for CiphertextHandle {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(CiphertextHandle(bytes))
    }
}

impl<'de> Deserialize<'de> for CiphertextHandle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        CiphertextHandle::from_str(&s).map_err(de::Error::custom)
    }
}

impl Serialize for CiphertextHandle {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Where a ciphertext is being minted: which ledger, which ballot, on whose behalf
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub struct MintContext {
    pub ledger_id: uuid::Uuid,
    pub ballot_id: BallotId,
    pub sender: Principal,
}

/// A voter's choice, encrypted to the gateway's public key
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInput {
    #[serde(with = "hex_serde")]
    pub ciphertext: Vec<u8>,
}

impl EncryptedInput {
    /// Encrypt an option index for the gateway
    pub fn encrypt<R: RngCore + CryptoRng>(
        gateway_key: &x25519_dalek::PublicKey,
        choice: u32,
        rng: &mut R,
    ) -> Result<Self, Error> {
        let ciphertext = ecies::seal(gateway_key, &choice.to_be_bytes(), rng)?;
        Ok(EncryptedInput { ciphertext })
    }

    pub fn digest(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&sha2::Sha256::digest(&self.ciphertext));
        bytes
    }
}

/// The claim a voter signs to vouch for an encrypted input.
///
/// It pins the ciphertext to one ledger, one ballot and one sender so the
/// same input cannot be submitted anywhere else.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InputAttestation {
    pub context: MintContext,

    #[serde(with = "hex_serde")]
    pub ciphertext_digest: Vec<u8>,
}

impl Signable for InputAttestation {
    fn signer(&self) -> Principal {
        self.context.sender
    }
}

/// Validity proof accompanying an encrypted input
pub type InputProof = Signed<InputAttestation>;

impl Signed<InputAttestation> {
    /// Build the proof for `input` as cast by the owner of `secret`
    pub fn attest(
        secret: &SecretKey,
        input: &EncryptedInput,
        ledger_id: uuid::Uuid,
        ballot_id: BallotId,
    ) -> Result<Self, Error> {
        let public: ed25519_dalek::PublicKey = secret.into();
        let attestation = InputAttestation {
            context: MintContext {
                ledger_id,
                ballot_id,
                sender: Principal::from_public_key(&public),
            },
            ciphertext_digest: input.digest().to_vec(),
        };
        Signed::sign(secret, attestation)
    }
}
