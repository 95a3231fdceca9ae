use crate::*;
use indexmap::IndexMap;

/// A (ledger, ballot) pair whose ciphertexts an authorization covers
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DecryptTarget {
    pub ledger_id: uuid::Uuid,
    pub ballot_id: BallotId,
}

/// A requester's claim of the right to decrypt ciphertexts of the listed targets.
///
/// Built fresh for every decryption session and thrown away with it. The
/// gateway seals each plaintext to `ephemeral_public`, so only the session
/// that built this claim can read the answer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DecryptionAuthorization {
    pub session_id: uuid::Uuid,

    #[serde(with = "X25519PublicKeyHex")]
    pub ephemeral_public: x25519_dalek::PublicKey,

    pub targets: Vec<DecryptTarget>,
    pub requester: Principal,

    /// Unix seconds
    pub issued_at: u64,
    pub validity_secs: u64,
}

impl DecryptionAuthorization {
    pub fn expires_at(&self) -> u64 {
        self.issued_at.saturating_add(self.validity_secs)
    }

    /// True iff `now` falls inside `[issued_at, issued_at + validity_secs]`
    pub fn is_valid_at(&self, now: u64) -> bool {
        self.issued_at <= now && now <= self.expires_at()
    }

    pub fn covers(&self, ledger_id: uuid::Uuid, ballot_id: BallotId) -> bool {
        self.targets
            .iter()
            .any(|t| t.ledger_id == ledger_id && t.ballot_id == ballot_id)
    }
}

impl Signable for DecryptionAuthorization {
    fn signer(&self) -> Principal {
        self.requester
    }
}

pub type SignedAuthorization = Signed<DecryptionAuthorization>;

/// Plaintexts returned by the gateway, each sealed to the session's ephemeral key
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SealedPlaintexts(pub IndexMap<CiphertextHandle, SealedValue>);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SealedValue(#[serde(with = "hex_serde")] pub Vec<u8>);

impl SealedPlaintexts {
    pub fn get(&self, handle: &CiphertextHandle) -> Option<&SealedValue> {
        self.0.get(handle)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
