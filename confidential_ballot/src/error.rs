use crate::*;

use thiserror::Error;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("confidential_ballot: {0}")]
    Ledger(#[from] LedgerError),

    #[error("confidential_ballot: decryption not authorized: {0}")]
    NotAuthorized(GatewayError),

    #[error("confidential_ballot: signature error: {0}")]
    SignatureError(#[from] ed25519_dalek::SignatureError),

    #[error("confidential_ballot: mismatched public keys")]
    MismatchedPublicKeys,

    #[error("confidential_ballot: CBOR error: {0}")]
    CBORSerialization(#[from] serde_cbor::Error),

    #[error("confidential_ballot: invalid principal - invalid hexidecimal")]
    PrincipalBadHex,

    #[error("confidential_ballot: invalid principal - wrong length")]
    PrincipalBadLen,

    #[error("confidential_ballot: failed to encrypt value")]
    Encryption,

    #[error("confidential_ballot: failed to decrypt value")]
    Decryption,

    #[error("confidential_ballot: malformed ciphertext")]
    MalformedCiphertext,

    #[error("confidential_ballot: gateway returned no plaintext for handle {0}")]
    MissingPlaintext(CiphertextHandle),

    #[error("confidential_ballot: plaintext for handle {0} is not a 32-bit value")]
    MalformedPlaintext(CiphertextHandle),

    #[error("confidential_ballot: {voter} has not voted in ballot {ballot}")]
    NoVoteCast { ballot: BallotId, voter: Principal },

    #[error("confidential_ballot: configuration error: {0}")]
    Config(String),
}

/// Ballot ledger rejections
///
/// Every variant is raised before any ledger state changes.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ballot ledger: invalid input: {0}")]
    InvalidInput(String),

    #[error("ballot ledger: ballot {0} not found")]
    NotFound(BallotId),

    #[error("ballot ledger: ballot {0} is not accepting votes")]
    NotVotingPeriod(BallotId),

    #[error("ballot ledger: already voted in ballot {0}")]
    AlreadyVoted(BallotId),

    #[error("ballot ledger: ballot {0} is already closed")]
    AlreadyClosed(BallotId),

    #[error("ballot ledger: ballot {0} is still open")]
    BallotStillOpen(BallotId),

    #[error("ballot ledger: encrypted input rejected: {0}")]
    ProofInvalid(GatewayError),

    #[error("ballot ledger: gateway error: {0}")]
    Gateway(GatewayError),
}

impl LedgerError {
    pub(crate) fn invalid<S: Into<String>>(reason: S) -> Self {
        LedgerError::InvalidInput(reason.into())
    }
}

/// Gateway rejections, for both minting and decryption
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("gateway: invalid input proof: {0}")]
    ProofInvalid(&'static str),

    #[error("gateway: ciphertext already minted in another context")]
    CiphertextReplayed,

    #[error("gateway: unknown ciphertext handle {0}")]
    UnknownHandle(CiphertextHandle),

    #[error("gateway: authorization signature does not verify")]
    BadSignature,

    #[error("gateway: authorization is outside its validity window")]
    AuthorizationExpired,

    #[error("gateway: authorization validity of {0}s exceeds the allowed maximum")]
    AuthorizationTooLong(u64),

    #[error("gateway: authorization session {0} was already used")]
    SessionReused(uuid::Uuid),

    #[error("gateway: handle {0} is not covered by the authorization targets")]
    TargetMismatch(CiphertextHandle),

    #[error("gateway: requester has no grant on handle {0}")]
    NotAllowed(CiphertextHandle),

    #[error("gateway: cryptographic failure")]
    Crypto,
}
