use crate::*;
use ed25519_dalek::ExpandedSecretKey;
use ed25519_dalek::PublicKey;
use ed25519_dalek::SecretKey;
use ed25519_dalek::Signature;
use serde::Serialize;
use std::ops::Deref;

/// This trait should be considered sealed and should not be implemented outside this crate
#[doc(hidden)]
pub trait Signable: Serialize {
    /// The principal expected to have signed this claim
    fn signer(&self) -> Principal;

    fn as_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_cbor::to_vec(&self)?)
    }
}

/// A generic signed claim
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Signed<T: Signable> {
    pub tx: T,

    #[serde(with = "EdSignatureHex")]
    pub sig: Signature,
}

impl<T: Signable> Signed<T> {
    /// Sign a claim, producing a Signed<T>
    pub fn sign(secret: &SecretKey, claim: T) -> Result<Self, Error> {
        let public_key = PublicKey::from(secret);
        if Principal::from_public_key(&public_key) != claim.signer() {
            return Err(Error::MismatchedPublicKeys);
        }

        let serialized = claim.as_bytes()?;

        let expanded: ExpandedSecretKey = secret.into();
        let signature = expanded.sign(&serialized, &public_key);

        Ok(Signed {
            tx: claim,
            sig: signature,
        })
    }

    /// Verify the signature against the claim's named signer
    pub fn verify_signature(&self) -> Result<(), Error> {
        let serialized = self.tx.as_bytes()?;
        let public_key = self.tx.signer().public_key()?;

        Ok(public_key.verify_strict(&serialized, &self.sig)?)
    }

    /// Get the inner unsigned claim
    pub fn inner(&self) -> &T {
        &self.tx
    }
}

impl<T: Signable> AsRef<T> for Signed<T> {
    fn as_ref(&self) -> &T {
        &self.tx
    }
}

impl<T: Signable> Deref for Signed<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}
