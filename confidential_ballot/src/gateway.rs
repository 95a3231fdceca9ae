use crate::*;
use indexmap::IndexMap;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::convert::TryInto;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use x25519_dalek::StaticSecret;

/// Default ceiling on how long a decryption authorization may claim to be valid
pub const MAX_AUTHORIZATION_SECS: u64 = 7 * SECONDS_PER_DAY;

/// The ledger-facing side of the confidential value gateway.
///
/// Turns encrypted inputs into handles and keeps the access list saying who
/// may ask for each handle's plaintext.
pub trait Gateway {
    /// The key voters encrypt their choices to
    fn public_key(&self) -> x25519_dalek::PublicKey;

    /// Verify `proof` for `input` in `context` and store the ciphertext.
    ///
    /// Minting the same input in the same context again returns the same handle.
    fn mint(
        &self,
        input: &EncryptedInput,
        proof: &InputProof,
        context: &MintContext,
    ) -> Result<CiphertextHandle, GatewayError>;

    /// Let `principal` request the plaintext of `handle`. Granting twice is a no-op.
    fn allow(&self, handle: &CiphertextHandle, principal: &Principal) -> Result<(), GatewayError>;

    fn is_allowed(&self, handle: &CiphertextHandle, principal: &Principal) -> bool;
}

/// The decrypt capability, called by the decryption coordinator.
///
/// This is an I/O boundary in a real deployment, hence async.
pub trait DecryptionGateway {
    fn user_decrypt(
        &self,
        handles: &[CiphertextHandle],
        authorization: &SignedAuthorization,
    ) -> impl Future<Output = Result<SealedPlaintexts, GatewayError>>;
}

impl<G: Gateway + ?Sized> Gateway for Arc<G> {
    fn public_key(&self) -> x25519_dalek::PublicKey {
        (**self).public_key()
    }

    fn mint(
        &self,
        input: &EncryptedInput,
        proof: &InputProof,
        context: &MintContext,
    ) -> Result<CiphertextHandle, GatewayError> {
        (**self).mint(input, proof, context)
    }

    fn allow(&self, handle: &CiphertextHandle, principal: &Principal) -> Result<(), GatewayError> {
        (**self).allow(handle, principal)
    }

    fn is_allowed(&self, handle: &CiphertextHandle, principal: &Principal) -> bool {
        (**self).is_allowed(handle, principal)
    }
}

impl<D: DecryptionGateway + ?Sized> DecryptionGateway for Arc<D> {
    fn user_decrypt(
        &self,
        handles: &[CiphertextHandle],
        authorization: &SignedAuthorization,
    ) -> impl Future<Output = Result<SealedPlaintexts, GatewayError>> {
        (**self).user_decrypt(handles, authorization)
    }
}

struct StoredCiphertext {
    context: MintContext,
    ciphertext: Vec<u8>,
    allowed: HashSet<Principal>,
}

#[derive(Default)]
struct GatewayState {
    ciphertexts: HashMap<CiphertextHandle, StoredCiphertext>,
    // ciphertext digest -> the only handle it may ever be minted under
    minted_digests: HashMap<[u8; 32], CiphertextHandle>,
    used_sessions: HashSet<uuid::Uuid>,
}

/// An in-process gateway holding the network decryption key.
///
/// Stands in for the external cryptosystem in tests and the simulator.
pub struct LocalGateway<C: Clock = SystemClock> {
    secret: StaticSecret,
    public: x25519_dalek::PublicKey,
    clock: C,
    max_authorization_secs: u64,
    state: Mutex<GatewayState>,
}

impl LocalGateway<SystemClock> {
    pub fn new() -> Self {
        LocalGateway::with_clock(SystemClock)
    }
}

impl Default for LocalGateway<SystemClock> {
    fn default() -> Self {
        LocalGateway::new()
    }
}

impl<C: Clock> LocalGateway<C> {
    pub fn with_clock(clock: C) -> Self {
        let mut csprng = rand::rngs::OsRng {};
        let (secret, public) = ecies::generate_keypair(&mut csprng);
        LocalGateway {
            secret,
            public,
            clock,
            max_authorization_secs: MAX_AUTHORIZATION_SECS,
            state: Mutex::new(GatewayState::default()),
        }
    }

    pub fn max_authorization_secs(mut self, secs: u64) -> Self {
        self.max_authorization_secs = secs;
        self
    }

    fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_authorization(
        &self,
        state: &GatewayState,
        handles: &[CiphertextHandle],
        authorization: &SignedAuthorization,
    ) -> Result<(), GatewayError> {
        authorization
            .verify_signature()
            .map_err(|_| GatewayError::BadSignature)?;

        let auth = authorization.inner();
        if auth.validity_secs > self.max_authorization_secs {
            return Err(GatewayError::AuthorizationTooLong(auth.validity_secs));
        }
        if !auth.is_valid_at(self.clock.now()) {
            return Err(GatewayError::AuthorizationExpired);
        }
        if state.used_sessions.contains(&auth.session_id) {
            return Err(GatewayError::SessionReused(auth.session_id));
        }

        for handle in handles {
            let stored = state
                .ciphertexts
                .get(handle)
                .ok_or(GatewayError::UnknownHandle(*handle))?;
            if !auth.covers(stored.context.ledger_id, stored.context.ballot_id) {
                return Err(GatewayError::TargetMismatch(*handle));
            }
            if !stored.allowed.contains(&auth.requester) {
                return Err(GatewayError::NotAllowed(*handle));
            }
        }

        Ok(())
    }

    fn decrypt_value(&self, ciphertext: &[u8]) -> Result<u32, GatewayError> {
        let plaintext = ecies::open(&self.secret, ciphertext).map_err(|_| GatewayError::Crypto)?;
        let bytes: [u8; 4] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| GatewayError::Crypto)?;
        Ok(u32::from_be_bytes(bytes))
    }
}

impl<C: Clock> Gateway for LocalGateway<C> {
    fn public_key(&self) -> x25519_dalek::PublicKey {
        self.public
    }

    fn mint(
        &self,
        input: &EncryptedInput,
        proof: &InputProof,
        context: &MintContext,
    ) -> Result<CiphertextHandle, GatewayError> {
        proof
            .verify_signature()
            .map_err(|_| GatewayError::ProofInvalid("signature does not verify"))?;
        if proof.context != *context {
            return Err(GatewayError::ProofInvalid(
                "proof was made for another ledger, ballot or sender",
            ));
        }
        let digest = input.digest();
        if proof.ciphertext_digest.as_slice() != &digest[..] {
            return Err(GatewayError::ProofInvalid(
                "proof was made for another ciphertext",
            ));
        }

        // The value must decrypt to a 32-bit plaintext under the network key
        self.decrypt_value(&input.ciphertext)
            .map_err(|_| GatewayError::ProofInvalid("ciphertext is not a 32-bit value"))?;

        let handle = CiphertextHandle::derive(context, &digest);

        let mut state = self.state();
        match state.minted_digests.get(&digest) {
            Some(existing) if *existing == handle => {
                debug!("gateway: re-mint of {} is a no-op", handle);
                return Ok(handle);
            }
            Some(_) => {
                warn!("gateway: rejected ciphertext replayed into a new context");
                return Err(GatewayError::CiphertextReplayed);
            }
            None => {}
        }

        state.minted_digests.insert(digest, handle);
        state.ciphertexts.insert(
            handle,
            StoredCiphertext {
                context: *context,
                ciphertext: input.ciphertext.clone(),
                allowed: HashSet::new(),
            },
        );
        debug!("gateway: minted {} for ballot {}", handle, context.ballot_id);

        Ok(handle)
    }

    fn allow(&self, handle: &CiphertextHandle, principal: &Principal) -> Result<(), GatewayError> {
        let mut state = self.state();
        let stored = state
            .ciphertexts
            .get_mut(handle)
            .ok_or(GatewayError::UnknownHandle(*handle))?;
        stored.allowed.insert(*principal);
        Ok(())
    }

    fn is_allowed(&self, handle: &CiphertextHandle, principal: &Principal) -> bool {
        self.state()
            .ciphertexts
            .get(handle)
            .map(|stored| stored.allowed.contains(principal))
            .unwrap_or(false)
    }
}

impl<C: Clock> DecryptionGateway for LocalGateway<C> {
    async fn user_decrypt(
        &self,
        handles: &[CiphertextHandle],
        authorization: &SignedAuthorization,
    ) -> Result<SealedPlaintexts, GatewayError> {
        let mut state = self.state();

        if let Err(e) = self.check_authorization(&state, handles, authorization) {
            warn!(
                "gateway: refused decryption for {}: {}",
                authorization.requester, e
            );
            return Err(e);
        }
        state.used_sessions.insert(authorization.session_id);

        let mut csprng = rand::rngs::OsRng {};
        let mut sealed = IndexMap::with_capacity(handles.len());
        for handle in handles {
            let stored = state
                .ciphertexts
                .get(handle)
                .ok_or(GatewayError::UnknownHandle(*handle))?;
            let value = self.decrypt_value(&stored.ciphertext)?;
            let value = ecies::seal(
                &authorization.ephemeral_public,
                &value.to_be_bytes(),
                &mut csprng,
            )
            .map_err(|_| GatewayError::Crypto)?;
            sealed.insert(*handle, SealedValue(value));
        }

        debug!(
            "gateway: decrypted {} handles for {}",
            sealed.len(),
            authorization.requester
        );
        Ok(SealedPlaintexts(sealed))
    }
}
