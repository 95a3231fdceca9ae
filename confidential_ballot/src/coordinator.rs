use crate::*;
use ed25519_dalek::{PublicKey, SecretKey};
use log::{debug, info, warn};
use std::convert::TryInto;
use std::sync::mpsc::Receiver;

/// Client-side driver of the decryption handshake.
///
/// Acts for the owner of one ed25519 credential. Every decryption builds a
/// fresh ephemeral key and session, so nothing learned in one call is reused
/// by the next and no plaintext outlives the call that asked for it.
pub struct DecryptionCoordinator<L: LedgerView, D: DecryptionGateway, C: Clock = SystemClock> {
    ledger: L,
    gateway: D,
    clock: C,
    secret: SecretKey,
    principal: Principal,
    validity_secs: u64,
    notifier: Notifier,
}

impl<L: LedgerView, D: DecryptionGateway> DecryptionCoordinator<L, D, SystemClock> {
    pub fn new(ledger: L, gateway: D, secret: SecretKey, config: &LedgerConfig) -> Self {
        DecryptionCoordinator::with_clock(ledger, gateway, SystemClock, secret, config)
    }
}

impl<L: LedgerView, D: DecryptionGateway, C: Clock> DecryptionCoordinator<L, D, C> {
    pub fn with_clock(
        ledger: L,
        gateway: D,
        clock: C,
        secret: SecretKey,
        config: &LedgerConfig,
    ) -> Self {
        let public = PublicKey::from(&secret);
        DecryptionCoordinator {
            ledger,
            gateway,
            clock,
            secret,
            principal: Principal::from_public_key(&public),
            validity_secs: config.authorization_validity_secs,
            notifier: Notifier::default(),
        }
    }

    /// The identity this coordinator requests decryptions as
    pub fn principal(&self) -> Principal {
        self.principal
    }

    /// Receive a `TallyDecrypted` event for every tally this coordinator completes
    pub fn subscribe(&self) -> Receiver<LedgerEvent> {
        self.notifier.subscribe()
    }

    /// Decrypt every choice of a closed ballot and count them per option.
    ///
    /// A ballot nobody voted in yields an empty tally without a gateway round trip.
    pub async fn request_tally(&self, ballot_id: BallotId) -> Result<BallotTally, Error> {
        let ballot = self.ledger.get_ballot(ballot_id)?;
        self.ledger
            .request_decrypt_access(&self.principal, ballot_id)?;
        let handles = self.ledger.list_encrypted_choices(ballot_id)?;

        let tally = if handles.is_empty() {
            debug!("coordinator: ballot {} has no votes to decrypt", ballot_id);
            BallotTally::empty(ballot_id)
        } else {
            let choices = self.decrypt(ballot_id, &handles).await?;
            BallotTally::from_choices(&ballot, choices)
        };

        info!(
            "coordinator: {} decrypted tally of ballot {} ({} votes, {} invalid)",
            self.principal, ballot_id, tally.total, tally.invalid
        );
        self.notifier.emit(LedgerEvent::TallyDecrypted {
            ballot_id,
            requester: self.principal,
            total: tally.total,
        });

        Ok(tally)
    }

    /// Decrypt the option this coordinator's own principal chose in a ballot.
    ///
    /// Voters hold a grant on their own choice from the moment they cast it,
    /// so this works before and after close. Nobody can look up another
    /// voter's choice.
    pub async fn request_own_choice(&self, ballot_id: BallotId) -> Result<u32, Error> {
        let handle = self
            .ledger
            .choice_of(&self.principal, ballot_id)?
            .ok_or(Error::NoVoteCast {
                ballot: ballot_id,
                voter: self.principal,
            })?;

        let choices = self.decrypt(ballot_id, &[handle]).await?;
        choices
            .into_iter()
            .next()
            .ok_or(Error::MissingPlaintext(handle))
    }

    /// One decryption session: authorize, call the gateway, open the results
    async fn decrypt(
        &self,
        ballot_id: BallotId,
        handles: &[CiphertextHandle],
    ) -> Result<Vec<u32>, Error> {
        let mut csprng = rand::rngs::OsRng {};
        let (ephemeral_secret, ephemeral_public) = ecies::generate_keypair(&mut csprng);

        let authorization = DecryptionAuthorization {
            session_id: uuid::Uuid::new_v4(),
            ephemeral_public,
            targets: vec![DecryptTarget {
                ledger_id: self.ledger.ledger_id(),
                ballot_id,
            }],
            requester: self.principal,
            issued_at: self.clock.now(),
            validity_secs: self.validity_secs,
        };
        let authorization = SignedAuthorization::sign(&self.secret, authorization)?;

        let sealed = self
            .gateway
            .user_decrypt(handles, &authorization)
            .await
            .map_err(|e| {
                warn!(
                    "coordinator: gateway refused session {}: {}",
                    authorization.session_id, e
                );
                Error::NotAuthorized(e)
            })?;

        handles
            .iter()
            .map(|handle| {
                let value = sealed
                    .get(handle)
                    .ok_or(Error::MissingPlaintext(*handle))?;
                let plaintext = ecies::open(&ephemeral_secret, &value.0)?;
                let bytes: [u8; 4] = plaintext
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::MalformedPlaintext(*handle))?;
                Ok(u32::from_be_bytes(bytes))
            })
            .collect()
    }
}
