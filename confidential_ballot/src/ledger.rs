use crate::*;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Everything the ledger persists. Only touched with the state lock held.
#[derive(Default)]
struct LedgerState {
    next_ballot_id: u64,
    ballots: BTreeMap<BallotId, Ballot>,

    /// Encrypted choices per ballot. Ordered by handle, never by cast time.
    encrypted_choices: HashMap<BallotId, BTreeSet<CiphertextHandle>>,

    /// Cast records: one entry per (ballot, voter), mapped to the voter's handle
    cast_records: HashMap<(BallotId, Principal), CiphertextHandle>,
}

impl LedgerState {
    fn new() -> Self {
        LedgerState {
            next_ballot_id: 1,
            ..Default::default()
        }
    }

    fn ballot(&self, ballot_id: BallotId) -> Result<&Ballot, LedgerError> {
        self.ballots
            .get(&ballot_id)
            .ok_or(LedgerError::NotFound(ballot_id))
    }

    fn cast_count(&self, ballot_id: BallotId) -> u64 {
        self.encrypted_choices
            .get(&ballot_id)
            .map(|choices| choices.len() as u64)
            .unwrap_or(0)
    }

    /// Check one cast against current state plus the casts already accepted
    /// earlier in the same batch.
    fn check_cast(
        &self,
        caller: &Principal,
        ballot_id: BallotId,
        now: u64,
        pending: &HashSet<BallotId>,
    ) -> Result<(), LedgerError> {
        let ballot = self.ballot(ballot_id)?;
        if !ballot.is_voting_period(now) {
            return Err(LedgerError::NotVotingPeriod(ballot_id));
        }
        if pending.contains(&ballot_id) || self.cast_records.contains_key(&(ballot_id, *caller)) {
            return Err(LedgerError::AlreadyVoted(ballot_id));
        }
        Ok(())
    }
}

/// A cast that passed every check and now only needs committing
struct AcceptedCast {
    ballot_id: BallotId,
    handle: CiphertextHandle,
}

/// The ballot ledger.
///
/// Owns ballot definitions, cast records and the encrypted choice lists. Every
/// public operation takes the state lock for its whole run, so operations are
/// serialized and each one either commits entirely or changes nothing.
pub struct BallotLedger<G: Gateway, C: Clock = SystemClock> {
    ledger_id: uuid::Uuid,
    principal: Principal,
    config: LedgerConfig,
    gateway: G,
    clock: C,
    notifier: Notifier,
    state: Mutex<LedgerState>,
}

impl<G: Gateway> BallotLedger<G, SystemClock> {
    pub fn new(gateway: G, config: LedgerConfig) -> Self {
        BallotLedger::with_clock(gateway, SystemClock, config)
    }
}

impl<G: Gateway, C: Clock> BallotLedger<G, C> {
    pub fn with_clock(gateway: G, clock: C, config: LedgerConfig) -> Self {
        let ledger_id = uuid::Uuid::new_v4();
        BallotLedger {
            ledger_id,
            principal: Principal::for_ledger(ledger_id),
            config,
            gateway,
            clock,
            notifier: Notifier::default(),
            state: Mutex::new(LedgerState::new()),
        }
    }

    pub fn ledger_id(&self) -> uuid::Uuid {
        self.ledger_id
    }

    /// The ledger's own identity on the gateway
    pub fn principal(&self) -> Principal {
        self.principal
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Receive a `LedgerEvent` for every committed transition from now on
    pub fn subscribe(&self) -> Receiver<LedgerEvent> {
        self.notifier.subscribe()
    }

    // Commits never fail half way, so a poisoned lock still guards consistent state
    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mint_context(&self, ballot_id: BallotId, sender: &Principal) -> MintContext {
        MintContext {
            ledger_id: self.ledger_id,
            ballot_id,
            sender: *sender,
        }
    }

    /// Create a ballot open from now for `def.duration_days` days
    pub fn create_ballot(&self, caller: &Principal, def: BallotDef) -> Result<BallotId, LedgerError> {
        def.validate(&self.config).map_err(|e| {
            warn!("ledger: rejected ballot from {}: {}", caller, e);
            e
        })?;

        let mut state = self.state();
        let now = self.clock.now();
        let id = BallotId(state.next_ballot_id);
        state.next_ballot_id += 1;

        let ballot = def.into_ballot(id, *caller, now);
        info!(
            "ledger: ballot {} created by {} ({} options, ends at {})",
            id,
            caller,
            ballot.options.len(),
            ballot.end_time
        );
        self.notifier.emit(created_event(&ballot));
        state.ballots.insert(id, ballot);
        state.encrypted_choices.insert(id, BTreeSet::new());

        Ok(id)
    }

    /// Create several ballots at once. Either all of them are created or none.
    pub fn create_ballots_batch(
        &self,
        caller: &Principal,
        defs: Vec<BallotDef>,
    ) -> Result<Vec<BallotId>, LedgerError> {
        if defs.len() < 2 || defs.len() > self.config.max_create_batch {
            return Err(LedgerError::invalid(format!(
                "a ballot batch must hold between 2 and {} definitions, found {}",
                self.config.max_create_batch,
                defs.len()
            )));
        }
        for (i, def) in defs.iter().enumerate() {
            def.validate(&self.config).map_err(|e| {
                warn!("ledger: rejected ballot batch from {} at element {}: {}", caller, i, e);
                e
            })?;
        }

        let mut state = self.state();
        let now = self.clock.now();
        let mut ids = Vec::with_capacity(defs.len());
        for def in defs {
            let id = BallotId(state.next_ballot_id);
            state.next_ballot_id += 1;

            let ballot = def.into_ballot(id, *caller, now);
            state.ballots.insert(id, ballot);
            state.encrypted_choices.insert(id, BTreeSet::new());
            ids.push(id);
        }

        // Emitted under the state lock, in commit order
        info!("ledger: {} ballots created by {}", ids.len(), caller);
        for id in &ids {
            if let Some(ballot) = state.ballots.get(id) {
                self.notifier.emit(created_event(ballot));
            }
        }

        Ok(ids)
    }

    /// Cast the caller's encrypted choice in a ballot.
    ///
    /// Returns the handle the gateway minted for the choice. Both the ledger
    /// and the voter are granted decrypt capability on it.
    pub fn cast_vote(
        &self,
        caller: &Principal,
        ballot_id: BallotId,
        input: &EncryptedInput,
        proof: &InputProof,
    ) -> Result<CiphertextHandle, LedgerError> {
        let handles = self.cast_many(caller, &[(ballot_id, input, proof)])?;
        Ok(handles[0])
    }

    /// Cast in several ballots at once. Either every cast lands or none does.
    pub fn cast_votes_batch(
        &self,
        caller: &Principal,
        ballot_ids: &[BallotId],
        inputs: &[EncryptedInput],
        proofs: &[InputProof],
    ) -> Result<Vec<CiphertextHandle>, LedgerError> {
        if ballot_ids.len() != inputs.len() || ballot_ids.len() != proofs.len() {
            return Err(LedgerError::invalid(format!(
                "batch arrays differ in length: {} ballots, {} inputs, {} proofs",
                ballot_ids.len(),
                inputs.len(),
                proofs.len()
            )));
        }
        if ballot_ids.is_empty() || ballot_ids.len() > self.config.max_cast_batch {
            return Err(LedgerError::invalid(format!(
                "a cast batch must hold between 1 and {} votes, found {}",
                self.config.max_cast_batch,
                ballot_ids.len()
            )));
        }

        let casts: Vec<(BallotId, &EncryptedInput, &InputProof)> = ballot_ids
            .iter()
            .zip(inputs)
            .zip(proofs)
            .map(|((ballot_id, input), proof)| (*ballot_id, input, proof))
            .collect();

        self.cast_many(caller, &casts)
    }

    /// Validate every cast, then mint and grant on the gateway, then commit.
    ///
    /// Gateway side effects happen before the commit and are harmless if the
    /// commit never comes: minting is idempotent and a grant on an orphaned
    /// handle lets nobody see anything the ledger lists.
    fn cast_many(
        &self,
        caller: &Principal,
        casts: &[(BallotId, &EncryptedInput, &InputProof)],
    ) -> Result<Vec<CiphertextHandle>, LedgerError> {
        let mut state = self.state();
        let now = self.clock.now();

        let mut pending = HashSet::with_capacity(casts.len());
        for (ballot_id, _, _) in casts {
            if let Err(e) = state.check_cast(caller, *ballot_id, now, &pending) {
                warn!("ledger: rejected cast by {}: {}", caller, e);
                return Err(e);
            }
            pending.insert(*ballot_id);
        }

        let mut accepted = Vec::with_capacity(casts.len());
        for (ballot_id, input, proof) in casts {
            let context = self.mint_context(*ballot_id, caller);
            let handle = self.gateway.mint(input, proof, &context).map_err(|e| {
                warn!("ledger: rejected cast by {} in ballot {}: {}", caller, ballot_id, e);
                LedgerError::ProofInvalid(e)
            })?;
            accepted.push(AcceptedCast {
                ballot_id: *ballot_id,
                handle,
            });
        }

        for cast in &accepted {
            self.gateway
                .allow(&cast.handle, &self.principal)
                .map_err(LedgerError::Gateway)?;
            self.gateway
                .allow(&cast.handle, caller)
                .map_err(LedgerError::Gateway)?;
        }

        for cast in &accepted {
            state
                .encrypted_choices
                .entry(cast.ballot_id)
                .or_default()
                .insert(cast.handle);
            state
                .cast_records
                .insert((cast.ballot_id, *caller), cast.handle);
        }

        for cast in &accepted {
            info!("ledger: vote cast by {} in ballot {}", caller, cast.ballot_id);
            self.notifier.emit(LedgerEvent::VoteCast {
                ballot_id: cast.ballot_id,
                voter: *caller,
            });
        }

        Ok(accepted.into_iter().map(|c| c.handle).collect())
    }

    /// Close a ballot whose end time has passed. Anyone may call this.
    pub fn close_ballot(&self, caller: &Principal, ballot_id: BallotId) -> Result<(), LedgerError> {
        let mut state = self.state();
        let now = self.clock.now();
        let cast_count = state.cast_count(ballot_id);
        let ballot = state
            .ballots
            .get_mut(&ballot_id)
            .ok_or(LedgerError::NotFound(ballot_id))?;

        if !ballot.active {
            return Err(LedgerError::AlreadyClosed(ballot_id));
        }
        if now < ballot.end_time {
            return Err(LedgerError::BallotStillOpen(ballot_id));
        }
        ballot.active = false;

        info!(
            "ledger: ballot {} closed by {} with {} votes",
            ballot_id, caller, cast_count
        );
        self.notifier.emit(LedgerEvent::BallotClosed {
            ballot_id,
            cast_count,
        });

        Ok(())
    }

    pub fn get_ballot(&self, ballot_id: BallotId) -> Result<Ballot, LedgerError> {
        self.state().ballot(ballot_id).cloned()
    }

    pub fn get_cast_count(&self, ballot_id: BallotId) -> Result<u64, LedgerError> {
        let state = self.state();
        state.ballot(ballot_id)?;
        Ok(state.cast_count(ballot_id))
    }

    /// False for ballots that do not exist
    pub fn has_voted(&self, ballot_id: BallotId, identity: &Principal) -> bool {
        self.state()
            .cast_records
            .contains_key(&(ballot_id, *identity))
    }

    /// The ballot's handles, ordered by handle so the list says nothing about
    /// who cast what or when. Has no effect on who may decrypt them.
    pub fn list_encrypted_choices(
        &self,
        ballot_id: BallotId,
    ) -> Result<Vec<CiphertextHandle>, LedgerError> {
        let state = self.state();
        state.ballot(ballot_id)?;
        Ok(state
            .encrypted_choices
            .get(&ballot_id)
            .map(|handles| handles.iter().copied().collect())
            .unwrap_or_default())
    }

    /// The handle holding the caller's own choice in a ballot, if they voted.
    ///
    /// There is no way to ask for someone else's handle.
    pub fn choice_of(
        &self,
        caller: &Principal,
        ballot_id: BallotId,
    ) -> Result<Option<CiphertextHandle>, LedgerError> {
        let state = self.state();
        state.ballot(ballot_id)?;
        Ok(state.cast_records.get(&(ballot_id, *caller)).copied())
    }

    /// Grant `requester` decrypt capability on every handle of a closed ballot.
    ///
    /// Granting is idempotent. Returns how many handles were covered.
    pub fn request_decrypt_access(
        &self,
        requester: &Principal,
        ballot_id: BallotId,
    ) -> Result<usize, LedgerError> {
        let state = self.state();
        let ballot = state.ballot(ballot_id)?;
        if ballot.active {
            warn!(
                "ledger: refused decrypt access to {} on open ballot {}",
                requester, ballot_id
            );
            return Err(LedgerError::BallotStillOpen(ballot_id));
        }

        let handles = &state
            .encrypted_choices
            .get(&ballot_id)
            .cloned()
            .unwrap_or_default();
        for handle in handles {
            self.gateway
                .allow(handle, requester)
                .map_err(LedgerError::Gateway)?;
        }

        debug!(
            "ledger: {} granted decrypt access on {} handles of ballot {}",
            requester,
            handles.len(),
            ballot_id
        );
        Ok(handles.len())
    }

    /// True iff the ballot exists and `option` is one of its options
    pub fn validate_option(&self, ballot_id: BallotId, option: u32) -> bool {
        self.state()
            .ballots
            .get(&ballot_id)
            .map(|b| b.has_option(option))
            .unwrap_or(false)
    }

    /// Turnout as a percentage of `expected` participants, capped at 100,
    /// together with the raw cast count. A zero `expected` gives a rate of 0.
    pub fn participation_rate(
        &self,
        ballot_id: BallotId,
        expected: u64,
    ) -> Result<(u64, u64), LedgerError> {
        let cast_count = self.get_cast_count(ballot_id)?;
        if expected == 0 {
            return Ok((0, cast_count));
        }
        let rate = (cast_count.saturating_mul(100) / expected).min(100);
        Ok((rate, cast_count))
    }
}

fn created_event(ballot: &Ballot) -> LedgerEvent {
    LedgerEvent::BallotCreated {
        ballot_id: ballot.id,
        creator: ballot.creator,
        end_time: ballot.end_time,
    }
}

/// The read side of the ledger the decryption coordinator works against
pub trait LedgerView {
    fn ledger_id(&self) -> uuid::Uuid;

    fn get_ballot(&self, ballot_id: BallotId) -> Result<Ballot, LedgerError>;

    fn list_encrypted_choices(&self, ballot_id: BallotId)
        -> Result<Vec<CiphertextHandle>, LedgerError>;

    /// The caller's own handle in a ballot
    fn choice_of(
        &self,
        caller: &Principal,
        ballot_id: BallotId,
    ) -> Result<Option<CiphertextHandle>, LedgerError>;

    fn request_decrypt_access(
        &self,
        requester: &Principal,
        ballot_id: BallotId,
    ) -> Result<usize, LedgerError>;
}

impl<G: Gateway, C: Clock> LedgerView for BallotLedger<G, C> {
    fn ledger_id(&self) -> uuid::Uuid {
        self.ledger_id
    }

    fn get_ballot(&self, ballot_id: BallotId) -> Result<Ballot, LedgerError> {
        BallotLedger::get_ballot(self, ballot_id)
    }

    fn list_encrypted_choices(
        &self,
        ballot_id: BallotId,
    ) -> Result<Vec<CiphertextHandle>, LedgerError> {
        BallotLedger::list_encrypted_choices(self, ballot_id)
    }

    fn choice_of(
        &self,
        caller: &Principal,
        ballot_id: BallotId,
    ) -> Result<Option<CiphertextHandle>, LedgerError> {
        BallotLedger::choice_of(self, caller, ballot_id)
    }

    fn request_decrypt_access(
        &self,
        requester: &Principal,
        ballot_id: BallotId,
    ) -> Result<usize, LedgerError> {
        BallotLedger::request_decrypt_access(self, requester, ballot_id)
    }
}

impl<L: LedgerView + ?Sized> LedgerView for Arc<L> {
    fn ledger_id(&self) -> uuid::Uuid {
        (**self).ledger_id()
    }

    fn get_ballot(&self, ballot_id: BallotId) -> Result<Ballot, LedgerError> {
        (**self).get_ballot(ballot_id)
    }

    fn list_encrypted_choices(
        &self,
        ballot_id: BallotId,
    ) -> Result<Vec<CiphertextHandle>, LedgerError> {
        (**self).list_encrypted_choices(ballot_id)
    }

    fn choice_of(
        &self,
        caller: &Principal,
        ballot_id: BallotId,
    ) -> Result<Option<CiphertextHandle>, LedgerError> {
        (**self).choice_of(caller, ballot_id)
    }

    fn request_decrypt_access(
        &self,
        requester: &Principal,
        ballot_id: BallotId,
    ) -> Result<usize, LedgerError> {
        (**self).request_decrypt_access(requester, ballot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{Fixture, Voter};

    /// Cast count and handle list must agree on every ballot
    fn assert_counts_consistent(fx: &Fixture) {
        let state = fx.ledger.state();
        for id in state.ballots.keys() {
            let listed = state.encrypted_choices.get(id).map(BTreeSet::len).unwrap_or(0);
            let records = state.cast_records.keys().filter(|(b, _)| b == id).count();
            assert_eq!(listed, records);
        }
    }

    #[test]
    fn test_create_ballot() {
        let fx = Fixture::new();
        let events = fx.ledger.subscribe();

        let first = fx.ballot(&["A", "B"], 7);
        let second = fx.ballot(&["A", "B", "C"], 1);
        assert_eq!(first, BallotId(1));
        assert_eq!(second, BallotId(2));

        let ballot = fx.ledger.get_ballot(first).unwrap();
        assert_eq!(ballot.title, "Ballot");
        assert_eq!(ballot.options, vec!["A", "B"]);
        assert_eq!(ballot.start_time, fx.clock.now());
        assert_eq!(ballot.end_time, fx.clock.now() + 7 * SECONDS_PER_DAY);
        assert!(ballot.active);
        assert_eq!(ballot.creator, fx.creator.principal);

        assert_eq!(
            events.try_recv().unwrap(),
            LedgerEvent::BallotCreated {
                ballot_id: first,
                creator: fx.creator.principal,
                end_time: ballot.end_time,
            }
        );

        assert!(matches!(
            fx.ledger.get_ballot(BallotId(3)),
            Err(LedgerError::NotFound(BallotId(3)))
        ));
    }

    #[test]
    fn test_invalid_ballot_consumes_no_id() {
        let fx = Fixture::new();
        let bad = BallotDef::new("Ballot", "Test ballot", &["A", "B"], 0);
        assert!(matches!(
            fx.ledger.create_ballot(&fx.creator.principal, bad),
            Err(LedgerError::InvalidInput(_))
        ));
        assert_eq!(fx.ballot(&["A", "B"], 1), BallotId(1));
    }

    #[test]
    fn test_create_ballots_batch() {
        let fx = Fixture::new();
        let def = |days| BallotDef::new("Ballot", "Test ballot", &["A", "B"], days);

        // Too few, too many
        assert!(matches!(
            fx.ledger.create_ballots_batch(&fx.creator.principal, vec![def(1)]),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            fx.ledger
                .create_ballots_batch(&fx.creator.principal, (0..11).map(|_| def(1)).collect()),
            Err(LedgerError::InvalidInput(_))
        ));

        // One bad element rejects the whole batch
        assert!(matches!(
            fx.ledger
                .create_ballots_batch(&fx.creator.principal, vec![def(1), def(2), def(400)]),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(fx.ledger.get_ballot(BallotId(1)).is_err());

        let ids = fx
            .ledger
            .create_ballots_batch(&fx.creator.principal, vec![def(1), def(2), def(3)])
            .unwrap();
        assert_eq!(ids, vec![BallotId(1), BallotId(2), BallotId(3)]);
        assert_eq!(
            fx.ledger.get_ballot(BallotId(3)).unwrap().end_time,
            fx.clock.now() + 3 * SECONDS_PER_DAY
        );
    }

    #[test]
    fn test_cast_vote() {
        let mut fx = Fixture::new();
        let ballot = fx.ballot(&["A", "B"], 7);
        let alice = Voter::new();
        let events = fx.ledger.subscribe();

        assert!(!fx.ledger.has_voted(ballot, &alice.principal));
        let handle = fx.cast(&alice, ballot, 1).unwrap();

        assert!(fx.ledger.has_voted(ballot, &alice.principal));
        assert_eq!(fx.ledger.get_cast_count(ballot).unwrap(), 1);
        assert_eq!(fx.ledger.list_encrypted_choices(ballot).unwrap(), vec![handle]);
        assert_eq!(fx.ledger.choice_of(&alice.principal, ballot).unwrap(), Some(handle));

        // Both the ledger and the voter may decrypt it, nobody else
        assert!(fx.gateway.is_allowed(&handle, &fx.ledger.principal()));
        assert!(fx.gateway.is_allowed(&handle, &alice.principal));
        assert!(!fx.gateway.is_allowed(&handle, &fx.creator.principal));

        assert_eq!(
            events.try_recv().unwrap(),
            LedgerEvent::VoteCast {
                ballot_id: ballot,
                voter: alice.principal,
            }
        );
        assert_counts_consistent(&fx);
    }

    #[test]
    fn test_cannot_vote_twice() {
        let mut fx = Fixture::new();
        let ballot = fx.ballot(&["A", "B"], 7);
        let alice = Voter::new();

        fx.cast(&alice, ballot, 0).unwrap();
        assert!(matches!(
            fx.cast(&alice, ballot, 1),
            Err(LedgerError::AlreadyVoted(_))
        ));
        assert_eq!(fx.ledger.get_cast_count(ballot).unwrap(), 1);
        assert_counts_consistent(&fx);
    }

    #[test]
    fn test_concurrent_casts_by_one_voter() {
        let mut fx = Fixture::new();
        let ballot = fx.ballot(&["A", "B"], 7);
        let alice = Voter::new();
        let events = fx.ledger.subscribe();

        // Each thread brings its own freshly encrypted, validly attested input
        let inputs: Vec<_> = (0..8).map(|i| fx.inputs(&alice, ballot, i % 2)).collect();
        let start = Arc::new(std::sync::Barrier::new(inputs.len()));
        let threads: Vec<_> = inputs
            .into_iter()
            .map(|(input, proof)| {
                let ledger = fx.ledger.clone();
                let start = start.clone();
                let voter = alice.principal;
                std::thread::spawn(move || {
                    start.wait();
                    ledger.cast_vote(&voter, ballot, &input, &proof)
                })
            })
            .collect();
        let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for result in &results {
            assert!(matches!(result, Ok(_) | Err(LedgerError::AlreadyVoted(_))));
        }
        assert_eq!(fx.ledger.get_cast_count(ballot).unwrap(), 1);
        assert_eq!(fx.ledger.list_encrypted_choices(ballot).unwrap().len(), 1);
        assert_eq!(events.try_iter().count(), 1);
        assert_counts_consistent(&fx);
    }

    #[test]
    fn test_events_follow_commit_order() {
        let mut fx = Fixture::new();
        let ballot = fx.ballot(&["A", "B"], 1);
        let end_time = fx.ledger.get_ballot(ballot).unwrap().end_time;
        fx.clock.set(end_time - 1);
        let events = fx.ledger.subscribe();

        let voters: Vec<Voter> = (0..8).map(|_| Voter::new()).collect();
        let inputs: Vec<_> = voters.iter().map(|v| fx.inputs(v, ballot, 0)).collect();
        let start = Arc::new(std::sync::Barrier::new(voters.len() + 1));

        let mut threads: Vec<_> = voters
            .iter()
            .zip(inputs)
            .map(|(voter, (input, proof))| {
                let ledger = fx.ledger.clone();
                let start = start.clone();
                let voter = voter.principal;
                std::thread::spawn(move || {
                    start.wait();
                    ledger.cast_vote(&voter, ballot, &input, &proof).is_ok()
                })
            })
            .collect();

        // Casts race against the ballot closing
        let ledger = fx.ledger.clone();
        let clock = fx.clock.clone();
        let closer = voters[0].principal;
        threads.push(std::thread::spawn(move || {
            start.wait();
            clock.set(end_time + 1);
            ledger.close_ballot(&closer, ballot).unwrap();
            false
        }));
        let accepted = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|ok| *ok)
            .count() as u64;

        let received: Vec<LedgerEvent> = events.try_iter().collect();
        let closed_at = received
            .iter()
            .position(|e| matches!(e, LedgerEvent::BallotClosed { .. }))
            .unwrap();
        assert_eq!(closed_at, received.len() - 1);
        assert_eq!(
            received[closed_at],
            LedgerEvent::BallotClosed {
                ballot_id: ballot,
                cast_count: closed_at as u64,
            }
        );
        assert_eq!(accepted, closed_at as u64);
        assert_eq!(fx.ledger.get_cast_count(ballot).unwrap(), accepted);
        assert_counts_consistent(&fx);
    }

    #[test]
    fn test_choice_of_is_own_only() {
        let mut fx = Fixture::new();
        let first = fx.ballot(&["A", "B"], 7);
        let second = fx.ballot(&["A", "B"], 7);
        let alice = Voter::new();
        let bob = Voter::new();

        let alice_handle = fx.cast(&alice, first, 1).unwrap();
        let bob_handle = fx.cast(&bob, first, 0).unwrap();

        assert_eq!(fx.ledger.choice_of(&alice.principal, first).unwrap(), Some(alice_handle));
        assert_eq!(fx.ledger.choice_of(&bob.principal, first).unwrap(), Some(bob_handle));
        assert_eq!(fx.ledger.choice_of(&bob.principal, second).unwrap(), None);
        assert!(matches!(
            fx.ledger.choice_of(&bob.principal, BallotId(9)),
            Err(LedgerError::NotFound(_))
        ));

        // The list is ordered by handle, not by who cast first
        let mut expected = vec![alice_handle, bob_handle];
        expected.sort();
        assert_eq!(fx.ledger.list_encrypted_choices(first).unwrap(), expected);
    }

    #[test]
    fn test_cast_outside_voting_period() {
        let mut fx = Fixture::new();
        let ballot = fx.ballot(&["A", "B"], 1);
        let alice = Voter::new();

        assert!(matches!(
            fx.cast(&alice, BallotId(9), 0),
            Err(LedgerError::NotFound(BallotId(9)))
        ));

        // End time itself is still inside the window
        fx.clock.advance(SECONDS_PER_DAY);
        fx.cast(&alice, ballot, 0).unwrap();

        fx.clock.advance(1);
        let bob = Voter::new();
        assert!(matches!(
            fx.cast(&bob, ballot, 0),
            Err(LedgerError::NotVotingPeriod(_))
        ));
        assert!(!fx.ledger.has_voted(ballot, &bob.principal));
    }

    #[test]
    fn test_invalid_proof_does_not_mark_voter() {
        let mut fx = Fixture::new();
        let ballot = fx.ballot(&["A", "B"], 7);
        let alice = Voter::new();
        let bob = Voter::new();

        // Bob's proof on Alice's cast
        let (input, proof) = fx.inputs(&bob, ballot, 0);
        assert!(matches!(
            fx.ledger.cast_vote(&alice.principal, ballot, &input, &proof),
            Err(LedgerError::ProofInvalid(_))
        ));
        assert!(!fx.ledger.has_voted(ballot, &alice.principal));
        assert_eq!(fx.ledger.get_cast_count(ballot).unwrap(), 0);

        // Alice can still vote
        fx.cast(&alice, ballot, 0).unwrap();
    }

    #[test]
    fn test_cast_votes_batch() {
        let mut fx = Fixture::new();
        let first = fx.ballot(&["A", "B"], 7);
        let second = fx.ballot(&["A", "B"], 7);
        let alice = Voter::new();

        let (in1, pr1) = fx.inputs(&alice, first, 0);
        let (in2, pr2) = fx.inputs(&alice, second, 1);

        // Mismatched arrays
        assert!(matches!(
            fx.ledger.cast_votes_batch(
                &alice.principal,
                &[first, second],
                &[in1.clone()],
                &[pr1.clone(), pr2.clone()]
            ),
            Err(LedgerError::InvalidInput(_))
        ));
        // Empty
        assert!(matches!(
            fx.ledger.cast_votes_batch(&alice.principal, &[], &[], &[]),
            Err(LedgerError::InvalidInput(_))
        ));

        let handles = fx
            .ledger
            .cast_votes_batch(
                &alice.principal,
                &[first, second],
                &[in1, in2],
                &[pr1, pr2],
            )
            .unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(fx.ledger.choice_of(&alice.principal, first).unwrap(), Some(handles[0]));
        assert_eq!(fx.ledger.choice_of(&alice.principal, second).unwrap(), Some(handles[1]));
        assert_counts_consistent(&fx);
    }

    #[test]
    fn test_cast_batch_ceiling() {
        let mut fx = Fixture::new();
        let alice = Voter::new();
        let mut ids = Vec::new();
        let mut inputs = Vec::new();
        let mut proofs = Vec::new();
        for _ in 0..6 {
            let id = fx.ballot(&["A", "B"], 7);
            let (input, proof) = fx.inputs(&alice, id, 0);
            ids.push(id);
            inputs.push(input);
            proofs.push(proof);
        }
        assert!(matches!(
            fx.ledger.cast_votes_batch(&alice.principal, &ids, &inputs, &proofs),
            Err(LedgerError::InvalidInput(_))
        ));
        fx.ledger
            .cast_votes_batch(&alice.principal, &ids[..5], &inputs[..5], &proofs[..5])
            .unwrap();
    }

    #[test]
    fn test_cast_batch_is_atomic() {
        let mut fx = Fixture::new();
        let open = fx.ballot(&["A", "B"], 7);
        let short = fx.ballot(&["A", "B"], 1);
        let alice = Voter::new();

        let (in1, pr1) = fx.inputs(&alice, open, 0);
        let (in2, pr2) = fx.inputs(&alice, short, 1);

        // The second ballot is past its window: nothing lands
        fx.clock.advance(SECONDS_PER_DAY + 1);
        assert!(matches!(
            fx.ledger.cast_votes_batch(
                &alice.principal,
                &[open, short],
                &[in1.clone(), in2.clone()],
                &[pr1.clone(), pr2.clone()]
            ),
            Err(LedgerError::NotVotingPeriod(_))
        ));
        assert_eq!(fx.ledger.get_cast_count(open).unwrap(), 0);
        assert_eq!(fx.ledger.get_cast_count(short).unwrap(), 0);
        assert!(!fx.ledger.has_voted(open, &alice.principal));

        // A bad proof late in the batch undoes the earlier elements too
        let other = fx.ballot(&["A", "B"], 7);
        let (in3, _pr3) = fx.inputs(&alice, other, 1);
        assert!(matches!(
            fx.ledger.cast_votes_batch(
                &alice.principal,
                &[open, other],
                &[in1.clone(), in3],
                &[pr1.clone(), pr2]
            ),
            Err(LedgerError::ProofInvalid(_))
        ));
        assert_eq!(fx.ledger.get_cast_count(open).unwrap(), 0);
        assert_eq!(fx.ledger.get_cast_count(other).unwrap(), 0);

        // The same ballot twice in one batch
        let (in4, pr4) = fx.inputs(&alice, open, 1);
        assert!(matches!(
            fx.ledger.cast_votes_batch(
                &alice.principal,
                &[open, open],
                &[in1.clone(), in4],
                &[pr1.clone(), pr4]
            ),
            Err(LedgerError::AlreadyVoted(_))
        ));
        assert_eq!(fx.ledger.get_cast_count(open).unwrap(), 0);

        // The first element, retried alone, still goes through
        fx.ledger.cast_vote(&alice.principal, open, &in1, &pr1).unwrap();
        assert_eq!(fx.ledger.get_cast_count(open).unwrap(), 1);
        assert_counts_consistent(&fx);
    }

    #[test]
    fn test_close_ballot() {
        let fx = Fixture::new();
        let ballot = fx.ballot(&["A", "B"], 2);
        let anyone = Voter::new();
        let events = fx.ledger.subscribe();

        assert!(matches!(
            fx.ledger.close_ballot(&anyone.principal, ballot),
            Err(LedgerError::BallotStillOpen(_))
        ));
        assert!(matches!(
            fx.ledger.close_ballot(&anyone.principal, BallotId(5)),
            Err(LedgerError::NotFound(_))
        ));

        fx.clock.advance(2 * SECONDS_PER_DAY);
        fx.ledger.close_ballot(&anyone.principal, ballot).unwrap();
        assert!(!fx.ledger.get_ballot(ballot).unwrap().active);
        assert_eq!(
            events.try_recv().unwrap(),
            LedgerEvent::BallotClosed {
                ballot_id: ballot,
                cast_count: 0,
            }
        );

        assert!(matches!(
            fx.ledger.close_ballot(&anyone.principal, ballot),
            Err(LedgerError::AlreadyClosed(_))
        ));
        assert!(!fx.ledger.get_ballot(ballot).unwrap().active);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_request_decrypt_access() {
        let mut fx = Fixture::new();
        let ballot = fx.ballot(&["A", "B"], 1);
        let alice = Voter::new();
        let auditor = Voter::new();
        let handle = fx.cast(&alice, ballot, 1).unwrap();

        // Listing grants nothing
        fx.ledger.list_encrypted_choices(ballot).unwrap();
        assert!(!fx.gateway.is_allowed(&handle, &auditor.principal));

        assert!(matches!(
            fx.ledger.request_decrypt_access(&auditor.principal, ballot),
            Err(LedgerError::BallotStillOpen(_))
        ));

        fx.clock.advance(SECONDS_PER_DAY);
        fx.ledger.close_ballot(&auditor.principal, ballot).unwrap();
        assert_eq!(
            fx.ledger.request_decrypt_access(&auditor.principal, ballot).unwrap(),
            1
        );
        assert_eq!(
            fx.ledger.request_decrypt_access(&auditor.principal, ballot).unwrap(),
            1
        );
        assert!(fx.gateway.is_allowed(&handle, &auditor.principal));
    }

    #[test]
    fn test_validate_option() {
        let fx = Fixture::new();
        let ballot = fx.ballot(&["A", "B", "C"], 1);
        assert!(fx.ledger.validate_option(ballot, 0));
        assert!(fx.ledger.validate_option(ballot, 2));
        assert!(!fx.ledger.validate_option(ballot, 3));
        assert!(!fx.ledger.validate_option(BallotId(77), 0));
    }

    #[test]
    fn test_participation_rate() {
        let mut fx = Fixture::new();
        let ballot = fx.ballot(&["A", "B"], 1);
        for choice in &[0, 1, 1] {
            let voter = Voter::new();
            fx.cast(&voter, ballot, *choice).unwrap();
        }

        assert_eq!(fx.ledger.participation_rate(ballot, 0).unwrap(), (0, 3));
        assert_eq!(fx.ledger.participation_rate(ballot, 4).unwrap(), (75, 3));
        assert_eq!(fx.ledger.participation_rate(ballot, 9).unwrap(), (33, 3));
        assert_eq!(fx.ledger.participation_rate(ballot, 2).unwrap(), (100, 3));
        assert!(matches!(
            fx.ledger.participation_rate(BallotId(2), 1),
            Err(LedgerError::NotFound(_))
        ));
    }
}
