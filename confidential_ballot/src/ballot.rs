use crate::*;

/// Ballot identifier, assigned by the ledger starting at 1
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct BallotId(pub u64);

impl std::fmt::Display for BallotId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single vote definition.
///
/// Everything except `active` is fixed at creation. `active` goes from true
/// to false exactly once, when the ballot is closed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    pub id: BallotId,
    pub title: String,
    pub description: String,
    pub options: Vec<String>,
    pub start_time: u64,
    pub end_time: u64,
    pub active: bool,
    pub creator: Principal,
}

impl Ballot {
    /// True iff votes may be cast at `now`
    pub fn is_voting_period(&self, now: u64) -> bool {
        self.active && self.start_time <= now && now <= self.end_time
    }

    /// True iff `option` indexes one of this ballot's options
    pub fn has_option(&self, option: u32) -> bool {
        (option as usize) < self.options.len()
    }
}

/// What a creator submits to open a ballot
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BallotDef {
    pub title: String,
    pub description: String,
    pub options: Vec<String>,
    pub duration_days: u64,
}

impl BallotDef {
    pub fn new<T, D, O>(title: T, description: D, options: &[O], duration_days: u64) -> Self
    where
        T: Into<String>,
        D: Into<String>,
        O: AsRef<str>,
    {
        BallotDef {
            title: title.into(),
            description: description.into(),
            options: options.iter().map(|o| o.as_ref().to_owned()).collect(),
            duration_days,
        }
    }

    /// Check the definition against the ledger's limits
    pub fn validate(&self, config: &LedgerConfig) -> Result<(), LedgerError> {
        if self.title.trim().is_empty() {
            return Err(LedgerError::invalid("title must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(LedgerError::invalid("description must not be empty"));
        }
        if self.options.len() < 2 {
            return Err(LedgerError::invalid("a ballot needs at least 2 options"));
        }
        if self.options.len() > config.max_options {
            return Err(LedgerError::invalid(format!(
                "a ballot may have at most {} options, found {}",
                config.max_options,
                self.options.len()
            )));
        }
        if self.options.iter().any(|o| o.trim().is_empty()) {
            return Err(LedgerError::invalid("option labels must not be empty"));
        }
        if self.duration_days < config.min_duration_days
            || self.duration_days > config.max_duration_days
        {
            return Err(LedgerError::invalid(format!(
                "duration must be between {} and {} days, found {}",
                config.min_duration_days, config.max_duration_days, self.duration_days
            )));
        }
        Ok(())
    }

    /// Lay the definition out as a ballot starting at `now`
    pub(crate) fn into_ballot(self, id: BallotId, creator: Principal, now: u64) -> Ballot {
        Ballot {
            id,
            title: self.title,
            description: self.description,
            options: self.options,
            start_time: now,
            end_time: now.saturating_add(self.duration_days.saturating_mul(SECONDS_PER_DAY)),
            active: true,
            creator,
        }
    }
}
