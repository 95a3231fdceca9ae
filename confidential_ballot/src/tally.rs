use crate::*;
use indexmap::IndexMap;

/// Decrypted results of one ballot.
///
/// `counts` only holds options that received at least one vote, ordered by
/// option index. Plaintexts naming no option of the ballot are counted in
/// `invalid` instead.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BallotTally {
    pub ballot_id: BallotId,
    pub counts: IndexMap<u32, u64>,
    pub invalid: u64,
    pub total: u64,
}

impl BallotTally {
    pub fn empty(ballot_id: BallotId) -> Self {
        BallotTally {
            ballot_id,
            counts: IndexMap::new(),
            invalid: 0,
            total: 0,
        }
    }

    /// Fold decrypted option indices into a tally against `ballot`'s options
    pub fn from_choices<I>(ballot: &Ballot, choices: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let mut tally = BallotTally::empty(ballot.id);
        for choice in choices {
            tally.total += 1;
            if ballot.has_option(choice) {
                *tally.counts.entry(choice).or_insert(0) += 1;
            } else {
                tally.invalid += 1;
            }
        }
        tally.counts.sort_keys();
        tally
    }

    pub fn count(&self, option: u32) -> u64 {
        self.counts.get(&option).copied().unwrap_or(0)
    }

    /// Every option label with its count, zeros included, in ballot order
    pub fn labelled<'a>(&self, ballot: &'a Ballot) -> Vec<(&'a str, u64)> {
        ballot
            .options
            .iter()
            .enumerate()
            .map(|(i, label)| (label.as_str(), self.count(i as u32)))
            .collect()
    }
}
