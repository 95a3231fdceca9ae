use crate::*;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

/// Observer-visible notifications, one per committed state transition
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    BallotCreated {
        ballot_id: BallotId,
        creator: Principal,
        end_time: u64,
    },
    VoteCast {
        ballot_id: BallotId,
        voter: Principal,
    },
    BallotClosed {
        ballot_id: BallotId,
        cast_count: u64,
    },
    TallyDecrypted {
        ballot_id: BallotId,
        requester: Principal,
        total: u64,
    },
}

/// Fans events out to every live subscriber.
///
/// Delivery is best effort: subscribers whose receiver was dropped are forgotten.
#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<Vec<Sender<LedgerEvent>>>,
}

impl Notifier {
    pub fn subscribe(&self) -> Receiver<LedgerEvent> {
        let (sender, receiver) = channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    pub fn emit(&self, event: LedgerEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|s| s.send(event.clone()).is_ok());
    }
}
