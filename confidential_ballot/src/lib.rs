//! Confidential multi-option ballots.
//!
//! Voters encrypt their choice to a confidential value gateway and cast the
//! resulting handle on a [`BallotLedger`]. Once a ballot is closed, a
//! [`DecryptionCoordinator`] runs a signed, time-bounded handshake with the
//! gateway to turn every handle back into a plaintext and count them.

#[macro_use]
extern crate serde;

mod authorization;
mod ballot;
mod config;
mod coordinator;
pub mod ecies;
mod error;
mod events;
mod gateway;
mod handle;
mod ledger;
mod principal;
mod serde_hex;
mod signed;
mod tally;
mod util;

pub use authorization::*;
pub use ballot::*;
pub use config::*;
pub use coordinator::*;
pub use error::*;
pub use events::*;
pub use gateway::*;
pub use handle::*;
pub use ledger::*;
pub use principal::*;
pub use serde_hex::*;
pub use signed::*;
pub use tally::*;
pub use util::*;
