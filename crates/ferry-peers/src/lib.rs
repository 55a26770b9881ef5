//! # Ferry Peers
//!
//! Storage peer selection for fragment distribution.
//!
//! A [`PeerDirectory`] lists the peers the gateway knows about and accepts
//! success/failure reports after every connection attempt. Those reports
//! accumulate in a shared [`PeerFeedback`] table, and each
//! [`PeerIterator`] consults it on every draw, so a peer that just failed
//! for one batch drops to the back of the line for the next.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod directory;
mod error;
mod feedback;
mod iterator;

pub use directory::{PeerDirectory, StaticPeerDirectory};
pub use error::{PeerError, Result};
pub use feedback::{PeerFeedback, PeerScore, DEFAULT_FAILURE_COOLDOWN};
pub use ferry_types::{PeerId, PeerInfo};
pub use iterator::PeerIterator;
