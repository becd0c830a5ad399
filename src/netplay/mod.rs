//! Rollback netplay.
//!
//! - [`RollbackManager`] runs a [`Backend`](crate::Backend) on predicted input
//!   and re-simulates past frames once the real input arrives.
//! - [`Message`] is the wire format exchanged between peers.
//! - [`NetplaySession`] ties the two together for a host or a client.

mod message;
mod rollback;
mod session;

pub use message::Message;
pub use rollback::{FrameOutcome, RollbackManager};
pub use session::{NetplaySession, RESEND_WINDOW};
