//! Change notification for long-polling clients.
//!
//! The [`NotificationHub`] parks requests and wakes them; the
//! [`ChangeScanner`] feeds it (and any other [`ChangeListener`]) with events
//! read from the change log, including those written by other processes.
//!
//! [`ChangeListener`]: crate::core::ChangeListener

mod deferred;
mod hub;
mod scanner;

pub use deferred::PollOutcome;
pub use hub::{NotificationHub, PollRequest};
pub use scanner::ChangeScanner;
