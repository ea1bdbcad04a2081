//! Query an IMAP mailbox over TLS from the command line.
//!
//! Each logical operation runs over its own connection: TLS to port 993, the
//! server greeting, `LOGIN`, `SELECT INBOX`, the operation's command(s), and
//! `LOGOUT`. Commands are paced by reading until the matching tagged
//! completion line, never by fixed delays, and every blocking read is bounded
//! by a timeout.
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use mailprobe::{Credentials, SearchQuery, Session};
//!
//! # fn main() -> mailprobe::Result<()> {
//! let creds = Credentials::new("imap.example.com", "user", "password");
//! let mut session = Session::open(&creds, Duration::from_secs(30))?;
//!
//! let total = session.count()?;
//! println!("{} messages in INBOX", total);
//!
//! for seq in session.search(&SearchQuery::from_sender("updates@example.com"))? {
//!     let msg = session.fetch_headers(seq)?;
//!     println!("{}: {}", seq, msg.subject);
//! }
//!
//! session.logout()?;
//! # Ok(())
//! # }
//! ```
//!
//! The batch drivers in [`batch`] run the same operations over CSV input
//! files, reconnecting per item and recording per-item failures in the output
//! instead of aborting the run.

pub mod batch;
pub mod cli;
pub mod client;
pub mod error;
pub mod qp;
pub mod types;

mod parse;

pub use crate::client::{Client, Session};
pub use crate::error::{Error, Result};
pub use crate::types::{Credentials, Message, SearchQuery, Seq};

#[cfg(test)]
mod mock_stream;
