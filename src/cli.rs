//! Command-line definitions and argument-to-query translation.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::Result;
use crate::types::{parse_search_date, SearchQuery};

/// Literal an operator passes to leave one of the multi-filter slots unused.
pub const SKIP: &str = "SKIP";

#[derive(Debug, Parser)]
#[command(
    name = "mailprobe",
    version,
    about = "Query and batch-search an IMAP mailbox over TLS"
)]
pub struct Cli {
    /// IMAP server hostname
    #[arg(long)]
    pub host: String,

    /// Account name used for LOGIN
    #[arg(long, short = 'u')]
    pub username: String,

    /// Account password used for LOGIN
    #[arg(long, short = 'p')]
    pub password: String,

    /// IMAPS port
    #[arg(long, default_value_t = 993)]
    pub port: u16,

    /// Per-read timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Courtesy delay between batch items, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub throttle_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in, select INBOX, and log out again
    Check,
    /// Report the number of messages in INBOX
    Count,
    /// Show headers of the most recent N messages
    Latest {
        /// How many messages to list
        count: u32,
    },
    /// Print the text body of one message
    Read {
        /// Message sequence number
        id: u32,
    },
    /// List sequence numbers of messages from a sender
    SearchSender {
        /// Sender address
        email: String,
    },
    /// List sequence numbers of messages whose subject contains the text
    SearchSubject {
        /// Subject text
        text: String,
    },
    /// List sequence numbers of messages received since a date
    SearchSince {
        /// Date, YYYY-MM-DD
        date: String,
    },
    /// Pass a raw IMAP SEARCH criteria string through unchanged
    SearchAdvanced {
        /// Criteria, e.g. 'UNSEEN FROM "a@x.com"'
        criteria: String,
    },
    /// Combine sender/subject/since/before filters; pass SKIP for any slot
    SearchMulti {
        from: String,
        subject: String,
        since: String,
        before: String,
    },
    /// Print the first URL with the given prefix among a sender's messages
    ExtractUrl {
        /// Sender address
        email: String,
        /// URL prefix to look for
        pattern: String,
    },
    /// Search for every sender in a CSV and record the hits
    SearchSenderBatch {
        /// Input CSV, header `email`
        input: PathBuf,
        /// Output CSV
        output: PathBuf,
    },
    /// Extract a URL for every sender in a CSV
    ExtractUrlsBatch {
        /// Input CSV, header `email`
        input: PathBuf,
        /// Output CSV
        output: PathBuf,
        /// URL prefix to look for
        pattern: String,
    },
    /// Re-read a previous search batch's hits and extract URLs from them
    ProcessResults {
        /// Input CSV, header `sender_email,email_id,subject,date,status`
        input: PathBuf,
        /// Output CSV
        output: PathBuf,
        /// URL prefix to look for
        pattern: String,
    },
}

/// Builds the multi-filter query, treating the literal `SKIP` as an unused
/// slot. Dates are validated here, before any connection is made.
pub fn multi_query(from: &str, subject: &str, since: &str, before: &str) -> Result<SearchQuery> {
    let mut query = SearchQuery::default();
    if from != SKIP {
        query = query.sender(from);
    }
    if subject != SKIP {
        query = query.subject(subject);
    }
    if since != SKIP {
        query = query.since(parse_search_date(since)?);
    }
    if before != SKIP {
        query = query.before(parse_search_date(before)?);
    }
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_slots_skipped_searches_everything() {
        let q = multi_query(SKIP, SKIP, SKIP, SKIP).unwrap();
        assert_eq!(q.to_criteria().unwrap(), "ALL");
    }

    #[test]
    fn partial_slots_combine() {
        let q = multi_query("a@x.com", SKIP, "2025-05-01", SKIP).unwrap();
        assert_eq!(
            q.to_criteria().unwrap(),
            "FROM \"a@x.com\" SINCE 01-May-2025"
        );
    }

    #[test]
    fn bad_date_in_a_slot_is_rejected() {
        assert!(multi_query(SKIP, SKIP, "2025/05/01", SKIP).is_err());
    }

    #[test]
    fn cli_parses_a_full_command_line() {
        let cli = Cli::try_parse_from([
            "mailprobe",
            "--host",
            "imap.example.com",
            "-u",
            "user",
            "-p",
            "secret",
            "search-sender",
            "a@x.com",
        ])
        .unwrap();
        assert_eq!(cli.host, "imap.example.com");
        assert_eq!(cli.port, 993);
        assert!(matches!(
            cli.command,
            Command::SearchSender { ref email } if email == "a@x.com"
        ));
    }

    #[test]
    fn missing_credentials_fail_to_parse() {
        assert!(Cli::try_parse_from(["mailprobe", "count"]).is_err());
    }
}
