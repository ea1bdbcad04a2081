//! Domain types shared across the crate.

use std::fmt;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Result, ValidateError};

/// A message's position within the mailbox at the time of the query, from 1 to
/// the number of messages. Sequence numbers are reassigned when messages are
/// expunged, so they are not stable identifiers across sessions.
pub type Seq = u32;

/// Placeholder for a header field the server did not return.
pub const NOT_PRESENT: &str = "N/A";
/// Placeholder for a missing Subject header.
pub const NO_SUBJECT: &str = "No Subject";

/// Connection parameters for one session. Supplied by the caller, immutable
/// for the lifetime of the invocation, never persisted.
#[derive(Clone)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Credentials for the standard IMAPS port.
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            host: host.into(),
            port: 993,
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One parsed message: its sequence number, whatever header fields the server
/// returned (sentinel placeholders otherwise), and optionally the body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub seq: Seq,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
    pub body: Option<String>,
}

impl Message {
    /// A descriptor with every field at its sentinel value.
    pub fn placeholder(seq: Seq) -> Message {
        Message {
            seq,
            from: NOT_PRESENT.to_string(),
            to: NOT_PRESENT.to_string(),
            subject: NO_SUBJECT.to_string(),
            date: NOT_PRESENT.to_string(),
            body: None,
        }
    }
}

macro_rules! quote {
    ($x:expr) => {
        format!("\"{}\"", $x.replace('\\', "\\\\").replace('"', "\\\""))
    };
}

/// Quotes `value` for the wire, rejecting strings that would break the
/// line-oriented protocol.
pub(crate) fn validate_str(value: &str) -> Result<String> {
    let quoted = quote!(value);
    if quoted.contains('\n') {
        return Err(ValidateError::Char('\n').into());
    }
    if quoted.contains('\r') {
        return Err(ValidateError::Char('\r').into());
    }
    Ok(quoted)
}

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap();
}

/// Checks that `addr` is shaped like an email address before it is spliced
/// into a SEARCH criteria string.
pub fn validate_email(addr: &str) -> Result<()> {
    if EMAIL.is_match(addr) {
        Ok(())
    } else {
        Err(ValidateError::Email(addr.to_string()).into())
    }
}

/// Parses a `YYYY-MM-DD` argument. The accepted shape is deliberately strict;
/// `2025/05/29` and friends are validation errors, not best-effort guesses.
pub fn parse_search_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| ValidateError::Date(s.to_string()).into())
}

/// Renders a date the way SEARCH criteria want it, e.g. `29-May-2025`.
fn imap_date(date: &NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

/// Caller-side SEARCH filters. All fields are optional and combinable; an
/// empty query searches the whole mailbox.
#[derive(Debug, Default, Clone)]
pub struct SearchQuery {
    from: Option<String>,
    subject: Option<String>,
    since: Option<NaiveDate>,
    before: Option<NaiveDate>,
    raw: Option<String>,
}

impl SearchQuery {
    /// Messages from the given sender.
    pub fn from_sender(addr: impl Into<String>) -> SearchQuery {
        SearchQuery::default().sender(addr)
    }

    /// Messages whose subject contains the given text.
    pub fn from_subject(text: impl Into<String>) -> SearchQuery {
        SearchQuery::default().subject(text)
    }

    /// A raw criteria string passed through verbatim, for callers that want
    /// flags or server extensions the builder does not model.
    pub fn raw(criteria: impl Into<String>) -> SearchQuery {
        SearchQuery {
            raw: Some(criteria.into()),
            ..SearchQuery::default()
        }
    }

    pub fn sender(mut self, addr: impl Into<String>) -> SearchQuery {
        self.from = Some(addr.into());
        self
    }

    pub fn subject(mut self, text: impl Into<String>) -> SearchQuery {
        self.subject = Some(text.into());
        self
    }

    pub fn since(mut self, date: NaiveDate) -> SearchQuery {
        self.since = Some(date);
        self
    }

    pub fn before(mut self, date: NaiveDate) -> SearchQuery {
        self.before = Some(date);
        self
    }

    /// Renders the criteria string sent after `SEARCH`.
    pub fn to_criteria(&self) -> Result<String> {
        if let Some(ref raw) = self.raw {
            if raw.contains('\r') || raw.contains('\n') {
                return Err(ValidateError::Char('\n').into());
            }
            return Ok(raw.clone());
        }

        let mut parts = Vec::new();
        if let Some(ref from) = self.from {
            parts.push(format!("FROM {}", validate_str(from)?));
        }
        if let Some(ref subject) = self.subject {
            parts.push(format!("SUBJECT {}", validate_str(subject)?));
        }
        if let Some(ref since) = self.since {
            parts.push(format!("SINCE {}", imap_date(since)));
        }
        if let Some(ref before) = self.before {
            parts.push(format!("BEFORE {}", imap_date(before)));
        }

        if parts.is_empty() {
            Ok("ALL".to_string())
        } else {
            Ok(parts.join(" "))
        }
    }
}
