//! CSV batch drivers: iterate senders or prior search results, one fresh
//! session per item, and record per-item outcomes instead of aborting the run.
//!
//! A batch "succeeds" when the mechanism ran to completion; individual item
//! failures are logged, written to the output file as sentinel rows, and
//! counted in the returned [`BatchSummary`].

use std::fmt;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{info, warn};
use native_tls::TlsStream;
use serde::{Deserialize, Serialize};

use crate::client::Session;
use crate::error::{Error, Result, ValidateError};
use crate::qp;
use crate::types::{validate_email, Credentials, SearchQuery, Seq, NOT_PRESENT};

/// Sentinel subject written for a sender with zero search hits.
pub const NO_EMAILS_FOUND: &str = "No emails found";
/// Sentinel URL written when no message matched the pattern.
pub const NO_MATCHING_URL: &str = "No matching URL found";

const SENDER_HEADER: &str = "email";
const RESULT_HEADER: &str = "sender_email,email_id,subject,date,status";

/// Produces one authenticated, INBOX-selected session per batch item.
///
/// Batch drivers are generic over this so tests can feed them scripted
/// transports; [`Reconnector`] is the production implementation.
pub trait SessionSource {
    type Transport: Read + Write;

    fn open(&mut self) -> Result<Session<Self::Transport>>;
}

/// Opens a fresh TLS session for every item, the one-connection-per-operation
/// lifecycle this tool uses everywhere; connections are never reused across
/// items.
pub struct Reconnector {
    creds: Credentials,
    timeout: Duration,
}

impl Reconnector {
    pub fn new(creds: Credentials, timeout: Duration) -> Reconnector {
        Reconnector { creds, timeout }
    }
}

impl SessionSource for Reconnector {
    type Transport = TlsStream<TcpStream>;

    fn open(&mut self) -> Result<Session<TlsStream<TcpStream>>> {
        Session::open(&self.creds, self.timeout)
    }
}

/// One row of search-batch output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub sender_email: String,
    pub email_id: String,
    pub subject: String,
    pub date: String,
    pub status: RowStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Found,
    NotFound,
}

/// One row of URL-extraction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRow {
    pub email: String,
    pub subject: String,
    #[serde(rename = "matchURL")]
    pub match_url: String,
}

/// Processed/succeeded/failed counts for one batch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} succeeded, {} failed",
            self.processed, self.succeeded, self.failed
        )
    }
}

fn csv_err(err: csv::Error) -> Error {
    ValidateError::CsvRow(err.to_string()).into()
}

fn check_header(rdr: &mut csv::Reader<std::fs::File>, expected: &'static str) -> Result<()> {
    let found = rdr.headers().map_err(csv_err)?;
    let found = found.iter().collect::<Vec<_>>().join(",");
    if found == expected {
        Ok(())
    } else {
        Err(ValidateError::CsvHeader { expected, found }.into())
    }
}

fn throttle_between_items(first: &mut bool, throttle: Duration) {
    // server courtesy only; correctness never depends on this delay
    if !*first && !throttle.is_zero() {
        thread::sleep(throttle);
    }
    *first = false;
}

/// Searches INBOX for messages from every sender listed in `input` (header
/// `email`) and writes one `found` row per hit, or a single `not_found`
/// sentinel row for senders with no hits, to `output`.
pub fn search_sender_batch<S: SessionSource>(
    source: &mut S,
    input: &Path,
    output: &Path,
    throttle: Duration,
) -> Result<BatchSummary> {
    let mut rdr = csv::Reader::from_path(input).map_err(csv_err)?;
    check_header(&mut rdr, SENDER_HEADER)?;
    let mut wtr = csv::Writer::from_path(output).map_err(csv_err)?;

    let mut summary = BatchSummary::default();
    let mut first = true;
    for record in rdr.records() {
        throttle_between_items(&mut first, throttle);
        summary.processed += 1;

        let sender = match record {
            Ok(ref r) => r.get(0).unwrap_or("").to_string(),
            Err(e) => {
                warn!("skipping unreadable input row: {}", e);
                summary.failed += 1;
                continue;
            }
        };

        match search_one_sender(source, &sender) {
            Ok(rows) if rows.is_empty() => {
                wtr.serialize(not_found_row(&sender)).map_err(csv_err)?;
                summary.succeeded += 1;
            }
            Ok(rows) => {
                for row in rows {
                    wtr.serialize(row).map_err(csv_err)?;
                }
                summary.succeeded += 1;
            }
            Err(e) => {
                warn!("sender {} failed: {}", sender, e);
                wtr.serialize(not_found_row(&sender)).map_err(csv_err)?;
                summary.failed += 1;
            }
        }
        wtr.flush().map_err(Error::Io)?;
    }

    info!("search batch done: {}", summary);
    Ok(summary)
}

fn not_found_row(sender: &str) -> ResultRow {
    ResultRow {
        sender_email: sender.to_string(),
        email_id: NOT_PRESENT.to_string(),
        subject: NO_EMAILS_FOUND.to_string(),
        date: NOT_PRESENT.to_string(),
        status: RowStatus::NotFound,
    }
}

fn search_one_sender<S: SessionSource>(source: &mut S, sender: &str) -> Result<Vec<ResultRow>> {
    validate_email(sender)?;
    let mut session = source.open()?;
    let ids = session.search(&SearchQuery::from_sender(sender))?;
    let mut rows = Vec::new();
    for seq in ids {
        let msg = session.fetch_headers(seq)?;
        rows.push(ResultRow {
            sender_email: sender.to_string(),
            email_id: seq.to_string(),
            subject: msg.subject,
            date: msg.date,
            status: RowStatus::Found,
        });
    }
    let _ = session.logout();
    Ok(rows)
}

/// For every sender in `input` (header `email`), scans that sender's messages
/// in server search order and records the first URL matching `pattern`; one
/// output row per sender, with the sentinel URL when nothing matched.
pub fn extract_urls_batch<S: SessionSource>(
    source: &mut S,
    input: &Path,
    output: &Path,
    pattern: &str,
    throttle: Duration,
) -> Result<BatchSummary> {
    let mut rdr = csv::Reader::from_path(input).map_err(csv_err)?;
    check_header(&mut rdr, SENDER_HEADER)?;
    let mut wtr = csv::Writer::from_path(output).map_err(csv_err)?;

    let mut summary = BatchSummary::default();
    let mut first = true;
    for record in rdr.records() {
        throttle_between_items(&mut first, throttle);
        summary.processed += 1;

        let sender = match record {
            Ok(ref r) => r.get(0).unwrap_or("").to_string(),
            Err(e) => {
                warn!("skipping unreadable input row: {}", e);
                summary.failed += 1;
                continue;
            }
        };

        match extract_url_for_sender(source, &sender, pattern) {
            Ok(row) => {
                wtr.serialize(row).map_err(csv_err)?;
                summary.succeeded += 1;
            }
            Err(e) => {
                warn!("sender {} failed: {}", sender, e);
                wtr.serialize(UrlRow {
                    email: sender.clone(),
                    subject: NOT_PRESENT.to_string(),
                    match_url: NO_MATCHING_URL.to_string(),
                })
                .map_err(csv_err)?;
                summary.failed += 1;
            }
        }
        wtr.flush().map_err(Error::Io)?;
    }

    info!("url extraction done: {}", summary);
    Ok(summary)
}

/// The single-sender form of URL extraction, also used by the CLI verb.
///
/// Scanning stops at the first message with any match; messages whose body
/// cannot be read degrade to "no match here" and scanning continues.
pub fn extract_url_for_sender<S: SessionSource>(
    source: &mut S,
    sender: &str,
    pattern: &str,
) -> Result<UrlRow> {
    validate_email(sender)?;
    let mut session = source.open()?;
    let ids = session.search(&SearchQuery::from_sender(sender))?;
    for seq in ids {
        let url = match session.fetch_body(seq) {
            Ok(body) => qp::extract_url(&body, pattern),
            Err(Error::EmptyBody(_)) => None,
            Err(e) => return Err(e),
        };
        if let Some(url) = url {
            let subject = session
                .fetch_headers(seq)
                .map(|m| m.subject)
                .unwrap_or_else(|_| NOT_PRESENT.to_string());
            let _ = session.logout();
            return Ok(UrlRow {
                email: sender.to_string(),
                subject,
                match_url: url,
            });
        }
    }
    let _ = session.logout();
    Ok(UrlRow {
        email: sender.to_string(),
        subject: NOT_PRESENT.to_string(),
        match_url: NO_MATCHING_URL.to_string(),
    })
}

/// Re-reads messages recorded by a previous search batch (header
/// `sender_email,email_id,subject,date,status`) and extracts the first URL
/// matching `pattern` from each `found` row's body. `not_found` rows pass
/// through with the sentinel URL.
pub fn process_results<S: SessionSource>(
    source: &mut S,
    input: &Path,
    output: &Path,
    pattern: &str,
    throttle: Duration,
) -> Result<BatchSummary> {
    let mut rdr = csv::Reader::from_path(input).map_err(csv_err)?;
    check_header(&mut rdr, RESULT_HEADER)?;
    let mut wtr = csv::Writer::from_path(output).map_err(csv_err)?;

    let mut summary = BatchSummary::default();
    let mut first = true;
    for row in rdr.deserialize::<ResultRow>() {
        throttle_between_items(&mut first, throttle);
        summary.processed += 1;

        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!("skipping unreadable input row: {}", e);
                summary.failed += 1;
                continue;
            }
        };

        let out = match row.status {
            RowStatus::NotFound => Ok(UrlRow {
                email: row.sender_email.clone(),
                subject: row.subject.clone(),
                match_url: NO_MATCHING_URL.to_string(),
            }),
            RowStatus::Found => read_result_row(source, &row, pattern),
        };

        match out {
            Ok(url_row) => {
                wtr.serialize(url_row).map_err(csv_err)?;
                summary.succeeded += 1;
            }
            Err(e) => {
                warn!("row for {} failed: {}", row.sender_email, e);
                wtr.serialize(UrlRow {
                    email: row.sender_email,
                    subject: row.subject,
                    match_url: NO_MATCHING_URL.to_string(),
                })
                .map_err(csv_err)?;
                summary.failed += 1;
            }
        }
        wtr.flush().map_err(Error::Io)?;
    }

    info!("result processing done: {}", summary);
    Ok(summary)
}

fn read_result_row<S: SessionSource>(
    source: &mut S,
    row: &ResultRow,
    pattern: &str,
) -> Result<UrlRow> {
    let seq: Seq = row
        .email_id
        .parse()
        .map_err(|_| ValidateError::CsvRow(format!("bad email_id {:?}", row.email_id)))?;
    let mut session = source.open()?;
    let url = match session.fetch_body(seq) {
        Ok(body) => qp::extract_url(&body, pattern),
        Err(Error::EmptyBody(_)) => None,
        Err(e) => return Err(e),
    };
    let _ = session.logout();
    Ok(UrlRow {
        email: row.sender_email.clone(),
        subject: row.subject.clone(),
        match_url: url.unwrap_or_else(|| NO_MATCHING_URL.to_string()),
    })
}
