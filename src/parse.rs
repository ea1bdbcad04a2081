use imap_proto::{AttributeValue, MailboxDatum, Response, StatusAttribute};

use crate::error::{Error, ParseError, Result};
use crate::types::{Message, Seq};

/// One FETCH response reduced to what this crate asks for: the sequence
/// number and the payload bytes of the first body section, if any.
#[derive(Debug)]
pub struct FetchPayload {
    pub seq: Seq,
    pub payload: Option<Vec<u8>>,
}

fn invalid(lines: &[u8]) -> Error {
    Error::Parse(ParseError::Invalid(lines.to_vec()))
}

// Unilateral server chatter that can legally be interleaved with the data we
// asked for (EXISTS/RECENT updates, expunge notices, flag-change FETCHes, OK
// lines with response codes). One-shot sessions have no use for it, so it is
// skipped in place. Callers that want FETCH data match it before asking here.
fn is_benign(resp: &Response<'_>) -> bool {
    matches!(
        resp,
        Response::MailboxData(_)
            | Response::Expunge(_)
            | Response::Fetch(..)
            | Response::Data { .. }
    )
}

/// Extracts the sequence numbers from untagged SEARCH responses, preserving
/// server order. A `* SEARCH` line with no ids is a valid empty result.
pub fn parse_ids(lines: &[u8]) -> Result<Vec<Seq>> {
    let mut rest = lines;
    let mut ids = Vec::new();
    while !rest.is_empty() {
        match imap_proto::parser::parse_response(rest) {
            Ok((next, Response::MailboxData(MailboxDatum::Search(found)))) => {
                rest = next;
                ids.extend(found);
            }
            Ok((next, ref resp)) if is_benign(resp) => rest = next,
            _ => return Err(invalid(rest)),
        }
    }
    Ok(ids)
}

/// Extracts the MESSAGES attribute from a STATUS response.
pub fn parse_message_count(lines: &[u8]) -> Result<u32> {
    let mut rest = lines;
    let mut count = None;
    while !rest.is_empty() {
        match imap_proto::parser::parse_response(rest) {
            Ok((next, Response::MailboxData(MailboxDatum::Status { status, .. }))) => {
                rest = next;
                for attr in status {
                    if let StatusAttribute::Messages(n) = attr {
                        count = Some(n);
                    }
                }
            }
            Ok((next, ref resp)) if is_benign(resp) => rest = next,
            _ => return Err(invalid(rest)),
        }
    }
    count.ok_or(Error::Parse(ParseError::MissingStatusAttribute("MESSAGES")))
}

/// Collects FETCH responses. The literal payload is length-driven by the
/// response grammar, so body content that happens to look like protocol lines
/// cannot truncate it.
pub fn parse_fetches(lines: &[u8]) -> Result<Vec<FetchPayload>> {
    let mut rest = lines;
    let mut fetches = Vec::new();
    while !rest.is_empty() {
        match imap_proto::parser::parse_response(rest) {
            Ok((next, Response::Fetch(seq, attrs))) => {
                rest = next;
                let mut payload = None;
                for attr in attrs {
                    if payload.is_none() {
                        if let AttributeValue::BodySection {
                            data: Some(data), ..
                        } = attr
                        {
                            payload = Some(data.into_owned());
                        }
                    }
                }
                fetches.push(FetchPayload { seq, payload });
            }
            Ok((next, ref resp)) if is_benign(resp) => rest = next,
            _ => return Err(invalid(rest)),
        }
    }
    Ok(fetches)
}

/// Finds one header field in a header block, unfolding continuation lines.
pub fn header_value(block: &str, name: &str) -> Option<String> {
    let mut value: Option<String> = None;
    for line in block.lines() {
        if let Some(v) = value.as_mut() {
            // folded continuations belong to the field we just matched
            if line.starts_with(' ') || line.starts_with('\t') {
                v.push(' ');
                v.push_str(line.trim());
                continue;
            }
            break;
        }
        if let Some((key, rest)) = line.split_once(':') {
            if key.eq_ignore_ascii_case(name) {
                value = Some(rest.trim().to_string());
            }
        }
    }
    value.filter(|v| !v.is_empty())
}

/// Builds a descriptor from a `HEADER.FIELDS` block. Missing fields degrade
/// to their placeholder values rather than failing the message.
pub fn message_from_headers(seq: Seq, block: &[u8]) -> Message {
    let text = String::from_utf8_lossy(block);
    let mut msg = Message::placeholder(seq);
    if let Some(v) = header_value(&text, "From") {
        msg.from = v;
    }
    if let Some(v) = header_value(&text, "To") {
        msg.to = v;
    }
    if let Some(v) = header_value(&text, "Subject") {
        msg.subject = v;
    }
    if let Some(v) = header_value(&text, "Date") {
        msg.date = v;
    }
    msg
}

/// For a whole-message fetch, everything after the first blank line.
pub fn body_after_headers(full: &str) -> &str {
    if let Some(pos) = full.find("\r\n\r\n") {
        &full[pos + 4..]
    } else if let Some(pos) = full.find("\n\n") {
        &full[pos + 2..]
    } else {
        full
    }
}
