use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use bufstream::BufStream;
use imap_proto::{Response, Status};
use log::trace;
use native_tls::{TlsConnector, TlsStream};

use crate::error::{Error, ParseError, Result};
use crate::parse;
use crate::qp;
use crate::types::{validate_str, Credentials, Message, SearchQuery, Seq};

static TAG_PREFIX: &str = "a";
const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

/// An unauthenticated connection to an IMAP server.
///
/// Issues tagged commands over the underlying stream and reads each response
/// until the matching tagged completion line, so command pacing is driven by
/// the server rather than by guessed delays.
pub struct Client<T: Read + Write> {
    stream: BufStream<T>,
    tag: u32,
}

/// An authenticated session, obtained from [`Client::login`]. One session maps
/// to one logical operation: callers run the preamble, a command or two, and
/// [`Session::logout`], then drop the connection.
pub struct Session<T: Read + Write> {
    client: Client<T>,
}

impl Client<TlsStream<TcpStream>> {
    /// Opens a TLS connection to `host:port` and consumes the server
    /// greeting. Every subsequent read on the socket is bounded by `timeout`.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let tcp = TcpStream::connect((host, port))?;
        tcp.set_read_timeout(Some(timeout))?;
        tcp.set_write_timeout(Some(timeout))?;
        let connector = TlsConnector::builder().build()?;
        let tls = connector.connect(host, tcp)?;
        let mut client = Client::new(tls);
        client.read_greeting()?;
        Ok(client)
    }
}

impl<T: Read + Write> Client<T> {
    /// Wraps an established stream. The caller is responsible for the
    /// greeting if the peer sends one.
    pub fn new(stream: T) -> Client<T> {
        Client {
            stream: BufStream::new(stream),
            tag: 0,
        }
    }

    /// Authenticates with LOGIN and returns the session on success. A tagged
    /// `NO`/`BAD` means the server rejected the credentials; the connection
    /// is dropped rather than reused.
    pub fn login(mut self, username: &str, password: &str) -> Result<Session<T>> {
        let user = validate_str(username)?;
        let pass = validate_str(password)?;
        let command = format!("LOGIN {} {}", user, pass);
        let display = format!("LOGIN {} <redacted>", user);
        self.run_command_redacted(&command, &display)?;
        match self.read_response() {
            Ok(_) => Ok(Session::new(self)),
            Err(Error::No(why)) | Err(Error::Bad(why)) => Err(Error::Auth(why)),
            Err(e) => Err(e),
        }
    }

    fn read_greeting(&mut self) -> Result<()> {
        let mut greeting = Vec::new();
        self.readline(&mut greeting)?;
        Ok(())
    }

    fn run_command(&mut self, untagged: &str) -> Result<()> {
        let owned = untagged.to_string();
        self.run_command_redacted(&owned, &owned)
    }

    fn run_command_redacted(&mut self, untagged: &str, display: &str) -> Result<()> {
        self.tag += 1;
        let tag = format!("{}{}", TAG_PREFIX, self.tag);
        trace!("C: {} {}", tag, display);
        self.write_line(format!("{} {}", tag, untagged).as_bytes())
    }

    fn run_command_and_read_response(&mut self, untagged: &str) -> Result<Vec<u8>> {
        self.run_command(untagged)?;
        self.read_response()
    }

    fn run_command_and_check_ok(&mut self, untagged: &str) -> Result<()> {
        self.run_command_and_read_response(untagged).map(|_| ())
    }

    fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.read_response_onto(&mut data)?;
        Ok(data)
    }

    /// Reads lines until the completion tagged with the current command tag,
    /// accumulating untagged data in `data`. Responses carrying literals are
    /// fed back to the grammar until the declared byte count is satisfied, so
    /// payload content resembling protocol lines cannot end the read early.
    fn read_response_onto(&mut self, data: &mut Vec<u8>) -> Result<()> {
        enum Step {
            Done {
                tag: String,
                status: Status,
                why: Option<String>,
            },
            Untagged,
            Incomplete,
            Garbage,
        }

        let match_tag = format!("{}{}", TAG_PREFIX, self.tag);
        let mut line_start = data.len();
        loop {
            self.readline(data)?;
            let step = match imap_proto::parser::parse_response(&data[line_start..]) {
                Ok((
                    _,
                    Response::Done {
                        tag,
                        status,
                        information,
                        ..
                    },
                )) => Step::Done {
                    tag: String::from_utf8_lossy(tag.as_bytes()).into_owned(),
                    status,
                    why: information.map(|s| s.to_string()),
                },
                Ok(..) => Step::Untagged,
                Err(nom::Err::Incomplete(_)) => Step::Incomplete,
                Err(_) => Step::Garbage,
            };

            match step {
                Step::Done { tag, status, why } => {
                    if tag != match_tag {
                        return Err(Error::Parse(ParseError::UnexpectedTag(tag)));
                    }
                    let why = why.unwrap_or_else(|| "no explanation given".to_string());
                    return match status {
                        Status::Ok => {
                            data.truncate(line_start);
                            Ok(())
                        }
                        Status::No => Err(Error::No(why)),
                        Status::Bad => Err(Error::Bad(why)),
                        _ => Err(Error::Parse(ParseError::Invalid(data.split_off(line_start)))),
                    };
                }
                // a complete untagged response; keep its bytes, read on
                Step::Untagged => line_start = data.len(),
                // mid-literal; the grammar needs more bytes from the wire
                Step::Incomplete => {}
                Step::Garbage => {
                    return Err(Error::Parse(ParseError::Invalid(data.split_off(line_start))))
                }
            }
        }
    }

    fn readline(&mut self, into: &mut Vec<u8>) -> Result<usize> {
        use std::io::BufRead;
        let read = match self.stream.read_until(LF, into) {
            Ok(n) => n,
            Err(e) => {
                return Err(match e.kind() {
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout,
                    _ => Error::Io(e),
                })
            }
        };
        if read == 0 {
            return Err(Error::ConnectionLost);
        }
        trace!(
            "S: {}",
            String::from_utf8_lossy(&into[into.len() - read..]).trim_end()
        );
        Ok(read)
    }

    fn write_line(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf)?;
        self.stream.write_all(&[CR, LF])?;
        self.stream.flush()?;
        Ok(())
    }
}

impl Session<TlsStream<TcpStream>> {
    /// Runs the fixed connection preamble in order: TLS connect, greeting,
    /// LOGIN, SELECT INBOX. Each step's tagged completion is observed before
    /// the next command is sent; any failure aborts the remaining steps.
    pub fn open(creds: &Credentials, timeout: Duration) -> Result<Self> {
        let client = Client::connect(&creds.host, creds.port, timeout)?;
        let mut session = client.login(&creds.username, &creds.password)?;
        session.select_inbox()?;
        Ok(session)
    }
}

impl<T: Read + Write> Session<T> {
    fn new(client: Client<T>) -> Session<T> {
        Session { client }
    }

    /// Selects INBOX. A tagged `NO`/`BAD` (missing mailbox, access denied)
    /// maps to [`Error::Mailbox`].
    pub fn select_inbox(&mut self) -> Result<()> {
        let command = format!("SELECT {}", validate_str("INBOX")?);
        match self.client.run_command_and_check_ok(&command) {
            Err(Error::No(why)) | Err(Error::Bad(why)) => Err(Error::Mailbox(why)),
            other => other,
        }
    }

    /// The number of messages in INBOX, per `STATUS INBOX (MESSAGES)`.
    pub fn count(&mut self) -> Result<u32> {
        let lines = self
            .client
            .run_command_and_read_response("STATUS INBOX (MESSAGES)")?;
        parse::parse_message_count(&lines)
    }

    /// Sequence numbers matching the query, in server order. An empty result
    /// is a normal outcome, not an error.
    pub fn search(&mut self, query: &SearchQuery) -> Result<Vec<Seq>> {
        let criteria = query.to_criteria()?;
        let lines = self
            .client
            .run_command_and_read_response(&format!("SEARCH {}", criteria))?;
        parse::parse_ids(&lines)
    }

    /// Fetches From/To/Subject/Date for one message. Fields the server does
    /// not return degrade to placeholder values.
    pub fn fetch_headers(&mut self, seq: Seq) -> Result<Message> {
        let lines = self.client.run_command_and_read_response(&format!(
            "FETCH {} BODY.PEEK[HEADER.FIELDS (FROM TO SUBJECT DATE)]",
            seq
        ))?;
        for fetch in parse::parse_fetches(&lines)? {
            if let Some(payload) = fetch.payload {
                return Ok(parse::message_from_headers(seq, &payload));
            }
        }
        Ok(Message::placeholder(seq))
    }

    /// Header descriptors for the most recent `n` messages, oldest first.
    pub fn latest(&mut self, n: u32) -> Result<Vec<Message>> {
        let total = self.count()?;
        if n == 0 || total == 0 {
            return Ok(Vec::new());
        }
        let first = if total > n { total - n + 1 } else { 1 };
        let mut messages = Vec::new();
        for seq in first..=total {
            messages.push(self.fetch_headers(seq)?);
        }
        Ok(messages)
    }

    /// The text body of one message: `BODY[TEXT]` first, then the whole
    /// message split at its first blank line if the text section came back
    /// empty. [`Error::EmptyBody`] when both come back empty.
    pub fn fetch_body(&mut self, seq: Seq) -> Result<String> {
        let lines = self
            .client
            .run_command_and_read_response(&format!("FETCH {} BODY[TEXT]", seq))?;
        if let Some(text) = first_payload(&lines)? {
            if !text.trim().is_empty() {
                return Ok(text);
            }
        }

        let lines = self
            .client
            .run_command_and_read_response(&format!("FETCH {} BODY[]", seq))?;
        if let Some(full) = first_payload(&lines)? {
            let body = parse::body_after_headers(&full);
            if !body.trim().is_empty() {
                return Ok(body.to_string());
            }
        }

        Err(Error::EmptyBody(seq))
    }

    /// The first URL with the given prefix in the message body, after
    /// quoted-printable normalization.
    pub fn extract_url(&mut self, seq: Seq, pattern: &str) -> Result<Option<String>> {
        let body = self.fetch_body(seq)?;
        Ok(qp::extract_url(&body, pattern))
    }

    /// Ends the session. Callers that are already unwinding may ignore the
    /// result; the connection is dropped either way.
    pub fn logout(&mut self) -> Result<()> {
        self.client.run_command_and_check_ok("LOGOUT")
    }
}

fn first_payload(lines: &[u8]) -> Result<Option<String>> {
    for fetch in parse::parse_fetches(lines)? {
        if let Some(payload) = fetch.payload {
            return Ok(Some(String::from_utf8_lossy(&payload).into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_stream::MockStream;
    use crate::types::SearchQuery;

    fn scripted_session(ops_script: &str) -> Session<MockStream> {
        let script = format!(
            "a1 OK LOGIN completed\r\na2 OK [READ-WRITE] SELECT completed\r\n{}",
            ops_script
        );
        let client = Client::new(MockStream::scripted(&script));
        let mut session = client.login("user", "secret").unwrap();
        session.select_inbox().unwrap();
        session
    }

    fn written(session: &Session<MockStream>) -> String {
        String::from_utf8(session.client.stream.get_ref().written.clone()).unwrap()
    }

    #[test]
    fn login_sends_quoted_credentials() {
        let client = Client::new(MockStream::scripted("a1 OK Logged in\r\n"));
        let session = client.login("user", "secret").unwrap();
        assert_eq!(written(&session), "a1 LOGIN \"user\" \"secret\"\r\n");
    }

    #[test]
    fn rejected_login_is_an_auth_error() {
        let client = Client::new(MockStream::scripted(
            "a1 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n",
        ));
        match client.login("user", "wrong") {
            Err(Error::Auth(why)) => assert!(why.contains("Invalid credentials")),
            other => panic!("expected an auth error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn crlf_in_password_never_reaches_the_wire() {
        let client = Client::new(MockStream::scripted(""));
        assert!(matches!(
            client.login("user", "pass\r\na2 LOGOUT"),
            Err(Error::Validate(_))
        ));
    }

    #[test]
    fn failed_select_is_a_mailbox_error() {
        let client = Client::new(MockStream::scripted(
            "a1 OK Logged in\r\na2 NO Mailbox does not exist\r\n",
        ));
        let mut session = client.login("user", "secret").unwrap();
        match session.select_inbox() {
            Err(Error::Mailbox(why)) => assert!(why.contains("does not exist")),
            other => panic!("expected a mailbox error, got {:?}", other),
        }
    }

    #[test]
    fn preamble_and_logout_need_no_command_in_between() {
        let mut session = scripted_session("a3 OK LOGOUT completed\r\n");
        session.logout().unwrap();
        assert_eq!(
            written(&session),
            "a1 LOGIN \"user\" \"secret\"\r\n\
             a2 SELECT \"INBOX\"\r\n\
             a3 LOGOUT\r\n"
        );
    }

    #[test]
    fn count_reads_the_status_response() {
        let mut session = scripted_session(
            "* STATUS INBOX (MESSAGES 3)\r\na3 OK STATUS completed\r\n",
        );
        assert_eq!(session.count().unwrap(), 3);
        assert!(written(&session).ends_with("a3 STATUS INBOX (MESSAGES)\r\n"));
    }

    #[test]
    fn count_is_idempotent_against_an_unchanged_mailbox() {
        let mut session = scripted_session(
            "* STATUS INBOX (MESSAGES 12)\r\na3 OK STATUS completed\r\n\
             * STATUS INBOX (MESSAGES 12)\r\na4 OK STATUS completed\r\n",
        );
        let first = session.count().unwrap();
        let second = session.count().unwrap();
        assert_eq!(first, 12);
        assert_eq!(first, second);
    }

    #[test]
    fn search_preserves_server_order() {
        let mut session =
            scripted_session("* SEARCH 4 7 9\r\na3 OK SEARCH completed\r\n");
        let ids = session
            .search(&SearchQuery::from_sender("a@x.com"))
            .unwrap();
        assert_eq!(ids, vec![4, 7, 9]);
        assert!(written(&session).ends_with("a3 SEARCH FROM \"a@x.com\"\r\n"));
    }

    #[test]
    fn empty_search_result_is_not_an_error() {
        let mut session = scripted_session("* SEARCH\r\na3 OK SEARCH completed\r\n");
        let ids = session.search(&SearchQuery::from_subject("nope")).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn fetch_headers_builds_a_descriptor() {
        let headers = "From: Alice <alice@x.com>\r\nSubject: Welcome aboard\r\nDate: Thu, 29 May 2025 10:00:00 +0000\r\n\r\n";
        let mut session = scripted_session(&format!(
            "* 5 FETCH (BODY[HEADER.FIELDS (FROM TO SUBJECT DATE)] {{{}}}\r\n{})\r\na3 OK FETCH completed\r\n",
            headers.len(),
            headers
        ));
        let msg = session.fetch_headers(5).unwrap();
        assert_eq!(msg.seq, 5);
        assert_eq!(msg.from, "Alice <alice@x.com>");
        assert_eq!(msg.subject, "Welcome aboard");
        assert_eq!(msg.to, crate::types::NOT_PRESENT);
    }

    #[test]
    fn body_literal_read_is_length_driven() {
        // the body embeds a line shaped like this command's own completion;
        // the literal's byte count must carry the read past it
        let body = "click here\r\na3 OK FETCH completed\r\ntrailing text";
        let mut session = scripted_session(&format!(
            "* 1 FETCH (BODY[TEXT] {{{}}}\r\n{})\r\na3 OK FETCH completed\r\n",
            body.len(),
            body
        ));
        assert_eq!(session.fetch_body(1).unwrap(), body);
    }

    #[test]
    fn empty_text_section_falls_back_to_full_message() {
        let full = "Subject: x\r\nDate: y\r\n\r\nthe real body\r\n";
        let mut session = scripted_session(&format!(
            "a3 OK FETCH completed\r\n\
             * 7 FETCH (BODY[] {{{}}}\r\n{})\r\na4 OK FETCH completed\r\n",
            full.len(),
            full
        ));
        assert_eq!(session.fetch_body(7).unwrap(), "the real body\r\n");
        let wire = written(&session);
        assert!(wire.contains("a3 FETCH 7 BODY[TEXT]\r\n"));
        assert!(wire.contains("a4 FETCH 7 BODY[]\r\n"));
    }

    #[test]
    fn empty_body_from_both_fetches_is_an_error() {
        let mut session = scripted_session(
            "a3 OK FETCH completed\r\na4 OK FETCH completed\r\n",
        );
        assert!(matches!(session.fetch_body(7), Err(Error::EmptyBody(7))));
    }

    #[test]
    fn url_extraction_from_a_soft_broken_body() {
        let body = "Please visit <https://domain.com/verify/abc123=\r\n def> today";
        let mut session = scripted_session(&format!(
            "* 2 FETCH (BODY[TEXT] {{{}}}\r\n{})\r\na3 OK FETCH completed\r\n",
            body.len(),
            body
        ));
        let url = session
            .extract_url(2, "https://domain.com/verify/")
            .unwrap();
        assert_eq!(url.as_deref(), Some("https://domain.com/verify/abc123def"));
    }

    #[test]
    fn eof_mid_response_is_connection_lost() {
        let client = Client::new(MockStream::empty());
        assert!(matches!(
            client.login("user", "secret"),
            Err(Error::ConnectionLost)
        ));
    }

    #[test]
    fn blocked_read_maps_to_timeout() {
        let client = Client::new(MockStream::erroring(io::ErrorKind::WouldBlock));
        assert!(matches!(
            client.login("user", "secret"),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn completion_with_a_foreign_tag_is_a_parse_error() {
        let client = Client::new(MockStream::scripted("a9 OK whose response is this\r\n"));
        match client.login("user", "secret") {
            Err(Error::Parse(ParseError::UnexpectedTag(tag))) => assert_eq!(tag, "a9"),
            other => panic!("expected an unexpected-tag error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn greeting_is_consumed_before_commands() {
        let mut client = Client::new(MockStream::scripted("* OK Dovecot ready.\r\n"));
        client.read_greeting().unwrap();
    }
}
