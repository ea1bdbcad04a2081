use std::cmp::min;
use std::io::{Error, ErrorKind, Read, Result, Write};

/// A scripted `Read + Write` stream for protocol tests: reads serve a canned
/// server transcript, writes are recorded for inspection. Once the transcript
/// is exhausted, reads report EOF.
pub struct MockStream {
    transcript: Vec<u8>,
    read_pos: usize,
    pub written: Vec<u8>,
    read_err: Option<ErrorKind>,
}

impl MockStream {
    pub fn scripted(transcript: &str) -> MockStream {
        MockStream {
            transcript: transcript.as_bytes().to_vec(),
            read_pos: 0,
            written: Vec::new(),
            read_err: None,
        }
    }

    /// A stream with nothing to say; the first read sees EOF.
    pub fn empty() -> MockStream {
        MockStream::scripted("")
    }

    /// A stream whose reads fail with the given error kind.
    pub fn erroring(kind: ErrorKind) -> MockStream {
        MockStream {
            read_err: Some(kind),
            ..MockStream::empty()
        }
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(kind) = self.read_err {
            return Err(Error::new(kind, "scripted read error"));
        }
        if self.read_pos >= self.transcript.len() {
            return Ok(0);
        }
        let n = min(buf.len(), self.transcript.len() - self.read_pos);
        buf[..n].copy_from_slice(&self.transcript[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
