// src/parser.rs
use crate::http::Method;

/// Byte range into a connection's read buffer. Parsed request fields are
/// held as spans rather than references so they stay valid across the
/// partial reads of a single request and are invalidated wholesale when
/// the buffer is reset for the next one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    pub fn slice<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..self.start + self.len]
    }

    pub fn as_str<'a>(&self, buf: &'a [u8]) -> Option<&'a str> {
        std::str::from_utf8(self.slice(buf)).ok()
    }
}

/// Parsing phase within one request. Advances monotonically and is reset
/// to `RequestLine` when a persistent connection starts a new request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    RequestLine,
    Headers,
    Body,
}

/// Outcome of scanning for the next CRLF boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// A full line was consumed; both terminator bytes are now NUL.
    Complete,
    /// No boundary yet; more input is needed.
    Incomplete,
    /// A bare CR not followed by LF.
    Malformed,
}

/// Verdict of driving the parser over the currently buffered bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// More input is required; suspend and wait for the next read.
    Incomplete,
    /// A complete, valid request is buffered.
    Complete,
    /// The request violates the supported protocol subset.
    BadRequest,
}

/// Incremental request parser. Cursors persist across reads, so a line
/// split over several non-blocking reads is resumed, not restarted.
///
/// Invariant: `line_start <= scan_cursor <= read_end <= buffer capacity`.
#[derive(Debug, Default)]
pub struct RequestParser {
    pub phase: Phase,
    /// Bytes scanned for line boundaries so far.
    pub scan_cursor: usize,
    /// Start of the line currently being interpreted; once headers are
    /// done this is the start of the body.
    pub line_start: usize,
    pub method: Option<Method>,
    pub url: Span,
    pub version: Span,
    pub host: Span,
    pub content_length: usize,
    pub keep_alive: bool,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Drive the state machine over `buf[..read_end]`. Re-entrant: called
    /// once per drained read until it yields a terminal verdict.
    pub fn advance(&mut self, buf: &mut [u8], read_end: usize) -> ParseOutcome {
        debug_assert!(self.line_start <= self.scan_cursor);
        debug_assert!(self.scan_cursor <= read_end && read_end <= buf.len());

        loop {
            if self.phase == Phase::Body {
                // Not line-oriented: the request is done once the buffer
                // holds the announced number of body bytes. The body is
                // buffered but never interpreted; a GET response depends
                // only on the URL.
                return if read_end - self.line_start >= self.content_length {
                    ParseOutcome::Complete
                } else {
                    ParseOutcome::Incomplete
                };
            }

            match self.next_line(buf, read_end) {
                LineStatus::Incomplete => return ParseOutcome::Incomplete,
                LineStatus::Malformed => return ParseOutcome::BadRequest,
                LineStatus::Complete => {}
            }

            let start = self.line_start;
            let len = self.scan_cursor - 2 - start;
            self.line_start = self.scan_cursor;

            let outcome = match self.phase {
                Phase::RequestLine => self.parse_request_line(buf, start, len),
                Phase::Headers => self.parse_header_line(buf, start, len),
                Phase::Body => unreachable!("body phase handled above"),
            };
            match outcome {
                ParseOutcome::Incomplete => continue,
                verdict => return verdict,
            }
        }
    }

    /// Scan for the next CRLF. On success both terminator bytes are
    /// replaced with NUL and the cursor moves past them.
    fn next_line(&mut self, buf: &mut [u8], read_end: usize) -> LineStatus {
        while self.scan_cursor < read_end {
            if buf[self.scan_cursor] == b'\r' {
                if self.scan_cursor + 1 == read_end {
                    return LineStatus::Incomplete;
                }
                if buf[self.scan_cursor + 1] == b'\n' {
                    buf[self.scan_cursor] = 0;
                    buf[self.scan_cursor + 1] = 0;
                    self.scan_cursor += 2;
                    return LineStatus::Complete;
                }
                return LineStatus::Malformed;
            }
            self.scan_cursor += 1;
        }
        LineStatus::Incomplete
    }

    /// `GET <target> HTTP/1.1` — anything else is a bad request. A
    /// scheme-qualified target (`http://host/path`) is cut down to the
    /// path starting at its first `/`.
    fn parse_request_line(&mut self, buf: &[u8], start: usize, len: usize) -> ParseOutcome {
        let line = &buf[start..start + len];

        let Some(sp1) = line.iter().position(|&b| b == b' ') else {
            return ParseOutcome::BadRequest;
        };
        if Method::from_bytes(&line[..sp1]) != Method::Get {
            return ParseOutcome::BadRequest;
        }
        self.method = Some(Method::Get);

        let rest = &line[sp1 + 1..];
        let Some(sp2) = rest.iter().position(|&b| b == b' ') else {
            return ParseOutcome::BadRequest;
        };
        let version = &rest[sp2 + 1..];
        if !version.eq_ignore_ascii_case(b"HTTP/1.1") {
            return ParseOutcome::BadRequest;
        }
        self.version = Span {
            start: start + sp1 + 1 + sp2 + 1,
            len: version.len(),
        };

        let mut url_off = 0;
        let mut url = &rest[..sp2];
        if url.len() >= 7 && url[..7].eq_ignore_ascii_case(b"http://") {
            match url[7..].iter().position(|&b| b == b'/') {
                Some(slash) => {
                    url_off = 7 + slash;
                    url = &url[url_off..];
                }
                None => return ParseOutcome::BadRequest,
            }
        }
        if url.is_empty() || url[0] != b'/' {
            return ParseOutcome::BadRequest;
        }
        self.url = Span {
            start: start + sp1 + 1 + url_off,
            len: url.len(),
        };

        self.phase = Phase::Headers;
        ParseOutcome::Incomplete
    }

    /// One header line. An empty line ends the block; of the recognized
    /// field names, `Connection`, `Content-Length` and `Host` set their
    /// fields and every other name is ignored.
    fn parse_header_line(&mut self, buf: &[u8], start: usize, len: usize) -> ParseOutcome {
        if len == 0 {
            if self.content_length > 0 {
                self.phase = Phase::Body;
                return ParseOutcome::Incomplete;
            }
            return ParseOutcome::Complete;
        }

        let line = &buf[start..start + len];
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            tracing::debug!("ignoring header line without a colon");
            return ParseOutcome::Incomplete;
        };
        let name = &line[..colon];
        let mut val_off = colon + 1;
        while val_off < len && line[val_off] == b' ' {
            val_off += 1;
        }
        let value = &line[val_off..];

        if name.eq_ignore_ascii_case(b"Connection") {
            if value.eq_ignore_ascii_case(b"keep-alive") {
                self.keep_alive = true;
            }
        } else if name.eq_ignore_ascii_case(b"Content-Length") {
            let parsed = std::str::from_utf8(value)
                .ok()
                .and_then(|t| t.trim().parse::<usize>().ok());
            match parsed {
                Some(n) => self.content_length = n,
                None => return ParseOutcome::BadRequest,
            }
        } else if name.eq_ignore_ascii_case(b"Host") {
            self.host = Span {
                start: start + val_off,
                len: len - val_off,
            };
        } else {
            tracing::debug!(
                header = %String::from_utf8_lossy(name),
                "ignoring unrecognized header"
            );
        }
        ParseOutcome::Incomplete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(buf: &mut [u8; 2048], end: &mut usize, bytes: &[u8]) {
        buf[*end..*end + bytes.len()].copy_from_slice(bytes);
        *end += bytes.len();
    }

    #[test]
    fn line_scanner_terminates_and_advances() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        buf[..10].copy_from_slice(b"abc\r\nrest\r");
        assert_eq!(parser.next_line(&mut buf, 10), LineStatus::Complete);
        assert_eq!(buf[3], 0);
        assert_eq!(buf[4], 0);
        assert_eq!(parser.scan_cursor, 5);
    }

    #[test]
    fn line_scanner_lone_cr_is_incomplete() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        buf[..4].copy_from_slice(b"abc\r");
        assert_eq!(parser.next_line(&mut buf, 4), LineStatus::Incomplete);
        // The CR is not consumed; the next read resumes at it.
        assert_eq!(parser.scan_cursor, 3);
    }

    #[test]
    fn line_scanner_cr_without_lf_is_malformed() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        buf[..5].copy_from_slice(b"abc\rx");
        assert_eq!(parser.next_line(&mut buf, 5), LineStatus::Malformed);
    }

    #[test]
    fn request_line_fields() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        let mut end = 0;
        feed(&mut buf, &mut end, b"GET /a.html HTTP/1.1\r\n");

        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::Incomplete);
        assert_eq!(parser.method, Some(Method::Get));
        assert_eq!(parser.url.as_str(&buf), Some("/a.html"));
        assert_eq!(parser.version.as_str(&buf), Some("HTTP/1.1"));
        assert_eq!(parser.phase, Phase::Headers);
    }

    #[test]
    fn non_get_method_is_bad_request() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        let mut end = 0;
        feed(&mut buf, &mut end, b"POST / HTTP/1.1\r\n");
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::BadRequest);
    }

    #[test]
    fn wrong_version_is_bad_request() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        let mut end = 0;
        feed(&mut buf, &mut end, b"GET / HTTP/1.0\r\n");
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::BadRequest);
    }

    #[test]
    fn scheme_prefix_is_stripped() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        let mut end = 0;
        feed(
            &mut buf,
            &mut end,
            b"GET http://example.com:8080/x/y.html HTTP/1.1\r\n",
        );
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::Incomplete);
        assert_eq!(parser.url.as_str(&buf), Some("/x/y.html"));
    }

    #[test]
    fn empty_header_block_completes_without_body() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        let mut end = 0;
        feed(
            &mut buf,
            &mut end,
            b"GET / HTTP/1.1\r\nHost: x\r\n\r\n",
        );
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::Complete);
        assert_eq!(parser.host.as_str(&buf), Some("x"));
    }

    #[test]
    fn content_length_gates_completion_on_body_bytes() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        let mut end = 0;
        feed(
            &mut buf,
            &mut end,
            b"GET / HTTP/1.1\r\nContent-Length: 5\r\n\r\nab",
        );
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::Incomplete);
        assert_eq!(parser.phase, Phase::Body);
        assert_eq!(parser.content_length, 5);

        feed(&mut buf, &mut end, b"cde");
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::Complete);
    }

    #[test]
    fn malformed_content_length_is_bad_request() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        let mut end = 0;
        feed(
            &mut buf,
            &mut end,
            b"GET / HTTP/1.1\r\nContent-Length: five\r\n\r\n",
        );
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::BadRequest);
    }

    #[test]
    fn negative_content_length_is_bad_request() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        let mut end = 0;
        feed(
            &mut buf,
            &mut end,
            b"GET / HTTP/1.1\r\nContent-Length: -1\r\n\r\n",
        );
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::BadRequest);
    }

    #[test]
    fn connection_keep_alive_sets_flag() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        let mut end = 0;
        feed(
            &mut buf,
            &mut end,
            b"GET / HTTP/1.1\r\nCONNECTION: Keep-Alive\r\n\r\n",
        );
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::Complete);
        assert!(parser.keep_alive);
    }

    #[test]
    fn connection_close_leaves_flag_unset() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        let mut end = 0;
        feed(
            &mut buf,
            &mut end,
            b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n",
        );
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::Complete);
        assert!(!parser.keep_alive);
    }

    #[test]
    fn unrecognized_headers_are_ignored() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        let mut end = 0;
        feed(
            &mut buf,
            &mut end,
            b"GET / HTTP/1.1\r\nUser-Agent: curl/8\r\nAccept: */*\r\n\r\n",
        );
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::Complete);
    }

    #[test]
    fn partial_line_resumes_across_reads() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        let mut end = 0;

        feed(&mut buf, &mut end, b"GET /a.h");
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::Incomplete);

        feed(&mut buf, &mut end, b"tml HTTP/1.1\r\nHo");
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::Incomplete);
        assert_eq!(parser.phase, Phase::Headers);

        feed(&mut buf, &mut end, b"st: here\r\n\r\n");
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::Complete);
        assert_eq!(parser.url.as_str(&buf), Some("/a.html"));
        assert_eq!(parser.host.as_str(&buf), Some("here"));
    }

    #[test]
    fn reset_clears_all_state() {
        let mut parser = RequestParser::new();
        let mut buf = [0u8; 2048];
        let mut end = 0;
        feed(
            &mut buf,
            &mut end,
            b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n",
        );
        assert_eq!(parser.advance(&mut buf, end), ParseOutcome::Complete);

        parser.reset();
        assert_eq!(parser.phase, Phase::RequestLine);
        assert_eq!(parser.scan_cursor, 0);
        assert_eq!(parser.line_start, 0);
        assert!(!parser.keep_alive);
        assert_eq!(parser.content_length, 0);
    }
}
