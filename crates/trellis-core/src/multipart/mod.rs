//! Multipart form-data parsing
//!
//! A buffered state machine over the request input:
//!
//! ```text
//! FastForward --boundary--> MimeHead --blank line--> MimeBody --boundary--> MimeHead
//!                                                        \--final boundary--> Done
//! ```
//!
//! Text parts become string params, file parts are streamed into storage
//! from a [`TempfileFactory`]. Every storage handle opened by a parse that
//! fails is closed before the error is returned.

mod generator;
mod upload;

pub use generator::{build_multipart, MULTIPART_BOUNDARY};
pub use upload::{
    default_tempfile_factory, memory_tempfile_factory, TempStorage, TempfileFactory, TempfileRegistry,
    UploadedFile,
};

use crate::query::{Param, Params, QueryParser};
use crate::utils::unescape_path;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};

const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
const MAX_HEAD_SIZE: usize = 64 * 1024;

static MULTIPART_BOUNDARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\Amultipart/.*boundary="?([^";,]+)"?"#).expect("multipart regex"));
static DISPOSITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^Content-Disposition:[ \t]*([^\r\n]*)").expect("multipart regex"));
static DISPOSITION_PARAM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#";\s*([^\s=;]+)\s*=\s*("(?:\\"|[^"])*"|[^;\r\n]*)"#).expect("multipart regex")
});
static BROKEN_FILENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)Content-Disposition:.*filename=(?:"(.*)"|([^;\s]*))"#).expect("multipart regex")
});
static CONTENT_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^Content-Type:[ \t]*([^\r\n]*)").expect("multipart regex"));
static CONTENT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^Content-ID:\s*([^\r\n]*)").expect("multipart regex"));
static CHARSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i);\s*charset\s*=\s*"?([^";\s]+)"?"#).expect("multipart regex"));
static PERCENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"%.?.?").expect("multipart regex"));

/// Multipart parser configuration
#[derive(Clone)]
pub struct MultipartConfig {
    /// Bytes read from the input per step
    pub buffer_size: usize,
    /// Maximum number of parts, 0 for unlimited
    pub part_limit: usize,
    /// Maximum number of file parts, 0 for unlimited
    pub file_limit: usize,
    /// Parser used to place part names into the params tree
    pub parser: QueryParser,
    pub tempfile_factory: TempfileFactory,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            part_limit: 0,
            file_limit: 0,
            parser: QueryParser::default(),
            tempfile_factory: default_tempfile_factory(),
        }
    }
}

impl fmt::Debug for MultipartConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartConfig")
            .field("buffer_size", &self.buffer_size)
            .field("part_limit", &self.part_limit)
            .field("file_limit", &self.file_limit)
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

impl MultipartConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with `TRELLIS_MULTIPART_PART_LIMIT`, `TRELLIS_MULTIPART_FILE_LIMIT`
    /// and `TRELLIS_PARAM_DEPTH_LIMIT` applied
    pub fn from_env() -> Self {
        Self {
            part_limit: env_limit("TRELLIS_MULTIPART_PART_LIMIT"),
            file_limit: env_limit("TRELLIS_MULTIPART_FILE_LIMIT"),
            parser: QueryParser::from_env(),
            ..Self::default()
        }
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn part_limit(mut self, limit: usize) -> Self {
        self.part_limit = limit;
        self
    }

    pub fn file_limit(mut self, limit: usize) -> Self {
        self.file_limit = limit;
        self
    }

    pub fn parser(mut self, parser: QueryParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn tempfile_factory(mut self, factory: TempfileFactory) -> Self {
        self.tempfile_factory = factory;
        self
    }
}

fn env_limit(var: &str) -> usize {
    match std::env::var(var) {
        Ok(raw) => match raw.trim().parse() {
            Ok(limit) => limit,
            Err(_) => {
                tracing::warn!(var, value = %raw, "ignoring invalid multipart limit");
                0
            }
        },
        Err(_) => 0,
    }
}

/// Result of a successful parse
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub params: Params,
    /// Every file handle opened during the parse
    pub tempfiles: Vec<UploadedFile>,
}

/// Extract the boundary of a `multipart/*` content type
pub fn boundary(content_type: &str) -> Option<&str> {
    MULTIPART_BOUNDARY_RE
        .captures(content_type)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Parse a multipart body
///
/// Returns `Ok(None)` when `content_type` is not multipart with a boundary.
/// Reads at most `content_length` bytes when one is given.
pub fn parse_multipart<R: Read>(
    input: R,
    content_type: &str,
    content_length: Option<u64>,
    config: &MultipartConfig,
) -> Result<Option<MultipartForm>> {
    let Some(boundary) = boundary(content_type) else {
        return Ok(None);
    };
    if content_length == Some(0) {
        return Ok(Some(MultipartForm::default()));
    }

    let reader = input.take(content_length.unwrap_or(u64::MAX));
    let mut parser = Parser::new(reader, boundary, config);
    match parser.run() {
        Ok(()) => {
            tracing::debug!(
                params = parser.params.len(),
                files = parser.tempfiles.len(),
                "parsed multipart body"
            );
            Ok(Some(MultipartForm {
                params: parser.params,
                tempfiles: parser.tempfiles,
            }))
        }
        Err(e) => {
            parser.current = None;
            for file in &parser.tempfiles {
                file.close();
            }
            tracing::debug!(error = %e, "multipart parse failed");
            Err(e)
        }
    }
}

// ============================================================================
// Part headers
// ============================================================================

/// Fields extracted from one part's header block
#[derive(Debug, Default, PartialEq)]
struct PartHead {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

impl PartHead {
    fn parse(head: &str) -> Self {
        let content_type = CONTENT_TYPE_RE
            .captures(head)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());

        let mut disposition: HashMap<String, String> = HashMap::new();
        if let Some(line) = DISPOSITION_RE.captures(head).and_then(|c| c.get(1)) {
            for cap in DISPOSITION_PARAM_RE.captures_iter(line.as_str()) {
                let key = cap[1].to_ascii_lowercase();
                disposition.entry(key).or_insert_with(|| cap[2].trim().to_string());
            }
        }

        let name = disposition
            .get("name")
            .map(|n| dequote(n))
            .or_else(|| {
                CONTENT_ID_RE
                    .captures(head)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty())
            });

        Self {
            name,
            filename: Self::filename(head, &disposition),
            content_type,
        }
    }

    fn filename(head: &str, disposition: &HashMap<String, String>) -> Option<String> {
        let raw = if let Some(extended) = disposition.get("filename*") {
            // charset'language'percent-encoded-value
            let value = extended.splitn(3, '\'').nth(2).unwrap_or(extended);
            unescape_path(value).unwrap_or_else(|_| value.to_string())
        } else if let Some(plain) = disposition.get("filename") {
            match plain.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                Some(inner) => inner.to_string(),
                None => plain.clone(),
            }
        } else {
            let cap = BROKEN_FILENAME_RE.captures(head)?;
            cap.get(1).or_else(|| cap.get(2))?.as_str().to_string()
        };

        let mut filename = raw;
        if filename.contains('%') && PERCENT_RE.find_iter(&filename).all(|m| is_hex_escape(m.as_str())) {
            if let Ok(decoded) = unescape_path(&filename) {
                filename = decoded;
            }
        }
        // Backslash escapes, unless the name looks like a Windows path
        if !has_bare_backslash(&filename) {
            filename = unbackslash(&filename);
        }
        Some(filename)
    }
}

fn is_hex_escape(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 3 && b[1].is_ascii_hexdigit() && b[2].is_ascii_hexdigit()
}

/// A backslash followed by something other than `\` or `"`
fn has_bare_backslash(s: &str) -> bool {
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('\\') | Some('"') => {}
                _ => return true,
            }
        }
    }
    false
}

fn unbackslash(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn dequote(s: &str) -> String {
    match s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => unbackslash(inner),
        None => s.to_string(),
    }
}

/// Decode a text part according to its charset
fn decode_text(bytes: Vec<u8>, content_type: Option<&str>) -> String {
    let charset = content_type
        .and_then(|ct| CHARSET_RE.captures(ct))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase());
    match charset.as_deref() {
        Some("iso-8859-1") | Some("latin1") | Some("us-ascii") => bytes.iter().map(|&b| b as char).collect(),
        _ => match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        },
    }
}

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FastForward,
    MimeHead,
    MimeBody,
    Done,
}

enum PartBody {
    Text(Vec<u8>),
    File { storage: Box<dyn TempStorage>, size: u64 },
    /// `filename=""`: nothing was uploaded
    Discard,
}

struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    head: String,
    body: PartBody,
}

struct Parser<'c, R> {
    reader: R,
    buf: Vec<u8>,
    /// `--boundary`
    boundary: Vec<u8>,
    /// `\r\n--boundary`
    delimiter: Vec<u8>,
    config: &'c MultipartConfig,
    params: Params,
    tempfiles: Vec<UploadedFile>,
    current: Option<Part>,
    parts: usize,
    files: usize,
}

impl<'c, R: Read> Parser<'c, R> {
    fn new(reader: R, boundary: &str, config: &'c MultipartConfig) -> Self {
        let boundary = format!("--{}", boundary).into_bytes();
        let mut delimiter = b"\r\n".to_vec();
        delimiter.extend_from_slice(&boundary);
        Self {
            reader,
            buf: Vec::with_capacity(config.buffer_size * 2),
            boundary,
            delimiter,
            config,
            params: Params::new(),
            tempfiles: Vec::new(),
            current: None,
            parts: 0,
            files: 0,
        }
    }

    /// Read one chunk; false at end of input
    fn fill(&mut self) -> Result<bool> {
        let start = self.buf.len();
        self.buf.resize(start + self.config.buffer_size, 0);
        let n = loop {
            match self.reader.read(&mut self.buf[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e.into());
                }
            }
        };
        self.buf.truncate(start + n);
        Ok(n > 0)
    }

    fn run(&mut self) -> Result<()> {
        let mut state = State::FastForward;
        loop {
            let next = match state {
                State::FastForward => self.fast_forward(),
                State::MimeHead => self.mime_head()?,
                State::MimeBody => self.mime_body()?,
                State::Done => return Ok(()),
            };
            match next {
                Some(s) => state = s,
                None => {
                    if !self.fill()? {
                        return Err(Error::MalformedMultipart("bad content body".into()));
                    }
                }
            }
        }
    }

    /// Skip the preamble up to the first boundary line
    fn fast_forward(&mut self) -> Option<State> {
        let mut from = 0;
        while let Some(rel) = find(&self.buf[from..], &self.boundary) {
            let at = from + rel;
            let after = at + self.boundary.len();
            if self.buf.len() < after + 2 {
                self.buf.drain(..at);
                return None;
            }
            match [self.buf[after], self.buf[after + 1]] {
                [b'\r', b'\n'] => {
                    self.buf.drain(..after + 2);
                    return Some(State::MimeHead);
                }
                [b'-', b'-'] => return Some(State::Done),
                _ => from = at + 1,
            }
        }
        let keep = self.boundary.len() + 1;
        if self.buf.len() > keep {
            self.buf.drain(..self.buf.len() - keep);
        }
        None
    }

    fn mime_head(&mut self) -> Result<Option<State>> {
        let head = if self.buf.starts_with(b"\r\n") {
            self.buf.drain(..2);
            String::new()
        } else if let Some(end) = find(&self.buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&self.buf[..end + 2]).into_owned();
            self.buf.drain(..end + 4);
            head
        } else {
            if self.buf.len() > MAX_HEAD_SIZE {
                return Err(Error::MalformedMultipart("part header too large".into()));
            }
            return Ok(None);
        };
        self.start_part(head)?;
        Ok(Some(State::MimeBody))
    }

    fn mime_body(&mut self) -> Result<Option<State>> {
        let mut from = 0;
        while let Some(rel) = find(&self.buf[from..], &self.delimiter) {
            let at = from + rel;
            let after = at + self.delimiter.len();
            if self.buf.len() < after + 2 {
                self.write_body(at)?;
                return Ok(None);
            }
            let next = match [self.buf[after], self.buf[after + 1]] {
                [b'\r', b'\n'] => State::MimeHead,
                [b'-', b'-'] => State::Done,
                _ => {
                    from = at + 1;
                    continue;
                }
            };
            self.write_body(at)?;
            self.buf.drain(..self.delimiter.len() + 2);
            self.finish_part()?;
            return Ok(Some(next));
        }

        // Keep enough of the tail to recognize a delimiter split across reads
        let keep = self.delimiter.len() + 1;
        if self.buf.len() > keep {
            let safe = self.buf.len() - keep;
            self.write_body(safe)?;
        }
        Ok(None)
    }

    /// Move the first `n` buffered bytes into the current part
    fn write_body(&mut self, n: usize) -> Result<()> {
        if let Some(part) = self.current.as_mut() {
            match &mut part.body {
                PartBody::Text(bytes) => bytes.extend_from_slice(&self.buf[..n]),
                PartBody::File { storage, size } => {
                    storage.write_all(&self.buf[..n])?;
                    *size += n as u64;
                }
                PartBody::Discard => {}
            }
        }
        self.buf.drain(..n);
        Ok(())
    }

    fn start_part(&mut self, head: String) -> Result<()> {
        let info = PartHead::parse(&head);

        self.parts += 1;
        if self.config.part_limit > 0 && self.parts > self.config.part_limit {
            return Err(Error::PartLimit {
                what: "parts",
                limit: self.config.part_limit,
            });
        }

        let body = match info.filename.as_deref() {
            Some("") => PartBody::Discard,
            Some(filename) => {
                self.files += 1;
                if self.config.file_limit > 0 && self.files > self.config.file_limit {
                    return Err(Error::PartLimit {
                        what: "files",
                        limit: self.config.file_limit,
                    });
                }
                let storage = (self.config.tempfile_factory)(filename, info.content_type.as_deref())?;
                PartBody::File { storage, size: 0 }
            }
            None => PartBody::Text(Vec::new()),
        };

        let name = match (&info.name, &info.filename, &info.content_type) {
            (Some(name), _, _) => name.clone(),
            (None, Some(filename), _) => filename.clone(),
            (None, None, Some(ct)) => format!("{}[]", ct),
            (None, None, None) => "text/plain[]".to_string(),
        };

        self.current = Some(Part {
            name,
            filename: info.filename,
            content_type: info.content_type,
            head,
            body,
        });
        Ok(())
    }

    fn finish_part(&mut self) -> Result<()> {
        let Some(part) = self.current.take() else {
            return Ok(());
        };
        let value = match part.body {
            PartBody::Text(bytes) => Param::String(decode_text(bytes, part.content_type.as_deref())),
            PartBody::File { storage, size } => {
                let file = UploadedFile::from_storage(
                    part.name.clone(),
                    part.filename,
                    part.content_type,
                    part.head,
                    storage,
                    size,
                )?;
                self.tempfiles.push(file.clone());
                Param::File(file)
            }
            PartBody::Discard => return Ok(()),
        };
        self.config.parser.normalize_params(&mut self.params, &part.name, value)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor, Seek, SeekFrom};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const CT: &str = "multipart/form-data; boundary=AaB03x";

    fn body(parts: &[&str]) -> Vec<u8> {
        let mut out = String::new();
        for part in parts {
            out.push_str("--AaB03x\r\n");
            out.push_str(part);
            out.push_str("\r\n");
        }
        out.push_str("--AaB03x--\r\n");
        out.into_bytes()
    }

    fn parse(bytes: &[u8], config: &MultipartConfig) -> Result<Option<MultipartForm>> {
        parse_multipart(Cursor::new(bytes.to_vec()), CT, Some(bytes.len() as u64), config)
    }

    fn memory_config() -> MultipartConfig {
        MultipartConfig::default().tempfile_factory(memory_tempfile_factory())
    }

    // Storage that counts how many handles are still alive
    struct Counted {
        inner: Cursor<Vec<u8>>,
        open: Arc<AtomicUsize>,
    }

    impl Read for Counted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Write for Counted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.inner.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for Counted {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    impl TempStorage for Counted {}

    impl Drop for Counted {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn counting_config(open: Arc<AtomicUsize>) -> MultipartConfig {
        MultipartConfig::default().tempfile_factory(Arc::new(move |_: &str, _: Option<&str>| {
            open.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Counted {
                inner: Cursor::new(Vec::new()),
                open: Arc::clone(&open),
            }) as Box<dyn TempStorage>)
        }))
    }

    #[test]
    fn test_boundary() {
        assert_eq!(boundary(CT), Some("AaB03x"));
        assert_eq!(boundary("multipart/mixed; boundary=\"xyz 1\""), Some("xyz 1"));
        assert_eq!(boundary("application/x-www-form-urlencoded"), None);
        assert_eq!(boundary("multipart/form-data"), None);
    }

    #[test]
    fn test_text_and_file() {
        let bytes = body(&[
            "Content-Disposition: form-data; name=\"foo\"\r\n\r\nbar",
            "Content-Disposition: form-data; name=\"upload\"; filename=\"x.txt\"\r\nContent-Type: text/plain\r\n\r\nfile contents\r\nline two",
        ]);
        let form = parse(&bytes, &memory_config()).unwrap().unwrap();

        assert_eq!(form.params.str("foo"), Some("bar"));
        let file = form.params.get("upload").and_then(Param::as_file).unwrap();
        assert_eq!(file.filename(), Some("x.txt"));
        assert_eq!(file.content_type(), Some("text/plain"));
        assert_eq!(file.name(), "upload");
        assert_eq!(file.size(), 23);
        assert_eq!(file.read_to_end().unwrap(), b"file contents\r\nline two");
        assert!(file.head().contains("filename=\"x.txt\""));
        assert_eq!(form.tempfiles.len(), 1);
        assert!(form.tempfiles[0].close());
        assert!(!file.close());
    }

    #[test]
    fn test_small_buffer_reads() {
        let payload = "0123456789".repeat(50);
        let bytes = body(&[
            &format!("Content-Disposition: form-data; name=\"f\"; filename=\"a.bin\"\r\n\r\n{}", payload),
            "Content-Disposition: form-data; name=\"t\"\r\n\r\n--AaB03 not a boundary",
        ]);
        let config = memory_config().buffer_size(7);
        let form = parse(&bytes, &config).unwrap().unwrap();
        let file = form.params.get("f").and_then(Param::as_file).unwrap();
        assert_eq!(file.read_to_end().unwrap(), payload.as_bytes());
        assert_eq!(form.params.str("t"), Some("--AaB03 not a boundary"));
    }

    #[test]
    fn test_preamble_and_epilogue() {
        let mut bytes = b"this is a preamble\r\n".to_vec();
        bytes.extend(body(&["Content-Disposition: form-data; name=\"a\"\r\n\r\n1"]));
        bytes.extend_from_slice(b"epilogue");
        let form = parse(&bytes, &memory_config()).unwrap().unwrap();
        assert_eq!(form.params.str("a"), Some("1"));
    }

    #[test]
    fn test_nested_names() {
        let bytes = body(&[
            "Content-Disposition: form-data; name=\"user[name]\"\r\n\r\nx",
            "Content-Disposition: form-data; name=\"tags[]\"\r\n\r\nt1",
            "Content-Disposition: form-data; name=\"tags[]\"\r\n\r\nt2",
        ]);
        let form = parse(&bytes, &memory_config()).unwrap().unwrap();
        let user = form.params.get("user").and_then(Param::as_map).unwrap();
        assert_eq!(user.str("name"), Some("x"));
        let tags = form.params.get("tags").and_then(Param::as_array).unwrap();
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_empty_filename_dropped() {
        let bytes = body(&[
            "Content-Disposition: form-data; name=\"upload\"; filename=\"\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            "Content-Disposition: form-data; name=\"a\"\r\n\r\n1",
        ]);
        let form = parse(&bytes, &memory_config()).unwrap().unwrap();
        assert!(!form.params.contains_key("upload"));
        assert!(form.tempfiles.is_empty());
        assert_eq!(form.params.str("a"), Some("1"));
    }

    #[test]
    fn test_filename_variants() {
        let head = |cd: &str| PartHead::parse(&format!("Content-Disposition: {}\r\n", cd));

        assert_eq!(head("form-data; name=\"f\"; filename=\"a b.txt\"").filename.as_deref(), Some("a b.txt"));
        assert_eq!(head("form-data; name=f; filename=plain.txt").filename.as_deref(), Some("plain.txt"));
        assert_eq!(
            head("form-data; name=\"f\"; filename*=UTF-8''%E2%9C%93.txt").filename.as_deref(),
            Some("✓.txt")
        );
        assert_eq!(head("form-data; name=\"f\"; filename=\"100%25.txt\"").filename.as_deref(), Some("100%.txt"));
        assert_eq!(head("form-data; name=\"f\"; filename=\"50%off.txt\"").filename.as_deref(), Some("50%off.txt"));
        assert_eq!(
            head("form-data; name=\"f\"; filename=\"C:\\Documents\\a.txt\"").filename.as_deref(),
            Some("C:\\Documents\\a.txt")
        );
        assert_eq!(head("form-data; name=\"f\"").filename, None);
        assert_eq!(head("form-data; name=\"na\\\"me\"").name.as_deref(), Some("na\"me"));
    }

    #[test]
    fn test_nameless_parts() {
        let by_id = PartHead::parse("Content-ID: <part1>\r\nContent-Type: text/plain\r\n");
        assert_eq!(by_id.name.as_deref(), Some("<part1>"));

        let bytes = body(&["Content-Type: application/json\r\n\r\n{}"]);
        let form = parse(&bytes, &memory_config()).unwrap().unwrap();
        let items = form.params.get("application/json").and_then(Param::as_array).unwrap();
        assert_eq!(items[0].as_str(), Some("{}"));
    }

    #[test]
    fn test_charset_decoding() {
        let mut bytes = b"--AaB03x\r\nContent-Disposition: form-data; name=\"a\"\r\nContent-Type: text/plain; charset=iso-8859-1\r\n\r\n".to_vec();
        bytes.push(0xe9);
        bytes.extend_from_slice(b"\r\n--AaB03x--\r\n");
        let form = parse(&bytes, &memory_config()).unwrap().unwrap();
        assert_eq!(form.params.str("a"), Some("é"));
    }

    #[test]
    fn test_not_multipart() {
        let result = parse_multipart(Cursor::new(b"a=1".to_vec()), "application/x-www-form-urlencoded", None, &memory_config());
        assert!(result.unwrap().is_none());
        let empty = parse_multipart(io::empty(), CT, Some(0), &memory_config()).unwrap().unwrap();
        assert!(empty.params.is_empty());
    }

    #[test]
    fn test_truncated_body() {
        let open = Arc::new(AtomicUsize::new(0));
        let config = counting_config(Arc::clone(&open));

        let bytes = b"--AaB03x\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n\r\ncut off".to_vec();
        let err = parse(&bytes, &config).unwrap_err();
        assert!(matches!(err, Error::MalformedMultipart(_)));
        assert_eq!(open.load(Ordering::SeqCst), 0);

        let err = parse(b"no boundary here", &config).unwrap_err();
        assert!(matches!(err, Error::MalformedMultipart(_)));
    }

    #[test]
    fn test_file_limit_releases_handles() {
        let open = Arc::new(AtomicUsize::new(0));
        let config = counting_config(Arc::clone(&open)).file_limit(2);
        let bytes = body(&[
            "Content-Disposition: form-data; name=\"a\"; filename=\"1.txt\"\r\n\r\none",
            "Content-Disposition: form-data; name=\"b\"; filename=\"2.txt\"\r\n\r\ntwo",
            "Content-Disposition: form-data; name=\"c\"; filename=\"3.txt\"\r\n\r\nthree",
        ]);
        let err = parse(&bytes, &config).unwrap_err();
        assert!(matches!(err, Error::PartLimit { what: "files", limit: 2 }));
        assert_eq!(open.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_part_limit() {
        let config = memory_config().part_limit(1);
        let bytes = body(&[
            "Content-Disposition: form-data; name=\"a\"\r\n\r\n1",
            "Content-Disposition: form-data; name=\"b\"\r\n\r\n2",
        ]);
        let err = parse(&bytes, &config).unwrap_err();
        assert!(matches!(err, Error::PartLimit { what: "parts", .. }));
    }
}
