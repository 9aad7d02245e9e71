//! Response bodies
//!
//! A body is a lazy sequence of byte chunks from one of three sources: an
//! in-memory chunk list, a streaming generator, or a span of an open file.
//! Release hooks registered with [`Body::on_close`] run exactly once, when
//! the body is closed explicitly or dropped.

use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Default read size for file bodies
pub const FILE_CHUNK_SIZE: usize = 8 * 1024;

type Hook = Box<dyn FnOnce() + Send>;

/// A byte span of an open file
pub struct FileSpan {
    file: File,
    path: PathBuf,
    offset: u64,
    remaining: u64,
    chunk_size: usize,
    positioned: bool,
}

impl FileSpan {
    fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        if self.remaining == 0 {
            return None;
        }
        if !self.positioned {
            if let Err(e) = self.file.seek(SeekFrom::Start(self.offset)) {
                self.remaining = 0;
                return Some(Err(e));
            }
            self.positioned = true;
        }
        let want = self.remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; want];
        match self.file.read(&mut buf) {
            Ok(0) => {
                self.remaining = 0;
                Some(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} shrank while being served", self.path.display()),
                )))
            }
            Ok(n) => {
                buf.truncate(n);
                self.remaining -= n as u64;
                Some(Ok(Bytes::from(buf)))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

enum Source {
    Chunks(VecDeque<Bytes>),
    Stream(Box<dyn Iterator<Item = io::Result<Bytes>> + Send>),
    File(FileSpan),
}

impl Source {
    fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        match self {
            Source::Chunks(chunks) => chunks.pop_front().map(Ok),
            Source::Stream(stream) => stream.next(),
            Source::File(span) => span.next_chunk(),
        }
    }
}

/// Chunk iterator detached from a body by [`Body::wrap`]
pub struct BodyChunks(Source);

impl Iterator for BodyChunks {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next_chunk()
    }
}

/// Response body
pub struct Body {
    source: Source,
    hooks: Vec<Hook>,
    closed: bool,
}

impl Body {
    fn from_source(source: Source) -> Self {
        Self {
            source,
            hooks: Vec::new(),
            closed: false,
        }
    }

    pub fn empty() -> Self {
        Self::from_source(Source::Chunks(VecDeque::new()))
    }

    /// Fixed in-memory chunk sequence
    pub fn chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self::from_source(Source::Chunks(chunks.into_iter().map(Into::into).collect()))
    }

    /// Lazily generated chunks
    pub fn stream<I>(stream: I) -> Self
    where
        I: Iterator<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::from_source(Source::Stream(Box::new(stream)))
    }

    /// `len` bytes of `file` starting at `offset`
    pub fn file_span(file: File, path: impl Into<PathBuf>, offset: u64, len: u64) -> Self {
        Self::file_span_with_chunk_size(file, path, offset, len, FILE_CHUNK_SIZE)
    }

    pub fn file_span_with_chunk_size(
        file: File,
        path: impl Into<PathBuf>,
        offset: u64,
        len: u64,
        chunk_size: usize,
    ) -> Self {
        Self::from_source(Source::File(FileSpan {
            file,
            path: path.into(),
            offset,
            remaining: len,
            chunk_size: chunk_size.max(1),
            positioned: false,
        }))
    }

    /// Whether the body is a fixed in-memory sequence
    pub fn is_buffered(&self) -> bool {
        matches!(self.source, Source::Chunks(_))
    }

    /// Total size of a buffered body
    pub fn buffered_len(&self) -> Option<u64> {
        match &self.source {
            Source::Chunks(chunks) => Some(chunks.iter().map(|c| c.len() as u64).sum()),
            _ => None,
        }
    }

    /// Path of a file body, for listeners that can send files directly
    pub fn to_path(&self) -> Option<&Path> {
        match &self.source {
            Source::File(span) => Some(&span.path),
            _ => None,
        }
    }

    /// Register a release hook; runs immediately if the body is already closed
    pub fn on_close(&mut self, hook: impl FnOnce() + Send + 'static) {
        if self.closed {
            hook();
        } else {
            self.hooks.push(Box::new(hook));
        }
    }

    /// Builder form of [`Body::on_close`]
    pub fn with_on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close(hook);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the source and run every hook, in registration order
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.source = Source::Chunks(VecDeque::new());
        for hook in self.hooks.drain(..) {
            hook();
        }
    }

    /// Read every chunk into one buffer, then close
    pub fn into_bytes(mut self) -> io::Result<Bytes> {
        let mut chunks = Vec::new();
        for chunk in &mut self {
            chunks.push(chunk?);
        }
        self.close();
        Ok(match chunks.len() {
            0 => Bytes::new(),
            1 => chunks.remove(0),
            _ => Bytes::from(chunks.concat()),
        })
    }

    /// Replace the chunk source, keeping the release hooks
    pub fn wrap<I, F>(mut self, f: F) -> Body
    where
        F: FnOnce(BodyChunks) -> I,
        I: Iterator<Item = io::Result<Bytes>> + Send + 'static,
    {
        let source = std::mem::replace(&mut self.source, Source::Chunks(VecDeque::new()));
        let hooks = std::mem::take(&mut self.hooks);
        let closed = self.closed;
        // The old shell has nothing left to release
        self.closed = true;
        Body {
            source: Source::Stream(Box::new(f(BodyChunks(source)))),
            hooks,
            closed,
        }
    }

    /// Transform every chunk
    pub fn map_chunks<F>(self, mut f: F) -> Body
    where
        F: FnMut(Bytes) -> Bytes + Send + 'static,
    {
        self.wrap(move |chunks| chunks.map(move |c| c.map(&mut f)))
    }
}

impl Iterator for Body {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        self.source.next_chunk()
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        self.close();
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.source {
            Source::Chunks(_) => "chunks",
            Source::Stream(_) => "stream",
            Source::File(_) => "file",
        };
        f.debug_struct("Body")
            .field("kind", &kind)
            .field("hooks", &self.hooks.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Self::empty()
        } else {
            Self::chunks([bytes])
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_chunks() {
        let body = Body::chunks(["Hello", ", ", "world"]);
        assert!(body.is_buffered());
        assert_eq!(body.buffered_len(), Some(12));
        assert_eq!(body.into_bytes().unwrap(), "Hello, world");
    }

    #[test]
    fn test_hooks_run_once_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut body = Body::from("x");
        for i in 0..3 {
            let log = Arc::clone(&log);
            body.on_close(move || log.lock().unwrap().push(i));
        }
        body.close();
        body.close();
        drop(body);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_drop_runs_hooks() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut body = Body::chunks(["a", "b"]).with_on_close(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        // Abandoned mid-iteration
        assert!(body.next().is_some());
        drop(body);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_map_keeps_hooks() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let body = Body::chunks(["ab", "cd"])
            .with_on_close(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .map_chunks(|c| Bytes::from(c.to_ascii_uppercase()));
        assert!(!body.is_buffered());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(body.into_bytes().unwrap(), "ABCD");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_file_span() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        tmp.write_all(&data).unwrap();
        let file = File::open(tmp.path()).unwrap();

        let mut body = Body::file_span(file, tmp.path(), 100, 10_000);
        assert_eq!(body.to_path(), Some(tmp.path()));
        let first = body.next().unwrap().unwrap();
        assert_eq!(first.len(), FILE_CHUNK_SIZE);
        let rest = body.into_bytes().unwrap();
        assert_eq!(first.len() + rest.len(), 10_000);
        assert_eq!(&first[..], &data[100..100 + FILE_CHUNK_SIZE]);
    }

    #[test]
    fn test_stream_error() {
        let body = Body::stream(vec![Ok(Bytes::from("a")), Err(io::Error::new(io::ErrorKind::Other, "boom"))].into_iter());
        assert!(body.into_bytes().is_err());
    }
}
