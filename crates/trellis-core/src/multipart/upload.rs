//! Upload storage
//!
//! File parts are streamed into caller-supplied temporary storage. The
//! storage handle is shared between the parsed params and the request's
//! temp-file registry, and is released exactly once: on `close`, or when the
//! last handle is dropped.

use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Temporary storage for one uploaded file
pub trait TempStorage: Read + Write + Seek + Send {
    /// Filesystem path, if the storage is file-backed
    fn path(&self) -> Option<&Path> {
        None
    }
}

impl TempStorage for NamedTempFile {
    fn path(&self) -> Option<&Path> {
        Some(NamedTempFile::path(self))
    }
}

impl TempStorage for File {}

impl TempStorage for Cursor<Vec<u8>> {}

/// Creates storage for a file part from its filename and content type
pub type TempfileFactory =
    Arc<dyn Fn(&str, Option<&str>) -> io::Result<Box<dyn TempStorage>> + Send + Sync>;

/// Named temp files in the system temp directory, keeping the upload's extension
pub fn default_tempfile_factory() -> TempfileFactory {
    Arc::new(|filename: &str, _content_type: Option<&str>| {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let file = tempfile::Builder::new()
            .prefix("TrellisMultipart")
            .suffix(&extension)
            .tempfile()?;
        Ok(Box::new(file) as Box<dyn TempStorage>)
    })
}

/// In-memory storage, for tests and small deployments
pub fn memory_tempfile_factory() -> TempfileFactory {
    Arc::new(|_: &str, _: Option<&str>| Ok(Box::new(Cursor::new(Vec::new())) as Box<dyn TempStorage>))
}

struct FileInner {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    head: String,
    size: u64,
    path: Option<PathBuf>,
    storage: Mutex<Option<Box<dyn TempStorage>>>,
}

/// Shared handle to an uploaded file
#[derive(Clone)]
pub struct UploadedFile {
    inner: Arc<FileInner>,
}

impl UploadedFile {
    pub(crate) fn from_storage(
        name: String,
        filename: Option<String>,
        content_type: Option<String>,
        head: String,
        mut storage: Box<dyn TempStorage>,
        size: u64,
    ) -> io::Result<Self> {
        storage.seek(SeekFrom::Start(0))?;
        let path = storage.path().map(Path::to_path_buf);
        Ok(Self {
            inner: Arc::new(FileInner {
                name,
                filename,
                content_type,
                head,
                size,
                path,
                storage: Mutex::new(Some(storage)),
            }),
        })
    }

    /// Build an upload from bytes (request construction, tests)
    pub fn from_bytes(filename: &str, content_type: &str, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        Self {
            inner: Arc::new(FileInner {
                name: String::new(),
                filename: Some(filename.to_string()),
                content_type: Some(content_type.to_string()),
                head: String::new(),
                size,
                path: None,
                storage: Mutex::new(Some(Box::new(Cursor::new(bytes)))),
            }),
        }
    }

    /// Build an upload from an existing file
    pub fn from_path(path: impl AsRef<Path>, content_type: &str) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let filename = path.file_name().map(|n| n.to_string_lossy().into_owned());
        Ok(Self {
            inner: Arc::new(FileInner {
                name: String::new(),
                filename,
                content_type: Some(content_type.to_string()),
                head: String::new(),
                size,
                path: Some(path.to_path_buf()),
                storage: Mutex::new(Some(Box::new(file))),
            }),
        })
    }

    /// Form field name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Client-supplied filename
    pub fn filename(&self) -> Option<&str> {
        self.inner.filename.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.inner.content_type.as_deref()
    }

    /// Raw part header block
    pub fn head(&self) -> &str {
        &self.inner.head
    }

    pub fn size(&self) -> u64 {
        self.inner.size
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    fn with_storage<T>(&self, f: impl FnOnce(&mut dyn TempStorage) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self.inner.storage.lock();
        let storage = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "uploaded file is closed"))?;
        f(storage.as_mut())
    }

    pub fn rewind(&self) -> io::Result<()> {
        self.with_storage(|s| s.seek(SeekFrom::Start(0)).map(|_| ()))
    }

    /// Read the whole content from the start
    pub fn read_to_end(&self) -> io::Result<Vec<u8>> {
        self.with_storage(|storage| {
            storage.seek(SeekFrom::Start(0))?;
            let mut out = Vec::with_capacity(self.inner.size as usize);
            storage.read_to_end(&mut out)?;
            storage.seek(SeekFrom::Start(0))?;
            Ok(out)
        })
    }

    /// Release the storage; returns false if it was already released
    pub fn close(&self) -> bool {
        let storage = self.inner.storage.lock().take();
        storage.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.storage.lock().is_none()
    }
}

impl PartialEq for UploadedFile {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("name", &self.inner.name)
            .field("filename", &self.inner.filename)
            .field("content_type", &self.inner.content_type)
            .field("size", &self.inner.size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Uploads opened while handling one request
#[derive(Clone, Default)]
pub struct TempfileRegistry {
    files: Arc<Mutex<Vec<UploadedFile>>>,
}

impl TempfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, file: UploadedFile) {
        self.files.lock().push(file);
    }

    pub fn extend(&self, files: impl IntoIterator<Item = UploadedFile>) {
        self.files.lock().extend(files);
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close and forget every registered upload; returns how many were open
    pub fn close_all(&self) -> usize {
        let files = std::mem::take(&mut *self.files.lock());
        files.iter().filter(|f| f.close()).count()
    }
}

impl fmt::Debug for TempfileRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempfileRegistry").field("len", &self.len()).finish()
    }
}
