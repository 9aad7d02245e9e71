//! Static file serving with byte-range support
//!
//! Serves files below a root directory. Failures answer `text/plain` with
//! `x-cascade: pass` so a [`crate::handler::Cascade`] or
//! [`crate::handler::UrlMap`] can try another app.

use crate::body::{Body, FILE_CHUNK_SIZE};
use crate::env::{self, Env};
use crate::handler::Handler;
use crate::headers::Headers;
use crate::mime;
use crate::response::{Response, ResponseBuilder, StatusCode};
use crate::utils::{byte_ranges, http_date, unescape_path};
use crate::Result;
use std::fs::{File, Metadata};
use std::path::{Path, PathBuf};

pub const ALLOWED_VERBS: &[&str] = &["GET", "HEAD", "OPTIONS"];
const ALLOW_HEADER: &str = "GET, HEAD, OPTIONS";

/// File server configuration
#[derive(Debug, Clone)]
pub struct FilesConfig {
    /// Root directory
    pub root: PathBuf,
    /// Extra headers for every served file
    pub headers: Vec<(String, String)>,
    /// Content type for unknown extensions
    pub default_mime: String,
    /// Read size when streaming
    pub chunk_size: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            headers: Vec::new(),
            default_mime: "text/plain".to_string(),
            chunk_size: FILE_CHUNK_SIZE,
        }
    }
}

impl FilesConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn default_mime(mut self, mime: impl Into<String>) -> Self {
        self.default_mime = mime.into();
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

/// File server app
#[derive(Debug, Clone)]
pub struct Files {
    config: FilesConfig,
}

impl Files {
    pub fn new(config: FilesConfig) -> Self {
        Self { config }
    }

    /// Serve files from directory
    pub fn serve(root: impl Into<PathBuf>) -> Self {
        Self::new(FilesConfig::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Map a decoded request path below the root; `None` on traversal
    fn resolve(&self, path_info: &str) -> Option<PathBuf> {
        let mut path = self.config.root.clone();
        for segment in path_info.split('/') {
            match segment {
                "" | "." => {}
                ".." => return None,
                s => path.push(s),
            }
        }
        Some(path)
    }

    fn fail(status: StatusCode, message: &str) -> Response {
        ResponseBuilder::new(status)
            .header("content-type", "text/plain")
            .header("x-cascade", "pass")
            .body(format!("{}\n", message))
            .build()
    }

    fn serve_file(&self, env: &Env, path: &Path, meta: &Metadata) -> Response {
        let last_modified = meta.modified().ok().map(http_date);
        if let (Some(lm), Some(ims)) = (&last_modified, env.get_str(env::HTTP_IF_MODIFIED_SINCE)) {
            if ims == lm {
                return Response::new(StatusCode::NOT_MODIFIED);
            }
        }

        let mut headers = Headers::new();
        if let Some(lm) = last_modified {
            headers.set("last-modified", lm);
        }
        headers.set("content-type", mime::mime_type_for(path, &self.config.default_mime));
        headers.set("accept-ranges", "bytes");
        for (name, value) in &self.config.headers {
            headers.set(name, value.clone());
        }

        let size = meta.len();
        let (status, offset, len) = match byte_ranges(env.get_str(env::HTTP_RANGE), size) {
            Some(ranges) if ranges.is_empty() => {
                let mut res = Self::fail(StatusCode::RANGE_NOT_SATISFIABLE, "Byte range unsatisfiable");
                res.headers.set("content-range", format!("bytes */{}", size));
                return res;
            }
            Some(ranges) if ranges.len() == 1 => {
                let range = &ranges[0];
                headers.set(
                    "content-range",
                    format!("bytes {}-{}/{}", range.start(), range.end(), size),
                );
                (StatusCode::PARTIAL_CONTENT, *range.start(), range.end() - range.start() + 1)
            }
            // No header, a void spec, or several ranges: the whole file
            _ => (StatusCode::OK, 0, size),
        };
        headers.set("content-length", len.to_string());

        let head = env.get_str(env::REQUEST_METHOD) == Some("HEAD");
        let body = if head || len == 0 {
            Body::empty()
        } else {
            match File::open(path) {
                Ok(file) => Body::file_span_with_chunk_size(file, path, offset, len, self.config.chunk_size),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "file vanished before open");
                    return Self::fail(StatusCode::NOT_FOUND, "File not found");
                }
            }
        };

        Response { status, headers, body }
    }
}

impl Handler for Files {
    fn call(&self, env: &mut Env) -> Result<Response> {
        let method = env.get_str(env::REQUEST_METHOD).unwrap_or("");
        if !ALLOWED_VERBS.contains(&method) {
            let mut res = Self::fail(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
            res.headers.set("allow", ALLOW_HEADER);
            return Ok(res);
        }
        if method == "OPTIONS" {
            return Ok(Response::ok()
                .with_header("allow", ALLOW_HEADER)
                .with_header("content-length", "0"));
        }

        let path_info = match unescape_path(env.get_str(env::PATH_INFO).unwrap_or("")) {
            Ok(path) => path,
            Err(_) => return Ok(Self::fail(StatusCode::BAD_REQUEST, "Bad Request")),
        };
        let Some(path) = self.resolve(&path_info) else {
            return Ok(Self::fail(StatusCode::FORBIDDEN, "Forbidden"));
        };

        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(self.serve_file(env, &path, &meta)),
            _ => Ok(Self::fail(
                StatusCode::NOT_FOUND,
                &format!("File not found: {}", path_info),
            )),
        }
    }
}
