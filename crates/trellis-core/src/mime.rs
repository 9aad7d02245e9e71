//! Media types by file extension

use std::path::Path;

/// Look up the media type for an extension (without the dot)
pub fn mime_type(extension: &str) -> Option<&'static str> {
    let mime = match extension.to_ascii_lowercase().as_str() {
        // Text
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" | "text" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",

        // Images
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/vnd.microsoft.icon",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "bmp" => "image/bmp",

        // Audio/Video
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",

        // Fonts
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",

        // Archives
        "zip" => "application/zip",
        "gz" | "gzip" => "application/gzip",
        "tar" => "application/x-tar",

        // Documents
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        "bin" => "application/octet-stream",

        _ => return None,
    };
    Some(mime)
}

/// Media type for a path, falling back to `default`
pub fn mime_type_for(path: &Path, default: &str) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(mime_type)
        .unwrap_or(default)
        .to_string()
}

/// Media types whose bodies are text and take a charset parameter
pub fn is_text(mime: &str) -> bool {
    mime.starts_with("text/") || matches!(mime, "application/json" | "application/xml" | "image/svg+xml")
}
