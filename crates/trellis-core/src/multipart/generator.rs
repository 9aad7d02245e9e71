//! Multipart body generation, used to build test requests

use crate::query::{Param, Params};
use crate::utils::escape_path;
use crate::Result;

/// Boundary used for generated bodies
pub const MULTIPART_BOUNDARY: &str = "AaB03x";

/// Encode params as `multipart/form-data` with [`MULTIPART_BOUNDARY`]
///
/// Returns `None` when no param is a file, unless `force` is set.
pub fn build_multipart(params: &Params, force: bool) -> Result<Option<Vec<u8>>> {
    let mut flat = Vec::new();
    flatten(params, None, &mut flat);

    let has_file = flat.iter().any(|(_, v)| matches!(v, Param::File(_)));
    if !has_file && !force {
        return Ok(None);
    }

    let mut out = Vec::new();
    for (name, value) in flat {
        out.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
        match value {
            Param::File(file) => {
                let content = file.read_to_end()?;
                out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name,
                        escape_path(file.filename().unwrap_or_default())
                    )
                    .as_bytes(),
                );
                out.extend_from_slice(
                    format!(
                        "Content-Type: {}\r\nContent-Length: {}\r\n\r\n",
                        file.content_type().unwrap_or("application/octet-stream"),
                        content.len()
                    )
                    .as_bytes(),
                );
                out.extend_from_slice(&content);
            }
            other => {
                out.extend_from_slice(format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes());
                if let Param::String(s) = other {
                    out.extend_from_slice(s.as_bytes());
                }
            }
        }
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    Ok(Some(out))
}

fn flatten<'p>(params: &'p Params, prefix: Option<&str>, out: &mut Vec<(String, &'p Param)>) {
    for (key, value) in params {
        let name = match prefix {
            Some(prefix) => format!("{}[{}]", prefix, key),
            None => key.clone(),
        };
        flatten_value(name, value, out);
    }
}

fn flatten_value<'p>(name: String, value: &'p Param, out: &mut Vec<(String, &'p Param)>) {
    match value {
        Param::Map(map) => flatten(map, Some(&name), out),
        Param::Array(items) => {
            let name = format!("{}[]", name);
            for item in items {
                flatten_value(name.clone(), item, out);
            }
        }
        _ => out.push((name, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipart::{memory_tempfile_factory, parse_multipart, MultipartConfig, UploadedFile};
    use std::io::Cursor;

    #[test]
    fn test_no_files() {
        let params: Params = [("a", "1")].into_iter().collect();
        assert!(build_multipart(&params, false).unwrap().is_none());
        assert!(build_multipart(&params, true).unwrap().is_some());
    }

    #[test]
    fn test_generated_body_parses() {
        let mut user = Params::new();
        user.insert("name", "x");
        let mut params = Params::new();
        params.insert("user", user);
        params.insert("doc", UploadedFile::from_bytes("a b.txt", "text/plain", b"hello\r\nworld".to_vec()));

        let body = build_multipart(&params, false).unwrap().unwrap();
        let config = MultipartConfig::default().tempfile_factory(memory_tempfile_factory());
        let ct = format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY);
        let form = parse_multipart(Cursor::new(body.clone()), &ct, Some(body.len() as u64), &config)
            .unwrap()
            .unwrap();

        let user = form.params.get("user").and_then(Param::as_map).unwrap();
        assert_eq!(user.str("name"), Some("x"));
        let doc = form.params.get("doc").and_then(Param::as_file).unwrap();
        assert_eq!(doc.filename(), Some("a b.txt"));
        assert_eq!(doc.read_to_end().unwrap(), b"hello\r\nworld");
    }
}
