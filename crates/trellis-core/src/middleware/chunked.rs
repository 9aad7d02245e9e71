//! Chunked transfer encoding
//!
//! HTTP/1.1 responses with an entity body but no declared length are
//! framed as `{hex size}\r\n{chunk}\r\n`, ending with `0\r\n\r\n`.

use super::Middleware;
use crate::body::BodyChunks;
use crate::env::{self, Env};
use crate::handler::Handler;
use crate::{Response, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::io;

const TERMINATOR: &[u8] = b"0\r\n\r\n";

/// Apply chunked transfer encoding where needed
#[derive(Debug, Clone, Copy, Default)]
pub struct Chunked;

impl Chunked {
    pub fn new() -> Self {
        Self
    }
}

fn chunkable_version(protocol: Option<&str>) -> bool {
    !matches!(protocol, None | Some("") | Some("HTTP/1.0") | Some("HTTP/0.9"))
}

struct ChunkFramer {
    inner: BodyChunks,
    done: bool,
}

impl Iterator for ChunkFramer {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.inner.next() {
                // An empty chunk would read as the terminator
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    let size = format!("{:x}\r\n", chunk.len());
                    let mut framed = BytesMut::with_capacity(size.len() + chunk.len() + 2);
                    framed.put_slice(size.as_bytes());
                    framed.put_slice(&chunk);
                    framed.put_slice(b"\r\n");
                    return Some(Ok(framed.freeze()));
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return Some(Ok(Bytes::from_static(TERMINATOR)));
                }
            }
        }
    }
}

impl Middleware for Chunked {
    fn call(&self, env: &mut Env, next: &dyn Handler) -> Result<Response> {
        let mut res = next.call(env)?;
        if chunkable_version(env.get_str(env::SERVER_PROTOCOL))
            && !res.status.no_entity_body()
            && !res.headers.contains("content-length")
            && !res.headers.contains("transfer-encoding")
        {
            res.headers.set("transfer-encoding", "chunked");
            res.body = std::mem::take(&mut res.body).wrap(|inner| ChunkFramer { inner, done: false });
        }
        Ok(res)
    }
}
