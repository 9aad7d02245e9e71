//! Access logging in Apache common log format
//!
//! ```text
//! 127.0.0.1 - - [14/Oct/2026:10:00:00 +0000] "GET /index.html?x=1 HTTP/1.1" 200 2326 0.0012
//! ```
//!
//! The line is written when the response body is released, so the byte
//! count covers what was actually streamed.

use super::Middleware;
use crate::env::{self, Env, ErrorStream};
use crate::handler::Handler;
use crate::{Response, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Tracing target for access lines
pub const ACCESS_TARGET: &str = "trellis::access";

/// Common log format middleware
#[derive(Debug, Clone, Default)]
pub struct CommonLogger {
    to_error_stream: bool,
}

impl CommonLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also write each line to the request's error stream
    pub fn error_stream(mut self) -> Self {
        self.to_error_stream = true;
        self
    }
}

struct AccessLine {
    remote: String,
    user: String,
    method: String,
    path: String,
    query: String,
    protocol: String,
}

impl AccessLine {
    fn capture(env: &Env) -> Self {
        let get = |key: &str| env.get_str(key).unwrap_or("").to_string();
        let remote = env
            .get_str(env::HTTP_X_FORWARDED_FOR)
            .or_else(|| env.get_str(env::REMOTE_ADDR))
            .unwrap_or("-")
            .to_string();
        let user = env.get_str("REMOTE_USER").unwrap_or("-").to_string();
        let query = get(env::QUERY_STRING);
        Self {
            remote,
            user,
            method: get(env::REQUEST_METHOD),
            path: format!("{}{}", get(env::SCRIPT_NAME), get(env::PATH_INFO)),
            query: if query.is_empty() { query } else { format!("?{}", query) },
            protocol: get(env::SERVER_PROTOCOL),
        }
    }

    fn format(&self, status: u16, length: &str, elapsed: f64) -> String {
        format!(
            "{} - {} [{}] \"{} {}{} {}\" {} {} {:.4}",
            self.remote,
            self.user,
            chrono::Local::now().format("%d/%b/%Y:%H:%M:%S %z"),
            self.method,
            self.path,
            self.query,
            self.protocol,
            status,
            length,
            elapsed
        )
    }
}

impl Middleware for CommonLogger {
    fn call(&self, env: &mut Env, next: &dyn Handler) -> Result<Response> {
        let began = Instant::now();
        let mut res = next.call(env)?;

        let line = AccessLine::capture(env);
        let status = res.status.0;
        let declared = res.headers.get("content-length").map(str::to_string);
        let stream: Option<ErrorStream> = self.to_error_stream.then(|| env.errors());

        let sent = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&sent);
        res.body = std::mem::take(&mut res.body).wrap(move |chunks| {
            chunks.inspect(move |chunk| {
                if let Ok(chunk) = chunk {
                    counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                }
            })
        });
        res.body.on_close(move || {
            let length = match declared {
                Some(len) if len != "0" => len,
                _ => match sent.load(Ordering::Relaxed) {
                    0 => "-".to_string(),
                    n => n.to_string(),
                },
            };
            let msg = line.format(status, &length, began.elapsed().as_secs_f64());
            tracing::info!(target: ACCESS_TARGET, "{}", msg);
            if let Some(stream) = stream {
                stream.puts(&msg);
            }
        });
        Ok(res)
    }
}
