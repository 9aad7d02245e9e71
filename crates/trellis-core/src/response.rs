//! HTTP Response types

use crate::body::Body;
use crate::headers::Headers;
use crate::utils::{escape, http_date};
use bytes::Bytes;
use std::time::SystemTime;

/// HTTP Status Code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    // 1xx Informational
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const SWITCHING_PROTOCOLS: StatusCode = StatusCode(101);
    pub const EARLY_HINTS: StatusCode = StatusCode(103);

    // 2xx Success
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const ACCEPTED: StatusCode = StatusCode(202);
    pub const NON_AUTHORITATIVE_INFORMATION: StatusCode = StatusCode(203);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const RESET_CONTENT: StatusCode = StatusCode(205);
    pub const PARTIAL_CONTENT: StatusCode = StatusCode(206);

    // 3xx Redirection
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const SEE_OTHER: StatusCode = StatusCode(303);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const TEMPORARY_REDIRECT: StatusCode = StatusCode(307);
    pub const PERMANENT_REDIRECT: StatusCode = StatusCode(308);

    // 4xx Client Errors
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const NOT_ACCEPTABLE: StatusCode = StatusCode(406);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const CONFLICT: StatusCode = StatusCode(409);
    pub const GONE: StatusCode = StatusCode(410);
    pub const LENGTH_REQUIRED: StatusCode = StatusCode(411);
    pub const PRECONDITION_FAILED: StatusCode = StatusCode(412);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const URI_TOO_LONG: StatusCode = StatusCode(414);
    pub const UNSUPPORTED_MEDIA_TYPE: StatusCode = StatusCode(415);
    pub const RANGE_NOT_SATISFIABLE: StatusCode = StatusCode(416);
    pub const UNPROCESSABLE_ENTITY: StatusCode = StatusCode(422);
    pub const TOO_MANY_REQUESTS: StatusCode = StatusCode(429);
    pub const REQUEST_HEADER_FIELDS_TOO_LARGE: StatusCode = StatusCode(431);

    // 5xx Server Errors
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const BAD_GATEWAY: StatusCode = StatusCode(502);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
    pub const GATEWAY_TIMEOUT: StatusCode = StatusCode(504);
    pub const HTTP_VERSION_NOT_SUPPORTED: StatusCode = StatusCode(505);

    /// Get the numeric code
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Get the reason phrase
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            103 => "Early Hints",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            203 => "Non-Authoritative Information",
            204 => "No Content",
            205 => "Reset Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Range Not Satisfiable",
            422 => "Unprocessable Entity",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    /// Check if this is an informational status (1xx)
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.0)
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// Check if this is a redirect status (3xx)
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.0)
    }

    /// Check if this is a client error status (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.0)
    }

    /// Check if this is a server error status (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.0)
    }

    /// Statuses whose responses never carry an entity body
    pub fn no_entity_body(&self) -> bool {
        self.is_informational() || matches!(self.0, 204 | 205 | 304)
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

/// HTTP Response: the status, headers and body triple handed to the listener
#[derive(Debug, Default)]
pub struct Response {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: Headers,
    /// Response body
    pub body: Body,
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::OK
    }
}

impl Response {
    /// Create a new response
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::empty(),
        }
    }

    /// Create a 200 OK response
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Create a JSON response
    pub fn json(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(StatusCode::OK)
            .header("content-type", "application/json")
            .body(body)
            .build()
    }

    /// Create a text response
    pub fn text(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(StatusCode::OK)
            .header("content-type", "text/plain; charset=utf-8")
            .body(body)
            .build()
    }

    /// Create an HTML response
    pub fn html(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(StatusCode::OK)
            .header("content-type", "text/html; charset=utf-8")
            .body(body)
            .build()
    }

    /// Create a redirect response
    pub fn redirect(location: &str, permanent: bool) -> Self {
        let status = if permanent {
            StatusCode::PERMANENT_REDIRECT
        } else {
            StatusCode::TEMPORARY_REDIRECT
        };
        ResponseBuilder::new(status).header("location", location).build()
    }

    /// Plain-text response with a fixed status
    pub fn plain(status: StatusCode, message: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(status)
            .header("content-type", "text/plain")
            .body(message)
            .build()
    }

    /// Create a 404 Not Found response
    pub fn not_found() -> Self {
        Self::plain(StatusCode::NOT_FOUND, "Not Found")
    }

    /// Create a 400 Bad Request response
    pub fn bad_request(message: &str) -> Self {
        Self::plain(StatusCode::BAD_REQUEST, message.to_string())
    }

    /// Create a 500 Internal Server Error response
    pub fn internal_error(message: &str) -> Self {
        Self::plain(StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
    }

    /// Replace the body, releasing the previous one
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Get a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Get content-type header
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Drain the body into memory, running its release hooks
    pub fn body_bytes(&mut self) -> std::io::Result<Bytes> {
        std::mem::take(&mut self.body).into_bytes()
    }
}

/// Accumulating response builder
///
/// Collects status, headers and written chunks, and applies the
/// Content-Length rules in [`ResponseBuilder::finish`].
#[derive(Debug, Default)]
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Headers,
    chunks: Vec<Bytes>,
    length: u64,
}

impl ResponseBuilder {
    /// Create a new builder
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Start from an existing response
    ///
    /// The wrapped body is read into memory and released here, so whatever
    /// it holds open is freed before anything is written.
    pub fn from_response(mut response: Response) -> std::io::Result<Self> {
        let mut body = std::mem::take(&mut response.body);
        let mut builder = Self {
            status: response.status,
            headers: std::mem::take(&mut response.headers),
            chunks: Vec::new(),
            length: 0,
        };
        let result: std::io::Result<()> = (&mut body).try_for_each(|chunk| {
            let chunk = chunk?;
            builder.length += chunk.len() as u64;
            builder.chunks.push(chunk);
            Ok(())
        });
        body.close();
        result?;
        Ok(builder)
    }

    /// Set status code
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Set body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.chunks.clear();
        self.length = 0;
        self.write(body);
        self
    }

    /// Build the response
    pub fn build(self) -> Response {
        self.finish()
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn get_status(&self) -> StatusCode {
        self.status
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn append_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn delete_header(&mut self, name: &str) -> Option<String> {
        self.headers.delete(name)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.headers.set("content-type", content_type);
    }

    /// Bytes written so far
    pub fn length(&self) -> u64 {
        self.length
    }

    fn is_chunked(&self) -> bool {
        self.headers
            .get("transfer-encoding")
            .map_or(false, |te| te.eq_ignore_ascii_case("chunked"))
    }

    /// Append a chunk; Content-Length follows along unless the response is chunked
    pub fn write(&mut self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        self.length += chunk.len() as u64;
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
        if !self.is_chunked() {
            self.headers.set("content-length", self.length.to_string());
        }
    }

    pub fn redirect(&mut self, location: &str, status: StatusCode) {
        self.status = status;
        self.headers.set("location", location);
    }

    pub fn set_cookie(&mut self, cookie: &Cookie) {
        self.headers.append("set-cookie", cookie.to_header_value());
    }

    /// Drop pending cookies named `name` and send a removal cookie
    pub fn delete_cookie(&mut self, name: &str, path: Option<&str>, domain: Option<&str>) {
        if let Some(existing) = self.headers.delete("set-cookie") {
            let prefix = format!("{}=", escape(name));
            let kept: Vec<&str> = existing.split('\n').filter(|line| !line.starts_with(&prefix)).collect();
            if !kept.is_empty() {
                self.headers.set("set-cookie", kept.join("\n"));
            }
        }
        let mut removal = Cookie::removal(name);
        removal.path = path.map(str::to_string);
        removal.domain = domain.map(str::to_string);
        self.set_cookie(&removal);
    }

    /// Produce the final triple
    ///
    /// No-entity statuses lose Content-Type, Content-Length and the body.
    /// Otherwise Content-Length is set unless it or Transfer-Encoding exists.
    pub fn finish(mut self) -> Response {
        if self.status.no_entity_body() {
            self.headers.delete("content-type");
            self.headers.delete("content-length");
            return Response {
                status: self.status,
                headers: self.headers,
                body: Body::empty(),
            };
        }
        if !self.headers.contains("content-length") && !self.headers.contains("transfer-encoding") {
            self.headers.set("content-length", self.length.to_string());
        }
        Response {
            status: self.status,
            headers: self.headers,
            body: Body::chunks(self.chunks),
        }
    }
}

/// Cookie SameSite attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// HTTP Cookie
#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub expires: Option<SystemTime>,
    pub max_age: Option<i64>, // Seconds
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            expires: None,
            max_age: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn expires(mut self, at: SystemTime) -> Self {
        self.expires = Some(at);
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Serialize to Set-Cookie header value
    pub fn to_header_value(&self) -> String {
        let mut parts = vec![format!("{}={}", escape(&self.name), escape(&self.value))];

        if let Some(ref path) = self.path {
            parts.push(format!("Path={}", path));
        }
        if let Some(ref domain) = self.domain {
            parts.push(format!("Domain={}", domain));
        }
        if let Some(max_age) = self.max_age {
            parts.push(format!("Max-Age={}", max_age));
        }
        if let Some(expires) = self.expires {
            parts.push(format!("Expires={}", http_date(expires)));
        }
        if self.secure {
            parts.push("Secure".to_string());
        }
        if self.http_only {
            parts.push("HttpOnly".to_string());
        }
        if let Some(same_site) = self.same_site {
            parts.push(format!("SameSite={}", same_site.as_str()));
        }

        parts.join("; ")
    }

    /// A cookie that makes the client forget `name`
    pub fn removal(name: impl Into<String>) -> Self {
        Self::new(name, "").max_age(0).expires(SystemTime::UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code() {
        assert!(StatusCode::OK.is_success());
        assert!(StatusCode::FOUND.is_redirect());
        assert!(StatusCode::NOT_FOUND.is_client_error());
        assert!(StatusCode::INTERNAL_SERVER_ERROR.is_server_error());
        assert!(StatusCode::NO_CONTENT.no_entity_body());
        assert!(StatusCode::CONTINUE.no_entity_body());
        assert!(!StatusCode::CREATED.no_entity_body());
        assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE.to_string(), "416 Range Not Satisfiable");
    }

    #[test]
    fn test_response_json() {
        let res = Response::json(r#"{"foo":"bar"}"#);
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.content_type(), Some("application/json"));
        assert_eq!(res.header("Content-Length"), Some("13"));
    }

    #[test]
    fn test_builder_running_length() {
        let mut builder = ResponseBuilder::new(StatusCode::OK);
        builder.write("Hello");
        assert_eq!(builder.get_header("content-length"), Some("5"));
        builder.write(", world");
        let mut res = builder.finish();
        assert_eq!(res.header("content-length"), Some("12"));
        assert_eq!(res.body_bytes().unwrap(), "Hello, world");
    }

    #[test]
    fn test_builder_chunked_skips_length() {
        let mut builder = ResponseBuilder::new(StatusCode::OK);
        builder.set_header("Transfer-Encoding", "chunked");
        builder.write("abc");
        let res = builder.finish();
        assert_eq!(res.header("content-length"), None);
    }

    #[test]
    fn test_builder_no_entity_statuses() {
        for status in [StatusCode::NO_CONTENT, StatusCode::RESET_CONTENT, StatusCode::NOT_MODIFIED] {
            let mut builder = ResponseBuilder::new(status);
            builder.set_content_type("text/plain");
            builder.write("ignored");
            let mut res = builder.finish();
            assert_eq!(res.header("content-type"), None);
            assert_eq!(res.header("content-length"), None);
            assert!(res.body_bytes().unwrap().is_empty());
        }
    }

    #[test]
    fn test_from_response_releases_body() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let upstream = Response::ok().with_body(Body::stream(vec![Ok(Bytes::from("up"))].into_iter()).with_on_close(
            move || flag.store(true, Ordering::SeqCst),
        ));

        let mut builder = ResponseBuilder::from_response(upstream).unwrap();
        assert!(released.load(Ordering::SeqCst));
        builder.write("stream");
        let mut res = builder.finish();
        assert_eq!(res.header("content-length"), Some("8"));
        assert_eq!(res.body_bytes().unwrap(), "upstream");
    }

    #[test]
    fn test_cookies() {
        let mut builder = ResponseBuilder::new(StatusCode::OK);
        builder.set_cookie(&Cookie::new("a", "1 2").path("/"));
        builder.set_cookie(&Cookie::new("b", "2"));
        assert_eq!(builder.headers().get_all("set-cookie"), vec!["a=1+2; Path=/", "b=2"]);

        builder.delete_cookie("a", Some("/"), None);
        let lines = builder.headers().get_all("set-cookie");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "b=2");
        assert_eq!(lines[1], "a=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT");
    }

    #[test]
    fn test_cookie_serialize() {
        let cookie = Cookie::new("session", "abc123")
            .path("/")
            .secure()
            .http_only()
            .same_site(SameSite::Strict);

        let header = cookie.to_header_value();
        assert!(header.contains("session=abc123"));
        assert!(header.contains("Path=/"));
        assert!(header.contains("Secure"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("SameSite=Strict"));
    }
}
