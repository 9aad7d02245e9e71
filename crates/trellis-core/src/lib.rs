//! trellis-core: Server-independent HTTP request/response contract
//!
//! An app is anything implementing [`Handler`]: it takes the request
//! environment and answers a [`Response`]. Listeners build the [`Env`],
//! middlewares wrap apps, and the helpers here parse what apps need.
//!
//! ## Features
//! - `sessions` (default) - Cookie and pooled sessions with HMAC-signed cookies

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod body;
pub mod env;
pub mod error;
pub mod files;
pub mod handler;
pub mod headers;
pub mod middleware;
pub mod mime;
pub mod mock;
pub mod multipart;
pub mod query;
pub mod registry;
pub mod request;
pub mod response;
pub mod utils;

#[cfg(feature = "sessions")]
pub mod session;

// Re-exports
pub use body::Body;
pub use env::{Env, EnvValue, ErrorStream, Input};
pub use error::{Error, ErrorKind, Result};
pub use headers::Headers;
pub use request::Request;
pub use response::{Cookie, Response, ResponseBuilder, SameSite, StatusCode};

// Composition re-exports
pub use handler::{BoxHandler, Builder, Cascade, Handler, MiddlewareChain, UrlMap};
pub use middleware::Middleware;

pub use files::{Files, FilesConfig};
pub use mock::{MockOptions, MockRequest, MockResponse};
pub use multipart::{MultipartConfig, UploadedFile};
pub use query::{Param, Params, QueryParser};
pub use registry::{AdapterOptions, AdapterRegistry, ServerAdapter};

#[cfg(feature = "sessions")]
pub use session::{CookieStore, MemoryStore, Session, SessionConfig, SessionMiddleware, SessionStore};
