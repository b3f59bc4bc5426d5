//! HTTP plumbing subsystem.
//!
//! # Data Flow
//! ```text
//! caller builds RequestDescriptor
//!     → guard (attach credentials, see crate::guard)
//!     → client.rs (cookies in, hyper exchange, deadline, Set-Cookie out)
//!     → response.rs (buffered HttpResponse)
//!     → guard (auth failure handling) → caller
//! ```

pub mod client;
pub mod request;
pub mod response;

pub use client::{HyperTransport, TransportError};
pub use request::{Attempt, RequestDescriptor, X_REQUEST_ID};
pub use response::HttpResponse;
