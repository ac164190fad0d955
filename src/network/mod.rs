//! Requests, responses and the transport that carries them.

mod client;
mod error;
#[cfg(test)]
pub(crate) mod mock;
mod types;

pub use client::{HttpTransport, Transport};
pub use error::FetchError;
pub use types::{Destination, Request, Response};
