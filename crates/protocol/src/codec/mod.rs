//! `tokio_util::codec` adapters for both directions of a pserver connection.
//!
//! [`ClientCodec`] decodes what a client sends (authentication block, then
//! commands) and encodes what a server sends back. [`UpstreamCodec`] is its
//! mirror image, used on connections the proxy opens to upstream servers.

mod client;
mod upstream;

pub use client::{ClientCodec, ClientFrame};
pub use upstream::{UpstreamCodec, UpstreamFrame};
