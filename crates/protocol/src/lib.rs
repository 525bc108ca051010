#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

//! Wire codec for the CVS password-server protocol.
//!
//! The protocol is line oriented. A connection opens with an authentication
//! block, continues with requests from the client, each answered (when it is a
//! command) by a stream of responses ending in `ok` or `error`. File contents
//! travel as length-prefixed transmissions embedded in both directions.
//!
//! The crate exposes:
//!
//! - frame types that keep their exact wire bytes ([`Request`], [`Response`],
//!   [`AuthRequest`], [`AuthReply`]) so a relay can forward them unchanged;
//! - [`Command`], a command request together with the argument requests that
//!   precede it;
//! - `tokio_util` codecs for both ends of a connection ([`ClientCodec`],
//!   [`UpstreamCodec`]), which tolerate input split at any byte boundary;
//! - password scrambling and repository root translation.
//!
//! # Examples
//!
//! ```
//! use bytes::BytesMut;
//! use protocol::{ClientCodec, ClientFrame};
//! use tokio_util::codec::Decoder;
//!
//! let mut codec = ClientCodec::authenticated();
//! let mut input = BytesMut::from(&b"Argument module-A\nco\n"[..]);
//! let Some(ClientFrame::Command(command)) = codec.decode(&mut input).unwrap() else {
//!     unreachable!();
//! };
//! assert_eq!(command.name(), "co");
//! assert_eq!(command.arguments(), ["module-A"]);
//! ```

mod auth;
mod codec;
mod error;
mod line;
mod request;
mod response;
mod root;
mod scramble;

pub use auth::{AUTH_ACCEPTED, AUTH_REJECTED, AuthMode, AuthOutcome, AuthReply, AuthRequest};
pub use codec::{ClientCodec, ClientFrame, UpstreamCodec, UpstreamFrame};
pub use error::ProtocolError;
pub use line::{MAX_COMMAND_LEN, MAX_FILE_LEN, MAX_LINE_LEN};
pub use request::{
    Command, Request, RequestEffect, RequestSpec, known_requests, lookup_request,
};
pub use response::{Response, ResponseKind, ResponseSpec, Terminal, lookup_response};
pub use root::RootRewrite;
pub use scramble::{SCRAMBLE_TAG, descramble, scramble};
