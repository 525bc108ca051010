#![no_main]

//! Fuzz target for upstream-side framing.
//!
//! Auth verdicts, response lines and file transmission lengths from an
//! upstream are untrusted; decoding must fail cleanly on garbage.

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use protocol::{Response, UpstreamCodec};
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut codec = UpstreamCodec::new().with_max_file_len(1 << 20);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode_eof(&mut buf) {}

    let _ = Response::parse(data);
});
