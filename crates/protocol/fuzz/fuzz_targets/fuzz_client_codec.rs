#![no_main]

//! Fuzz target for client-side framing.
//!
//! Arbitrary bytes from a client must be decoded or rejected without
//! panics. The first byte picks a split point so partial reads are
//! exercised as well.

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use protocol::ClientCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let Some((&split, data)) = data.split_first() else {
        return;
    };
    let split = usize::from(split).min(data.len());

    for mut codec in [ClientCodec::new(), ClientCodec::authenticated()] {
        let mut buf = BytesMut::from(&data[..split]);
        while let Ok(Some(_)) = codec.decode(&mut buf) {}
        buf.extend_from_slice(&data[split..]);
        while let Ok(Some(_)) = codec.decode_eof(&mut buf) {}
    }
});
