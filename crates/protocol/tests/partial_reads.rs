//! Decoding must not depend on how the transport splits the byte stream.

use bytes::BytesMut;
use proptest::prelude::*;
use protocol::{ClientCodec, ClientFrame, UpstreamCodec, UpstreamFrame};
use tokio_util::codec::Decoder;

const CLIENT_SESSION: &[u8] = b"BEGIN AUTH REQUEST\n/cvsroot\nanoncvs\nAy=0=a%0bZ\nEND AUTH REQUEST\n\
Root /cvsroot\n\
Valid-responses ok error Valid-requests M E Updated\n\
valid-requests\n\
Argument -P\n\
Argument module-A\n\
Directory .\n\
/cvsroot\n\
co\n\
Directory .\n\
/cvsroot/module-A\n\
Entry /a.c/1.1///\n\
Modified a.c\n\
u=rw,g=r,o=r\n\
14\n\
ok\nerror  \nci\n\
Argument a.c\n\
ci\n";

const SERVER_SESSION: &[u8] = b"I LOVE YOU\n\
Valid-requests Root Valid-responses co ci\n\
ok\n\
M U module-A/a.c\n\
Updated module-A/\n\
/cvsroot/module-A/a.c\n\
/a.c/1.1///\n\
u=rw,g=r,o=r\n\
z5\n\
\x78\x9c\x03\x00\x00\
Mbinary\n\
3\n\
ok\n\
E cvs checkout: warning\n\
error  \n";

fn decode_client(chunks: &[&[u8]]) -> Vec<ClientFrame> {
    let mut codec = ClientCodec::new();
    let mut buf = BytesMut::new();
    let mut frames = Vec::new();
    for chunk in chunks {
        buf.extend_from_slice(chunk);
        while let Some(frame) = codec.decode(&mut buf).expect("valid session") {
            frames.push(frame);
        }
    }
    while let Some(frame) = codec.decode_eof(&mut buf).expect("clean end") {
        frames.push(frame);
    }
    frames
}

fn decode_server(chunks: &[&[u8]]) -> Vec<UpstreamFrame> {
    let mut codec = UpstreamCodec::new();
    let mut buf = BytesMut::new();
    let mut frames = Vec::new();
    for chunk in chunks {
        buf.extend_from_slice(chunk);
        while let Some(frame) = codec.decode(&mut buf).expect("valid session") {
            frames.push(frame);
        }
    }
    while let Some(frame) = codec.decode_eof(&mut buf).expect("clean end") {
        frames.push(frame);
    }
    frames
}

fn split_at_points<'a>(input: &'a [u8], points: &[usize]) -> Vec<&'a [u8]> {
    let mut cuts: Vec<usize> = points.iter().map(|p| p % (input.len() + 1)).collect();
    cuts.sort_unstable();
    let mut chunks = Vec::new();
    let mut start = 0;
    for cut in cuts {
        chunks.push(&input[start..cut]);
        start = cut;
    }
    chunks.push(&input[start..]);
    chunks
}

#[test]
fn whole_client_session_decodes() {
    let frames = decode_client(&[CLIENT_SESSION]);
    let names: Vec<String> = frames
        .iter()
        .map(|frame| match frame {
            ClientFrame::Auth(_) => "auth".to_owned(),
            ClientFrame::Command(command) => command.name().to_owned(),
            ClientFrame::Raw(_) => "raw".to_owned(),
        })
        .collect();
    assert_eq!(
        names,
        ["auth", "Root", "Valid-responses", "valid-requests", "co", "ci"]
    );
}

#[test]
fn whole_server_session_decodes() {
    let frames = decode_server(&[SERVER_SESSION]);
    assert_eq!(frames.len(), 8);
    let UpstreamFrame::Response(last) = frames.last().unwrap() else {
        panic!("expected response");
    };
    assert!(last.is_terminal());
}

#[test]
fn byte_at_a_time_matches_whole_buffer() {
    let chunks: Vec<&[u8]> = CLIENT_SESSION.chunks(1).collect();
    assert_eq!(decode_client(&chunks), decode_client(&[CLIENT_SESSION]));

    let chunks: Vec<&[u8]> = SERVER_SESSION.chunks(1).collect();
    assert_eq!(decode_server(&chunks), decode_server(&[SERVER_SESSION]));
}

#[tokio::test]
async fn framed_read_yields_the_same_frames() {
    use futures_util::StreamExt;
    use tokio_util::codec::FramedRead;

    let mut framed = FramedRead::new(SERVER_SESSION, UpstreamCodec::new());
    let mut frames = Vec::new();
    while let Some(frame) = framed.next().await {
        frames.push(frame.expect("valid frame"));
    }
    assert_eq!(frames, decode_server(&[SERVER_SESSION]));
}

proptest! {
    #[test]
    fn client_decoding_is_split_invariant(points in proptest::collection::vec(any::<usize>(), 0..12)) {
        let chunks = split_at_points(CLIENT_SESSION, &points);
        prop_assert_eq!(decode_client(&chunks), decode_client(&[CLIENT_SESSION]));
    }

    #[test]
    fn server_decoding_is_split_invariant(points in proptest::collection::vec(any::<usize>(), 0..12)) {
        let chunks = split_at_points(SERVER_SESSION, &points);
        prop_assert_eq!(decode_server(&chunks), decode_server(&[SERVER_SESSION]));
    }
}
