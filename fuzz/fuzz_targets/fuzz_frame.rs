#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use package_link::{FrameCodec, Package};
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Arbitrary stream bytes: framing and package parsing must never panic
    let mut codec = FrameCodec::with_max_frame_length(64 * 1024);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(frame)) = codec.decode_eof(&mut buf) {
        let _ = Package::from_frame(&frame);
    }
});
