//! Fuzz target: `Request::decode` / `Response::decode`
//!
//! Drives arbitrary frames into both decoders and asserts that a frame
//! which decodes re-encodes to a frame that decodes to the same value.
//!
//! cargo fuzz run fuzz_packet_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use otalink::ota::{Request, Response};

fuzz_target!(|data: &[u8]| {
    match Request::decode(data) {
        Ok(req) => {
            let frame = req.encode();
            assert_eq!(Request::decode(&frame), Ok(req), "request re-encode mismatch");
            assert!(frame.len() <= data.len(), "encoding grew the frame");
        }
        Err(e) => {
            // every failure maps onto a reportable error code
            let _ = e.error_code();
        }
    }

    if let Ok(resp) = Response::decode(data) {
        let frame = resp.encode();
        assert_eq!(frame.as_bytes(), data, "response encoding is not canonical");
    }
});
