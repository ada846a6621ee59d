//! Mount replies arrive from the network; none of them may panic the parser.

#![no_main]

use autopa_mount::{parse_dec, parse_ra, take_reply, MountStatus};
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);
    while let Ok(Some(reply)) = take_reply(&mut buf) {
        let _ = parse_ra(&reply);
        let _ = parse_dec(&reply);
        let _ = MountStatus::parse(&reply);
    }
});
