//! Fuzz target: `image::check_version`
//!
//! Feeds arbitrary image heads through the version policy with every
//! check enabled. A version that parses must round-trip through the
//! running-version comparison.
//!
//! cargo fuzz run fuzz_image_header

#![no_main]

use libfuzzer_sys::fuzz_target;
use otalink::ota::image::{check_version, parse_version};
use otalink::ota::packet::SessionFlags;
use otalink::ota::AbortReason;

const ALL: SessionFlags = SessionFlags {
    reset_after_success: false,
    check_against_last_invalid: true,
    check_against_running_version: true,
};

fuzz_target!(|data: &[u8]| {
    match parse_version(data) {
        Some(version) => {
            assert!(version.len() <= 32);
            assert_eq!(
                check_version(data, ALL, Some(version.as_str()), None),
                Err(AbortReason::SameVersion)
            );
        }
        None => {
            assert_eq!(check_version(data, ALL, None, None), Err(AbortReason::InvalidVersion));
        }
    }
});
