#![no_main]

use autopa_solver::parse_ini;
use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Some(at) = Utc.timestamp_opt(1_700_000_000, 0).single() {
        if let Ok(solve) = parse_ini(text, at) {
            assert!((0.0..24.0).contains(&solve.position.ra_hours()));
            assert!((-90.0..=90.0).contains(&solve.position.dec_degrees()));
        }
    }
});
