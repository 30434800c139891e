#![no_main]

use libfuzzer_sys::fuzz_target;
use rollout_guard::ledger::parse_ledger;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Malformed rows are counted, never fatal
        let load = parse_ledger(input);
        for record in &load.records {
            assert!(record.paid_amount.is_finite() && record.paid_amount >= 0.0);
        }
    }
});
