//! Fuzz target for scanning installer `list` output.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mlos_system_test::models::resolver::listed_paths;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    // Only token scanning is exercised here; the needle is fixed.
    let _ = listed_paths(&text, "hf/distilgpt2@latest");
});
