//! Fuzz target for model spec parsing.
//!
//! Arbitrary strings must parse or be rejected, never panic, and every
//! accepted spec must flatten into a slug without separators.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mlos_system_test::models::ModelSpec;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(spec) = ModelSpec::parse(text) {
            let slug = spec.flattened();
            assert!(!slug.contains('/'));
            assert!(!slug.contains('@'));
            assert_eq!(spec.to_string(), text);
        }
    }
});
