//! Fuzz the metadata decoder with arbitrary bytes.
//!
//! Invariants under test:
//! 1. Decoding never panics, whatever the input.
//! 2. Anything that decodes re-encodes, and the re-encoding decodes to an
//!    equal value. (The byte form itself need not be identical: a lone
//!    zero count byte and the empty string both mean the empty list.)

#![no_main]

use libfuzzer_sys::fuzz_target;
use saltline_proto::Metadata;

fuzz_target!(|data: &[u8]| {
    let Ok(metadata) = Metadata::decode(data) else {
        return;
    };

    let wire = metadata.to_bytes();
    let reparsed = Metadata::decode(&wire).expect("round-trip must decode");
    assert_eq!(metadata, reparsed, "round-trip must be identity");
});
