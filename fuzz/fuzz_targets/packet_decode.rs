//! Fuzz the packet decoder with arbitrary bytes.
//!
//! Invariants under test:
//! 1. Decoding never panics, whatever the input.
//! 2. Anything that decodes re-encodes successfully.
//! 3. The re-encoding decodes back to the same packet.

#![no_main]

use libfuzzer_sys::fuzz_target;
use saltline_proto::Packet;

fuzz_target!(|data: &[u8]| {
    let Ok(packet) = Packet::decode(data) else {
        return;
    };

    let wire = packet
        .to_bytes()
        .expect("a decoded packet satisfies the encoder's size checks");

    let reparsed = Packet::decode(&wire).expect("round-trip must decode");
    assert_eq!(packet, reparsed, "round-trip must be identity");
});
