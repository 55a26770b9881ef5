//! Fuzz target for transfer frame decoding.
//!
//! Tests that the frame decoder handles arbitrary input without panicking
//! and that every frame it accepts encodes back to the same bytes.

#![no_main]

use ferry_protocol::{BufferPool, Message, DEFAULT_BUFFER_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let pool = BufferPool::new(DEFAULT_BUFFER_SIZE, 2);

    if let Ok(msg) = Message::decode(data, Some(&pool)) {
        let _ = msg.status();
        let _ = msg.original_size();
        let _ = msg.chunk();

        // Pooled payloads are padded to the pool capacity, so only
        // unpooled decodes are compared byte for byte.
        if let Ok(plain) = Message::decode(data, None) {
            let encoded = plain.encode().expect("decoded frame re-encodes");
            assert_eq!(&encoded[..], data);
        }
        msg.release(&pool);
    }

    let _ = Message::decode_body(data, None);
});
