//! Property and stream tests for the transfer frame codec.

use std::sync::Arc;

use ferry_protocol::{
    BufferPool, FileType, FrameReader, FrameWriter, Message, MessageKind, ProtocolError, Status,
    DEFAULT_BUFFER_SIZE,
};
use proptest::prelude::*;

fn kind_strategy() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Head),
        Just(MessageKind::File),
        Just(MessageKind::End),
        Just(MessageKind::Notify),
        Just(MessageKind::Close),
        Just(MessageKind::RecvHead),
        Just(MessageKind::RecvFile),
        Just(MessageKind::FileStatus),
        Just(MessageKind::Version),
    ]
}

fn message_strategy() -> impl Strategy<Value = Message> {
    (
        kind_strategy(),
        prop::collection::vec(any::<u8>(), 0..64),
        prop::collection::vec(any::<u8>(), 0..64),
        prop::collection::vec(any::<u8>(), 0..64),
        prop::collection::vec(any::<u8>(), 0..2048),
        "[a-zA-Z0-9._/-]{0,80}",
        "[0-9a-f]{0,64}",
        any::<u64>(),
        any::<bool>(),
        prop_oneof![Just(FileType::Content), Just(FileType::Filler)],
    )
        .prop_map(
            |(kind, public_key, sign_msg, signature, payload, file_name, file_hash, file_size, last, file_type)| {
                Message {
                    kind,
                    public_key,
                    sign_msg,
                    signature,
                    payload,
                    file_name,
                    file_hash,
                    file_size,
                    last,
                    file_type,
                }
            },
        )
}

proptest! {
    /// Property: every field survives the wire unchanged.
    #[test]
    fn prop_message_survives_wire(msg in message_strategy()) {
        let frame = msg.encode().unwrap();
        prop_assert_eq!(frame.len(), 4 + msg.body_len());
        let decoded = Message::decode(&frame, None).unwrap();
        prop_assert_eq!(decoded, msg);
    }

    /// Property: the decoder never panics on arbitrary input.
    #[test]
    fn prop_decode_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Message::decode(&data, None);
        let _ = Message::decode_body(&data, None);
    }

    /// Property: any strict prefix of a frame is rejected.
    #[test]
    fn prop_truncated_frame_rejected(msg in message_strategy(), cut in any::<prop::sample::Index>()) {
        let frame = msg.encode().unwrap();
        let cut = cut.index(frame.len());
        prop_assert!(Message::decode(&frame[..cut], None).is_err());
    }

    /// Property: the declared chunk prefix is what the receiver sees.
    #[test]
    fn prop_chunk_prefix(data in prop::collection::vec(any::<u8>(), 1..DEFAULT_BUFFER_SIZE), n in any::<prop::sample::Index>()) {
        let pool = BufferPool::new(DEFAULT_BUFFER_SIZE, 4);
        let mut buf = pool.get();
        buf[..data.len()].copy_from_slice(&data);
        let n = n.index(data.len() + 1);

        let msg = Message::file("frag", buf, n);
        let decoded = Message::decode(&msg.encode().unwrap(), Some(&pool)).unwrap();
        prop_assert_eq!(decoded.chunk().unwrap(), &data[..n]);
    }
}

#[tokio::test]
async fn test_stream_of_frames_then_clean_eof() {
    let pool = Arc::new(BufferPool::new(DEFAULT_BUFFER_SIZE, 8));
    let (client, server) = tokio::io::duplex(64 * 1024);
    let mut writer = FrameWriter::new(client);
    let mut reader = FrameReader::with_pool(server, pool.clone());

    let sender = tokio::spawn(async move {
        writer
            .write(&Message::head("frag-a", "root", true, b"pk", b"m", b"s"))
            .await?;
        for i in 0..4u8 {
            let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
            buf.fill(i);
            writer.write(&Message::file("frag-a", buf, 1000)).await?;
        }
        writer.write(&Message::end("frag-a", "root", 4000, 4000, true)).await?;
        writer.write(&Message::close("frag-a", Status::Ok)).await?;
        writer.shutdown().await
    });

    let head = reader.read().await.unwrap().unwrap();
    assert_eq!(head.kind, MessageKind::Head);
    assert!(head.last);

    let mut total = 0;
    for i in 0..4u8 {
        let chunk = reader.read().await.unwrap().unwrap();
        assert_eq!(chunk.kind, MessageKind::File);
        assert!(chunk.chunk().unwrap().iter().all(|b| *b == i));
        total += chunk.chunk().unwrap().len();
        assert!(chunk.release(&pool));
    }
    assert_eq!(total, 4000);

    let end = reader.read().await.unwrap().unwrap();
    assert_eq!(end.file_size, 4000);
    assert_eq!(end.original_size(), Some(4000));

    let close = reader.read().await.unwrap().unwrap();
    assert_eq!(close.kind, MessageKind::Close);
    assert!(close.status().is_ok());

    assert!(reader.read().await.unwrap().is_none());
    sender.await.unwrap().unwrap();

    // Pooled buffers were recycled rather than reallocated per chunk.
    assert!(pool.created() <= 2);
}

#[tokio::test]
async fn test_garbage_kind_surfaces_as_error() {
    let mut frame = Message::version().encode().unwrap().to_vec();
    frame[4] = 0xee;
    let mut reader = FrameReader::new(&frame[..]);
    assert!(matches!(
        reader.read().await,
        Err(ProtocolError::UnknownKind(0xee))
    ));
}
