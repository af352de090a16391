//! Integration tests for LengthPrefixedCodec with Tokio streams.
//!
//! These tests verify the codec works correctly with real Tokio streams,
//! including frames split across writes and malformed input.

use devgate_core::Error;
use devgate_protocol::{LengthPrefixedCodec, Message};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::codec::{Framed, FramedRead};

/// Helper function to create a framed duplex stream for testing.
fn create_framed_duplex(
    buffer_size: usize,
) -> (
    Framed<DuplexStream, LengthPrefixedCodec>,
    Framed<DuplexStream, LengthPrefixedCodec>,
) {
    let (client, server) = tokio::io::duplex(buffer_size);
    let client_framed = Framed::new(client, LengthPrefixedCodec::new());
    let server_framed = Framed::new(server, LengthPrefixedCodec::new());
    (client_framed, server_framed)
}

#[tokio::test]
async fn test_codec_roundtrip_simple_message() {
    let (mut client, mut server) = create_framed_duplex(1024);

    let msg = Message::new("dev-1", 1, &b"hello"[..]);
    client.send(msg.clone()).await.unwrap();

    let received = server.next().await.unwrap().unwrap();
    assert_eq!(received, msg);
}

#[tokio::test]
async fn test_codec_bidirectional_communication() {
    let (mut client, mut server) = create_framed_duplex(1024);

    let heartbeat = Message::new("dev-1", 0, &b"beat message"[..]);
    client.send(heartbeat.clone()).await.unwrap();
    assert_eq!(server.next().await.unwrap().unwrap(), heartbeat);

    let ack = Message::new("dev-1", 100, &b"ack"[..]);
    server.send(ack.clone()).await.unwrap();
    assert_eq!(client.next().await.unwrap().unwrap(), ack);
}

#[tokio::test]
async fn test_codec_preserves_order_of_many_messages() {
    let (mut client, mut server) = create_framed_duplex(64);

    let sender = tokio::spawn(async move {
        for i in 0..50 {
            let payload = format!("reading-{i}");
            client
                .send(Message::new("meter-7", i, payload.into_bytes()))
                .await
                .unwrap();
        }
    });

    for i in 0..50 {
        let msg = server.next().await.unwrap().unwrap();
        assert_eq!(msg.message_type(), i);
        assert_eq!(msg.payload().as_ref(), format!("reading-{i}").as_bytes());
    }

    sender.await.unwrap();
}

#[tokio::test]
async fn test_codec_reassembles_frame_split_across_writes() {
    let (mut writer, reader) = tokio::io::duplex(1024);
    let mut frames = FramedRead::new(reader, LengthPrefixedCodec::new());

    let frame: Vec<u8> = [
        &22u32.to_be_bytes()[..],
        &5u32.to_be_bytes()[..],
        b"dev-1",
        &1i32.to_be_bytes()[..],
        b"hello",
    ]
    .concat();

    let writer_task = tokio::spawn(async move {
        for chunk in frame.chunks(3) {
            writer.write_all(chunk).await.unwrap();
            writer.flush().await.unwrap();
            tokio::task::yield_now().await;
        }
        writer
    });

    let msg = frames.next().await.unwrap().unwrap();
    assert_eq!(msg, Message::new("dev-1", 1, &b"hello"[..]));

    drop(writer_task.await.unwrap());
    assert!(frames.next().await.is_none());
}

#[tokio::test]
async fn test_codec_malformed_frame_yields_error() {
    let (mut writer, reader) = tokio::io::duplex(1024);
    let mut frames = FramedRead::new(reader, LengthPrefixedCodec::new());

    // totalLength 12 with a 4 byte device ID: negative payload
    writer.write_all(&[0, 0, 0, 12, 0, 0, 0, 4]).await.unwrap();

    let result = frames.next().await.unwrap();
    assert!(matches!(result, Err(Error::InvalidFrameLength { .. })));
}

#[tokio::test]
async fn test_codec_truncated_stream_is_error() {
    let (mut writer, reader) = tokio::io::duplex(1024);
    let mut frames = FramedRead::new(reader, LengthPrefixedCodec::new());

    writer.write_all(&[0, 0, 0, 22, 0, 0, 0, 5, b'd']).await.unwrap();
    drop(writer);

    let result = frames.next().await.unwrap();
    assert!(matches!(result, Err(Error::Io(_))));
}
