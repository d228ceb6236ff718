/// Integration tests for the encoder bridge
///
/// POSIX `cat` and `sh` stand in for the encoder.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use radiocast_lib::audio::{start_capture, ToneInput};
use radiocast_lib::config::{OutputCodec, StreamConfig};
use radiocast_lib::pipeline::transport::byte_channel;
use radiocast_lib::transcode::{EncoderCommand, TranscodeBridge, TranscodeError};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_capture_through_passthrough_encoder() {
    let config = Arc::new(StreamConfig {
        sample_rate: 48000.0,
        channels: 2,
        buffer_size: 1024,
        codec: OutputCodec::Aac,
    });
    let (raw_tx, raw_rx) = byte_channel(8);
    let (encoded_tx, mut encoded_rx) = byte_channel(64);

    let bridge = TranscodeBridge::start(EncoderCommand::new("cat", vec![]), raw_rx, encoded_tx)
        .expect("cat should start");
    let capture = start_capture(
        Arc::new(ToneInput::new("TestMic", 440.0).unpaced().fail_after(10)),
        Arc::clone(&config),
        raw_tx,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    println!("\n=== Passthrough Encoder Test ===");
    let mut total = 0;
    while let Ok(Some(chunk)) =
        tokio::time::timeout(Duration::from_secs(5), encoded_rx.recv()).await
    {
        total += chunk.len();
    }
    println!("Received {} encoded bytes", total);
    assert_eq!(total, 10 * config.bytes_per_frame());

    assert!(capture.wait().await.is_err(), "Tone was unplugged");

    // Input ended, then cat exited 0: a clean run
    let stats = bridge.await.unwrap().unwrap();
    println!("Bridge stats: {:?}", stats);
    assert_eq!(stats.bytes_in, total as u64);
    assert_eq!(stats.bytes_out, total as u64);
}

#[tokio::test]
async fn test_encoder_failure_mid_stream() {
    let (raw_tx, raw_rx) = byte_channel(8);
    let (encoded_tx, mut encoded_rx) = byte_channel(8);

    // Echo one chunk, then die
    let command = EncoderCommand::new(
        "sh",
        vec!["-c".to_string(), "head -c 4; echo 'encoder crashed' >&2; exit 7".to_string()],
    );
    let bridge = TranscodeBridge::start(command, raw_rx, encoded_tx).unwrap();

    raw_tx.send(Bytes::from_static(b"abcdefgh")).await.unwrap();

    let mut received = Vec::new();
    while let Ok(Some(chunk)) =
        tokio::time::timeout(Duration::from_secs(5), encoded_rx.recv()).await
    {
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, b"abcd");

    let err = bridge.await.unwrap().unwrap_err();
    println!("Bridge failed with: {}", err);
    assert!(matches!(err, TranscodeError::TranscodeProcessFailed { code: Some(7), .. }));

    // Upstream notices the dead encoder
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if raw_tx.send(Bytes::from_static(b"more")).await.is_err() {
                break;
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "Raw channel should close after the encoder dies");
}

#[tokio::test]
async fn test_ffmpeg_command_line_for_testmic() {
    let config = StreamConfig {
        sample_rate: 48000.0,
        channels: 2,
        buffer_size: 8192,
        codec: OutputCodec::Aac,
    };
    let command = EncoderCommand::ffmpeg("ffmpeg", &config);
    println!("{}", command);

    assert_eq!(command.program(), "ffmpeg");
    let args = command.args().join(" ");
    assert!(args.contains("-f s32le -ac 2 -ar 48k -i -"));
    assert!(args.ends_with("-f adts -"));
}
