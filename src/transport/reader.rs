//! # Transport Reader
//!
//! Reassembles frames from the read half of a stream transport.
//!
//! ```text
//!            frame complete              frame handed off
//! Accumulating ───────────────► FrameReady ───────────────► Accumulating
//!      │
//!      │ cancelled / end of stream / read error
//!      ▼
//!   Stopped
//! ```
//!
//! The reader waits on the next frame and the shutdown token together, so a
//! cancellation interrupts a read that would otherwise never return. The
//! caller decides what a stop means; stream links disconnect on anything but
//! `Cancelled`.

use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::core::codec::FrameCodec;
use crate::error::ProtocolError;

/// Why the reader stopped
#[derive(Debug)]
pub enum StopReason {
    /// Shutdown was requested locally
    Cancelled,
    /// The peer closed the stream
    EndOfStream,
    /// Reading or framing failed
    Failed(ProtocolError),
}

/// Reader state machine
#[derive(Debug)]
pub enum ReaderState {
    Accumulating,
    FrameReady(BytesMut),
    Stopped(StopReason),
}

/// Frame reassembly loop over one read half
pub struct TransportReader<R> {
    frames: FramedRead<R, FrameCodec>,
}

impl<R> TransportReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, codec: FrameCodec, buffer_capacity: usize) -> Self {
        Self {
            frames: FramedRead::with_capacity(reader, codec, buffer_capacity),
        }
    }

    /// Drive the state machine until it stops, handing every complete frame
    /// to `on_frame` in arrival order.
    pub async fn run<F>(mut self, shutdown: &CancellationToken, mut on_frame: F) -> StopReason
    where
        F: FnMut(BytesMut),
    {
        let mut state = ReaderState::Accumulating;
        loop {
            state = match state {
                ReaderState::Accumulating => self.accumulate(shutdown).await,
                ReaderState::FrameReady(frame) => {
                    on_frame(frame);
                    ReaderState::Accumulating
                }
                ReaderState::Stopped(reason) => {
                    trace!(?reason, "Reader stopped");
                    return reason;
                }
            };
        }
    }

    async fn accumulate(&mut self, shutdown: &CancellationToken) -> ReaderState {
        if shutdown.is_cancelled() {
            return ReaderState::Stopped(StopReason::Cancelled);
        }

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => ReaderState::Stopped(StopReason::Cancelled),
            next = self.frames.next() => match next {
                Some(Ok(frame)) => ReaderState::FrameReady(frame),
                Some(Err(e)) => ReaderState::Stopped(StopReason::Failed(e)),
                None => ReaderState::Stopped(StopReason::EndOfStream),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_frames_then_end_of_stream() {
        let (mut tx, rx) = tokio::io::duplex(16);
        let reader = TransportReader::new(rx, FrameCodec::new(), 64);
        let token = CancellationToken::new();

        let writer = tokio::spawn(async move {
            for chunk in [&b"al"[..], b"pha\nbe", b"ta\n", b"tail"] {
                tx.write_all(chunk).await.unwrap();
            }
        });

        let mut frames = Vec::new();
        let reason = reader
            .run(&token, |frame| frames.push(String::from_utf8(frame.to_vec()).unwrap()))
            .await;
        writer.await.unwrap();

        assert!(matches!(reason, StopReason::EndOfStream));
        assert_eq!(frames, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_pending_read() {
        let (_tx, rx) = tokio::io::duplex(16);
        let reader = TransportReader::new(rx, FrameCodec::new(), 64);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let reason = tokio::time::timeout(Duration::from_secs(2), reader.run(&token, |_| {}))
            .await
            .expect("reader must stop once cancelled");
        assert!(matches!(reason, StopReason::Cancelled));
    }

    #[tokio::test]
    async fn test_oversized_frame_fails() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let reader = TransportReader::new(rx, FrameCodec::with_max_frame_length(32), 64);
        let token = CancellationToken::new();

        tx.write_all(&[b'x'; 100]).await.unwrap();
        let reason = reader.run(&token, |_| panic!("no frame expected")).await;
        assert!(matches!(reason, StopReason::Failed(ProtocolError::OversizedFrame(_))));
    }
}
