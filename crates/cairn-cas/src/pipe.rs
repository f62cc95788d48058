//! Bounded producer/consumer pipe with deferred error propagation.
//!
//! A background task writes into one end of an in-memory duplex; the
//! consumer pulls from the other end through [`tokio::io::AsyncRead`]. When
//! the producer fails, its error is returned by the consumer's read that
//! would otherwise report end of stream. Dropping the consumer cancels the
//! producer.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Consumer half of a producer/consumer pipe.
pub struct PipeReader {
    reader: DuplexStream,
    producer: Option<JoinHandle<io::Result<()>>>,
    cancel: CancellationToken,
}

impl PipeReader {
    /// Spawn `produce` with the writing end of a pipe buffering up to
    /// `capacity` bytes, and return the reading end.
    ///
    /// The producer also receives a token that fires when the reader is
    /// dropped; writes fail with `BrokenPipe` after that point too.
    pub fn spawn<F, Fut, E>(capacity: usize, produce: F) -> Self
    where
        F: FnOnce(DuplexStream, CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let (writer, reader) = tokio::io::duplex(capacity.max(1));
        let cancel = CancellationToken::new();
        let work = produce(writer, cancel.clone());
        let token = cancel.clone();

        let producer = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "pipe producer cancelled",
                )),
                res = work => res.map_err(io::Error::other),
            }
        });

        Self {
            reader,
            producer: Some(producer),
            cancel,
        }
    }

    /// Token that cancels the producer.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.reader).poll_read(cx, buf))?;
        if buf.filled().len() > before || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        // End of stream: report how the producer finished.
        let Some(handle) = this.producer.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let outcome = ready!(Pin::new(handle).poll(cx));
        this.producer = None;
        match outcome {
            Ok(result) => Poll::Ready(result),
            Err(join) => Poll::Ready(Err(io::Error::other(join))),
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.producer.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn test_producer_output_reaches_consumer() {
        let mut pipe = PipeReader::spawn(8, |mut w, _| async move {
            for i in 0..100u8 {
                w.write_all(&[i]).await?;
            }
            Ok::<(), io::Error>(())
        });

        let mut out = Vec::new();
        pipe.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, (0..100u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn test_producer_error_after_data() {
        let mut pipe = PipeReader::spawn(64, |mut w, _| async move {
            w.write_all(b"partial").await?;
            Err::<(), _>(io::Error::new(io::ErrorKind::InvalidData, "boom"))
        });

        let mut buf = [0u8; 7];
        pipe.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"partial");

        let err = pipe.read(&mut buf).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn test_drop_cancels_producer() {
        let observed = Arc::new(AtomicBool::new(false));
        let flag = observed.clone();

        let pipe = PipeReader::spawn(4, move |mut w, cancel| async move {
            w.write_all(b"fill").await?;
            cancel.cancelled().await;
            flag.store(true, Ordering::SeqCst);
            Ok::<(), io::Error>(())
        });
        let token = pipe.cancel_token();
        drop(pipe);

        assert!(token.is_cancelled());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            !observed.load(Ordering::SeqCst),
            "producer must be torn down, not run to completion"
        );
    }
}
