use tokio::sync::mpsc;

use crate::constants::STREAM_CHANNEL_CAPACITY;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Delta(String),
    /// Terminal: the full assistant text.
    Done(String),
    /// Terminal: a message suitable for showing to the user.
    Failed(String),
}

impl StreamUpdate {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamUpdate::Delta(_))
    }
}

/// Creates a connected producer/consumer pair.
pub fn stream_channel() -> (StreamSink, StreamHandle) {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    (StreamSink { tx }, StreamHandle { rx, finished: false })
}

/// Producer side of a streamed response.
///
/// The terminal calls take `self`, so a sink can finish at most once.
#[derive(Debug)]
pub struct StreamSink {
    tx: mpsc::Sender<StreamUpdate>,
}

impl StreamSink {
    /// Forwards a delta. Returns false once the consumer has gone away.
    pub async fn update(&self, delta: impl Into<String>) -> bool {
        self.tx.send(StreamUpdate::Delta(delta.into())).await.is_ok()
    }

    pub async fn done(self, content: impl Into<String>) {
        let _ = self.tx.send(StreamUpdate::Done(content.into())).await;
    }

    pub async fn fail(self, message: impl Into<String>) {
        let _ = self.tx.send(StreamUpdate::Failed(message.into())).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of a streamed response.
#[derive(Debug)]
pub struct StreamHandle {
    rx: mpsc::Receiver<StreamUpdate>,
    finished: bool,
}

impl StreamHandle {
    /// Next update, or `None` after the terminal update has been returned.
    ///
    /// A producer that vanishes without finishing is reported as a failure.
    pub async fn next(&mut self) -> Option<StreamUpdate> {
        if self.finished {
            return None;
        }
        let update = self.rx.recv().await.unwrap_or_else(|| {
            StreamUpdate::Failed("response stream closed unexpectedly".to_string())
        });
        if update.is_terminal() {
            self.finished = true;
            self.rx.close();
        }
        Some(update)
    }

    /// Drains the stream, returning the final text or the failure message.
    pub async fn collect(mut self) -> Result<String, String> {
        while let Some(update) = self.next().await {
            match update {
                StreamUpdate::Delta(_) => continue,
                StreamUpdate::Done(content) => return Ok(content),
                StreamUpdate::Failed(message) => return Err(message),
            }
        }
        Err("response stream already finished".to_string())
    }

    /// Adapts the handle into a `futures::Stream` that ends after the terminal update.
    pub fn into_stream(self) -> impl futures::Stream<Item = StreamUpdate> {
        futures::stream::unfold(self, |mut handle| async move {
            handle.next().await.map(|update| (update, handle))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deltas_then_done() {
        let (sink, mut handle) = stream_channel();
        tokio::spawn(async move {
            sink.update("Hel").await;
            sink.update("lo").await;
            sink.done("Hello").await;
        });

        assert_eq!(handle.next().await, Some(StreamUpdate::Delta("Hel".to_string())));
        assert_eq!(handle.next().await, Some(StreamUpdate::Delta("lo".to_string())));
        assert_eq!(handle.next().await, Some(StreamUpdate::Done("Hello".to_string())));
        assert_eq!(handle.next().await, None);
    }

    #[tokio::test]
    async fn test_dropped_sink_is_a_failure() {
        let (sink, handle) = stream_channel();
        drop(sink);
        let result = handle.collect().await;
        assert_eq!(result, Err("response stream closed unexpectedly".to_string()));
    }

    #[tokio::test]
    async fn test_failed_is_terminal() {
        let (sink, mut handle) = stream_channel();
        sink.fail("quota exceeded").await;
        assert_eq!(
            handle.next().await,
            Some(StreamUpdate::Failed("quota exceeded".to_string()))
        );
        assert_eq!(handle.next().await, None);
    }

    #[tokio::test]
    async fn test_update_reports_closed_consumer() {
        let (sink, handle) = stream_channel();
        drop(handle);
        assert!(!sink.update("ignored").await);
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_into_stream_ends_after_terminal() {
        use futures::StreamExt;

        let (sink, handle) = stream_channel();
        sink.update("a").await;
        sink.done("a").await;
        let updates: Vec<_> = handle.into_stream().collect().await;
        assert_eq!(updates.len(), 2);
        assert!(updates[1].is_terminal());
    }
}
