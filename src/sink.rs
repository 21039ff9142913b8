//!
//! Publishing of finished events
//!
use crate::event::Event;
use crate::{Error, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

/// Destination of finished events. Shared by all prospector runs, so
/// implementations must accept concurrent callers.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one event
    async fn publish(&self, event: Event) -> Result<()>;

    /// Stop accepting events, later publishes fail with [`Error::SinkClosed`]
    async fn close(&self) -> Result<()>;
}

/// Forwards events to an unbounded channel, the receiver sees the end of the
/// stream once the sink is closed.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Mutex<Option<mpsc::UnboundedSender<Event>>>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

#[async_trait::async_trait]
impl EventSink for ChannelSink {
    async fn publish(&self, event: Event) -> Result<()> {
        let tx = self.tx.lock().await;
        tx.as_ref()
            .ok_or(Error::SinkClosed)?
            .send(event)
            .map_err(|_e| Error::SinkClosed)
    }

    async fn close(&self) -> Result<()> {
        let _ = self.tx.lock().await.take();
        Ok(())
    }
}

/// Writes each event as one JSON line
pub struct JsonLinesSink<W> {
    writer: Mutex<Option<W>>,
}

impl<W> std::fmt::Debug for JsonLinesSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    /// Create a sink writing to `writer`
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Hand back the writer, `None` once the sink was closed
    pub fn into_inner(self) -> Option<W> {
        self.writer.into_inner()
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send> EventSink for JsonLinesSink<W> {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn publish(&self, event: Event) -> Result<()> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::SinkClosed)?;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}
