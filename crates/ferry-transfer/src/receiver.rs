//! The per-connection receive loop.

use std::ffi::OsStr;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ferry_protocol::{BufferPool, FrameReader, FrameWriter, Message, MessageKind, Status};
use ferry_types::FileStoreInfo;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{Notifier, Result, StatusCache, TransferError};

/// Write half shared by the loop and the handshake caller.
pub(crate) type SharedWriter<W> = Arc<tokio::sync::Mutex<FrameWriter<W>>>;

/// Name of the file the next chunk belongs to.
pub(crate) type ReceiveTarget = Arc<Mutex<Option<String>>>;

enum Flow {
    Continue,
    Stop,
}

struct OpenFile {
    file: File,
    path: PathBuf,
    written: u64,
}

pub(crate) struct ReceiveLoop<R, W> {
    reader: FrameReader<R>,
    writer: SharedWriter<W>,
    notifier: Option<Notifier>,
    target: ReceiveTarget,
    dir: PathBuf,
    cache: Option<Arc<dyn StatusCache>>,
    pool: Arc<BufferPool>,
    stop: CancellationToken,
    open: Option<OpenFile>,
}

impl<R, W> ReceiveLoop<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        reader: FrameReader<R>,
        writer: SharedWriter<W>,
        notifier: Notifier,
        target: ReceiveTarget,
        dir: PathBuf,
        cache: Option<Arc<dyn StatusCache>>,
        pool: Arc<BufferPool>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            reader,
            writer,
            notifier: Some(notifier),
            target,
            dir,
            cache,
            pool,
            stop,
            open: None,
        }
    }

    /// Runs until the peer closes, the stop token fires, or a frame is
    /// rejected. The connection and the rendezvous are closed on every
    /// exit path, panics included.
    pub(crate) async fn run(mut self) -> Result<()> {
        let outcome = AssertUnwindSafe(self.process()).catch_unwind().await;
        self.finish().await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                error!(dir = %self.dir.display(), "receive loop panicked");
                Err(TransferError::LoopPanicked)
            }
        }
    }

    async fn process(&mut self) -> Result<()> {
        loop {
            let frame = tokio::select! {
                _ = self.stop.cancelled() => return Ok(()),
                frame = self.reader.read() => frame?,
            };
            let Some(msg) = frame else {
                debug!("peer closed the connection");
                return Ok(());
            };
            if let Flow::Stop = self.dispatch(msg).await? {
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, msg: Message) -> Result<Flow> {
        match msg.kind {
            MessageKind::Head => self.on_head(msg).await,
            MessageKind::File => self.on_chunk(msg).await,
            MessageKind::End => self.on_end(msg).await,
            MessageKind::FileStatus => Ok(self.on_status_report(msg)),
            MessageKind::Notify => {
                if let Some(notifier) = &self.notifier {
                    notifier.deliver(msg.status());
                }
                self.release(msg);
                Ok(Flow::Continue)
            }
            MessageKind::Close => {
                debug!(status = ?msg.status(), "peer sent close");
                self.release(msg);
                Ok(Flow::Stop)
            }
            other => {
                self.release(msg);
                Err(TransferError::UnexpectedFrame(other.as_str()))
            }
        }
    }

    async fn on_head(&mut self, msg: Message) -> Result<Flow> {
        let name = match checked_name(&msg.file_name) {
            Ok(name) => name.to_string(),
            Err(e) => {
                self.release(msg);
                self.abort().await;
                return Err(e);
            }
        };
        self.release(msg);

        if let Some(stale) = self.open.take() {
            warn!(path = %stale.path.display(), "head arrived before end, dropping partial file");
            drop(stale.file);
            if let Err(e) = tokio::fs::remove_file(&stale.path).await {
                debug!(error = %e, "failed to remove partial file");
            }
        }
        debug!(file = %name, "head received");
        *self.target.lock() = Some(name.clone());
        self.reply(Message::notify(name, Status::Ok)).await?;
        Ok(Flow::Continue)
    }

    async fn on_chunk(&mut self, msg: Message) -> Result<Flow> {
        let written = match self.write_chunk(&msg).await {
            Ok(n) => n,
            Err(e) => {
                self.release(msg);
                self.abort().await;
                return Err(e);
            }
        };
        self.release(msg);
        if let Some(open) = self.open.as_mut() {
            open.written += written as u64;
        }
        Ok(Flow::Continue)
    }

    async fn write_chunk(&mut self, msg: &Message) -> Result<usize> {
        let data = msg.chunk()?;
        let open = self.ensure_open().await?;
        open.file.write_all(data).await?;
        Ok(data.len())
    }

    async fn on_end(&mut self, msg: Message) -> Result<Flow> {
        let declared = msg.file_size;
        self.release(msg);

        // A zero-length file never sees a chunk.
        if self.open.is_none() {
            if let Err(e) = self.ensure_open().await {
                self.abort().await;
                return Err(e);
            }
        }
        let Some(mut open) = self.open.take() else {
            self.abort().await;
            return Err(TransferError::NoReceiveTarget);
        };

        let flushed = open.file.flush().await;
        if let Err(e) = flushed {
            self.abort().await;
            return Err(e.into());
        }
        if open.written != declared {
            warn!(
                path = %open.path.display(),
                declared,
                received = open.written,
                "received size mismatch, discarding file"
            );
            drop(open.file);
            if let Err(e) = tokio::fs::remove_file(&open.path).await {
                debug!(error = %e, "failed to remove partial file");
            }
            self.abort().await;
            return Err(TransferError::SizeMismatch {
                declared,
                received: open.written,
            });
        }

        let name = self.target.lock().take().unwrap_or_default();
        debug!(file = %name, size = declared, "file received");
        self.reply(Message::notify(name, Status::Ok)).await?;
        Ok(Flow::Continue)
    }

    fn on_status_report(&mut self, msg: Message) -> Flow {
        let report = match msg.chunk() {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "malformed status report");
                &msg.payload[..]
            }
        };
        if let Some(cache) = &self.cache {
            let value = match serde_json::from_slice::<FileStoreInfo>(report) {
                Ok(info) => serde_json::to_vec(&info).unwrap_or_else(|_| report.to_vec()),
                Err(e) => {
                    debug!(hash = %msg.file_hash, error = %e, "status report is not structured, caching raw");
                    report.to_vec()
                }
            };
            cache.put(&msg.file_hash, value);
        }
        if let Some(notifier) = &self.notifier {
            notifier.deliver(Status::Ok);
        }
        self.release(msg);
        Flow::Stop
    }

    async fn ensure_open(&mut self) -> Result<&mut OpenFile> {
        if self.open.is_none() {
            let name = self.target.lock().clone();
            let Some(name) = name else {
                return Err(TransferError::NoReceiveTarget);
            };
            let path = self.dir.join(name);
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .await?;
            self.open = Some(OpenFile {
                file,
                path,
                written: 0,
            });
        }
        self.open.as_mut().ok_or(TransferError::NoReceiveTarget)
    }

    async fn reply(&mut self, msg: Message) -> Result<()> {
        self.writer.lock().await.write(&msg).await?;
        Ok(())
    }

    /// Tells the peer the transfer failed and closes the session.
    async fn abort(&mut self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write(&Message::notify("", Status::Err)).await {
            debug!(error = %e, "failed to send error notify");
            return;
        }
        if let Err(e) = writer.write(&Message::close("", Status::Err)).await {
            debug!(error = %e, "failed to send close");
        }
    }

    fn release(&self, msg: Message) {
        msg.release(&self.pool);
    }

    async fn finish(&mut self) {
        self.notifier.take();
        if let Some(mut open) = self.open.take() {
            if let Err(e) = open.file.flush().await {
                debug!(path = %open.path.display(), error = %e, "failed to flush receive file");
            }
        }
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!(error = %e, "connection shutdown");
        }
    }
}

/// Accepts bare file names only.
pub(crate) fn checked_name(name: &str) -> Result<&str> {
    if !name.is_empty() && Path::new(name).file_name() == Some(OsStr::new(name)) {
        Ok(name)
    } else {
        Err(TransferError::InvalidFileName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_name() {
        assert!(checked_name("9f2c").is_ok());
        assert!(checked_name("seg.0").is_ok());
        assert!(checked_name("").is_err());
        assert!(checked_name("..").is_err());
        assert!(checked_name("a/b").is_err());
        assert!(checked_name("/etc/passwd").is_err());
    }
}
