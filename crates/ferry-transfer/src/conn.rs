//! Connection manager and request/acknowledge handshakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ferry_protocol::{BufferPool, FrameReader, FrameWriter, Message, Status};
use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::receiver::{checked_name, ReceiveLoop, ReceiveTarget, SharedWriter};
use crate::{notify_channel, NotifyWaiter, Result, StatusCache, TransferConfig, TransferError};

/// Idle buffers kept per pool.
const POOL_MAX_IDLE: usize = 16;

/// Signing material presented to the peer in head frames.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Gateway public key.
    pub public_key: Vec<u8>,
    /// Signed message.
    pub sign_msg: Vec<u8>,
    /// Signature over `sign_msg`.
    pub signature: Vec<u8>,
}

/// Everything a connection needs besides the stream itself.
#[derive(Clone)]
pub struct Session {
    /// Directory files are read from and received into.
    pub dir: PathBuf,
    /// Timeouts and buffer sizing.
    pub config: TransferConfig,
    /// Pool inbound payloads are decoded into.
    pub read_pool: Arc<BufferPool>,
    /// Pool outbound chunks are read into.
    pub send_pool: Arc<BufferPool>,
    /// Destination of peer status reports.
    pub cache: Option<Arc<dyn StatusCache>>,
}

impl Session {
    /// Creates a session with fresh pools sized from `config`.
    pub fn new(dir: impl Into<PathBuf>, config: TransferConfig) -> Self {
        let read_pool = Arc::new(BufferPool::new(config.buffer_size, POOL_MAX_IDLE));
        let send_pool = Arc::new(BufferPool::new(config.buffer_size, POOL_MAX_IDLE));
        Self {
            dir: dir.into(),
            config,
            read_pool,
            send_pool,
            cache: None,
        }
    }

    /// Stores status reports in `cache`.
    pub fn with_cache(mut self, cache: Arc<dyn StatusCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Uses `dir` for file I/O.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }
}

/// Owns one connection and its receive loop.
///
/// Dropping the manager stops the loop.
pub struct ConnManager<S> {
    writer: SharedWriter<WriteHalf<S>>,
    waiter: NotifyWaiter,
    target: ReceiveTarget,
    stop: CancellationToken,
    handle: JoinHandle<Result<()>>,
    dir: PathBuf,
    config: TransferConfig,
    send_pool: Arc<BufferPool>,
    _stop_on_drop: DropGuard,
}

impl<S> ConnManager<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Takes ownership of `stream` and starts its receive loop.
    pub fn open(stream: S, session: Session) -> Self {
        let (read_half, write_half): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
        let writer = Arc::new(tokio::sync::Mutex::new(FrameWriter::new(write_half)));
        let (notifier, waiter) = notify_channel();
        let target: ReceiveTarget = Arc::new(Mutex::new(None));
        let stop = CancellationToken::new();

        let receive = ReceiveLoop::new(
            FrameReader::with_pool(read_half, session.read_pool.clone()),
            writer.clone(),
            notifier,
            target.clone(),
            session.dir.clone(),
            session.cache.clone(),
            session.read_pool,
            stop.clone(),
        );
        let handle = tokio::spawn(receive.run());

        Self {
            writer,
            waiter,
            target,
            handle,
            dir: session.dir,
            config: session.config,
            send_pool: session.send_pool,
            _stop_on_drop: stop.clone().drop_guard(),
            stop,
        }
    }

    /// Writes one frame.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        self.writer.lock().await.write(msg).await?;
        Ok(())
    }

    /// Waits for the peer to acknowledge `step`.
    pub async fn wait(&mut self, step: &'static str, timeout: Duration) -> Result<()> {
        self.waiter.wait(step, timeout).await
    }

    /// Returns true once the receive loop has exited.
    pub fn is_closed(&self) -> bool {
        self.handle.is_finished()
    }

    /// Pushes `files` (names relative to the session directory) to the peer
    /// and closes the connection.
    ///
    /// The last file carries the last marker. Files whose name contains a
    /// `.` are transient copies and are deleted once sent.
    pub async fn send_file(
        mut self,
        files: &[String],
        root_hash: &str,
        original_size: u64,
        credentials: &Credentials,
    ) -> Result<()> {
        let result = self
            .send_files(files, root_hash, original_size, credentials)
            .await;
        self.close().await;
        result
    }

    /// Pulls `file_hash` from the peer into the session directory and
    /// closes the connection.
    pub async fn receive_file(
        mut self,
        file_hash: &str,
        size: u64,
        credentials: &Credentials,
    ) -> Result<PathBuf> {
        let result = self.pull(file_hash, size, credentials).await;
        self.close().await;
        result
    }

    /// Asks the peer for a status report on `file_hash` and closes the
    /// connection. The report lands in the session cache.
    pub async fn send_file_status(mut self, file_hash: &str) -> Result<()> {
        let result = async {
            self.send(&Message::file_status(file_hash)).await?;
            self.wait("file-status", self.config.status_timeout).await
        }
        .await;
        self.close().await;
        result
    }

    /// Waits for the receive loop to end on its own and returns its outcome.
    pub async fn join(self) -> Result<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(TransferError::LoopPanicked),
            Err(_) => Ok(()),
        }
    }

    /// Stops the receive loop, closing the connection, and returns the
    /// loop's outcome.
    pub async fn shutdown(self) -> Result<()> {
        self.stop.cancel();
        self.join().await
    }

    async fn close(self) {
        if let Err(e) = self.shutdown().await {
            debug!(error = %e, "receive loop ended with error");
        }
    }

    async fn send_files(
        &mut self,
        files: &[String],
        root_hash: &str,
        original_size: u64,
        credentials: &Credentials,
    ) -> Result<()> {
        for (i, name) in files.iter().enumerate() {
            let last = i + 1 == files.len();
            let path = self.dir.join(checked_name(name)?);
            self.send_single_file(&path, root_hash, original_size, last, credentials)
                .await?;
            if name.contains('.') {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "failed to remove transient copy");
                }
            }
        }
        self.send(&Message::close("", Status::Ok)).await
    }

    async fn send_single_file(
        &mut self,
        path: &Path,
        root_hash: &str,
        original_size: u64,
        last: bool,
        credentials: &Credentials,
    ) -> Result<()> {
        let mut file = File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidFileName(path.display().to_string()))?
            .to_string();

        self.send(&Message::head(
            &name,
            root_hash,
            last,
            &credentials.public_key,
            &credentials.sign_msg,
            &credentials.signature,
        ))
        .await?;
        self.wait("head", self.config.head_timeout).await?;

        let mut buf = self.send_pool.get();
        let streamed = self.stream_chunks(&mut file, &name, &mut buf).await;
        self.send_pool.put(buf);
        let sent = streamed?;

        self.send(&Message::end(&name, root_hash, size, original_size, last))
            .await?;
        self.wait("end", self.config.end_timeout(size)).await?;

        info!(file = %name, root_hash, bytes = sent, "file sent");
        Ok(())
    }

    /// Streams `file` as chunk frames through the pooled `buf`.
    async fn stream_chunks(&self, file: &mut File, name: &str, buf: &mut Vec<u8>) -> Result<u64> {
        let capacity = self.send_pool.capacity();
        let mut sent = 0u64;
        loop {
            buf.resize(capacity, 0);
            let n = file.read(buf).await?;
            if n == 0 {
                return Ok(sent);
            }
            let msg = Message::file(name, std::mem::take(buf), n);
            let written = self.send(&msg).await;
            *buf = msg.payload;
            written?;
            sent += n as u64;
        }
    }

    async fn pull(&mut self, file_hash: &str, size: u64, credentials: &Credentials) -> Result<PathBuf> {
        let name = checked_name(file_hash)?;
        *self.target.lock() = Some(name.to_string());

        self.send(&Message::recv_head(
            name,
            &credentials.public_key,
            &credentials.sign_msg,
            &credentials.signature,
        ))
        .await?;
        self.wait("recv-head", self.config.recv_head_timeout).await?;

        let path = self.dir.join(name);
        if let Err(e) = File::create(&path).await {
            if let Err(close_err) = self.send(&Message::close(name, Status::Err)).await {
                debug!(error = %close_err, "failed to send close");
            }
            return Err(e.into());
        }

        self.send(&Message::recv_file(name)).await?;
        self.wait("recv", self.config.recv_timeout(size)).await?;
        self.send(&Message::close(name, Status::Ok)).await?;

        info!(file = %name, size, "file received");
        Ok(path)
    }
}
