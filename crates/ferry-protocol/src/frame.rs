//! Async frame reader and writer.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{BufferPool, Message, ProtocolError, Result, MAX_FRAME_LEN};

/// Reads whole frames from a byte stream.
pub struct FrameReader<R> {
    reader: R,
    pool: Option<Arc<BufferPool>>,
    body: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a reader that allocates every payload.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pool: None,
            body: Vec::new(),
        }
    }

    /// Creates a reader that places fitting payloads in pooled buffers.
    pub fn with_pool(reader: R, pool: Arc<BufferPool>) -> Self {
        Self {
            reader,
            pool: Some(pool),
            body: Vec::new(),
        }
    }

    /// Reads the next message.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames. A
    /// stream that ends inside a frame is reported as truncated.
    pub async fn read(&mut self) -> Result<Option<Message>> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            let n = self.reader.read(&mut len_buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(ProtocolError::Truncated("length prefix"));
            }
            filled += n;
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(len));
        }

        self.body.clear();
        self.body.resize(len, 0);
        match self.reader.read_exact(&mut self.body).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::Truncated("frame body"));
            }
            Err(e) => return Err(e.into()),
        }

        Message::decode_body(&self.body, self.pool.as_deref()).map(Some)
    }

    /// Returns the payload pool, if any.
    pub fn pool(&self) -> Option<&Arc<BufferPool>> {
        self.pool.as_ref()
    }

    /// Consumes the reader and returns the inner stream.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes whole frames to a byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Creates a new frame writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one message and flushes it.
    pub async fn write(&mut self, msg: &Message) -> Result<()> {
        let frame = msg.encode()?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shuts down the write half.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Consumes the writer and returns the inner stream.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
