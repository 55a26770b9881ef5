//! Transfer protocol messages.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{BufferPool, ProtocolError, Result, FIXED_HEADER_LEN, MAX_FRAME_LEN, MAX_PAYLOAD_LEN};

/// Message kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Announces a file about to be streamed.
    Head = 1,
    /// One chunk of file bytes.
    File = 2,
    /// End of a streamed file, carrying its final size.
    End = 3,
    /// One-byte status acknowledgement.
    Notify = 4,
    /// Closes the session.
    Close = 5,
    /// Asks the peer to prepare a file for download.
    RecvHead = 6,
    /// Asks the peer to start streaming the prepared file.
    RecvFile = 7,
    /// File status query or report.
    FileStatus = 8,
    /// Version exchange.
    Version = 9,
}

impl MessageKind {
    /// Parse a message kind from a byte.
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(MessageKind::Head),
            2 => Ok(MessageKind::File),
            3 => Ok(MessageKind::End),
            4 => Ok(MessageKind::Notify),
            5 => Ok(MessageKind::Close),
            6 => Ok(MessageKind::RecvHead),
            7 => Ok(MessageKind::RecvFile),
            8 => Ok(MessageKind::FileStatus),
            9 => Ok(MessageKind::Version),
            _ => Err(ProtocolError::UnknownKind(b)),
        }
    }

    /// Short lowercase name used in logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Head => "head",
            MessageKind::File => "file",
            MessageKind::End => "end",
            MessageKind::Notify => "notify",
            MessageKind::Close => "close",
            MessageKind::RecvHead => "recv-head",
            MessageKind::RecvFile => "recv-file",
            MessageKind::FileStatus => "file-status",
            MessageKind::Version => "version",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of content a transfer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FileType {
    /// Fragment of user content.
    #[default]
    Content = 1,
    /// Filler data used for space proofs.
    Filler = 2,
}

impl FileType {
    /// Parse a file type from a byte.
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(FileType::Content),
            2 => Ok(FileType::Filler),
            _ => Err(ProtocolError::UnknownFileType(b)),
        }
    }
}

/// Handshake status carried in notify and close payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// The step succeeded.
    Ok = 0,
    /// The step failed.
    Err = 1,
}

impl Status {
    /// Interprets a status byte; anything non-zero is a failure.
    pub fn from_byte(b: u8) -> Self {
        if b == 0 {
            Status::Ok
        } else {
            Status::Err
        }
    }

    /// Returns true for [`Status::Ok`].
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

const FLAG_LAST: u8 = 0x01;

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message kind.
    pub kind: MessageKind,
    /// Sender public key.
    pub public_key: Vec<u8>,
    /// Signed message bytes.
    pub sign_msg: Vec<u8>,
    /// Signature over `sign_msg`.
    pub signature: Vec<u8>,
    /// Chunk data or a single status byte.
    pub payload: Vec<u8>,
    /// File name.
    pub file_name: String,
    /// Root or fragment hash.
    pub file_hash: String,
    /// Declared size; for chunks, the valid prefix of `payload`.
    pub file_size: u64,
    /// Marks the last file of a multi-file send.
    pub last: bool,
    /// Content or filler.
    pub file_type: FileType,
}

impl Message {
    fn empty(kind: MessageKind) -> Self {
        Self {
            kind,
            public_key: Vec::new(),
            sign_msg: Vec::new(),
            signature: Vec::new(),
            payload: Vec::new(),
            file_name: String::new(),
            file_hash: String::new(),
            file_size: 0,
            last: false,
            file_type: FileType::Content,
        }
    }

    /// Status acknowledgement.
    pub fn notify(file_name: impl Into<String>, status: Status) -> Self {
        Self {
            file_name: file_name.into(),
            payload: vec![status as u8],
            ..Self::empty(MessageKind::Notify)
        }
    }

    /// Announces a file about to be streamed.
    pub fn head(
        file_name: impl Into<String>,
        file_hash: impl Into<String>,
        last: bool,
        public_key: &[u8],
        sign_msg: &[u8],
        signature: &[u8],
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_hash: file_hash.into(),
            last,
            public_key: public_key.to_vec(),
            sign_msg: sign_msg.to_vec(),
            signature: signature.to_vec(),
            ..Self::empty(MessageKind::Head)
        }
    }

    /// Asks the peer to prepare `file_hash` for download.
    pub fn recv_head(file_hash: &str, public_key: &[u8], sign_msg: &[u8], signature: &[u8]) -> Self {
        Self {
            file_name: file_hash.to_string(),
            file_hash: file_hash.to_string(),
            public_key: public_key.to_vec(),
            sign_msg: sign_msg.to_vec(),
            signature: signature.to_vec(),
            ..Self::empty(MessageKind::RecvHead)
        }
    }

    /// Asks the peer to stream `file_hash`.
    pub fn recv_file(file_hash: &str) -> Self {
        Self {
            file_name: file_hash.to_string(),
            ..Self::empty(MessageKind::RecvFile)
        }
    }

    /// One chunk of file data.
    ///
    /// `buf` should come from a [`BufferPool`]; only its first `len` bytes
    /// are meaningful and only those are put on the wire.
    pub fn file(file_name: impl Into<String>, mut buf: Vec<u8>, len: usize) -> Self {
        buf.truncate(len);
        Self {
            file_name: file_name.into(),
            file_size: len as u64,
            payload: buf,
            ..Self::empty(MessageKind::File)
        }
    }

    /// End of a streamed file.
    ///
    /// `original_size` travels as eight big-endian bytes in `sign_msg`.
    pub fn end(
        file_name: impl Into<String>,
        file_hash: impl Into<String>,
        size: u64,
        original_size: u64,
        last: bool,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_hash: file_hash.into(),
            file_size: size,
            sign_msg: original_size.to_be_bytes().to_vec(),
            last,
            ..Self::empty(MessageKind::End)
        }
    }

    /// Closes the session.
    pub fn close(file_name: impl Into<String>, status: Status) -> Self {
        Self {
            file_name: file_name.into(),
            payload: vec![status as u8],
            ..Self::empty(MessageKind::Close)
        }
    }

    /// Queries the status of `file_hash`.
    pub fn file_status(file_hash: impl Into<String>) -> Self {
        Self {
            file_hash: file_hash.into(),
            ..Self::empty(MessageKind::FileStatus)
        }
    }

    /// Reports the status of `file_hash`.
    pub fn file_status_report(file_hash: impl Into<String>, report: Vec<u8>) -> Self {
        Self {
            file_hash: file_hash.into(),
            file_size: report.len() as u64,
            payload: report,
            ..Self::empty(MessageKind::FileStatus)
        }
    }

    /// Version exchange.
    pub fn version() -> Self {
        Self::empty(MessageKind::Version)
    }

    /// The status byte of a notify or close frame.
    ///
    /// A missing status byte reads as a failure.
    pub fn status(&self) -> Status {
        self.payload.first().copied().map_or(Status::Err, Status::from_byte)
    }

    /// The valid bytes of a chunk frame.
    pub fn chunk(&self) -> Result<&[u8]> {
        let declared = self.file_size;
        match usize::try_from(declared) {
            Ok(n) if n <= self.payload.len() => Ok(&self.payload[..n]),
            _ => Err(ProtocolError::ChunkOverrun {
                declared,
                carried: self.payload.len(),
            }),
        }
    }

    /// The original size carried by an end frame.
    pub fn original_size(&self) -> Option<u64> {
        let bytes: [u8; 8] = self.sign_msg.as_slice().try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    /// Hands the payload buffer back to `pool`.
    ///
    /// Returns true if the pool accepted it.
    pub fn release(self, pool: &BufferPool) -> bool {
        pool.put(self.payload)
    }

    /// Length of the frame body (everything after the length prefix).
    pub fn body_len(&self) -> usize {
        FIXED_HEADER_LEN
            + 2 * 5
            + self.public_key.len()
            + self.sign_msg.len()
            + self.signature.len()
            + self.file_name.len()
            + self.file_hash.len()
            + 4
            + self.payload.len()
    }

    /// Encode the message into a complete frame.
    pub fn encode(&self) -> Result<Bytes> {
        let body_len = self.body_len();
        if body_len > MAX_FRAME_LEN || self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::FrameTooLarge(body_len));
        }

        let mut buf = BytesMut::with_capacity(4 + body_len);
        buf.put_u32(body_len as u32);
        buf.put_u8(self.kind as u8);
        buf.put_u8(if self.last { FLAG_LAST } else { 0 });
        buf.put_u8(self.file_type as u8);
        buf.put_u64(self.file_size);

        put_short(&mut buf, "public key", &self.public_key)?;
        put_short(&mut buf, "signed message", &self.sign_msg)?;
        put_short(&mut buf, "signature", &self.signature)?;
        put_short(&mut buf, "file name", self.file_name.as_bytes())?;
        put_short(&mut buf, "file hash", self.file_hash.as_bytes())?;

        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }

    /// Decode a complete frame, length prefix included.
    pub fn decode(frame: &[u8], pool: Option<&BufferPool>) -> Result<Self> {
        let mut buf = frame;
        if buf.remaining() < 4 {
            return Err(ProtocolError::Truncated("length prefix"));
        }
        let declared = buf.get_u32() as usize;
        if declared > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(declared));
        }
        if buf.remaining() < declared {
            return Err(ProtocolError::Truncated("frame body"));
        }
        Self::decode_body(&buf[..declared], pool)
    }

    /// Decode a frame body.
    ///
    /// When `pool` is given and the payload fits its canonical capacity,
    /// the payload is copied into a pooled buffer.
    pub fn decode_body(body: &[u8], pool: Option<&BufferPool>) -> Result<Self> {
        let mut buf = body;
        if buf.remaining() < FIXED_HEADER_LEN {
            return Err(ProtocolError::Truncated("header"));
        }
        let kind = MessageKind::from_byte(buf.get_u8())?;
        let flags = buf.get_u8();
        if flags & !FLAG_LAST != 0 {
            return Err(ProtocolError::InvalidFlags(flags));
        }
        let file_type = FileType::from_byte(buf.get_u8())?;
        let file_size = buf.get_u64();

        let public_key = get_short(&mut buf, "public key")?.to_vec();
        let sign_msg = get_short(&mut buf, "signed message")?.to_vec();
        let signature = get_short(&mut buf, "signature")?.to_vec();
        let file_name = get_string(&mut buf, "file name")?;
        let file_hash = get_string(&mut buf, "file hash")?;

        if buf.remaining() < 4 {
            return Err(ProtocolError::Truncated("payload length"));
        }
        let payload_len = buf.get_u32() as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::FrameTooLarge(payload_len));
        }
        if buf.remaining() < payload_len {
            return Err(ProtocolError::Truncated("payload"));
        }
        let payload = match pool {
            Some(pool) if payload_len > 0 && payload_len <= pool.capacity() => {
                let mut pooled = pool.get();
                pooled.truncate(payload_len);
                pooled.copy_from_slice(&buf[..payload_len]);
                pooled
            }
            _ => buf[..payload_len].to_vec(),
        };
        buf.advance(payload_len);

        if buf.has_remaining() {
            return Err(ProtocolError::LengthMismatch {
                declared: body.len(),
                decoded: body.len() - buf.remaining(),
            });
        }

        Ok(Message {
            kind,
            public_key,
            sign_msg,
            signature,
            payload,
            file_name,
            file_hash,
            file_size,
            last: flags & FLAG_LAST != 0,
            file_type,
        })
    }
}

fn put_short(buf: &mut BytesMut, field: &'static str, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len()).map_err(|_| ProtocolError::FieldTooLong(field, data.len()))?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

fn get_short<'a>(buf: &mut &'a [u8], field: &'static str) -> Result<&'a [u8]> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Truncated(field));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated(field));
    }
    let (data, rest) = buf.split_at(len);
    *buf = rest;
    Ok(data)
}

fn get_string(buf: &mut &[u8], field: &'static str) -> Result<String> {
    let data = get_short(buf, field)?;
    String::from_utf8(data.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
}
