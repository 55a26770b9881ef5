//! # Ferry Protocol
//!
//! The point-to-point fragment transfer protocol spoken between the gateway
//! and storage peers.
//!
//! Every [`Message`] travels as one self-delimited frame: a big-endian
//! `u32` body length followed by a fixed header and length-prefixed
//! fields. Frames are written whole, one message at a time, so a single
//! writer per direction preserves send order.
//!
//! Chunk payloads are drawn from an injected [`BufferPool`] and must be
//! handed back with [`BufferPool::put`] once consumed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod message;
mod pool;

pub use error::{ProtocolError, Result};
pub use frame::{FrameReader, FrameWriter};
pub use message::{FileType, Message, MessageKind, Status};
pub use pool::BufferPool;

/// Canonical capacity of pooled transfer buffers (32 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Largest payload a single frame may carry (4 MiB).
pub const MAX_PAYLOAD_LEN: usize = 4 * 1024 * 1024;

/// Fixed header bytes after the length prefix: kind, flags, file type, size.
pub const FIXED_HEADER_LEN: usize = 1 + 1 + 1 + 8;

/// Largest frame body accepted by the decoder.
pub const MAX_FRAME_LEN: usize =
    FIXED_HEADER_LEN + 5 * (2 + u16::MAX as usize) + 4 + MAX_PAYLOAD_LEN;
