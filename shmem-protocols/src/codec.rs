// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Binary encoding of [`ShmemMsg`].
//!
//! All fixed-width integers are little-endian. The header is followed by
//! exactly `data_length` payload bytes.
//!
//! ```text
//!   magic           : [u8; 4]  "SHMM"
//!   version         : u16      1
//!   msg_type        : u8
//!   sender          : u8
//!   receiver        : u8
//!   flags           : u8       bit0 reply_expected, bit1 modeled
//!   requester       : i32
//!   single_receiver : i32
//!   address         : u64
//!   data_length     : u32
//! ```

use std::fmt;

use crate::shmem_msg::{ShmemMsg, ShmemMsgCfg, ShmemMsgType};
use crate::types::{MemComponent, SimError};

/// Magic bytes at the start of every encoded message.
pub const MAGIC: [u8; 4] = *b"SHMM";

/// Current encoding version.
pub const VERSION: u16 = 1;

/// Byte size of the encoded header.
pub const HEADER_BYTES: usize = 30;

const FLAG_REPLY_EXPECTED: u8 = 1 << 0;
const FLAG_MODELED: u8 = 1 << 1;

/// Errors from encoding or decoding a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer shorter than [`HEADER_BYTES`].
    TruncatedHeader { len: usize },
    /// The buffer does not start with [`MAGIC`].
    BadMagic,
    /// Encoded with a version this build does not understand.
    UnsupportedVersion { version: u16 },
    /// Message kind tag out of range.
    UnknownKind { tag: u8 },
    /// Memory component tag out of range.
    UnknownComponent { tag: u8 },
    /// Buffer length does not match the header's `data_length`.
    PayloadLengthMismatch { expected: usize, actual: usize },
    /// Payload longer than a `u32` length field can describe.
    PayloadTooLarge { len: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedHeader { len } => {
                write!(f, "message header truncated: {len} of {HEADER_BYTES} bytes")
            }
            Self::BadMagic => f.write_str("bad magic in message header"),
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported message version: {version}")
            }
            Self::UnknownKind { tag } => write!(f, "unknown message kind tag: {tag}"),
            Self::UnknownComponent { tag } => write!(f, "unknown memory component tag: {tag}"),
            Self::PayloadLengthMismatch { expected, actual } => {
                write!(
                    f,
                    "payload length mismatch: expected {expected} bytes, got {actual}"
                )
            }
            Self::PayloadTooLarge { len } => {
                write!(f, "payload of {len} bytes does not fit the length field")
            }
        }
    }
}

impl std::error::Error for CodecError {}

impl From<CodecError> for SimError {
    fn from(err: CodecError) -> Self {
        SimError(err.to_string())
    }
}

fn encoded_data_length(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::PayloadTooLarge { len })
}

/// Flatten a message into a newly allocated buffer of
/// [`ShmemMsg::msg_len`] bytes.
pub fn encode(msg: &ShmemMsg) -> Result<Vec<u8>, CodecError> {
    let data_length = encoded_data_length(msg.data_length())?;
    let mut buf = Vec::with_capacity(msg.msg_len());
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.push(msg.msg_type() as u8);
    buf.push(msg.sender() as u8);
    buf.push(msg.receiver() as u8);

    let mut flags = 0;
    if msg.is_reply_expected() {
        flags |= FLAG_REPLY_EXPECTED;
    }
    if msg.is_modeled() {
        flags |= FLAG_MODELED;
    }
    buf.push(flags);

    buf.extend_from_slice(&msg.requester().to_le_bytes());
    buf.extend_from_slice(&msg.single_receiver().to_le_bytes());
    buf.extend_from_slice(&msg.address().to_le_bytes());
    buf.extend_from_slice(&data_length.to_le_bytes());

    if let Some(data) = msg.data() {
        buf.extend_from_slice(data);
    }
    Ok(buf)
}

fn le_i32(data: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn le_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn le_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// Parse a message from a buffer produced by [`encode`].
///
/// The payload is copied into a buffer owned by the returned message.
pub fn decode(data: &[u8]) -> Result<ShmemMsg, CodecError> {
    if data.len() < HEADER_BYTES {
        return Err(CodecError::TruncatedHeader { len: data.len() });
    }
    if data[0..4] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion { version });
    }

    let msg_type = ShmemMsgType::try_from(data[6])?;
    let sender = MemComponent::try_from(data[7])?;
    let receiver = MemComponent::try_from(data[8])?;
    let flags = data[9];
    let requester = le_i32(data, 10);
    let single_receiver = le_i32(data, 14);
    let address = le_u64(data, 18);
    let data_length = le_u32(data, 26) as usize;

    let actual = data.len() - HEADER_BYTES;
    if actual != data_length {
        return Err(CodecError::PayloadLengthMismatch {
            expected: data_length,
            actual,
        });
    }

    let msg = ShmemMsg::new(&ShmemMsgCfg {
        msg_type,
        sender,
        receiver,
        requester,
        single_receiver,
        reply_expected: flags & FLAG_REPLY_EXPECTED != 0,
        address,
        modeled: flags & FLAG_MODELED != 0,
    });
    Ok(msg.with_data(data[HEADER_BYTES..].to_vec()))
}
