// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Coherence protocol messages.
//!
//! A [`ShmemMsg`] is the unit exchanged between the private caches and the
//! directory. Its payload (a cache block) is reference counted so that
//! cloning a message for retention does not copy the block; use
//! [`ShmemMsg::rebuffer`] when an independent copy is required.

use std::fmt;
use std::sync::Arc;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::codec::{CodecError, HEADER_BYTES};
use crate::types::{Address, INVALID_ADDRESS, INVALID_TILE_ID, MemComponent, SimError, TileId};

/// Number of coherence message kinds (including `Invalid`).
pub const NUM_MSG_TYPES: usize = 14;

/// The kind of a coherence message. The discriminants are the wire tags.
#[derive(Copy, Clone, Debug, Default, FromPrimitive, PartialEq, Eq, Hash, ToPrimitive)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ShmemMsgType {
    #[default]
    Invalid = 0,
    ExReq,
    ShReq,
    InvReq,
    FlushReq,
    WbReq,
    InvFlushCombinedReq,
    ExRep,
    ShRep,
    UpgradeRep,
    InvRep,
    FlushRep,
    WbRep,
    NullifyReq,
}

impl ShmemMsgType {
    /// Canonical name used in logs and traces.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ShmemMsgType::Invalid => "INVALID",
            ShmemMsgType::ExReq => "EX_REQ",
            ShmemMsgType::ShReq => "SH_REQ",
            ShmemMsgType::InvReq => "INV_REQ",
            ShmemMsgType::FlushReq => "FLUSH_REQ",
            ShmemMsgType::WbReq => "WB_REQ",
            ShmemMsgType::InvFlushCombinedReq => "INV_FLUSH_COMBINED_REQ",
            ShmemMsgType::ExRep => "EX_REP",
            ShmemMsgType::ShRep => "SH_REP",
            ShmemMsgType::UpgradeRep => "UPGRADE_REP",
            ShmemMsgType::InvRep => "INV_REP",
            ShmemMsgType::FlushRep => "FLUSH_REP",
            ShmemMsgType::WbRep => "WB_REP",
            ShmemMsgType::NullifyReq => "NULLIFY_REQ",
        }
    }

    /// Returns true for the request kinds (those that never carry a block).
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            ShmemMsgType::ExReq
                | ShmemMsgType::ShReq
                | ShmemMsgType::InvReq
                | ShmemMsgType::FlushReq
                | ShmemMsgType::WbReq
                | ShmemMsgType::InvFlushCombinedReq
                | ShmemMsgType::NullifyReq
        )
    }
}

impl TryFrom<u8> for ShmemMsgType {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        ShmemMsgType::from_u8(tag).ok_or(CodecError::UnknownKind { tag })
    }
}

impl TryFrom<u8> for MemComponent {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        MemComponent::from_u8(tag).ok_or(CodecError::UnknownComponent { tag })
    }
}

impl fmt::Display for ShmemMsgType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn ceil_log2(value: usize) -> usize {
    if value <= 1 {
        0
    } else {
        (usize::BITS - (value - 1).leading_zeros()) as usize
    }
}

/// Field widths used to compute the simulated size of a message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ModeledWidths {
    /// Bits needed to encode the message kind.
    pub msg_type_bits: usize,

    /// Bits in a physical address.
    pub physical_address_bits: usize,

    /// Bits needed to name one tile.
    pub tile_id_bits: usize,
}

impl ModeledWidths {
    /// Compute the widths for a system of `num_tiles` tiles.
    #[must_use]
    pub fn new(num_tiles: usize, physical_address_bits: usize) -> Self {
        Self {
            msg_type_bits: ceil_log2(NUM_MSG_TYPES),
            physical_address_bits,
            tile_id_bits: ceil_log2(num_tiles),
        }
    }
}

/// Initial values for a [`ShmemMsg`].
#[derive(Clone, Debug)]
pub struct ShmemMsgCfg {
    /// Message kind.
    pub msg_type: ShmemMsgType,

    /// Component that sends the message.
    pub sender: MemComponent,

    /// Component that receives the message.
    pub receiver: MemComponent,

    /// Tile on whose behalf the message is sent.
    pub requester: TileId,

    /// Designated receiver for combined messages.
    pub single_receiver: TileId,

    /// Whether the receiver must reply.
    pub reply_expected: bool,

    /// Block address.
    pub address: Address,

    /// Whether the message counts towards modelled timing and bandwidth.
    pub modeled: bool,
}

impl Default for ShmemMsgCfg {
    fn default() -> Self {
        Self {
            msg_type: ShmemMsgType::Invalid,
            sender: MemComponent::Invalid,
            receiver: MemComponent::Invalid,
            requester: INVALID_TILE_ID,
            single_receiver: INVALID_TILE_ID,
            reply_expected: false,
            address: INVALID_ADDRESS,
            modeled: false,
        }
    }
}

/// A coherence protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShmemMsg {
    msg_type: ShmemMsgType,
    sender: MemComponent,
    receiver: MemComponent,
    requester: TileId,
    single_receiver: TileId,
    reply_expected: bool,
    address: Address,
    data: Option<Arc<[u8]>>,
    modeled: bool,
}

impl Default for ShmemMsg {
    fn default() -> Self {
        Self::new(&ShmemMsgCfg::default())
    }
}

impl ShmemMsg {
    /// Create a new message without a payload.
    #[must_use]
    pub fn new(cfg: &ShmemMsgCfg) -> Self {
        Self {
            msg_type: cfg.msg_type,
            sender: cfg.sender,
            receiver: cfg.receiver,
            requester: cfg.requester,
            single_receiver: cfg.single_receiver,
            reply_expected: cfg.reply_expected,
            address: cfg.address,
            data: None,
            modeled: cfg.modeled,
        }
    }

    /// Attach a payload to this message.
    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.set_data(data);
        self
    }

    /// Replace the payload. An empty buffer clears it.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = if data.is_empty() {
            None
        } else {
            Some(Arc::from(data))
        };
    }

    /// Make a copy of this message that does not share its payload.
    #[must_use]
    pub fn rebuffer(&self) -> Self {
        let mut copy = self.clone();
        copy.data = self.data.as_deref().map(Arc::from);
        copy
    }

    /// Returns true if both messages refer to the same payload buffer.
    #[must_use]
    pub fn shares_data_with(&self, other: &ShmemMsg) -> bool {
        match (&self.data, &other.data) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    #[must_use]
    pub fn msg_type(&self) -> ShmemMsgType {
        self.msg_type
    }

    #[must_use]
    pub fn sender(&self) -> MemComponent {
        self.sender
    }

    #[must_use]
    pub fn receiver(&self) -> MemComponent {
        self.receiver
    }

    #[must_use]
    pub fn requester(&self) -> TileId {
        self.requester
    }

    #[must_use]
    pub fn single_receiver(&self) -> TileId {
        self.single_receiver
    }

    #[must_use]
    pub fn is_reply_expected(&self) -> bool {
        self.reply_expected
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn is_modeled(&self) -> bool {
        self.modeled
    }

    /// The payload, if any.
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Number of payload bytes.
    #[must_use]
    pub fn data_length(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.len())
    }

    /// Length of this message once encoded.
    #[must_use]
    pub fn msg_len(&self) -> usize {
        HEADER_BYTES + self.data_length()
    }

    /// Number of bits this message occupies on the simulated interconnect.
    pub fn modeled_length(&self, widths: &ModeledWidths) -> Result<usize, SimError> {
        let header = widths.msg_type_bits + widths.physical_address_bits;
        let bits = match self.msg_type {
            ShmemMsgType::ExReq
            | ShmemMsgType::ShReq
            | ShmemMsgType::InvReq
            | ShmemMsgType::FlushReq
            | ShmemMsgType::WbReq
            | ShmemMsgType::UpgradeRep
            | ShmemMsgType::InvRep => header,
            ShmemMsgType::InvFlushCombinedReq => header + widths.tile_id_bits,
            ShmemMsgType::ExRep
            | ShmemMsgType::ShRep
            | ShmemMsgType::FlushRep
            | ShmemMsgType::WbRep => header + self.data_length() * 8,
            ShmemMsgType::Invalid | ShmemMsgType::NullifyReq => {
                return Err(SimError(format!(
                    "Unrecognized msg type ({}) when computing modeled length",
                    self.msg_type
                )));
            }
        };
        Ok(bits)
    }
}

impl fmt::Display for ShmemMsg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {:#x} requester {} ({} -> {})",
            self.msg_type, self.address, self.requester, self.sender, self.receiver
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(msg_type: ShmemMsgType) -> ShmemMsg {
        ShmemMsg::new(&ShmemMsgCfg {
            msg_type,
            sender: MemComponent::DramDirectory,
            receiver: MemComponent::L2Cache,
            requester: 3,
            address: 0x1000,
            modeled: true,
            ..Default::default()
        })
    }

    #[test]
    fn names_and_tags() {
        assert_eq!(ShmemMsgType::InvFlushCombinedReq.name(), "INV_FLUSH_COMBINED_REQ");
        assert_eq!(ShmemMsgType::NullifyReq as u8, 13);
        assert_eq!(ShmemMsgType::try_from(8).unwrap(), ShmemMsgType::ShRep);
        assert_eq!(
            ShmemMsgType::try_from(14),
            Err(CodecError::UnknownKind { tag: 14 })
        );
        assert!(ShmemMsgType::WbReq.is_request());
        assert!(!ShmemMsgType::WbRep.is_request());
    }

    #[test]
    fn widths() {
        let widths = ModeledWidths::new(64, 48);
        assert_eq!(widths.msg_type_bits, 4);
        assert_eq!(widths.tile_id_bits, 6);
        assert_eq!(ModeledWidths::new(1, 48).tile_id_bits, 0);
        assert_eq!(ModeledWidths::new(5, 48).tile_id_bits, 3);
    }

    #[test]
    fn modeled_length_by_kind() {
        let widths = ModeledWidths::new(16, 48);
        assert_eq!(msg(ShmemMsgType::InvReq).modeled_length(&widths), Ok(52));
        assert_eq!(msg(ShmemMsgType::UpgradeRep).modeled_length(&widths), Ok(52));
        assert_eq!(
            msg(ShmemMsgType::InvFlushCombinedReq).modeled_length(&widths),
            Ok(56)
        );
        let rep = msg(ShmemMsgType::ShRep).with_data(vec![0; 64]);
        assert_eq!(rep.modeled_length(&widths), Ok(52 + 512));
        assert!(msg(ShmemMsgType::NullifyReq).modeled_length(&widths).is_err());
        assert!(msg(ShmemMsgType::Invalid).modeled_length(&widths).is_err());
    }

    #[test]
    fn clone_shares_rebuffer_copies() {
        let original = msg(ShmemMsgType::FlushRep).with_data(vec![1, 2, 3]);
        let shared = original.clone();
        assert!(shared.shares_data_with(&original));

        let private = original.rebuffer();
        assert!(!private.shares_data_with(&original));
        assert_eq!(private, original);
    }

    #[test]
    fn empty_payload_is_none() {
        let m = msg(ShmemMsgType::WbRep).with_data(Vec::new());
        assert!(m.data().is_none());
        assert_eq!(m.data_length(), 0);
        assert_eq!(m.msg_len(), HEADER_BYTES);
    }
}
