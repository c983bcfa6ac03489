// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Network-layer packets carrying encoded coherence messages between tiles.

use std::fmt;

use shmem_track::{NO_ID, Tag};

use crate::codec;
use crate::shmem_msg::ShmemMsg;
use crate::types::{SimError, TileId, Time};

/// Class of a network packet.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// A request sent to the directory or a cache.
    #[default]
    SharedMemRequest,

    /// A reply (including acknowledgements).
    SharedMemReply,

    /// An unsolicited write-back or eviction notice.
    SharedMemEvict,
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PacketType::SharedMemRequest => write!(f, "SharedMemRequest"),
            PacketType::SharedMemReply => write!(f, "SharedMemReply"),
            PacketType::SharedMemEvict => write!(f, "SharedMemEvict"),
        }
    }
}

/// A packet travelling across the simulated interconnect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetPacket {
    /// Class used to pick the delivery channel.
    pub packet_type: PacketType,
    /// Tile that sent the packet.
    pub sender: TileId,
    /// Tile the packet is addressed to.
    pub receiver: TileId,

    /// Time at which the packet was sent. The network replaces it with the
    /// arrival time on delivery.
    pub time: Time,

    /// Encoded `ShmemMsg`.
    pub data: Vec<u8>,

    /// Tag of the message as allocated by the sender's tracker.
    pub tag: Tag,
}

impl NetPacket {
    /// Build a packet from an already encoded buffer.
    #[must_use]
    pub fn new(
        packet_type: PacketType,
        sender: TileId,
        receiver: TileId,
        time: Time,
        data: Vec<u8>,
    ) -> Self {
        Self {
            packet_type,
            sender,
            receiver,
            time,
            data,
            tag: NO_ID,
        }
    }

    /// Set the tracking tag of this packet.
    #[must_use]
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = tag;
        self
    }

    /// Build a packet that carries `msg`.
    pub fn from_msg(
        packet_type: PacketType,
        sender: TileId,
        receiver: TileId,
        time: Time,
        msg: &ShmemMsg,
    ) -> Result<Self, SimError> {
        let data = codec::encode(msg)?;
        Ok(Self::new(packet_type, sender, receiver, time, data))
    }

    /// Decode the coherence message carried by this packet.
    pub fn msg(&self) -> Result<ShmemMsg, SimError> {
        Ok(codec::decode(&self.data)?)
    }

    /// Number of bytes carried.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the packet carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for NetPacket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} @{}",
            self.packet_type, self.sender, self.receiver, self.time
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shmem_msg::{ShmemMsgCfg, ShmemMsgType};
    use crate::types::MemComponent;

    #[test]
    fn packet_carries_message() {
        let msg = ShmemMsg::new(&ShmemMsgCfg {
            msg_type: ShmemMsgType::ShReq,
            sender: MemComponent::L2Cache,
            receiver: MemComponent::DramDirectory,
            requester: 4,
            address: 0x80,
            modeled: true,
            ..Default::default()
        });
        let pkt = NetPacket::from_msg(PacketType::SharedMemRequest, 4, 0, Time(12), &msg).unwrap();
        assert_eq!(pkt.len(), msg.msg_len());
        assert_eq!(pkt.msg().unwrap(), msg);
        assert_eq!(pkt.to_string(), "SharedMemRequest 4 -> 0 @12");
    }

    #[test]
    fn garbage_is_an_error() {
        let pkt = NetPacket::new(PacketType::SharedMemReply, 1, 0, Time::ZERO, vec![1, 2, 3]);
        assert!(pkt.msg().is_err());
    }
}
