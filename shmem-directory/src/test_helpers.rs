// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Helpers for driving a [`DramDirectory`] by hand in tests.

use std::sync::Arc;

use shmem_protocols::packet::{NetPacket, PacketType};
use shmem_protocols::shmem_msg::{ShmemMsg, ShmemMsgCfg, ShmemMsgType};
use shmem_protocols::types::{Address, MemComponent, TileId, Time};
use shmem_track::Tracker;
use shmem_track::entity::{Entity, toplevel};

use crate::backing_store::DramStore;
use crate::dram_directory::{DirectoryConfig, DramDirectory};
use crate::network::QueueNetwork;

/// Directory with an inspectable network and store.
pub type TestDirectory = DramDirectory<QueueNetwork, DramStore>;

pub const LINE_SIZE_BYTES: usize = 64;

/// Create a directory on tile 0 with zero lookup cost so that reply times
/// only reflect DRAM fetches and ordering.
#[must_use]
pub fn create_directory(tracker: &Tracker, num_tiles: usize) -> (Arc<Entity>, TestDirectory) {
    let top = toplevel(tracker, "top");
    let config = DirectoryConfig {
        num_tiles,
        line_size_bytes: LINE_SIZE_BYTES,
        access_cycles: 0,
        ..Default::default()
    };
    let directory = DramDirectory::new(&top, config, QueueNetwork::new(), DramStore::new());
    (top, directory)
}

fn l2_msg(msg_type: ShmemMsgType, requester: TileId, address: Address) -> ShmemMsg {
    ShmemMsg::new(&ShmemMsgCfg {
        msg_type,
        sender: MemComponent::L2Cache,
        receiver: MemComponent::DramDirectory,
        requester,
        address,
        modeled: true,
        ..Default::default()
    })
}

/// A read (`SH_REQ`) or write (`EX_REQ`) request from `requester`.
#[must_use]
pub fn create_request(
    msg_type: ShmemMsgType,
    requester: TileId,
    address: Address,
    time: Time,
) -> NetPacket {
    let msg = l2_msg(msg_type, requester, address);
    NetPacket::from_msg(PacketType::SharedMemRequest, requester, 0, time, &msg).unwrap()
}

/// An acknowledgement from `sender`, optionally carrying the block.
#[must_use]
pub fn create_ack(
    msg_type: ShmemMsgType,
    sender: TileId,
    requester: TileId,
    address: Address,
    data: Option<Vec<u8>>,
    time: Time,
) -> NetPacket {
    let msg = l2_msg(msg_type, requester, address).with_data(data.unwrap_or_default());
    NetPacket::from_msg(PacketType::SharedMemReply, sender, 0, time, &msg).unwrap()
}

/// An eviction notice from `sender`.
#[must_use]
pub fn create_write_back(
    msg_type: ShmemMsgType,
    sender: TileId,
    address: Address,
    data: Option<Vec<u8>>,
    time: Time,
) -> NetPacket {
    let msg = l2_msg(msg_type, sender, address).with_data(data.unwrap_or_default());
    NetPacket::from_msg(PacketType::SharedMemEvict, sender, 0, time, &msg).unwrap()
}

/// Decode everything the directory has sent so far as
/// `(receiver, message, send time)`.
pub fn sent_messages(directory: &mut TestDirectory) -> Vec<(TileId, ShmemMsg, Time)> {
    directory
        .network_mut()
        .drain()
        .into_iter()
        .map(|pkt| (pkt.receiver, pkt.msg().unwrap(), pkt.time))
        .collect()
}

/// Summarise sent messages as `(receiver, kind)` pairs.
pub fn sent_kinds(directory: &mut TestDirectory) -> Vec<(TileId, ShmemMsgType)> {
    sent_messages(directory)
        .into_iter()
        .map(|(tile, msg, _)| (tile, msg.msg_type()))
        .collect()
}
