// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use shmem_protocols::codec::{self, HEADER_BYTES};
use shmem_protocols::packet::{NetPacket, PacketType};
use shmem_protocols::shmem_msg::{NUM_MSG_TYPES, ShmemMsg, ShmemMsgCfg, ShmemMsgType};
use shmem_protocols::types::{MemComponent, Time};

#[test]
fn every_kind_survives_the_wire() {
    for tag in 0..NUM_MSG_TYPES as u8 {
        let msg_type = ShmemMsgType::try_from(tag).unwrap();
        for len in [0usize, 1, 64] {
            let msg = ShmemMsg::new(&ShmemMsgCfg {
                msg_type,
                sender: MemComponent::L2Cache,
                receiver: MemComponent::DramDirectory,
                requester: i32::from(tag),
                reply_expected: tag % 2 == 0,
                address: u64::from(tag) << 6,
                modeled: len > 0,
                ..Default::default()
            })
            .with_data(vec![tag; len]);

            let pkt = NetPacket::from_msg(PacketType::SharedMemReply, 1, 0, Time(5), &msg).unwrap();
            assert_eq!(pkt.len(), HEADER_BYTES + len);

            let decoded = pkt.msg().unwrap();
            assert_eq!(decoded, msg, "{msg_type} with {len} bytes");
            assert_eq!(decoded.data_length(), len);
        }
    }
}

#[test]
fn decoded_message_can_be_reencoded() {
    let msg = ShmemMsg::new(&ShmemMsgCfg {
        msg_type: ShmemMsgType::InvFlushCombinedReq,
        sender: MemComponent::DramDirectory,
        receiver: MemComponent::L2Cache,
        requester: 3,
        single_receiver: 9,
        address: 0x7fc0,
        modeled: true,
        ..Default::default()
    });
    let bytes = codec::encode(&msg).unwrap();
    let again = codec::encode(&codec::decode(&bytes).unwrap()).unwrap();
    assert_eq!(bytes, again);
}
