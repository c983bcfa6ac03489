// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Coherence protocol messages exchanged between private caches and the
//! directory, along with their binary encoding and the network packets that
//! carry them.
//!
//! ```
//! use shmem_protocols::codec;
//! use shmem_protocols::shmem_msg::{ShmemMsg, ShmemMsgCfg, ShmemMsgType};
//! use shmem_protocols::types::MemComponent;
//!
//! let msg = ShmemMsg::new(&ShmemMsgCfg {
//!     msg_type: ShmemMsgType::ShRep,
//!     sender: MemComponent::DramDirectory,
//!     receiver: MemComponent::L2Cache,
//!     requester: 1,
//!     address: 0x40,
//!     ..Default::default()
//! })
//! .with_data(vec![0xab; 64]);
//!
//! let bytes = codec::encode(&msg).unwrap();
//! assert_eq!(bytes.len(), msg.msg_len());
//! assert_eq!(codec::decode(&bytes).unwrap(), msg);
//! ```

pub mod codec;
pub mod packet;
pub mod shmem_msg;
pub mod types;
