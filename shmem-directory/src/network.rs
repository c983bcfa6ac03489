// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Outbound side of the interconnect as seen by the directory.

use std::collections::VecDeque;

use shmem_protocols::packet::NetPacket;
use shmem_protocols::types::SimResult;

/// Anything that can accept packets for delivery to another tile.
pub trait Network {
    /// Queue `packet` for delivery to `packet.receiver`.
    fn send(&mut self, packet: NetPacket) -> SimResult;
}

/// A [`Network`] that holds sent packets until the owner collects them.
#[derive(Default)]
pub struct QueueNetwork {
    sent: VecDeque<NetPacket>,
}

impl QueueNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all packets sent so far, oldest first.
    pub fn drain(&mut self) -> Vec<NetPacket> {
        self.sent.drain(..).collect()
    }

    /// Take the oldest packet sent.
    pub fn pop(&mut self) -> Option<NetPacket> {
        self.sent.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sent.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

impl Network for QueueNetwork {
    fn send(&mut self, packet: NetPacket) -> SimResult {
        self.sent.push_back(packet);
        Ok(())
    }
}
