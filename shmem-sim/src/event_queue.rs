// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Time-ordered events of the simulation.
//!
//! Events at the same time are handled in the order they were scheduled.
//! Deliveries between the same pair of endpoints never overtake each other,
//! which the coherence protocol relies on.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use shmem_protocols::packet::NetPacket;
use shmem_protocols::types::{TileId, Time};

/// Something that can receive a packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Directory,
    L2(TileId),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Directory => write!(f, "directory"),
            Endpoint::L2(tile) => write!(f, "tile{tile}::l2"),
        }
    }
}

#[derive(Debug)]
pub enum EventKind {
    Deliver { dst: Endpoint, packet: NetPacket },

    /// Let a tile's core make progress.
    Resume { tile: TileId },
}

#[derive(Debug)]
struct Event {
    time: Time,
    seq: u64,
    kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that the heap pops the earliest event first
        (other.time, other.seq).cmp(&(self.time, self.seq))
    }
}

#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Event>,
    next_seq: u64,

    /// Latest arrival scheduled on each channel.
    last_arrival: HashMap<(Endpoint, Endpoint), Time>,
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, time: Time, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Event { time, seq, kind });
    }

    /// Schedule a packet to arrive no earlier than `arrival`.
    ///
    /// Returns the arrival time used, which is delayed if needed to stay
    /// behind earlier packets on the same channel.
    pub fn schedule_delivery(
        &mut self,
        src: Endpoint,
        dst: Endpoint,
        arrival: Time,
        packet: NetPacket,
    ) -> Time {
        let last = self.last_arrival.entry((src, dst)).or_default();
        let arrival = arrival.max(*last);
        *last = arrival;
        self.push(arrival, EventKind::Deliver { dst, packet });
        arrival
    }

    pub fn schedule_resume(&mut self, tile: TileId, time: Time) {
        self.push(time, EventKind::Resume { tile });
    }

    /// Remove the earliest event.
    pub fn pop(&mut self) -> Option<(Time, EventKind)> {
        self.heap.pop().map(|event| (event.time, event.kind))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
