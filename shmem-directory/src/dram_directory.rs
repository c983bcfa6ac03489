// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The DRAM directory: the home of every block's coherence state.
//!
//! Requests arriving for a block with a transaction already in flight are
//! queued behind it. Each transaction sends any invalidations or downgrades
//! it needs, waits for one acknowledgement per participant and then replies
//! to the requester. On completion the queued requests for the block are
//! replayed in arrival order, stopping at the first one that has to wait
//! for acknowledgements.
//!
//! ```text
//!  requested | current | action
//!  ----------+---------+------------------------------------------------
//!  read      | Invalid | fetch, Shared, SH_REP
//!  read      | Shared  | add sharer, SH_REP
//!  read      | Owned   | WB_REQ to owner, await WB_REP, Shared, SH_REP
//!  write     | Invalid | fetch, Owned, EX_REP
//!  write     | Shared  | INV_REQ to other sharers, await INV_REPs, Owned,
//!            |         | UPGRADE_REP if the requester was a sharer else EX_REP
//!  write     | Owned   | FLUSH_REQ to owner, await FLUSH_REP, Owned, EX_REP
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use shmem_protocols::packet::{NetPacket, PacketType};
use shmem_protocols::shmem_msg::{ModeledWidths, ShmemMsg, ShmemMsgCfg, ShmemMsgType};
use shmem_protocols::sim_error;
use shmem_protocols::types::{Address, MemComponent, SimError, SimResult, TileId, Time};
use shmem_track::entity::Entity;
use shmem_track::{create, create_tag, debug, enter, exit, set_time, trace};

use crate::backing_store::BackingStore;
use crate::directory_entry::{DirectoryEntry, DirectoryState};
use crate::metrics::DirectoryMetrics;
use crate::network::Network;
use crate::pending_request::{AwaitedAcks, PendingRequest};
use crate::shmem_req::ShmemReq;

/// Parameters of a [`DramDirectory`].
#[derive(Clone, Debug)]
pub struct DirectoryConfig {
    /// Tile hosting the directory.
    pub tile_id: TileId,
    pub num_tiles: usize,
    pub line_size_bytes: usize,
    pub physical_address_bits: usize,

    /// Cycles taken by each directory lookup.
    pub access_cycles: u64,

    /// Extra cycles when a block has to be fetched from the backing store.
    pub dram_latency_cycles: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            tile_id: 0,
            num_tiles: 4,
            line_size_bytes: 64,
            physical_address_bits: 48,
            access_cycles: 10,
            dram_latency_cycles: 100,
        }
    }
}

/// A request that has sent its fan-out and must wait for acknowledgements.
struct Waiting {
    req: ShmemReq,
    old_state: DirectoryState,
    awaited: AwaitedAcks,
}

/// Coherence directory and memory controller for one home tile.
///
/// Tracks a `DirectoryEntry` per cached address, serializes requests per
/// address and talks to private caches through `N` and to memory through
/// `S`.
pub struct DramDirectory<N, S>
where
    N: Network,
    S: BackingStore,
{
    /// Entity used for tracking.
    pub entity: Arc<Entity>,
    config: DirectoryConfig,
    widths: ModeledWidths,
    entries: HashMap<Address, DirectoryEntry>,
    pending: HashMap<Address, PendingRequest>,
    network: N,
    store: S,
    metrics: DirectoryMetrics,

    /// Time at which the directory finishes its most recent access.
    busy_until: Time,
}

impl<N, S> DramDirectory<N, S>
where
    N: Network,
    S: BackingStore,
{
    pub fn new(parent: &Arc<Entity>, config: DirectoryConfig, network: N, store: S) -> Self {
        let entity = Arc::new(Entity::new(parent, "directory"));
        let widths = ModeledWidths::new(config.num_tiles, config.physical_address_bits);
        Self {
            entity,
            config,
            widths,
            entries: HashMap::new(),
            pending: HashMap::new(),
            network,
            store,
            metrics: DirectoryMetrics::default(),
            busy_until: Time::ZERO,
        }
    }

    /// Process a packet delivered by the network.
    ///
    /// `packet.time` is the arrival time.
    pub fn handle_packet(&mut self, packet: NetPacket) -> SimResult {
        enter!(self.entity ; packet.tag);
        set_time!(self.entity ; packet.time.cycles());

        let msg = packet.msg()?;
        trace!(self.entity ; "received {} from tile {}", msg, packet.sender);

        if packet.packet_type == PacketType::SharedMemEvict {
            return self.process_write_back(packet.sender, &msg);
        }

        match msg.msg_type() {
            ShmemMsgType::ExReq | ShmemMsgType::ShReq => {
                let req = ShmemReq::new(&msg, packet.time)?;
                self.start_shared_mem_request(req)
            }
            ShmemMsgType::InvRep | ShmemMsgType::FlushRep | ShmemMsgType::WbRep => {
                self.process_ack(packet.sender, &msg, packet.time)
            }
            other => sim_error!(format!(
                "{}: unexpected {other} from tile {}",
                self.entity, packet.sender
            )),
        }
    }

    /// Start a request, or queue it if its block is mid-transaction.
    pub fn start_shared_mem_request(&mut self, req: ShmemReq) -> SimResult {
        let address = req.msg().address();
        self.metrics.requests += 1;

        if let Some(pending) = self.pending.get_mut(&address) {
            debug!(self.entity ; "queue {} behind {}", req, pending.current());
            pending.add_request_to_queue(req);
            self.metrics.queued_requests += 1;
            return Ok(());
        }

        if let Some(waiting) = self.process_request(req)? {
            self.pending.insert(
                address,
                PendingRequest::new(waiting.req, waiting.old_state, waiting.awaited),
            );
        }
        Ok(())
    }

    fn process_request(&mut self, req: ShmemReq) -> Result<Option<Waiting>, SimError> {
        let msg_type = req.msg().msg_type();
        let address = req.msg().address();
        let requester = req.msg().requester();

        let entry = self
            .entries
            .entry(address)
            .or_insert_with(|| DirectoryEntry::new(address));
        let old_state = entry.state();
        let owner = entry.owner();
        let others: BTreeSet<TileId> = entry
            .sharers()
            .iter()
            .copied()
            .filter(|tile| *tile != requester)
            .collect();

        let (fan_out, ack_type) = match (msg_type, old_state) {
            (ShmemMsgType::ShReq | ShmemMsgType::ExReq, DirectoryState::Invalid)
            | (ShmemMsgType::ShReq, DirectoryState::Shared) => {
                self.complete_request(&req, old_state, &BTreeSet::new())?;
                return Ok(None);
            }
            (ShmemMsgType::ExReq, DirectoryState::Shared) => {
                if others.is_empty() {
                    self.complete_request(&req, old_state, &BTreeSet::new())?;
                    return Ok(None);
                }
                (ShmemMsgType::InvReq, ShmemMsgType::InvRep)
            }
            (ShmemMsgType::ShReq | ShmemMsgType::ExReq, DirectoryState::Owned)
                if owner == Some(requester) =>
            {
                return sim_error!(format!(
                    "{}: tile {requester} already owns {address:#x}",
                    self.entity
                ));
            }
            (ShmemMsgType::ShReq, DirectoryState::Owned) => {
                (ShmemMsgType::WbReq, ShmemMsgType::WbRep)
            }
            (ShmemMsgType::ExReq, DirectoryState::Owned) => {
                (ShmemMsgType::FlushReq, ShmemMsgType::FlushRep)
            }
            _ => {
                return sim_error!(format!(
                    "{}: {msg_type} is not a directory request",
                    self.entity
                ));
            }
        };

        let time = self.access(req.time(), 0);
        debug!(self.entity ; "start {} ({}), {} {} to {:?}",
            req, old_state, others.len(), fan_out, others);

        for tile in &others {
            let msg = self.build_msg(fan_out, requester, address, true, *tile);
            self.send(&msg, *tile, PacketType::SharedMemRequest, time)?;
        }
        match fan_out {
            ShmemMsgType::InvReq => self.metrics.invalidations += others.len(),
            ShmemMsgType::FlushReq => self.metrics.flushes += 1,
            _ => self.metrics.downgrades += 1,
        }

        Ok(Some(Waiting {
            req,
            old_state,
            awaited: AwaitedAcks {
                ack_type,
                tiles: others,
            },
        }))
    }

    /// Perform the state transition for `req` and reply to its requester.
    fn complete_request(
        &mut self,
        req: &ShmemReq,
        old_state: DirectoryState,
        downgraded: &BTreeSet<TileId>,
    ) -> SimResult {
        let msg_type = req.msg().msg_type();
        let address = req.msg().address();
        let requester = req.msg().requester();

        let mut extra_cycles = 0;
        if old_state == DirectoryState::Invalid {
            let data = self.store.read_block(address, self.config.line_size_bytes);
            self.metrics.dram_reads += 1;
            extra_cycles = self.config.dram_latency_cycles;
            self.entry_mut(address)?.set_data(data);
        }
        let time = self.access(req.time(), extra_cycles);

        let entry = self.entry_mut(address)?;
        let Some(block) = entry.data().map(<[u8]>::to_vec) else {
            return sim_error!(format!("No data held for block {entry}"));
        };
        let (reply_type, data) = match msg_type {
            ShmemMsgType::ShReq => {
                if old_state == DirectoryState::Owned {
                    entry.make_shared_with(downgraded.iter().copied().chain([requester]));
                } else {
                    entry.add_sharer(requester)?;
                }
                (ShmemMsgType::ShRep, block)
            }
            ShmemMsgType::ExReq => {
                let upgrade = old_state == DirectoryState::Shared && entry.has_sharer(requester);
                entry.set_owner(requester);
                if upgrade {
                    (ShmemMsgType::UpgradeRep, Vec::new())
                } else {
                    (ShmemMsgType::ExRep, block)
                }
            }
            other => {
                return sim_error!(format!("Cannot complete {other} for {address:#x}"));
            }
        };

        debug!(self.entity ; "complete {} -> {}", req, self.entries[&address]);
        let reply = self
            .build_msg(reply_type, requester, address, false, requester)
            .with_data(data);
        self.send(&reply, requester, PacketType::SharedMemReply, time)
    }

    /// Count an acknowledgement and complete the transaction on the last one.
    pub fn process_ack(&mut self, sender: TileId, msg: &ShmemMsg, time: Time) -> SimResult {
        let address = msg.address();
        let msg_type = msg.msg_type();
        let kept_copy = msg_type == ShmemMsgType::WbRep && msg.data().is_some();

        let Some(pending) = self.pending.get_mut(&address) else {
            return sim_error!(format!(
                "{}: {msg_type} from tile {sender} for {address:#x} with no pending request",
                self.entity
            ));
        };
        pending.ack_received(sender, msg_type, kept_copy)?;
        pending.current_mut().update_time(time);
        let remaining = pending.num_acks_to_recv();
        self.metrics.acks += 1;

        if let Some(data) = msg.data() {
            self.write_back_data(address, data)?;
        }

        trace!(self.entity ; "{msg_type} from tile {sender}, {remaining} outstanding");
        if remaining > 0 {
            return Ok(());
        }

        let Some(pending) = self.pending.remove(&address) else {
            return sim_error!(format!("Lost pending request for {address:#x}"));
        };
        self.complete_request(pending.current(), pending.old_state(), pending.downgraded())?;
        self.replay_queued(address, pending)
    }

    /// Start the requests queued behind a completed transaction, in order.
    fn replay_queued(&mut self, address: Address, mut pending: PendingRequest) -> SimResult {
        while pending.num_waiting_requests() > 0 {
            let mut next = pending.next_request()?;
            next.update_time(self.busy_until);
            debug!(self.entity ; "replay {}", next);

            if let Some(waiting) = self.process_request(next)? {
                pending.replace_current(waiting.req, waiting.old_state, waiting.awaited);
                self.pending.insert(address, pending);
                break;
            }
        }
        Ok(())
    }

    /// Handle a block evicted from a private cache.
    ///
    /// Not an acknowledgement: if the evicting tile is also being waited on,
    /// its normal ack still follows and completes the state change. Only the
    /// owner may return data, and nothing is written unless the eviction is
    /// accepted.
    pub fn process_write_back(&mut self, sender: TileId, msg: &ShmemMsg) -> SimResult {
        let address = msg.address();
        let Some(entry) = self.entries.get(&address) else {
            return sim_error!(format!(
                "{}: write-back {msg} from tile {sender} for untracked {address:#x}",
                self.entity
            ));
        };

        let from_owner = entry.state() == DirectoryState::Owned && entry.owner() == Some(sender);
        let from_sharer = entry.state() == DirectoryState::Shared && entry.has_sharer(sender);
        let holds_line = match msg.msg_type() {
            ShmemMsgType::FlushRep => from_owner,
            ShmemMsgType::InvRep => from_sharer && msg.data().is_none(),
            _ => false,
        };
        let in_transaction = self.pending.get(&address).map(|pending| {
            pending.is_awaiting(sender) || pending.current().msg().requester() == sender
        });
        if !holds_line || in_transaction == Some(false) {
            return sim_error!(format!(
                "{}: unexpected write-back {msg} from tile {sender} for {entry}",
                self.entity
            ));
        }

        self.metrics.write_backs += 1;
        if let Some(data) = msg.data() {
            self.write_back_data(address, data)?;
        }

        let awaited = self
            .pending
            .get(&address)
            .map(|pending| pending.is_awaiting(sender));
        let entry = self.entry_mut(address)?;
        match awaited {
            Some(true) => Ok(()),
            Some(false) => entry.remove_sharer(sender),
            None if from_owner => {
                entry.invalidate();
                Ok(())
            }
            None => entry.remove_sharer(sender),
        }
    }

    fn write_back_data(&mut self, address: Address, data: &[u8]) -> SimResult {
        self.store.write_block(address, data);
        self.metrics.dram_writes += 1;
        self.entry_mut(address)?.set_data(data.to_vec());
        Ok(())
    }

    fn entry_mut(&mut self, address: Address) -> Result<&mut DirectoryEntry, SimError> {
        match self.entries.get_mut(&address) {
            Some(entry) => Ok(entry),
            None => sim_error!(format!("No directory entry for {address:#x}")),
        }
    }

    /// Occupy the directory for one access starting no earlier than `ready`.
    fn access(&mut self, ready: Time, extra_cycles: u64) -> Time {
        let done = ready.max(self.busy_until) + (self.config.access_cycles + extra_cycles);
        self.busy_until = done;
        done
    }

    fn build_msg(
        &self,
        msg_type: ShmemMsgType,
        requester: TileId,
        address: Address,
        reply_expected: bool,
        single_receiver: TileId,
    ) -> ShmemMsg {
        ShmemMsg::new(&ShmemMsgCfg {
            msg_type,
            sender: MemComponent::DramDirectory,
            receiver: MemComponent::L2Cache,
            requester,
            single_receiver,
            reply_expected,
            address,
            modeled: true,
        })
    }

    fn send(
        &mut self,
        msg: &ShmemMsg,
        receiver: TileId,
        packet_type: PacketType,
        time: Time,
    ) -> SimResult {
        let bits = msg.modeled_length(&self.widths)?;
        if msg.is_modeled() {
            self.metrics.modeled_bits_sent += bits;
        }

        let tag = create_tag!(self.entity);
        create!(self.entity ; tag, bits, msg.msg_type().name());
        trace!(self.entity ; "send {} to tile {} @{}", msg, receiver, time);
        exit!(self.entity ; tag);

        let packet =
            NetPacket::from_msg(packet_type, self.config.tile_id, receiver, time, msg)?.with_tag(tag);
        self.network.send(packet)
    }

    /// Check the consistency of every entry and in-flight transaction.
    pub fn check_invariants(&self) -> SimResult {
        for entry in self.entries.values() {
            entry.check_invariants()?;
        }
        for (address, pending) in &self.pending {
            if !self.entries.contains_key(address) {
                return sim_error!(format!("Pending request for untracked {address:#x}"));
            }
            if pending.num_acks_to_recv() == 0 {
                return sim_error!(format!(
                    "Transaction {} has no outstanding acks",
                    pending.current()
                ));
            }
            if pending.num_acks_to_recv() != pending.awaited().tiles.len() {
                return sim_error!(format!(
                    "Transaction {} expects {} acks from {:?}",
                    pending.current(),
                    pending.num_acks_to_recv(),
                    pending.awaited().tiles
                ));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn entry(&self, address: Address) -> Option<&DirectoryEntry> {
        self.entries.get(&address)
    }

    /// Every block the directory has seen.
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> + '_ {
        self.entries.values()
    }

    #[must_use]
    pub fn pending_request(&self, address: Address) -> Option<&PendingRequest> {
        self.pending.get(&address)
    }

    /// Number of addresses with a transaction in flight.
    #[must_use]
    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn metrics(&self) -> &DirectoryMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    #[must_use]
    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }
}
