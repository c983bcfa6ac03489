// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Tiles sharing memory through one directory.
//!
//! Each tile has a core, modelled by a [`CorePerfModel`], and a private
//! [`L2Agent`]. Tile 0 also hosts the directory. The core's workload is
//! queued up front; whenever the model stops at a memory access the access
//! is made in the L2 and the model resumes once its latency is known.
//!
//! After every packet the directory handles its invariants are checked.
//! At the end no transaction may be left in flight and every line held by
//! a tile must agree with the directory.

use std::collections::VecDeque;
use std::fmt::Write;
use std::sync::Arc;

use shmem_directory::backing_store::DramStore;
use shmem_directory::directory_entry::DirectoryState;
use shmem_directory::dram_directory::{DirectoryConfig, DramDirectory};
use shmem_directory::network::QueueNetwork;
use shmem_perf_model::core_perf_model::{CorePerfModel, IterateResult};
use shmem_perf_model::instruction::{BasicBlock, DynamicInstructionInfo};
use shmem_perf_model::simple::SimpleHandler;
use shmem_protocols::packet::NetPacket;
use shmem_protocols::shmem_msg::{ModeledWidths, NUM_MSG_TYPES, ShmemMsgType};
use shmem_protocols::sim_error;
use shmem_protocols::types::{Address, SimError, SimResult, TileId, Time};
use shmem_track::entity::{Entity, toplevel};
use shmem_track::tracker::InMemoryTracker;
use shmem_track::{Tracker, debug, info};

use crate::config::SimConfig;
use crate::event_queue::{Endpoint, EventKind, EventQueue};
use crate::l2_agent::{AccessResult, L2Agent, L2Config, LineState};
use crate::mesh::Mesh;
use crate::workload::{MemoryAccess, RandomWorkload};

/// Tile hosting the directory.
pub const DIRECTORY_TILE: TileId = 0;

pub type SimDirectory = DramDirectory<QueueNetwork, DramStore>;

pub struct Tile {
    pub entity: Arc<Entity>,
    pub l2: L2Agent<QueueNetwork>,
    pub core: CorePerfModel<SimpleHandler>,

    /// Accesses not yet made, in program order.
    accesses: VecDeque<MemoryAccess>,
    finished: bool,
}

impl Tile {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn num_remaining_accesses(&self) -> usize {
        self.accesses.len()
    }
}

fn access_info(access: &MemoryAccess, latency: u64) -> DynamicInstructionInfo {
    if access.write {
        DynamicInstructionInfo::memory_write(access.address, latency)
    } else {
        DynamicInstructionInfo::memory_read(access.address, latency)
    }
}

pub struct Simulation {
    pub top: Arc<Entity>,
    config: SimConfig,
    mesh: Mesh,
    widths: ModeledWidths,
    directory: SimDirectory,
    tiles: Vec<Tile>,
    events: EventQueue,
    now: Time,
    num_events: u64,
}

impl Simulation {
    pub fn new(tracker: &Tracker, config: SimConfig) -> Result<Self, SimError> {
        let top = toplevel(tracker, "top");

        let directory = DramDirectory::new(
            &top,
            DirectoryConfig {
                tile_id: DIRECTORY_TILE,
                num_tiles: config.num_tiles,
                line_size_bytes: config.line_size_bytes,
                physical_address_bits: config.physical_address_bits,
                access_cycles: config.directory_access_cycles,
                dram_latency_cycles: config.dram_latency_cycles,
            },
            QueueNetwork::new(),
            DramStore::new(),
        );

        let mut events = EventQueue::new();
        let mut tiles = Vec::with_capacity(config.num_tiles);
        for i in 0..config.num_tiles {
            let tile_id = i as TileId;
            let entity = Arc::new(Entity::new(&top, &format!("tile{i}")));
            let l2 = L2Agent::new(
                &entity,
                L2Config {
                    tile_id,
                    directory_tile: DIRECTORY_TILE,
                    num_tiles: config.num_tiles,
                    physical_address_bits: config.physical_address_bits,
                    capacity_lines: config.l2_capacity_lines,
                    access_cycles: config.l2_access_cycles,
                },
                QueueNetwork::new(),
            );

            let mut core = CorePerfModel::new(
                &entity,
                "core",
                config.core_frequency_ghz,
                SimpleHandler::default(),
            );
            core.enable();

            let accesses: VecDeque<MemoryAccess> = RandomWorkload::new(
                config.seed.wrapping_add(i as u64),
                config.line_size_bytes,
                config.num_shared_lines,
                config.write_percent,
                config.accesses_per_tile,
            )
            .collect();
            for access in &accesses {
                core.queue_basic_block(access.basic_block(config.compute_cycles))?;
            }
            // Lets the model consume the last real block
            core.queue_basic_block(BasicBlock::default())?;

            events.schedule_resume(tile_id, Time::ZERO);
            tiles.push(Tile {
                entity,
                l2,
                core,
                accesses,
                finished: false,
            });
        }

        info!(top ; "{} tiles making {} accesses each to {} lines ({}% writes), seed {}",
            config.num_tiles, config.accesses_per_tile, config.num_shared_lines,
            config.write_percent, config.seed);

        Ok(Self {
            top,
            mesh: Mesh::new(
                config.num_tiles,
                config.cycles_per_hop,
                config.cycles_overhead,
                config.link_width_bits,
            ),
            widths: ModeledWidths::new(config.num_tiles, config.physical_address_bits),
            config,
            directory,
            tiles,
            events,
            now: Time::ZERO,
            num_events: 0,
        })
    }

    /// Run until no events remain, then check everything has drained.
    pub fn run(&mut self) -> SimResult {
        while let Some((time, kind)) = self.events.pop() {
            self.now = time;
            self.num_events += 1;

            match kind {
                EventKind::Resume { tile } => self.resume(tile)?,
                EventKind::Deliver { dst, mut packet } => {
                    packet.time = time;
                    match dst {
                        Endpoint::Directory => self.deliver_to_directory(packet)?,
                        Endpoint::L2(tile) => self.deliver_to_l2(tile, packet)?,
                    }
                }
            }
        }
        self.finish()
    }

    fn tile_index(&self, tile: TileId) -> Result<usize, SimError> {
        match usize::try_from(tile) {
            Ok(index) if index < self.tiles.len() => Ok(index),
            _ => sim_error!(format!("{}: no tile {tile}", self.top)),
        }
    }

    /// Let a core run until it needs the result of a memory access.
    fn resume(&mut self, tile_id: TileId) -> SimResult {
        let index = self.tile_index(tile_id)?;
        let tile = &mut self.tiles[index];

        match tile.core.iterate()? {
            IterateResult::Completed => {
                if !tile.finished {
                    tile.finished = true;
                    tile.core.recompute_average_frequency();
                    debug!(tile.entity ; "finished after {} cycles", tile.core.cycle_count());
                }
                Ok(())
            }
            IterateResult::Suspended { .. } => {
                if tile.l2.outstanding().is_some() {
                    return Ok(());
                }

                // The core reaches the access at its own cycle count
                let issued = Time(tile.core.cycle_count());
                if issued > self.now {
                    self.events.schedule_resume(tile_id, issued);
                    return Ok(());
                }

                let Some(access) = tile.accesses.pop_front() else {
                    return sim_error!(format!("{}: core waiting with no access left", tile.entity));
                };
                match tile.l2.access(access.address, access.write, issued)? {
                    AccessResult::Hit => {
                        let latency = self.config.l2_access_cycles;
                        tile.core
                            .push_dynamic_instruction_info(access_info(&access, latency))?;
                        self.events.schedule_resume(tile_id, issued + latency);
                        Ok(())
                    }
                    AccessResult::Miss => {
                        let sent = tile.l2.network_mut().drain();
                        self.route(Endpoint::L2(tile_id), sent)
                    }
                }
            }
        }
    }

    fn deliver_to_directory(&mut self, packet: NetPacket) -> SimResult {
        self.directory.handle_packet(packet)?;
        self.directory.check_invariants()?;
        let sent = self.directory.network_mut().drain();
        self.route(Endpoint::Directory, sent)
    }

    fn deliver_to_l2(&mut self, tile_id: TileId, packet: NetPacket) -> SimResult {
        let index = self.tile_index(tile_id)?;
        let tile = &mut self.tiles[index];

        let completion = tile.l2.handle_packet(packet)?;
        let sent = tile.l2.network_mut().drain();
        if let Some(done) = completion {
            let access = MemoryAccess {
                address: done.address,
                write: done.write,
            };
            tile.core
                .push_dynamic_instruction_info(access_info(&access, done.latency()))?;
            self.events.schedule_resume(tile_id, done.completed);
        }
        self.route(Endpoint::L2(tile_id), sent)
    }

    /// Put packets sent by `src` onto the mesh.
    fn route(&mut self, src: Endpoint, packets: Vec<NetPacket>) -> SimResult {
        for packet in packets {
            let msg = packet.msg()?;
            let bits = if msg.is_modeled() {
                msg.modeled_length(&self.widths)?
            } else {
                0
            };
            let dst = match src {
                Endpoint::Directory => Endpoint::L2(packet.receiver),
                Endpoint::L2(_) => Endpoint::Directory,
            };
            let arrival = packet.time + self.mesh.latency(packet.sender, packet.receiver, bits);
            self.events.schedule_delivery(src, dst, arrival, packet);
        }
        Ok(())
    }

    fn finish(&mut self) -> SimResult {
        let num_pending = self.directory.num_pending();
        if num_pending > 0 {
            return sim_error!(format!(
                "{}: {num_pending} transactions still pending at {}",
                self.top, self.now
            ));
        }
        for tile in &self.tiles {
            if !tile.finished || tile.l2.outstanding().is_some() {
                return sim_error!(format!(
                    "{}: stopped with {} accesses left",
                    tile.entity,
                    tile.accesses.len()
                ));
            }
        }
        self.check_coherence()?;
        info!(self.top ; "Pass: {} events, finished at {}", self.num_events, self.now);
        Ok(())
    }

    /// Check that what each tile holds agrees with the directory.
    pub fn check_coherence(&self) -> SimResult {
        for tile in &self.tiles {
            let tile_id = tile.l2.config().tile_id;
            for address in tile.l2.addresses() {
                self.check_line(tile, tile_id, address)?;
            }
        }

        for entry in self.directory.entries() {
            for sharer in entry.sharers() {
                let index = self.tile_index(*sharer)?;
                if self.tiles[index].l2.state(entry.address()).is_none() {
                    return sim_error!(format!("Tile {sharer} does not hold {entry}"));
                }
            }
        }
        Ok(())
    }

    fn check_line(&self, tile: &Tile, tile_id: TileId, address: Address) -> SimResult {
        let Some(entry) = self.directory.entry(address) else {
            return sim_error!(format!("{}: holds untracked {address:#x}", tile.entity));
        };
        match (tile.l2.state(address), entry.state()) {
            (Some(LineState::Modified), DirectoryState::Owned)
                if entry.owner() == Some(tile_id) =>
            {
                Ok(())
            }
            (Some(LineState::Shared), DirectoryState::Shared) if entry.has_sharer(tile_id) => {
                if tile.l2.data(address) != entry.data() {
                    return sim_error!(format!("{}: stale copy of {entry}", tile.entity));
                }
                Ok(())
            }
            (state, _) => sim_error!(format!(
                "{}: holds {address:#x} as {state:?} but the directory has {entry}",
                tile.entity
            )),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &SimDirectory {
        &self.directory
    }

    #[must_use]
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    #[must_use]
    pub fn now(&self) -> Time {
        self.now
    }

    #[must_use]
    pub fn num_events(&self) -> u64 {
        self.num_events
    }

    #[must_use]
    pub fn summary(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "Finished at {} after {} events", self.now, self.num_events);
        let _ = writeln!(s, "{}", self.directory.entity);
        for line in self.directory.metrics().to_string().lines() {
            let _ = writeln!(s, "   {line}");
        }
        for tile in &self.tiles {
            let _ = write!(s, "{}", tile.core.summary());
            let _ = writeln!(s, "   L2: {}", tile.l2.metrics());
        }
        s
    }

    /// Messages sent by the directory and the L2s, by kind.
    #[must_use]
    pub fn message_summary(&self, counts: &InMemoryTracker) -> String {
        let mut s = String::new();
        let mut senders = vec![&self.directory.entity];
        senders.extend(self.tiles.iter().map(|tile| &tile.l2.entity));

        for entity in senders {
            let kinds: Vec<String> = (0..NUM_MSG_TYPES as u8)
                .filter_map(|tag| ShmemMsgType::try_from(tag).ok())
                .filter_map(|kind| {
                    let count = counts.created_kind_count(entity.tag, kind.name());
                    (count > 0).then(|| format!("{} {count}", kind.name()))
                })
                .collect();
            let _ = writeln!(
                s,
                "{entity}: {} bits in {}",
                counts.created_bits(entity.tag),
                kinds.join(", ")
            );
        }
        s
    }
}
