// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A tile's private L2 cache as seen by the directory.
//!
//! Lines are held `Shared` (read-only) or `Modified` (writable, possibly
//! dirty); a line that is not held is invalid. Misses send a request to the
//! directory and complete when its reply arrives. Only one access may be
//! outstanding at a time. When a fill needs room the least recently used
//! line is evicted, which tells the directory with an unsolicited
//! write-back.
//!
//! Invalidations, flushes and downgrades from the directory are always
//! acknowledged, even if the line has already been evicted.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use shmem_directory::network::Network;
use shmem_protocols::packet::{NetPacket, PacketType};
use shmem_protocols::shmem_msg::{ModeledWidths, ShmemMsg, ShmemMsgCfg, ShmemMsgType};
use shmem_protocols::sim_error;
use shmem_protocols::types::{Address, MemComponent, SimError, SimResult, TileId, Time};
use shmem_track::entity::Entity;
use shmem_track::{create, create_tag, debug, enter, exit, set_time, trace};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LineState {
    Shared,
    Modified,
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineState::Shared => write!(f, "S"),
            LineState::Modified => write!(f, "M"),
        }
    }
}

#[derive(Clone, Debug)]
struct Line {
    state: LineState,
    data: Vec<u8>,
    last_used: u64,
}

/// Parameters of one private L2 cache.
#[derive(Clone, Debug)]
pub struct L2Config {
    /// Tile the cache belongs to.
    pub tile_id: TileId,

    /// Tile hosting the directory.
    pub directory_tile: TileId,
    /// Tile count, used to size the modeled tile ids.
    pub num_tiles: usize,
    /// Width of the modeled address field.
    pub physical_address_bits: usize,
    /// Lines held before an eviction is needed.
    pub capacity_lines: usize,
    /// Cycles charged for a cache lookup.
    pub access_cycles: u64,
}

/// Event counts gathered by an L2 cache.
#[derive(Clone, Debug, Default)]
pub struct L2Metrics {
    pub hits: usize,
    pub misses: usize,
    pub upgrades: usize,
    pub evictions: usize,
    pub invalidations: usize,
    pub flushes: usize,
    pub downgrades: usize,
    pub modeled_bits_sent: usize,
}

impl fmt::Display for L2Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits {}, misses {} ({} upgrades), evictions {}, invalidated {}, flushed {}, downgraded {}",
            self.hits,
            self.misses,
            self.upgrades,
            self.evictions,
            self.invalidations,
            self.flushes,
            self.downgrades
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessResult {
    Hit,

    /// A request has been sent to the directory.
    Miss,
}

/// The access waiting for the directory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Outstanding {
    pub address: Address,
    pub write: bool,
    pub issued: Time,
}

/// A miss that has been satisfied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub address: Address,
    pub write: bool,
    pub issued: Time,
    pub completed: Time,
}

impl Completion {
    #[must_use]
    pub fn latency(&self) -> u64 {
        self.completed.cycles().saturating_sub(self.issued.cycles())
    }
}

pub struct L2Agent<N>
where
    N: Network,
{
    pub entity: Arc<Entity>,
    config: L2Config,
    widths: ModeledWidths,
    lines: HashMap<Address, Line>,
    use_count: u64,
    outstanding: Option<Outstanding>,
    network: N,
    metrics: L2Metrics,
}

impl<N> L2Agent<N>
where
    N: Network,
{
    pub fn new(parent: &Arc<Entity>, config: L2Config, network: N) -> Self {
        let entity = Arc::new(Entity::new(parent, "l2"));
        let widths = ModeledWidths::new(config.num_tiles, config.physical_address_bits);
        Self {
            entity,
            config,
            widths,
            lines: HashMap::new(),
            use_count: 0,
            outstanding: None,
            network,
            metrics: L2Metrics::default(),
        }
    }

    /// Access a line on behalf of the core at time `now`.
    pub fn access(
        &mut self,
        address: Address,
        write: bool,
        now: Time,
    ) -> Result<AccessResult, SimError> {
        if let Some(outstanding) = &self.outstanding {
            return sim_error!(format!(
                "{}: access to {address:#x} while {:#x} is outstanding",
                self.entity, outstanding.address
            ));
        }

        let tile_id = self.config.tile_id;
        let held = self.touch(address);
        let msg_type = match (held, write) {
            (Some(_), false) => None,
            (Some(LineState::Modified), true) => {
                if let Some(line) = self.lines.get_mut(&address) {
                    line.data.fill(tile_id as u8);
                }
                None
            }
            (Some(LineState::Shared), true) => {
                self.metrics.upgrades += 1;
                Some(ShmemMsgType::ExReq)
            }
            (None, false) => Some(ShmemMsgType::ShReq),
            (None, true) => Some(ShmemMsgType::ExReq),
        };

        let Some(msg_type) = msg_type else {
            self.metrics.hits += 1;
            trace!(self.entity ; "hit {} {address:#x}", if write { "write" } else { "read" });
            return Ok(AccessResult::Hit);
        };

        self.metrics.misses += 1;
        self.outstanding = Some(Outstanding {
            address,
            write,
            issued: now,
        });
        let msg = self.build_msg(msg_type, tile_id, address, true);
        self.send(&msg, PacketType::SharedMemRequest, now + self.config.access_cycles)?;
        Ok(AccessResult::Miss)
    }

    /// Process a packet from the directory.
    ///
    /// Returns the outstanding access if this packet completes it.
    pub fn handle_packet(&mut self, packet: NetPacket) -> Result<Option<Completion>, SimError> {
        enter!(self.entity ; packet.tag);
        set_time!(self.entity ; packet.time.cycles());

        let msg = packet.msg()?;
        trace!(self.entity ; "received {}", msg);

        let time = packet.time + self.config.access_cycles;
        let address = msg.address();
        let held = self.lines.get(&address).map(|line| line.state);

        match msg.msg_type() {
            ShmemMsgType::InvReq => {
                if held == Some(LineState::Modified) {
                    return sim_error!(format!(
                        "{}: {msg_type} for modified line {address:#x}",
                        self.entity,
                        msg_type = msg.msg_type()
                    ));
                }
                self.lines.remove(&address);
                self.metrics.invalidations += 1;
                self.reply(ShmemMsgType::InvRep, &msg, None, time)?;
            }
            ShmemMsgType::FlushReq => {
                let data = match self.lines.remove(&address) {
                    Some(line) if line.state == LineState::Modified => Some(line.data),
                    Some(_) => {
                        return sim_error!(format!(
                            "{}: FLUSH_REQ for shared line {address:#x}",
                            self.entity
                        ));
                    }
                    None => None,
                };
                self.metrics.flushes += 1;
                self.reply(ShmemMsgType::FlushRep, &msg, data, time)?;
            }
            ShmemMsgType::WbReq => {
                let data = match self.lines.get_mut(&address) {
                    Some(line) if line.state == LineState::Modified => {
                        line.state = LineState::Shared;
                        Some(line.data.clone())
                    }
                    Some(_) => {
                        return sim_error!(format!(
                            "{}: WB_REQ for shared line {address:#x}",
                            self.entity
                        ));
                    }
                    None => None,
                };
                self.metrics.downgrades += 1;
                self.reply(ShmemMsgType::WbRep, &msg, data, time)?;
            }
            ShmemMsgType::ShRep | ShmemMsgType::ExRep | ShmemMsgType::UpgradeRep => {
                return self.complete(&msg, time).map(Some);
            }
            other => {
                return sim_error!(format!("{}: unexpected {other}", self.entity));
            }
        }
        Ok(None)
    }

    fn complete(&mut self, msg: &ShmemMsg, time: Time) -> Result<Completion, SimError> {
        let address = msg.address();
        let Some(outstanding) = self.outstanding.take() else {
            return sim_error!(format!("{}: unexpected {msg}", self.entity));
        };
        if outstanding.address != address {
            return sim_error!(format!(
                "{}: {msg} while waiting for {:#x}",
                self.entity, outstanding.address
            ));
        }

        match (msg.msg_type(), outstanding.write) {
            (ShmemMsgType::ShRep, false) => {
                self.fill(address, LineState::Shared, msg, time)?;
            }
            (ShmemMsgType::ExRep, true) => {
                self.fill(address, LineState::Modified, msg, time)?;
            }
            (ShmemMsgType::UpgradeRep, true) => match self.lines.get_mut(&address) {
                Some(line) if line.state == LineState::Shared => {
                    line.state = LineState::Modified;
                }
                _ => {
                    return sim_error!(format!(
                        "{}: UPGRADE_REP without a shared copy of {address:#x}",
                        self.entity
                    ));
                }
            },
            _ => {
                return sim_error!(format!(
                    "{}: {msg} does not answer a {}",
                    self.entity,
                    if outstanding.write { "write" } else { "read" }
                ));
            }
        }

        self.touch(address);
        if outstanding.write {
            let tile_id = self.config.tile_id;
            if let Some(line) = self.lines.get_mut(&address) {
                line.data.fill(tile_id as u8);
            }
        }

        debug!(self.entity ; "{} {address:#x} after {} cycles",
            msg.msg_type(), time.cycles().saturating_sub(outstanding.issued.cycles()));
        Ok(Completion {
            address,
            write: outstanding.write,
            issued: outstanding.issued,
            completed: time,
        })
    }

    /// Install a line with the data carried by `msg`, evicting if full.
    fn fill(&mut self, address: Address, state: LineState, msg: &ShmemMsg, time: Time) -> SimResult {
        let Some(data) = msg.data() else {
            return sim_error!(format!("{}: {msg} carries no data", self.entity));
        };
        if !self.lines.contains_key(&address) && self.lines.len() >= self.config.capacity_lines {
            self.evict(time)?;
        }
        self.lines.insert(
            address,
            Line {
                state,
                data: data.to_vec(),
                last_used: self.use_count,
            },
        );
        Ok(())
    }

    fn evict(&mut self, time: Time) -> SimResult {
        let Some(victim) = self
            .lines
            .iter()
            .min_by_key(|(_, line)| line.last_used)
            .map(|(address, _)| *address)
        else {
            return Ok(());
        };
        let Some(line) = self.lines.remove(&victim) else {
            return Ok(());
        };

        self.metrics.evictions += 1;
        debug!(self.entity ; "evict {victim:#x} ({})", line.state);

        let tile_id = self.config.tile_id;
        let msg = match line.state {
            LineState::Modified => self
                .build_msg(ShmemMsgType::FlushRep, tile_id, victim, false)
                .with_data(line.data),
            LineState::Shared => self.build_msg(ShmemMsgType::InvRep, tile_id, victim, false),
        };
        self.send(&msg, PacketType::SharedMemEvict, time)
    }

    fn reply(
        &mut self,
        msg_type: ShmemMsgType,
        request: &ShmemMsg,
        data: Option<Vec<u8>>,
        time: Time,
    ) -> SimResult {
        let msg = self
            .build_msg(msg_type, request.requester(), request.address(), false)
            .with_data(data.unwrap_or_default());
        self.send(&msg, PacketType::SharedMemReply, time)
    }

    /// Mark a line as most recently used, returning its state.
    fn touch(&mut self, address: Address) -> Option<LineState> {
        self.use_count += 1;
        let use_count = self.use_count;
        self.lines.get_mut(&address).map(|line| {
            line.last_used = use_count;
            line.state
        })
    }

    fn build_msg(
        &self,
        msg_type: ShmemMsgType,
        requester: TileId,
        address: Address,
        reply_expected: bool,
    ) -> ShmemMsg {
        ShmemMsg::new(&ShmemMsgCfg {
            msg_type,
            sender: MemComponent::L2Cache,
            receiver: MemComponent::DramDirectory,
            requester,
            single_receiver: self.config.directory_tile,
            reply_expected,
            address,
            modeled: true,
        })
    }

    fn send(&mut self, msg: &ShmemMsg, packet_type: PacketType, time: Time) -> SimResult {
        let bits = msg.modeled_length(&self.widths)?;
        if msg.is_modeled() {
            self.metrics.modeled_bits_sent += bits;
        }

        let tag = create_tag!(self.entity);
        create!(self.entity ; tag, bits, msg.msg_type().name());
        trace!(self.entity ; "send {} @{}", msg, time);
        exit!(self.entity ; tag);

        let packet = NetPacket::from_msg(
            packet_type,
            self.config.tile_id,
            self.config.directory_tile,
            time,
            msg,
        )?
        .with_tag(tag);
        self.network.send(packet)
    }

    #[must_use]
    pub fn state(&self, address: Address) -> Option<LineState> {
        self.lines.get(&address).map(|line| line.state)
    }

    #[must_use]
    pub fn data(&self, address: Address) -> Option<&[u8]> {
        self.lines.get(&address).map(|line| line.data.as_slice())
    }

    /// Addresses of every line held.
    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.lines.keys().copied()
    }

    #[must_use]
    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn outstanding(&self) -> Option<&Outstanding> {
        self.outstanding.as_ref()
    }

    #[must_use]
    pub fn metrics(&self) -> &L2Metrics {
        &self.metrics
    }

    #[must_use]
    pub fn config(&self) -> &L2Config {
        &self.config
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }
}

#[cfg(test)]
mod tests {
    use shmem_directory::network::QueueNetwork;
    use shmem_track::entity::toplevel;
    use shmem_track::tracker::dev_null_tracker;

    use super::*;

    const LINE: usize = 64;

    fn create_l2(capacity_lines: usize) -> L2Agent<QueueNetwork> {
        let top = toplevel(&dev_null_tracker(), "top");
        let tile = Arc::new(Entity::new(&top, "tile1"));
        let config = L2Config {
            tile_id: 1,
            directory_tile: 0,
            num_tiles: 4,
            physical_address_bits: 48,
            capacity_lines,
            access_cycles: 2,
        };
        L2Agent::new(&tile, config, QueueNetwork::new())
    }

    fn from_directory(msg_type: ShmemMsgType, address: Address, data: Vec<u8>) -> NetPacket {
        let msg = ShmemMsg::new(&ShmemMsgCfg {
            msg_type,
            sender: MemComponent::DramDirectory,
            receiver: MemComponent::L2Cache,
            requester: 1,
            address,
            modeled: true,
            ..Default::default()
        })
        .with_data(data);
        NetPacket::from_msg(PacketType::SharedMemReply, 0, 1, Time(100), &msg).unwrap()
    }

    fn sent(l2: &mut L2Agent<QueueNetwork>) -> Vec<(PacketType, ShmemMsgType, usize)> {
        l2.network_mut()
            .drain()
            .into_iter()
            .map(|pkt| {
                let msg = pkt.msg().unwrap();
                (pkt.packet_type, msg.msg_type(), msg.data_length())
            })
            .collect()
    }

    #[test]
    fn read_miss_then_hit() {
        let mut l2 = create_l2(2);
        assert_eq!(l2.access(0x40, false, Time(10)).unwrap(), AccessResult::Miss);
        let request = l2.network_mut().pop().unwrap();
        assert_eq!(request.time, Time(12));
        assert_eq!(request.msg().unwrap().msg_type(), ShmemMsgType::ShReq);

        // Only one access at a time
        assert!(l2.access(0x80, false, Time(11)).is_err());

        let done = l2
            .handle_packet(from_directory(ShmemMsgType::ShRep, 0x40, vec![7; LINE]))
            .unwrap()
            .unwrap();
        assert_eq!(done.completed, Time(102));
        assert_eq!(done.latency(), 92);
        assert_eq!(l2.state(0x40), Some(LineState::Shared));

        assert_eq!(l2.access(0x40, false, Time(110)).unwrap(), AccessResult::Hit);
        assert_eq!(l2.metrics().hits, 1);
    }

    #[test]
    fn write_to_shared_line_upgrades() {
        let mut l2 = create_l2(2);
        l2.access(0x40, false, Time(0)).unwrap();
        l2.handle_packet(from_directory(ShmemMsgType::ShRep, 0x40, vec![7; LINE]))
            .unwrap();
        sent(&mut l2);

        assert_eq!(l2.access(0x40, true, Time(200)).unwrap(), AccessResult::Miss);
        assert_eq!(
            sent(&mut l2),
            vec![(PacketType::SharedMemRequest, ShmemMsgType::ExReq, 0)]
        );
        l2.handle_packet(from_directory(ShmemMsgType::UpgradeRep, 0x40, Vec::new()))
            .unwrap();
        assert_eq!(l2.state(0x40), Some(LineState::Modified));
        assert_eq!(l2.data(0x40), Some(&[1u8; LINE][..]));
        assert_eq!(l2.metrics().upgrades, 1);
    }

    #[test]
    fn fill_evicts_least_recently_used() {
        let mut l2 = create_l2(2);
        for (address, write) in [(0x0, true), (0x40, false)] {
            l2.access(address, write, Time(0)).unwrap();
            let rep = if write {
                ShmemMsgType::ExRep
            } else {
                ShmemMsgType::ShRep
            };
            l2.handle_packet(from_directory(rep, address, vec![0; LINE]))
                .unwrap();
        }
        sent(&mut l2);

        // Touch 0x40 so that the modified line at 0x0 is the victim
        l2.access(0x40, false, Time(0)).unwrap();
        l2.access(0x80, false, Time(0)).unwrap();
        l2.handle_packet(from_directory(ShmemMsgType::ShRep, 0x80, vec![0; LINE]))
            .unwrap();

        assert_eq!(
            sent(&mut l2),
            vec![
                (PacketType::SharedMemRequest, ShmemMsgType::ShReq, 0),
                (PacketType::SharedMemEvict, ShmemMsgType::FlushRep, LINE),
            ]
        );
        assert_eq!(l2.state(0x0), None);
        assert_eq!(l2.num_lines(), 2);
        assert_eq!(l2.metrics().evictions, 1);
    }

    #[test]
    fn directory_requests_are_always_acknowledged() {
        let mut l2 = create_l2(2);
        l2.access(0x40, true, Time(0)).unwrap();
        l2.handle_packet(from_directory(ShmemMsgType::ExRep, 0x40, vec![0; LINE]))
            .unwrap();
        sent(&mut l2);

        l2.handle_packet(from_directory(ShmemMsgType::WbReq, 0x40, Vec::new()))
            .unwrap();
        assert_eq!(l2.state(0x40), Some(LineState::Shared));
        l2.handle_packet(from_directory(ShmemMsgType::InvReq, 0x40, Vec::new()))
            .unwrap();
        assert_eq!(l2.state(0x40), None);

        // No longer held
        l2.handle_packet(from_directory(ShmemMsgType::FlushReq, 0x40, Vec::new()))
            .unwrap();
        l2.handle_packet(from_directory(ShmemMsgType::WbReq, 0x40, Vec::new()))
            .unwrap();

        assert_eq!(
            sent(&mut l2),
            vec![
                (PacketType::SharedMemReply, ShmemMsgType::WbRep, LINE),
                (PacketType::SharedMemReply, ShmemMsgType::InvRep, 0),
                (PacketType::SharedMemReply, ShmemMsgType::FlushRep, 0),
                (PacketType::SharedMemReply, ShmemMsgType::WbRep, 0),
            ]
        );
    }

    #[test]
    fn unexpected_replies_are_errors() {
        let mut l2 = create_l2(2);
        assert!(
            l2.handle_packet(from_directory(ShmemMsgType::ShRep, 0x40, vec![0; LINE]))
                .is_err()
        );

        l2.access(0x40, false, Time(0)).unwrap();
        assert!(
            l2.handle_packet(from_directory(ShmemMsgType::ExRep, 0x40, vec![0; LINE]))
                .is_err()
        );
    }
}
