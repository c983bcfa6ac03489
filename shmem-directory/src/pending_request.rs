// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! State of the single in-flight transaction for one address, plus the
//! requests queued behind it.

use std::collections::{BTreeSet, VecDeque};

use shmem_protocols::shmem_msg::ShmemMsgType;
use shmem_protocols::sim_error;
use shmem_protocols::types::{SimError, SimResult, TileId};

use crate::directory_entry::DirectoryState;
use crate::shmem_req::ShmemReq;

/// Acknowledgements a transaction is waiting for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AwaitedAcks {
    /// Kind of reply that acknowledges the fan-out.
    pub ack_type: ShmemMsgType,

    /// Tiles that have yet to reply.
    pub tiles: BTreeSet<TileId>,
}

/// An in-flight transaction.
#[derive(Debug)]
pub struct PendingRequest {
    current: ShmemReq,
    old_state: DirectoryState,
    num_acks_to_recv: usize,
    awaited: AwaitedAcks,

    /// Tiles that acknowledged a downgrade while keeping a shared copy.
    downgraded: BTreeSet<TileId>,

    queue: VecDeque<ShmemReq>,
}

impl PendingRequest {
    /// Begin a transaction for `current` that waits for one ack from each
    /// tile in `awaited`.
    #[must_use]
    pub fn new(current: ShmemReq, old_state: DirectoryState, awaited: AwaitedAcks) -> Self {
        Self {
            current,
            old_state,
            num_acks_to_recv: awaited.tiles.len(),
            awaited,
            downgraded: BTreeSet::new(),
            queue: VecDeque::new(),
        }
    }

    /// Start the next transaction on this address, keeping the queue.
    pub fn replace_current(
        &mut self,
        current: ShmemReq,
        old_state: DirectoryState,
        awaited: AwaitedAcks,
    ) {
        self.current = current;
        self.old_state = old_state;
        self.num_acks_to_recv = awaited.tiles.len();
        self.awaited = awaited;
        self.downgraded.clear();
    }

    #[must_use]
    pub fn current(&self) -> &ShmemReq {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut ShmemReq {
        &mut self.current
    }

    /// Directory state captured before this transaction started.
    #[must_use]
    pub fn old_state(&self) -> DirectoryState {
        self.old_state
    }

    #[must_use]
    pub fn num_acks_to_recv(&self) -> usize {
        self.num_acks_to_recv
    }

    #[must_use]
    pub fn awaited(&self) -> &AwaitedAcks {
        &self.awaited
    }

    #[must_use]
    pub fn is_awaiting(&self, tile: TileId) -> bool {
        self.awaited.tiles.contains(&tile)
    }

    #[must_use]
    pub fn downgraded(&self) -> &BTreeSet<TileId> {
        &self.downgraded
    }

    pub fn dec_num_acks_to_recv(&mut self) -> SimResult {
        if self.num_acks_to_recv == 0 {
            return sim_error!(format!(
                "Ack count underflow for {}",
                self.current
            ));
        }
        self.num_acks_to_recv -= 1;
        Ok(())
    }

    /// Account for an acknowledgement of kind `ack_type` from `sender`.
    ///
    /// `kept_copy` is set when the sender downgraded and still holds the
    /// block.
    pub fn ack_received(
        &mut self,
        sender: TileId,
        ack_type: ShmemMsgType,
        kept_copy: bool,
    ) -> SimResult {
        if ack_type != self.awaited.ack_type {
            return sim_error!(format!(
                "Received {ack_type} from {sender} while waiting for {} ({})",
                self.awaited.ack_type, self.current
            ));
        }
        if !self.awaited.tiles.remove(&sender) {
            return sim_error!(format!(
                "Unexpected {ack_type} from tile {sender} ({})",
                self.current
            ));
        }
        self.dec_num_acks_to_recv()?;
        if kept_copy {
            self.downgraded.insert(sender);
        }
        Ok(())
    }

    pub fn add_request_to_queue(&mut self, req: ShmemReq) {
        self.queue.push_back(req);
    }

    /// Remove the oldest queued request.
    pub fn next_request(&mut self) -> Result<ShmemReq, SimError> {
        match self.queue.pop_front() {
            Some(req) => Ok(req),
            None => sim_error!(format!("No queued requests behind {}", self.current)),
        }
    }

    #[must_use]
    pub fn num_waiting_requests(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use shmem_protocols::shmem_msg::{ShmemMsg, ShmemMsgCfg};
    use shmem_protocols::types::Time;

    use super::*;

    fn req(requester: TileId) -> ShmemReq {
        let msg = ShmemMsg::new(&ShmemMsgCfg {
            msg_type: ShmemMsgType::ExReq,
            requester,
            address: 0x40,
            ..Default::default()
        });
        ShmemReq::new(&msg, Time::ZERO).unwrap()
    }

    fn inv_acks(tiles: &[TileId]) -> AwaitedAcks {
        AwaitedAcks {
            ack_type: ShmemMsgType::InvRep,
            tiles: tiles.iter().copied().collect(),
        }
    }

    #[test]
    fn counts_acks_down_to_zero() {
        let mut pending = PendingRequest::new(req(1), DirectoryState::Shared, inv_acks(&[2, 5]));
        assert_eq!(pending.num_acks_to_recv(), 2);

        pending.ack_received(5, ShmemMsgType::InvRep, false).unwrap();
        assert_eq!(pending.num_acks_to_recv(), 1);
        assert!(!pending.is_awaiting(5));

        // Duplicate
        assert!(pending.ack_received(5, ShmemMsgType::InvRep, false).is_err());
        // Wrong kind
        assert!(pending.ack_received(2, ShmemMsgType::FlushRep, false).is_err());

        pending.ack_received(2, ShmemMsgType::InvRep, false).unwrap();
        assert_eq!(pending.num_acks_to_recv(), 0);
        assert!(pending.dec_num_acks_to_recv().is_err());
    }

    #[test]
    fn queue_is_fifo() {
        let mut pending = PendingRequest::new(req(1), DirectoryState::Owned, inv_acks(&[3]));
        pending.add_request_to_queue(req(7));
        pending.add_request_to_queue(req(8));
        assert_eq!(pending.num_waiting_requests(), 2);

        assert_eq!(pending.next_request().unwrap().msg().requester(), 7);
        assert_eq!(pending.next_request().unwrap().msg().requester(), 8);
        assert!(pending.next_request().is_err());
    }

    #[test]
    fn replace_keeps_queue() {
        let mut pending = PendingRequest::new(req(1), DirectoryState::Owned, inv_acks(&[3]));
        pending.add_request_to_queue(req(7));
        pending.add_request_to_queue(req(8));
        let next = pending.next_request().unwrap();
        pending.replace_current(next, DirectoryState::Shared, inv_acks(&[1, 3]));

        assert_eq!(pending.current().msg().requester(), 7);
        assert_eq!(pending.old_state(), DirectoryState::Shared);
        assert_eq!(pending.num_acks_to_recv(), 2);
        assert_eq!(pending.num_waiting_requests(), 1);
    }

    #[test]
    fn downgraded_tiles_are_recorded() {
        let awaited = AwaitedAcks {
            ack_type: ShmemMsgType::WbRep,
            tiles: [4].into_iter().collect(),
        };
        let mut pending = PendingRequest::new(req(1), DirectoryState::Owned, awaited);
        pending.ack_received(4, ShmemMsgType::WbRep, true).unwrap();
        assert!(pending.downgraded().contains(&4));
    }
}
