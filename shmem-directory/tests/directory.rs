// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use shmem_directory::directory_entry::DirectoryState;
use shmem_directory::dram_directory::{DirectoryConfig, DramDirectory};
use shmem_directory::backing_store::DramStore;
use shmem_directory::network::QueueNetwork;
use shmem_directory::test_helpers::{
    LINE_SIZE_BYTES, TestDirectory, create_ack, create_directory, create_request,
    create_write_back, sent_kinds, sent_messages,
};
use shmem_protocols::shmem_msg::ShmemMsgType::{
    ExRep, ExReq, FlushRep, FlushReq, InvRep, InvReq, ShRep, ShReq, UpgradeRep, WbRep, WbReq,
};
use shmem_protocols::types::{Address, TileId, Time};
use shmem_track::entity::toplevel;
use shmem_track::test_helpers::check_and_clear;
use shmem_track::tracker::dev_null_tracker;

const ADDR: Address = 0x40;

fn read(directory: &mut TestDirectory, tile: TileId) {
    directory
        .handle_packet(create_request(ShReq, tile, ADDR, Time(1)))
        .unwrap();
}

fn write(directory: &mut TestDirectory, tile: TileId) {
    directory
        .handle_packet(create_request(ExReq, tile, ADDR, Time(1)))
        .unwrap();
}

fn ack(directory: &mut TestDirectory, kind: shmem_protocols::shmem_msg::ShmemMsgType, tile: TileId) {
    let data = match kind {
        InvRep => None,
        _ => Some(vec![tile as u8; LINE_SIZE_BYTES]),
    };
    directory
        .handle_packet(create_ack(kind, tile, 0, ADDR, data, Time(50)))
        .unwrap();
}

fn sharers(directory: &TestDirectory) -> Vec<TileId> {
    directory
        .entry(ADDR)
        .unwrap()
        .sharers()
        .iter()
        .copied()
        .collect()
}

#[test]
fn read_of_invalid_block_fetches_and_shares() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 4);

    read(&mut directory, 1);

    let sent = sent_messages(&mut directory);
    assert_eq!(sent.len(), 1);
    let (tile, reply, _) = &sent[0];
    assert_eq!(*tile, 1);
    assert_eq!(reply.msg_type(), ShRep);
    assert_eq!(reply.data_length(), LINE_SIZE_BYTES);

    assert_eq!(directory.store().num_reads(), 1);
    assert_eq!(directory.entry(ADDR).unwrap().state(), DirectoryState::Shared);
    assert_eq!(sharers(&directory), vec![1]);
    assert_eq!(directory.num_pending(), 0);
    assert_eq!(directory.metrics().acks, 0);
    directory.check_invariants().unwrap();
}

#[test]
fn write_to_shared_block_waits_for_every_sharer() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 16);
    for tile in [2, 5, 9] {
        read(&mut directory, tile);
    }
    sent_messages(&mut directory);

    write(&mut directory, 1);
    assert_eq!(
        sent_kinds(&mut directory),
        vec![(2, InvReq), (5, InvReq), (9, InvReq)]
    );
    assert_eq!(directory.pending_request(ADDR).unwrap().num_acks_to_recv(), 3);

    ack(&mut directory, InvRep, 2);
    ack(&mut directory, InvRep, 5);
    assert!(directory.network().is_empty());
    assert_eq!(directory.pending_request(ADDR).unwrap().num_acks_to_recv(), 1);
    directory.check_invariants().unwrap();

    ack(&mut directory, InvRep, 9);
    let sent = sent_messages(&mut directory);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 1);
    assert_eq!(sent[0].1.msg_type(), ExRep);
    assert_eq!(sent[0].1.data_length(), LINE_SIZE_BYTES);

    let entry = directory.entry(ADDR).unwrap();
    assert_eq!(entry.owner(), Some(1));
    assert_eq!(directory.num_pending(), 0);
    assert_eq!(directory.metrics().invalidations, 3);
    assert_eq!(directory.metrics().acks, 3);
}

#[test]
fn read_of_owned_block_downgrades_owner() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 8);
    write(&mut directory, 4);
    assert_eq!(sent_kinds(&mut directory), vec![(4, ExRep)]);

    read(&mut directory, 1);
    assert_eq!(sent_kinds(&mut directory), vec![(4, WbReq)]);

    ack(&mut directory, WbRep, 4);
    let sent = sent_messages(&mut directory);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.msg_type(), ShRep);
    assert_eq!(sent[0].1.data(), Some(&[4u8; LINE_SIZE_BYTES][..]));

    assert_eq!(directory.entry(ADDR).unwrap().state(), DirectoryState::Shared);
    assert_eq!(sharers(&directory), vec![1, 4]);
    assert_eq!(directory.store().block(ADDR), Some(&[4u8; LINE_SIZE_BYTES][..]));
    assert_eq!(directory.metrics().downgrades, 1);
    assert_eq!(directory.metrics().dram_writes, 1);
}

#[test]
fn queued_write_starts_when_transaction_completes() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 8);
    write(&mut directory, 4);
    sent_messages(&mut directory);

    write(&mut directory, 1);
    assert_eq!(sent_kinds(&mut directory), vec![(4, FlushReq)]);

    write(&mut directory, 2);
    assert!(directory.network().is_empty());
    let pending = directory.pending_request(ADDR).unwrap();
    assert_eq!(pending.current().msg().requester(), 1);
    assert_eq!(pending.num_waiting_requests(), 1);
    assert_eq!(directory.metrics().queued_requests, 1);

    ack(&mut directory, FlushRep, 4);
    assert_eq!(sent_kinds(&mut directory), vec![(1, ExRep), (1, FlushReq)]);
    let pending = directory.pending_request(ADDR).unwrap();
    assert_eq!(pending.current().msg().requester(), 2);
    assert_eq!(pending.old_state(), DirectoryState::Owned);
    assert_eq!(pending.num_waiting_requests(), 0);

    ack(&mut directory, FlushRep, 1);
    assert_eq!(sent_kinds(&mut directory), vec![(2, ExRep)]);
    assert_eq!(directory.entry(ADDR).unwrap().owner(), Some(2));
    assert_eq!(directory.num_pending(), 0);
}

#[test]
fn ack_without_pending_request_is_rejected() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 4);
    read(&mut directory, 1);

    let stray = create_ack(InvRep, 1, 0, ADDR, None, Time(3));
    assert!(directory.handle_packet(stray).is_err());

    let unknown = create_ack(InvRep, 1, 0, 0x1000, None, Time(3));
    assert!(directory.handle_packet(unknown).is_err());
}

#[test]
fn duplicate_and_mismatched_acks_are_rejected() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 8);
    read(&mut directory, 2);
    read(&mut directory, 3);
    write(&mut directory, 1);

    ack(&mut directory, InvRep, 2);
    let duplicate = create_ack(InvRep, 2, 0, ADDR, None, Time(60));
    assert!(directory.handle_packet(duplicate).is_err());

    let wrong_kind = create_ack(FlushRep, 3, 0, ADDR, Some(vec![0; 64]), Time(60));
    assert!(directory.handle_packet(wrong_kind).is_err());

    let not_awaited = create_ack(InvRep, 6, 0, ADDR, None, Time(60));
    assert!(directory.handle_packet(not_awaited).is_err());
}

#[test]
fn queued_requests_replay_in_arrival_order() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 8);
    write(&mut directory, 4);
    read(&mut directory, 1);
    read(&mut directory, 2);
    read(&mut directory, 3);
    write(&mut directory, 5);
    assert_eq!(sent_kinds(&mut directory), vec![(4, ExRep), (4, WbReq)]);
    assert_eq!(directory.pending_request(ADDR).unwrap().num_waiting_requests(), 3);

    ack(&mut directory, WbRep, 4);
    assert_eq!(
        sent_kinds(&mut directory),
        vec![
            (1, ShRep),
            (2, ShRep),
            (3, ShRep),
            (1, InvReq),
            (2, InvReq),
            (3, InvReq),
            (4, InvReq),
        ]
    );
    let pending = directory.pending_request(ADDR).unwrap();
    assert_eq!(pending.current().msg().requester(), 5);
    assert_eq!(pending.num_acks_to_recv(), 4);
    assert_eq!(pending.num_waiting_requests(), 0);
    directory.check_invariants().unwrap();
}

#[test]
fn sharer_upgrade_gets_no_data() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 4);
    read(&mut directory, 1);
    read(&mut directory, 2);
    sent_messages(&mut directory);

    write(&mut directory, 1);
    assert_eq!(sent_kinds(&mut directory), vec![(2, InvReq)]);
    ack(&mut directory, InvRep, 2);

    let sent = sent_messages(&mut directory);
    assert_eq!(sent[0].1.msg_type(), UpgradeRep);
    assert!(sent[0].1.data().is_none());
    assert_eq!(directory.entry(ADDR).unwrap().owner(), Some(1));
}

#[test]
fn sole_sharer_upgrades_immediately() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 4);
    read(&mut directory, 3);
    sent_messages(&mut directory);

    write(&mut directory, 3);
    assert_eq!(sent_kinds(&mut directory), vec![(3, UpgradeRep)]);
    assert_eq!(directory.num_pending(), 0);
}

#[test]
fn owner_write_back_returns_block_to_memory() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 4);
    write(&mut directory, 3);
    sent_messages(&mut directory);

    let evict = create_write_back(FlushRep, 3, ADDR, Some(vec![0xee; LINE_SIZE_BYTES]), Time(9));
    directory.handle_packet(evict).unwrap();
    assert_eq!(directory.entry(ADDR).unwrap().state(), DirectoryState::Invalid);
    assert_eq!(directory.metrics().write_backs, 1);
    assert!(directory.network().is_empty());

    read(&mut directory, 1);
    let sent = sent_messages(&mut directory);
    assert_eq!(sent[0].1.data(), Some(&[0xee; LINE_SIZE_BYTES][..]));
    assert_eq!(directory.store().num_reads(), 2);
}

#[test]
fn sharer_eviction_removes_it() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 4);
    read(&mut directory, 1);
    read(&mut directory, 2);

    let evict = create_write_back(InvRep, 2, ADDR, None, Time(9));
    directory.handle_packet(evict).unwrap();
    assert_eq!(sharers(&directory), vec![1]);

    let evict = create_write_back(InvRep, 2, ADDR, None, Time(9));
    assert!(directory.handle_packet(evict).is_err());
}

#[test]
fn eviction_racing_a_downgrade() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 8);
    write(&mut directory, 4);
    read(&mut directory, 1);
    sent_messages(&mut directory);

    // The owner evicted before the downgrade reached it
    let evict = create_write_back(FlushRep, 4, ADDR, Some(vec![9; LINE_SIZE_BYTES]), Time(20));
    directory.handle_packet(evict).unwrap();
    assert_eq!(directory.num_pending(), 1);

    let late_ack = create_ack(WbRep, 4, 1, ADDR, None, Time(30));
    directory.handle_packet(late_ack).unwrap();

    let sent = sent_messages(&mut directory);
    assert_eq!(sent[0].1.msg_type(), ShRep);
    assert_eq!(sent[0].1.data(), Some(&[9; LINE_SIZE_BYTES][..]));
    assert_eq!(sharers(&directory), vec![1]);
    directory.check_invariants().unwrap();
}

#[test]
fn rejected_write_back_leaves_memory_alone() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 8);
    read(&mut directory, 1);
    sent_messages(&mut directory);
    let block = directory.entry(ADDR).unwrap().data().map(<[u8]>::to_vec);

    // A sharer cannot return dirty data
    let evict = create_write_back(FlushRep, 1, ADDR, Some(vec![0x77; LINE_SIZE_BYTES]), Time(9));
    assert!(directory.handle_packet(evict).is_err());
    let evict = create_write_back(InvRep, 1, ADDR, Some(vec![0x77; LINE_SIZE_BYTES]), Time(9));
    assert!(directory.handle_packet(evict).is_err());

    // Nor can a tile outside an in-flight transaction
    read(&mut directory, 2);
    write(&mut directory, 3);
    sent_messages(&mut directory);
    let evict = create_write_back(FlushRep, 5, ADDR, Some(vec![0x77; LINE_SIZE_BYTES]), Time(9));
    assert!(directory.handle_packet(evict).is_err());

    assert_eq!(directory.store().num_writes(), 0);
    assert_eq!(directory.metrics().write_backs, 0);
    assert_eq!(directory.metrics().dram_writes, 0);
    assert_eq!(directory.entry(ADDR).unwrap().data().map(<[u8]>::to_vec), block);
    assert_eq!(sharers(&directory), vec![1, 2]);
    assert!(directory.network().is_empty());
}

#[test]
fn requester_eviction_during_upgrade() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 8);
    read(&mut directory, 1);
    read(&mut directory, 2);
    sent_messages(&mut directory);

    write(&mut directory, 1);
    assert_eq!(sent_kinds(&mut directory), vec![(2, InvReq)]);

    // Only the requester and the awaited sharer hold the block
    let evict = create_write_back(InvRep, 3, ADDR, None, Time(9));
    assert!(directory.handle_packet(evict).is_err());

    let evict = create_write_back(InvRep, 1, ADDR, None, Time(9));
    directory.handle_packet(evict).unwrap();
    assert_eq!(sharers(&directory), vec![2]);
    assert_eq!(directory.num_pending(), 1);

    ack(&mut directory, InvRep, 2);
    let sent = sent_messages(&mut directory);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 1);
    assert_eq!(sent[0].1.msg_type(), ExRep);
    assert_eq!(sent[0].1.data_length(), LINE_SIZE_BYTES);
    assert_eq!(directory.entry(ADDR).unwrap().owner(), Some(1));
    directory.check_invariants().unwrap();
}

#[test]
fn requests_only_accepts_requests() {
    let tracker = dev_null_tracker();
    let (_top, mut directory) = create_directory(&tracker, 4);
    let bogus = create_request(ExRep, 1, ADDR, Time(1));
    assert!(directory.handle_packet(bogus).is_err());
}

#[test]
fn reply_times_follow_directory_occupancy() {
    let tracker = dev_null_tracker();
    let top = toplevel(&tracker, "top");
    let config = DirectoryConfig {
        num_tiles: 4,
        access_cycles: 10,
        dram_latency_cycles: 100,
        ..Default::default()
    };
    let mut directory = DramDirectory::new(&top, config, QueueNetwork::new(), DramStore::new());

    directory
        .handle_packet(create_request(ShReq, 1, ADDR, Time(5)))
        .unwrap();
    directory
        .handle_packet(create_request(ShReq, 2, ADDR, Time(20)))
        .unwrap();
    let times: Vec<Time> = directory.network_mut().drain().iter().map(|p| p.time).collect();
    assert_eq!(times, vec![Time(115), Time(125)]);

    directory
        .handle_packet(create_request(ExReq, 3, ADDR, Time(130)))
        .unwrap();
    let times: Vec<Time> = directory.network_mut().drain().iter().map(|p| p.time).collect();
    assert_eq!(times, vec![Time(140), Time(140)]);

    directory
        .handle_packet(create_ack(InvRep, 2, 3, ADDR, None, Time(200)))
        .unwrap();
    directory
        .handle_packet(create_ack(InvRep, 1, 3, ADDR, None, Time(180)))
        .unwrap();
    let reply = directory.network_mut().pop().unwrap();
    assert_eq!(reply.time, Time(210));
}

#[test]
fn messages_are_tracked() {
    let (test_tracker, tracker) = shmem_track::test_init!(10);
    let (_top, mut directory) = create_directory(&tracker, 4);
    check_and_clear(
        &test_tracker,
        &["0: created 10, top, 0 bits", "10: created 11, top::directory, 0 bits"],
    );

    directory
        .handle_packet(create_request(ShReq, 1, ADDR, Time(5)))
        .unwrap();
    check_and_clear(
        &test_tracker,
        &[
            "11: 0 entered",
            "11: set time 5",
            "11:TRACE: received SH_REQ 0x40",
            "11:DEBUG: complete SH_REQ 0x40",
            "11: created 12, SH_REP, 564 bits",
            "11:TRACE: send SH_REP 0x40 requester 1",
            "11: 12 exited",
        ],
    );
    assert_eq!(directory.metrics().modeled_bits_sent, 564);
}
