//! Integration scenarios across the bus, the caches, and the memory system.

use lockstep_coherence::{
    AccessFilter, BusOperation, BusRequest, CacheConfig, CoherenceProtocol, CoherentMemorySystem,
    MemoryConfig, MesiState, TransactionFilter, TransactionPhase,
};
use lockstep_types::{ProcessorId, ThreadId};
use pretty_assertions::assert_eq;

const P0: ProcessorId = ProcessorId(0);
const P1: ProcessorId = ProcessorId(1);
const P2: ProcessorId = ProcessorId(2);
const T0: ThreadId = ThreadId(0);
const T1: ThreadId = ThreadId(1);

fn system(bus_latency: u32) -> CoherentMemorySystem {
    CoherentMemorySystem::new(MemoryConfig {
        size_words: 1024,
        protocol: CoherenceProtocol::Mesi,
        bus_latency,
        cache: CacheConfig {
            size_words: 128,
            line_words: 8,
            ways: 2,
        },
    })
    .unwrap()
}

/// Every cache state combination for one address must satisfy: at most one
/// Modified owner, and no Shared/Exclusive copies alongside it.
fn assert_exclusive_ownership(sys: &CoherentMemorySystem, address: u64) {
    let states = sys.bus().line_states(address);
    let modified = states
        .values()
        .filter(|&&s| s == MesiState::Modified)
        .count();
    assert!(modified <= 1, "two Modified owners for {address:#x}");
    if modified == 1 {
        let others = states
            .values()
            .filter(|&&s| s == MesiState::Shared || s == MesiState::Exclusive)
            .count();
        assert_eq!(
            others, 0,
            "Modified owner coexists with S/E copies for {address:#x}"
        );
    }
}

#[test]
fn write_read_round_trip_with_prior_sharers() {
    let mut sys = system(1);

    // Several processors cache the line first.
    sys.read(0x40, P0, T0, 0).unwrap();
    sys.read(0x40, P1, T1, 1).unwrap();
    sys.read(0x40, P2, T1, 2).unwrap();

    // A write by P0 must still read back its own value.
    sys.write(0x40, 77, P0, T0, 3).unwrap();
    assert_eq!(sys.read(0x40, P0, T0, 4).unwrap(), 77);
    assert_exclusive_ownership(&sys, 0x40);
}

#[test]
fn coherence_cross_check() {
    let mut sys = system(1);

    // A writes v1 to X: Modified on A.
    sys.write(0x100, 9001, P0, T0, 0).unwrap();
    assert_eq!(
        sys.bus().cache(P0).unwrap().state_of(0x100),
        MesiState::Modified
    );

    // B reads X: observes v1 (forwarded, not stale memory); A downgrades to
    // Shared and B gains a valid Shared copy.
    assert_eq!(sys.read(0x100, P1, T1, 1).unwrap(), 9001);
    assert_eq!(
        sys.bus().cache(P0).unwrap().state_of(0x100),
        MesiState::Shared
    );
    assert_eq!(
        sys.bus().cache(P1).unwrap().state_of(0x100),
        MesiState::Shared
    );
    assert_exclusive_ownership(&sys, 0x100);
}

#[test]
fn ping_pong_writes_keep_single_owner() {
    let mut sys = system(1);

    for round in 0..4u64 {
        sys.write(0x80, round, P0, T0, round * 2).unwrap();
        assert_exclusive_ownership(&sys, 0x80);
        sys.write(0x80, round + 100, P1, T1, round * 2 + 1).unwrap();
        assert_exclusive_ownership(&sys, 0x80);
    }

    // Last writer wins.
    assert_eq!(sys.read(0x80, P2, T0, 100).unwrap(), 103);
}

#[test]
fn flush_then_cold_read_sees_written_values() {
    let mut sys = system(1);

    sys.write(0x10, 1234, P0, T0, 0).unwrap();
    sys.flush_caches().unwrap();
    assert_eq!(sys.memory_word(0x10).unwrap(), 1234);

    // A different processor's cold read is served correctly whether the data
    // comes forwarded or from memory.
    assert_eq!(sys.read(0x10, P1, T1, 1).unwrap(), 1234);
}

#[test]
fn driver_driven_bus_tick_latency_scenario() {
    // The queued path, as the external tick loop uses it: latency 2, one
    // pending ReadShared, no other caches hold the line.
    let mut sys = system(2);
    sys.create_cache(P0).unwrap();

    let (bus, memory) = sys.bus_and_memory_mut();
    memory.write_line(0x100, &[5, 6, 7, 8, 9, 10, 11, 12]).unwrap();
    bus.request(BusRequest::new(BusOperation::ReadShared, 0x100, P0, T0).unwrap());

    assert!(bus.tick(0, memory).unwrap().is_empty());
    assert!(bus.tick(1, memory).unwrap().is_empty());

    let completed = bus.tick(2, memory).unwrap();
    assert_eq!(completed.len(), 1);
    let fill = match completed[0].result.as_ref() {
        Some(lockstep_coherence::BusResponse::Read(fill)) => fill,
        other => panic!("unexpected bus response: {other:?}"),
    };
    assert_eq!(fill.data, vec![5, 6, 7, 8, 9, 10, 11, 12]);
    assert_eq!(fill.state, MesiState::Exclusive);

    // The log carries a started and a completed entry for the request.
    let log = bus.transaction_log(&TransactionFilter::default());
    let phases: Vec<TransactionPhase> = log.iter().map(|e| e.phase).collect();
    assert_eq!(
        phases,
        vec![TransactionPhase::Started, TransactionPhase::Completed]
    );
}

#[test]
fn access_history_filters_by_thread_and_time() {
    let mut sys = system(1);

    sys.read(0, P0, T0, 0).unwrap();
    sys.write(0, 5, P0, T0, 1).unwrap();
    sys.read(8, P1, T1, 2).unwrap();

    let t0_only = sys.get_access_history(&AccessFilter {
        thread: Some(T0),
        ..Default::default()
    });
    assert_eq!(t0_only.len(), 2);

    let late = sys.get_access_history(&AccessFilter {
        start_time: Some(2),
        ..Default::default()
    });
    assert_eq!(late.len(), 1);
    assert_eq!(late[0].address, 8);
}

#[test]
fn pattern_analysis_reflects_locality() {
    let mut sys = system(1);

    // Sequential sweep within two lines, then heavy reuse of one address.
    for (t, addr) in (0..8u64).enumerate() {
        sys.read(addr, P0, T0, t as u64).unwrap();
    }
    for t in 8..16u64 {
        sys.read(0, P0, T0, t).unwrap();
    }

    let analysis = sys.analyze_access_patterns(&AccessFilter::default());
    assert_eq!(analysis.total_accesses, 16);
    assert_eq!(analysis.reads, 16);
    assert!(analysis.hit_rate > 80.0);
    assert!(analysis.spatial_locality_score > 50.0);
    assert!(analysis.temporal_locality_score > 0.0);
    assert_eq!(analysis.most_common_addresses[0].0, 0);
}
