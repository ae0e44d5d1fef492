//! Randomized interleavings of reads and writes across processors must
//! preserve the coherence invariants and sequential consistency.

use std::collections::HashMap;

use lockstep_coherence::{
    CacheConfig, CoherenceProtocol, CoherentMemorySystem, MemoryConfig, MesiState,
};
use lockstep_types::{ProcessorId, ThreadId};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

#[derive(Clone, Debug)]
enum Op {
    Read { processor: u32, address: u64 },
    Write { processor: u32, address: u64, value: u64 },
}

fn arb_op(num_processors: u32, num_words: u64) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..num_processors, 0..num_words).prop_map(|(processor, address)| Op::Read {
            processor,
            address
        }),
        (0..num_processors, 0..num_words, any::<u64>()).prop_map(
            |(processor, address, value)| Op::Write {
                processor,
                address,
                value
            }
        ),
    ]
}

fn small_system() -> CoherentMemorySystem {
    CoherentMemorySystem::new(MemoryConfig {
        size_words: 64,
        protocol: CoherenceProtocol::Mesi,
        bus_latency: 0,
        // Tiny caches so evictions and conflicts happen often.
        cache: CacheConfig {
            size_words: 16,
            line_words: 4,
            ways: 1,
        },
    })
    .unwrap()
}

fn check_exclusive_ownership(sys: &CoherentMemorySystem, address: u64) -> Result<(), TestCaseError> {
    let states = sys.bus().line_states(address);
    let modified = states
        .values()
        .filter(|&&s| s == MesiState::Modified)
        .count();
    prop_assert!(modified <= 1, "multiple Modified owners at {address:#x}");
    if modified == 1 {
        let coexisting = states
            .values()
            .filter(|&&s| matches!(s, MesiState::Shared | MesiState::Exclusive))
            .count();
        prop_assert_eq!(coexisting, 0, "S/E copies coexist with a Modified owner");
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Interleaved traffic from three processors over a tiny address space:
    /// after every operation, each address has at most one Modified owner
    /// (and no S/E copies beside it), and every read agrees with a simple
    /// flat-memory model of the same operation sequence.
    #[test]
    fn interleavings_preserve_coherence(ops in prop::collection::vec(arb_op(3, 64), 1..64)) {
        let mut sys = small_system();
        // Sequential-consistency oracle: last value written per address.
        let mut model: HashMap<u64, u64> = HashMap::new();

        for (t, op) in ops.iter().enumerate() {
            let t = t as u64;
            match *op {
                Op::Read { processor, address } => {
                    let value = sys
                        .read(address, ProcessorId(processor), ThreadId(processor as u64), t)
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                    let expected = model.get(&address).copied().unwrap_or(0);
                    prop_assert_eq!(value, expected, "stale read at {:#x}", address);
                }
                Op::Write { processor, address, value } => {
                    sys.write(address, value, ProcessorId(processor), ThreadId(processor as u64), t)
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                    model.insert(address, value);
                }
            }
            // The touched line plus a sample of others.
            let touched = match *op {
                Op::Read { address, .. } | Op::Write { address, .. } => address,
            };
            check_exclusive_ownership(&sys, touched)?;
        }

        // After a full flush, main memory agrees with the model everywhere.
        sys.flush_caches().map_err(|e| TestCaseError::fail(e.to_string()))?;
        for (&address, &value) in &model {
            let word = sys
                .memory_word(address)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(word, value, "memory diverged at {:#x}", address);
        }
    }

    /// Read-your-writes per processor, regardless of interleaved traffic
    /// from a second processor.
    #[test]
    fn read_your_writes(
        address in 0u64..64,
        value in any::<u64>(),
        noise in prop::collection::vec(arb_op(1, 64), 0..16),
    ) {
        let mut sys = small_system();

        // Noise runs as processor 1; the probe pair as processor 0.
        for (t, op) in noise.iter().enumerate() {
            let t = t as u64;
            match *op {
                Op::Read { address, .. } => {
                    sys.read(address, ProcessorId(1), ThreadId(1), t)
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                }
                Op::Write { address, value, .. } => {
                    sys.write(address, value, ProcessorId(1), ThreadId(1), t)
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                }
            }
        }

        sys.write(address, value, ProcessorId(0), ThreadId(0), 100)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let read_back = sys
            .read(address, ProcessorId(0), ThreadId(0), 101)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(read_back, value);
    }
}
