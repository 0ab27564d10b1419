//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the engine produces identical
//! results given identical inputs.
//!
//! # Testing Strategy
//!
//! A room's engine must replay exactly after save/load, and two engines fed
//! the same commands must agree. Sources of non-determinism include:
//!
//! - **Floating-point math**: Different CPUs can produce different results.
//!   We use fixed-point arithmetic via [`rts_core::math::Fixed`] throughout.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Entities live in id-ordered maps.
//!
//! - **System randomness**: Map generation uses a seeded generator.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: Individual state machines (movement, combat, etc.)
//! 2. **Property tests**: Random command streams must still replay exactly
//! 3. **Integration tests**: Full scenarios are reproducible
//! 4. **Parallel tests**: Running N engines in parallel all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use rts_core::simulation::{Engine, TICK_DT};

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for deterministic simulation).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the simulation was deterministic, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the simulation produced different hashes across runs.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a simulation multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the simulation
/// * `ticks` - Number of ticks to simulate per run
/// * `setup` - Function to create initial simulation state
/// * `step` - Function to advance simulation by one tick
/// * `hash` - Function to compute state hash
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Run the same engine setup twice and compare final state hashes.
pub fn verify_engine_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> Engine,
{
    verify_determinism(
        2,
        num_ticks,
        &setup_fn,
        |engine| {
            engine.update(TICK_DT);
        },
        Engine::state_hash,
    )
    .is_deterministic
}

/// Run N engines on scoped threads and collect their final hashes.
///
/// # Panics
///
/// Panics if a worker thread panics.
pub fn run_parallel_engines<F>(setup_fn: F, num_engines: usize, num_ticks: u64) -> DeterminismResult
where
    F: Fn() -> Engine + Sync,
{
    let hashes: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..num_engines)
            .map(|_| {
                s.spawn(|| {
                    let mut engine = setup_fn();
                    for _ in 0..num_ticks {
                        engine.update(TICK_DT);
                    }
                    engine.state_hash()
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    DeterminismResult {
        is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
        hashes,
        ticks: num_ticks,
    }
}

/// Compare two engine runs tick-by-tick, finding first divergence.
///
/// # Returns
///
/// `None` if the runs agree, `Some(tick)` if they diverge at that tick.
pub fn find_first_divergence<F>(setup_fn: F, num_ticks: u64) -> Option<u64>
where
    F: Fn() -> Engine,
{
    let mut a = setup_fn();
    let mut b = setup_fn();

    if a.state_hash() != b.state_hash() {
        return Some(0);
    }

    for tick in 1..=num_ticks {
        a.update(TICK_DT);
        b.update(TICK_DT);

        if a.state_hash() != b.state_hash() {
            return Some(tick);
        }
    }

    None
}

/// Snapshot `engine` through JSON, restore it, then advance both copies by
/// `continue_ticks` and check they still agree.
///
/// This is the save/load guarantee rooms rely on.
pub fn verify_snapshot_round_trip(engine: &Engine, continue_ticks: u64) -> bool {
    let Ok(json) = engine.get_snapshot(false).to_json() else {
        return false;
    };
    let Ok(snapshot) = rts_core::snapshot::EngineSnapshot::from_json(&json) else {
        return false;
    };
    let Ok(mut restored) = Engine::from_snapshot(&snapshot) else {
        return false;
    };

    let mut original = engine.clone();
    for _ in 0..continue_ticks {
        original.update(TICK_DT);
        restored.update(TICK_DT);
    }

    original.state_hash() == restored.state_hash()
        && original.get_snapshot(false) == restored.get_snapshot(false)
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for determinism testing.
///
/// These strategies generate random but reproducible command streams for
/// property-based testing of the engine.
pub mod strategies {
    use proptest::prelude::*;
    use rts_core::commands::Command;
    use rts_core::components::{BuildingId, UnitId};
    use rts_core::data::{BuildingType, UnitType};

    /// Unit ids in a small range so generated commands hit real entities
    /// often and missing ones sometimes.
    pub fn arb_unit_id() -> impl Strategy<Value = UnitId> {
        (1u32..8).prop_map(UnitId)
    }

    /// Building ids in a small range.
    pub fn arb_building_id() -> impl Strategy<Value = BuildingId> {
        (1u32..5).prop_map(BuildingId)
    }

    /// Tile coordinates, partly out of bounds for a 32×32 map.
    pub fn arb_coord() -> impl Strategy<Value = i32> {
        -4i32..36
    }

    /// Any unit type.
    pub fn arb_unit_type() -> impl Strategy<Value = UnitType> {
        proptest::sample::select(UnitType::ALL.to_vec())
    }

    /// Any building type.
    pub fn arb_building_type() -> impl Strategy<Value = BuildingType> {
        proptest::sample::select(BuildingType::ALL.to_vec())
    }

    /// Any command, valid or not.
    pub fn arb_command() -> impl Strategy<Value = Command> {
        let selection = || proptest::collection::vec(arb_unit_id(), 0..3);
        prop_oneof![
            (selection(), arb_coord(), arb_coord()).prop_map(|(unit_ids, x, y)| Command::Move { unit_ids, x, y }),
            (
                selection(),
                proptest::option::of(arb_unit_id()),
                proptest::option::of(arb_building_id())
            )
                .prop_map(|(unit_ids, target_unit_id, target_building_id)| Command::Attack {
                    unit_ids,
                    target_unit_id,
                    target_building_id,
                }),
            (selection(), arb_coord(), arb_coord()).prop_map(|(unit_ids, x, y)| Command::Harvest { unit_ids, x, y }),
            (arb_unit_id(), arb_building_type(), arb_coord(), arb_coord()).prop_map(
                |(unit_id, building_type, x, y)| Command::Build {
                    unit_id,
                    building_type,
                    x,
                    y,
                }
            ),
            (arb_unit_id(), arb_building_id())
                .prop_map(|(unit_id, building_id)| Command::BuildResume { unit_id, building_id }),
            (arb_building_id(), arb_unit_type()).prop_map(|(building_id, unit_type)| Command::Train {
                building_id,
                unit_type
            }),
            selection().prop_map(|unit_ids| Command::Stop { unit_ids }),
        ]
    }

    /// Generate a sequence of commands.
    pub fn arb_command_sequence(max_len: usize) -> impl Strategy<Value = Vec<Command>> {
        proptest::collection::vec(arb_command(), 0..max_len)
    }
}
