//! End-to-end scheduling tests on the Wasmtime engine.
//!
//! Guests are inline WAT, compiled by the runner built with
//! `fuelslice_host::create_runner`, so host functions are linked exactly as
//! in the binary.

use std::sync::atomic::AtomicBool;

use fuelslice_common::{Disposition, RuntimeConfig, SchedulerConfig, Value};
use fuelslice_core::{InstanceRunner, LogLevel, SimEngine};
use fuelslice_host::create_runner;
use fuelslice_sched::{
    EntryPoint, FuelManager, FuelPolicy, FuelReport, Scheduler, SliceOutcome, StopReason,
};

/// Counts from zero to its argument and returns it.
const SPIN_WAT: &str = r#"
    (module
        (func (export "main") (param $n i32) (result i32)
            (local $i i32)
            (block $done
                (loop $next
                    (br_if $done (i32.ge_u (local.get $i) (local.get $n)))
                    (local.set $i (i32.add (local.get $i) (i32.const 1)))
                    (br $next)
                )
            )
            (local.get $i)
        )
    )
"#;

const LOG_WAT: &str = r#"
    (module
        (import "env" "log" (func $log (param i32 i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "partition says hi")
        (func (export "main") (result i32)
            (call $log (i32.const 1) (i32.const 0) (i32.const 17))
            (i32.const 42)
        )
    )
"#;

fn scheduler(scheduler_config: SchedulerConfig) -> Scheduler<InstanceRunner> {
    let config = RuntimeConfig {
        scheduler: scheduler_config,
        ..RuntimeConfig::default()
    };
    let runner = create_runner(&config).unwrap();
    Scheduler::new(runner, &config.scheduler).unwrap()
}

fn spin_entry(n: i32) -> EntryPoint {
    EntryPoint::new("main", vec![Value::I32(n)])
}

/// Run partition `id` until it stops yielding. Returns the final outcome and
/// the number of yields.
fn run_to_end(scheduler: &mut Scheduler<InstanceRunner>, id: usize) -> (SliceOutcome, u32) {
    let mut yields = 0;
    loop {
        match scheduler.run_slice(id).unwrap() {
            SliceOutcome::Yielded => yields += 1,
            outcome => return (outcome, yields),
        }
    }
}

// ============================================================================
// Test: Yielding vs. Uninterrupted Partitions
// ============================================================================

#[test]
fn test_fixed_quantum_yields_and_none_does_not() {
    let mut scheduler = scheduler(SchedulerConfig::default());

    scheduler
        .load_partition(0, SPIN_WAT.as_bytes(), spin_entry(10_000))
        .unwrap();
    scheduler
        .load_partition(1, SPIN_WAT.as_bytes(), spin_entry(10_000))
        .unwrap();

    scheduler
        .inject_fuel(0, FuelManager::new(10_000_000, FuelPolicy::FixedQuantum(100)))
        .unwrap();
    scheduler
        .inject_fuel(1, FuelManager::new(10_000_000, FuelPolicy::None))
        .unwrap();

    let (outcome, yields) = run_to_end(&mut scheduler, 0);
    assert_eq!(outcome, SliceOutcome::Completed(vec![Value::I32(10_000)]));
    assert!(yields > 10, "expected many yields, got {yields}");

    let (outcome, yields) = run_to_end(&mut scheduler, 1);
    assert_eq!(outcome, SliceOutcome::Completed(vec![Value::I32(10_000)]));
    assert_eq!(yields, 0);

    let report = scheduler.fuel_report(0).unwrap().unwrap();
    assert!(report.used > 10_000, "expected fuel use, got {}", report.used);
    assert_eq!(report.injected, 10_000_000);
}

#[test]
fn test_uninterrupted_partition_exhausts_fuel_without_yielding() {
    let mut scheduler = scheduler(SchedulerConfig::default());
    scheduler
        .load_partition(0, SPIN_WAT.as_bytes(), spin_entry(1_000_000))
        .unwrap();
    scheduler
        .inject_fuel(0, FuelManager::new(1_000, FuelPolicy::None))
        .unwrap();

    match scheduler.run_slice(0).unwrap() {
        SliceOutcome::Failed(failure) => assert!(failure.is_out_of_fuel()),
        other => panic!("expected fuel exhaustion, got {other:?}"),
    }
    assert!(!scheduler.partition(0).unwrap().is_in_flight());
}

#[test]
fn test_partition_without_injection_has_no_fuel() {
    let mut scheduler = scheduler(SchedulerConfig::default());
    scheduler
        .load_partition(0, SPIN_WAT.as_bytes(), spin_entry(10_000))
        .unwrap();

    // Instantiation fuel is not carried over into the budget
    assert_eq!(
        scheduler.fuel_report(0).unwrap(),
        Some(FuelReport {
            remaining: 0,
            injected: 0,
            used: 0,
        })
    );

    let wasmtime_outcome = scheduler.run_slice(0).unwrap();
    match &wasmtime_outcome {
        SliceOutcome::Failed(failure) => assert!(failure.is_out_of_fuel()),
        other => panic!("expected fuel exhaustion, got {other:?}"),
    }

    let mut sim = Scheduler::new(SimEngine::new(), &SchedulerConfig::default()).unwrap();
    sim.load_partition(0, b"sim work=10000 result=10000", EntryPoint::default())
        .unwrap();
    assert_eq!(sim.run_slice(0).unwrap(), wasmtime_outcome);
}

#[test]
fn test_fuel_hidden_while_call_in_flight() {
    let mut scheduler = scheduler(SchedulerConfig::default());
    scheduler
        .load_partition(0, SPIN_WAT.as_bytes(), spin_entry(100_000))
        .unwrap();
    scheduler
        .inject_fuel(0, FuelManager::new(10_000_000, FuelPolicy::FixedQuantum(50)))
        .unwrap();

    assert!(scheduler.run_slice(0).unwrap().is_yielded());
    assert!(scheduler.fuel_report(0).unwrap().is_none());
    assert!(scheduler.partition(0).unwrap().context().is_none());
}

// ============================================================================
// Test: Scheduling Loop
// ============================================================================

#[test]
fn test_loop_with_fixed_quantum_and_uninterrupted_partitions() {
    let mut scheduler = scheduler(SchedulerConfig {
        on_completed: Disposition::Rotate,
        ..SchedulerConfig::default()
    });

    scheduler
        .load_partition(0, SPIN_WAT.as_bytes(), spin_entry(500))
        .unwrap();
    scheduler
        .inject_fuel(0, FuelManager::new(10_000_000, FuelPolicy::FixedQuantum(100)))
        .unwrap();
    scheduler
        .load_partition(1, SPIN_WAT.as_bytes(), spin_entry(1_000))
        .unwrap();
    scheduler
        .inject_fuel(1, FuelManager::new(10_000_000, FuelPolicy::None))
        .unwrap();

    let summary = scheduler.run(Some(400), &AtomicBool::new(false));
    assert_eq!(summary.stop_reason, StopReason::CycleLimit);
    assert_eq!(summary.cycles, 400);
    assert_eq!(summary.failures, 0);

    let a = scheduler.partition(0).unwrap().stats();
    assert_eq!(a.slices, 200);
    assert!(a.yields >= 10, "expected several yields, got {}", a.yields);
    assert!(a.completions >= 1);
    assert_eq!(a.failures, 0);

    let b = scheduler.partition(1).unwrap().stats();
    assert_eq!(b.slices, 200);
    assert_eq!(b.yields, 0);
    assert_eq!(b.completions, 200);
}

#[test]
fn test_loop_interleaves_and_retires() {
    let mut scheduler = scheduler(SchedulerConfig {
        on_completed: Disposition::Retire,
        on_failed: Disposition::Retire,
        ..SchedulerConfig::default()
    });

    for id in 0..2 {
        scheduler
            .load_partition(id, SPIN_WAT.as_bytes(), spin_entry(5_000))
            .unwrap();
        scheduler
            .inject_fuel(id, FuelManager::new(10_000_000, FuelPolicy::FixedQuantum(200)))
            .unwrap();
    }

    let summary = scheduler.run(Some(100_000), &AtomicBool::new(false));

    assert_eq!(summary.stop_reason, StopReason::Idle);
    assert_eq!(summary.completions, 2);
    assert_eq!(summary.failures, 0);
    assert!(summary.yields > 2);

    for id in 0..2 {
        let partition = scheduler.partition(id).unwrap();
        assert!(partition.is_retired());
        assert_eq!(partition.pending_result(), Some(&[Value::I32(5_000)][..]));
    }

    assert_eq!(scheduler.shutdown(), 2);
}

#[test]
fn test_trap_and_bad_module() {
    let mut scheduler = scheduler(SchedulerConfig::default());
    scheduler
        .load_partition(
            0,
            br#"(module (func (export "main") unreachable))"#,
            EntryPoint::new("main", vec![]),
        )
        .unwrap();
    scheduler
        .inject_fuel(0, FuelManager::new(1_000, FuelPolicy::None))
        .unwrap();

    let err = scheduler
        .load_partition(1, b"\0asm\x01\0\0\0garbage", EntryPoint::default())
        .unwrap_err();
    assert_eq!(err.partition_id(), Some(1));

    match scheduler.run_slice(0).unwrap() {
        SliceOutcome::Failed(failure) => assert!(!failure.is_out_of_fuel()),
        other => panic!("expected trap, got {other:?}"),
    }

    assert_eq!(scheduler.shutdown(), 1);
}

// ============================================================================
// Test: Host Function Logging
// ============================================================================

#[test]
fn test_guest_log_recorded_in_partition() {
    let mut scheduler = scheduler(SchedulerConfig::default());
    scheduler
        .load_partition(3, LOG_WAT.as_bytes(), EntryPoint::new("main", vec![]))
        .unwrap();
    scheduler
        .inject_fuel(3, FuelManager::new(10_000, FuelPolicy::None))
        .unwrap();

    assert_eq!(
        scheduler.run_slice(3).unwrap(),
        SliceOutcome::Completed(vec![Value::I32(42)])
    );

    let store = scheduler.partition(3).unwrap().context().unwrap();
    let logs = &store.data().logs;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "partition says hi");
    assert_eq!(logs[0].level, LogLevel::Info);
    assert_eq!(store.data().partition_id, 3);
}
