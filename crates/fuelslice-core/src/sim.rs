//! Deterministic simulated execution engine.
//!
//! [`SimEngine`] implements [`ExecutionEngine`] without running any guest
//! code. A "module" is a one-line program description; a call consumes one
//! fuel unit per unit of simulated work and is suspended every
//! `yield_interval` units, exactly like the Wasmtime fuel-yield behavior.
//!
//! # Program format
//!
//! ```text
//! sim export=main work=1000 result=55
//! ```
//!
//! | key           | meaning                                          | default |
//! |---------------|--------------------------------------------------|---------|
//! | `export`      | name of the only exported function               | `main`  |
//! | `work`        | fuel units the call consumes before returning    | `0`     |
//! | `result`      | `i32` returned on completion                     | `0`     |
//! | `trap_at`     | trap once this much work has been done           | none    |
//! | `instantiate` | `trap` makes instantiation fail                  | `ok`    |

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::adapter::{CallProgress, ExecutionEngine};
use fuelslice_common::{CallFault, EngineError, PartitionId, Value};

/// A parsed simulated program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimProgram {
    /// Exported function name.
    pub export: String,
    /// Fuel units consumed by one call.
    pub work: u64,
    /// Value returned on completion.
    pub result: i32,
    /// Work done when the call traps.
    pub trap_at: Option<u64>,
    /// Instantiation traps.
    pub trap_on_instantiate: bool,
}

impl SimProgram {
    /// Parse a program description.
    ///
    /// # Errors
    ///
    /// Returns a compile error on a missing `sim` header, an unknown key, or a
    /// malformed number.
    pub fn parse(source: &str) -> Result<Self, EngineError> {
        let mut tokens = source.split_whitespace();
        if tokens.next() != Some("sim") {
            return Err(EngineError::compile("Invalid sim program: missing 'sim' header"));
        }

        let mut program = Self {
            export: "main".to_string(),
            work: 0,
            result: 0,
            trap_at: None,
            trap_on_instantiate: false,
        };

        for token in tokens {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| EngineError::compile(format!("Malformed token '{token}'")))?;

            match key {
                "export" => program.export = value.to_string(),
                "work" => program.work = parse_number(key, value)?,
                "result" => program.result = parse_number(key, value)?,
                "trap_at" => program.trap_at = Some(parse_number(key, value)?),
                "instantiate" => program.trap_on_instantiate = value == "trap",
                _ => return Err(EngineError::compile(format!("Unknown key '{key}'"))),
            }
        }

        Ok(program)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, EngineError> {
    value
        .parse()
        .map_err(|_| EngineError::compile(format!("Invalid value for '{key}': {value}")))
}

/// Execution context of a simulated partition.
///
/// Dropping the context counts as releasing it.
#[derive(Debug)]
pub struct SimContext {
    partition_id: PartitionId,
    fuel: u64,
    yield_interval: Option<u64>,
    counters: Arc<Counters>,
}

impl Drop for SimContext {
    fn drop(&mut self) {
        self.counters.contexts_released.fetch_add(1, Ordering::Relaxed);
        trace!(partition_id = self.partition_id, "Simulated context released");
    }
}

/// A simulated module instance.
#[derive(Debug, Clone)]
pub struct SimInstance {
    program: Arc<SimProgram>,
}

/// A simulated callable export.
#[derive(Debug, Clone)]
pub struct SimFunc {
    program: Arc<SimProgram>,
}

/// A simulated in-flight call.
#[derive(Debug)]
pub struct SimCall {
    context: SimContext,
    program: Arc<SimProgram>,
    progress: u64,
}

impl SimCall {
    /// Work done so far.
    pub fn progress(&self) -> u64 {
        self.progress
    }
}

#[derive(Debug, Default)]
struct Counters {
    modules_compiled: AtomicU64,
    contexts_created: AtomicU64,
    contexts_released: AtomicU64,
    calls_started: AtomicU64,
    polls: AtomicU64,
}

/// Deterministic engine for exercising the scheduler without Wasmtime.
///
/// Counts compiled modules, contexts, started calls and polls so tests can
/// check that no call is started twice and every context is accounted for.
/// Clones share the counters, so a clone kept aside still observes an engine
/// that was moved into a scheduler and shut down.
#[derive(Debug, Clone, Default)]
pub struct SimEngine {
    counters: Arc<Counters>,
}

impl SimEngine {
    /// Create a new simulated engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of modules compiled.
    pub fn modules_compiled(&self) -> u64 {
        self.counters.modules_compiled.load(Ordering::Relaxed)
    }

    /// Number of contexts created.
    pub fn contexts_created(&self) -> u64 {
        self.counters.contexts_created.load(Ordering::Relaxed)
    }

    /// Number of contexts dropped, including those owned by an in-flight
    /// call when it was dropped.
    pub fn contexts_released(&self) -> u64 {
        self.counters.contexts_released.load(Ordering::Relaxed)
    }

    /// Number of calls started.
    pub fn calls_started(&self) -> u64 {
        self.counters.calls_started.load(Ordering::Relaxed)
    }

    /// Number of polls performed.
    pub fn polls(&self) -> u64 {
        self.counters.polls.load(Ordering::Relaxed)
    }
}

impl ExecutionEngine for SimEngine {
    type Module = Arc<SimProgram>;
    type Context = SimContext;
    type Instance = SimInstance;
    type Callable = SimFunc;
    type Call = SimCall;

    fn compile(&self, bytes: &[u8]) -> Result<Self::Module, EngineError> {
        let source = std::str::from_utf8(bytes)
            .map_err(|_| EngineError::compile("Invalid sim program: not UTF-8"))?;
        let program = SimProgram::parse(source)?;

        self.counters.modules_compiled.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(program))
    }

    fn new_context(&self, partition_id: PartitionId) -> Result<SimContext, EngineError> {
        self.counters.contexts_created.fetch_add(1, Ordering::Relaxed);
        Ok(SimContext {
            partition_id,
            fuel: 0,
            yield_interval: None,
            counters: Arc::clone(&self.counters),
        })
    }

    fn instantiate(
        &self,
        _context: &mut SimContext,
        module: &Self::Module,
    ) -> Result<SimInstance, EngineError> {
        if module.trap_on_instantiate {
            return Err(EngineError::instantiate("start function trapped"));
        }

        Ok(SimInstance {
            program: Arc::clone(module),
        })
    }

    fn set_fuel(&self, context: &mut SimContext, amount: u64) -> Result<(), EngineError> {
        context.fuel = amount;
        Ok(())
    }

    fn set_yield_interval(
        &self,
        context: &mut SimContext,
        interval: Option<u64>,
    ) -> Result<(), EngineError> {
        context.yield_interval = interval.filter(|n| *n > 0);
        Ok(())
    }

    fn fuel_remaining(&self, context: &SimContext) -> u64 {
        context.fuel
    }

    fn lookup_export(
        &self,
        _context: &mut SimContext,
        instance: &SimInstance,
        name: &str,
    ) -> Option<SimFunc> {
        (instance.program.export == name).then(|| SimFunc {
            program: Arc::clone(&instance.program),
        })
    }

    fn start_call(&self, context: SimContext, callable: SimFunc, _args: &[Value]) -> SimCall {
        self.counters.calls_started.fetch_add(1, Ordering::Relaxed);
        SimCall {
            context,
            program: callable.program,
            progress: 0,
        }
    }

    fn poll(&self, mut call: SimCall) -> CallProgress<SimCall, SimContext> {
        self.counters.polls.fetch_add(1, Ordering::Relaxed);

        let program = &call.program;
        let mut step = (program.work - call.progress)
            .min(call.context.fuel)
            .min(call.context.yield_interval.unwrap_or(u64::MAX));
        if let Some(trap_at) = program.trap_at {
            step = step.min(trap_at.saturating_sub(call.progress));
        }

        call.progress += step;
        call.context.fuel -= step;

        trace!(
            partition_id = call.context.partition_id,
            step,
            progress = call.progress,
            fuel = call.context.fuel,
            "Simulated poll"
        );

        let outcome = if program.trap_at.is_some_and(|t| call.progress >= t) {
            Err(CallFault::Trap {
                message: "simulated trap".to_string(),
                code: Some("UnreachableCodeReached".to_string()),
            })
        } else if call.progress >= program.work {
            Ok(vec![Value::I32(program.result)])
        } else if call.context.fuel == 0 {
            Err(CallFault::OutOfFuel)
        } else {
            return CallProgress::Suspended(call);
        };

        CallProgress::Finished {
            context: call.context,
            outcome,
        }
    }

    fn call_fuel_remaining(&self, call: &SimCall) -> Option<u64> {
        Some(call.context.fuel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(engine: &SimEngine, source: &str, fuel: u64, interval: Option<u64>) -> SimCall {
        let module = engine.compile(source.as_bytes()).unwrap();
        let mut context = engine.new_context(0).unwrap();
        let instance = engine.instantiate(&mut context, &module).unwrap();
        engine.set_fuel(&mut context, fuel).unwrap();
        engine.set_yield_interval(&mut context, interval).unwrap();
        let func = engine
            .lookup_export(&mut context, &instance, &module.export)
            .unwrap();
        engine.start_call(context, func, &[])
    }

    #[test]
    fn test_parse_program() {
        let program = SimProgram::parse("sim export=fib work=250 result=55 trap_at=100").unwrap();

        assert_eq!(program.export, "fib");
        assert_eq!(program.work, 250);
        assert_eq!(program.result, 55);
        assert_eq!(program.trap_at, Some(100));
        assert!(!program.trap_on_instantiate);
    }

    #[test]
    fn test_parse_rejects_bad_programs() {
        assert!(SimProgram::parse("\0asm").is_err());
        assert!(SimProgram::parse("sim bogus=1").is_err());
        assert!(SimProgram::parse("sim work=lots").is_err());
        assert!(SimProgram::parse("sim work").is_err());
    }

    #[test]
    fn test_completes_in_one_poll_without_interval() {
        let engine = SimEngine::new();
        let call = start(&engine, "sim work=1000 result=7", 5_000, None);

        match engine.poll(call) {
            CallProgress::Finished { context, outcome } => {
                assert_eq!(outcome, Ok(vec![Value::I32(7)]));
                assert_eq!(engine.fuel_remaining(&context), 4_000);
            }
            CallProgress::Suspended(_) => panic!("expected completion"),
        }
    }

    #[test]
    fn test_suspends_every_interval() {
        let engine = SimEngine::new();
        let mut call = start(&engine, "sim work=1000", 5_000, Some(100));
        let mut suspensions = 0;

        loop {
            match engine.poll(call) {
                CallProgress::Suspended(next) => {
                    suspensions += 1;
                    assert_eq!(next.progress(), suspensions * 100);
                    call = next;
                }
                CallProgress::Finished { outcome, .. } => {
                    assert!(outcome.is_ok());
                    break;
                }
            }
        }

        assert_eq!(suspensions, 9);
        assert_eq!(engine.calls_started(), 1);
        assert_eq!(engine.polls(), 10);
    }

    #[test]
    fn test_runs_out_of_fuel() {
        let engine = SimEngine::new();
        let call = start(&engine, "sim work=1000", 300, None);

        match engine.poll(call) {
            CallProgress::Finished { outcome, context } => {
                assert_eq!(outcome, Err(CallFault::OutOfFuel));
                assert_eq!(engine.fuel_remaining(&context), 0);
            }
            CallProgress::Suspended(_) => panic!("expected fuel exhaustion"),
        }
    }

    #[test]
    fn test_zero_fuel_fails_immediately() {
        let engine = SimEngine::new();
        let call = start(&engine, "sim work=10", 0, Some(100));

        assert!(matches!(
            engine.poll(call),
            CallProgress::Finished {
                outcome: Err(CallFault::OutOfFuel),
                ..
            }
        ));
    }

    #[test]
    fn test_traps_at_configured_progress() {
        let engine = SimEngine::new();
        let call = start(&engine, "sim work=1000 trap_at=150", 5_000, Some(100));

        let CallProgress::Suspended(call) = engine.poll(call) else {
            panic!("expected suspension before the trap");
        };
        assert!(matches!(
            engine.poll(call),
            CallProgress::Finished {
                outcome: Err(CallFault::Trap { .. }),
                ..
            }
        ));
    }

    #[test]
    fn test_contexts_released_once() {
        let engine = SimEngine::new();

        let call = start(&engine, "sim work=1000", 5_000, Some(100));
        let CallProgress::Suspended(call) = engine.poll(call) else {
            panic!("expected suspension");
        };
        assert_eq!(engine.contexts_released(), 0);

        // Dropping an in-flight call releases the context it owns
        drop(call);
        assert_eq!(engine.contexts_released(), 1);

        let context = engine.new_context(1).unwrap();
        drop(context);
        assert_eq!(engine.contexts_created(), 2);
        assert_eq!(engine.contexts_released(), 2);
    }

    #[test]
    fn test_instantiate_trap_and_missing_export() {
        let engine = SimEngine::new();

        let module = engine.compile(b"sim instantiate=trap").unwrap();
        let mut context = engine.new_context(1).unwrap();
        assert!(engine.instantiate(&mut context, &module).is_err());

        let module = engine.compile(b"sim export=run").unwrap();
        let instance = engine.instantiate(&mut context, &module).unwrap();
        assert!(engine.lookup_export(&mut context, &instance, "main").is_none());
        assert!(engine.lookup_export(&mut context, &instance, "run").is_some());
    }
}
