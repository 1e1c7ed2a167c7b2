//! Wasmtime implementation of the execution engine boundary.
//!
//! [`InstanceRunner`] owns the shared engine and the linker holding host
//! functions. A resumable call is a boxed future that owns the partition's
//! store for as long as the call is in flight:
//!
//! 1. `start_call` moves the store into an `async` block around
//!    [`Func::call_async`]
//! 2. `poll` polls that future once with a no-op waker
//! 3. Wasmtime returns `Pending` whenever the store's fuel-yield interval is
//!    consumed, and `Ready` with the store once the guest returns or traps

use std::future::Future;
use std::pin::{Pin, pin};
use std::task::{Context as TaskContext, Poll, Waker};

use tracing::{debug, instrument, trace, warn};
use wasmtime::{Func, Instance, Linker, Store, Trap, Val};

use crate::adapter::{CallProgress, ExecutionEngine};
use crate::store::{PartitionContext, create_store, remaining_fuel};
use crate::{CompiledModule, WasmEngine};
use fuelslice_common::{CallFault, EngineError, PartitionId, Value};

type CallOutput = (Store<PartitionContext>, wasmtime::Result<Vec<Val>>);

/// An in-flight Wasmtime call.
///
/// Owns the partition's store until the call finishes.
pub struct WasmtimeCall {
    partition_id: PartitionId,
    future: Pin<Box<dyn Future<Output = CallOutput> + Send>>,
}

impl std::fmt::Debug for WasmtimeCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmtimeCall")
            .field("partition_id", &self.partition_id)
            .finish_non_exhaustive()
    }
}

/// Wasmtime-backed execution engine.
///
/// Compiles modules against the shared [`WasmEngine`] and instantiates them
/// through a linker that carries the registered host functions. Each
/// partition gets its own `Store<PartitionContext>`.
pub struct InstanceRunner {
    engine: WasmEngine,
    linker: Linker<PartitionContext>,
}

impl InstanceRunner {
    /// Create a new instance runner with an empty linker.
    pub fn new(engine: WasmEngine) -> Self {
        let linker = Linker::new(engine.inner());

        Self { engine, linker }
    }

    /// Get a mutable reference to the linker.
    ///
    /// Use this to register host functions before loading partitions.
    pub fn linker_mut(&mut self) -> &mut Linker<PartitionContext> {
        &mut self.linker
    }

    /// Get the engine reference.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }
}

impl ExecutionEngine for InstanceRunner {
    type Module = CompiledModule;
    type Context = Store<PartitionContext>;
    type Instance = Instance;
    type Callable = Func;
    type Call = WasmtimeCall;

    fn compile(&self, bytes: &[u8]) -> Result<CompiledModule, EngineError> {
        CompiledModule::compile(self.engine.inner(), bytes)
    }

    fn new_context(&self, partition_id: PartitionId) -> Result<Self::Context, EngineError> {
        create_store(&self.engine, partition_id)
    }

    #[instrument(skip_all, fields(partition_id = context.data().partition_id))]
    fn instantiate(
        &self,
        context: &mut Self::Context,
        module: &CompiledModule,
    ) -> Result<Instance, EngineError> {
        debug!(format = ?module.format(), "Instantiating module");

        let (result, suspensions) =
            drive(self.linker.instantiate_async(&mut *context, module.as_module()));

        if suspensions > 0 {
            debug!(suspensions, "Instantiation yielded");
        }

        let instance =
            result.map_err(|e| EngineError::instantiate(format!("Instantiation failed: {e}")))?;

        // Leftover instantiation fuel must not leak into the first call
        self.set_fuel(context, 0)?;

        Ok(instance)
    }

    fn set_fuel(&self, context: &mut Self::Context, amount: u64) -> Result<(), EngineError> {
        context
            .set_fuel(amount)
            .map_err(|e| EngineError::fuel(format!("Failed to set fuel: {e}")))
    }

    fn set_yield_interval(
        &self,
        context: &mut Self::Context,
        interval: Option<u64>,
    ) -> Result<(), EngineError> {
        context
            .fuel_async_yield_interval(interval)
            .map_err(|e| EngineError::fuel(format!("Failed to set yield interval: {e}")))
    }

    fn fuel_remaining(&self, context: &Self::Context) -> u64 {
        remaining_fuel(context).unwrap_or(0)
    }

    fn lookup_export(
        &self,
        context: &mut Self::Context,
        instance: &Instance,
        name: &str,
    ) -> Option<Func> {
        instance.get_func(&mut *context, name)
    }

    fn start_call(&self, context: Self::Context, callable: Func, args: &[Value]) -> WasmtimeCall {
        let partition_id = context.data().partition_id;
        let params: Vec<Val> = args.iter().copied().map(to_val).collect();
        let result_count = callable.ty(&context).results().len();
        let mut store = context;

        let future = async move {
            let mut results = vec![Val::I32(0); result_count];
            let outcome = callable
                .call_async(&mut store, &params, &mut results)
                .await;
            (store, outcome.map(|()| results))
        };

        WasmtimeCall {
            partition_id,
            future: Box::pin(future),
        }
    }

    fn poll(&self, mut call: WasmtimeCall) -> CallProgress<WasmtimeCall, Self::Context> {
        let mut cx = TaskContext::from_waker(Waker::noop());

        match call.future.as_mut().poll(&mut cx) {
            Poll::Pending => {
                trace!(partition_id = call.partition_id, "Call suspended");
                CallProgress::Suspended(call)
            }
            Poll::Ready((context, Ok(results))) => CallProgress::Finished {
                context,
                outcome: convert_results(&results),
            },
            Poll::Ready((context, Err(error))) => {
                let fault = classify_error(&error);
                warn!(partition_id = call.partition_id, %fault, "Call faulted");
                CallProgress::Finished {
                    context,
                    outcome: Err(fault),
                }
            }
        }
    }
}

/// Poll a future to completion on the current thread.
///
/// Returns the output together with how many times the future suspended.
fn drive<F: Future>(future: F) -> (F::Output, u64) {
    let mut future = pin!(future);
    let mut cx = TaskContext::from_waker(Waker::noop());
    let mut suspensions = 0;

    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => return (output, suspensions),
            Poll::Pending => suspensions += 1,
        }
    }
}

fn to_val(value: Value) -> Val {
    match value {
        Value::I32(v) => Val::I32(v),
        Value::I64(v) => Val::I64(v),
        Value::F32(v) => Val::F32(v.to_bits()),
        Value::F64(v) => Val::F64(v.to_bits()),
    }
}

fn from_val(val: &Val) -> Option<Value> {
    match val {
        Val::I32(v) => Some(Value::I32(*v)),
        Val::I64(v) => Some(Value::I64(*v)),
        Val::F32(bits) => Some(Value::F32(f32::from_bits(*bits))),
        Val::F64(bits) => Some(Value::F64(f64::from_bits(*bits))),
        _ => None,
    }
}

fn convert_results(results: &[Val]) -> Result<Vec<Value>, CallFault> {
    results
        .iter()
        .map(|val| {
            from_val(val).ok_or_else(|| {
                CallFault::engine(format!("Unsupported result value: {val:?}"))
            })
        })
        .collect()
}

/// Map a Wasmtime call error onto a [`CallFault`].
fn classify_error(error: &wasmtime::Error) -> CallFault {
    match error.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => CallFault::OutOfFuel,
        Some(trap) => CallFault::Trap {
            message: error.to_string(),
            code: Some(format!("{trap:?}")),
        },
        None => CallFault::engine(error.to_string()),
    }
}

impl std::fmt::Debug for InstanceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRunner")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuelslice_common::EngineConfig;

    fn runner() -> InstanceRunner {
        InstanceRunner::new(WasmEngine::new(&EngineConfig::default(), 2).unwrap())
    }

    /// Poll until the call finishes, counting suspensions.
    fn finish(
        runner: &InstanceRunner,
        mut call: WasmtimeCall,
    ) -> (Store<PartitionContext>, Result<Vec<Value>, CallFault>, u32) {
        let mut suspensions = 0;
        loop {
            match runner.poll(call) {
                CallProgress::Suspended(next) => {
                    suspensions += 1;
                    call = next;
                }
                CallProgress::Finished { context, outcome } => {
                    return (context, outcome, suspensions);
                }
            }
        }
    }

    const ADD_WAT: &str = r#"
        (module
            (func (export "add") (param i32 i32) (result i32)
                (i32.add (local.get 0) (local.get 1))
            )
        )
    "#;

    const SPIN_WAT: &str = r#"
        (module
            (func (export "spin") (param $n i32) (result i32)
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

    #[test]
    fn test_value_conversion() {
        assert!(matches!(to_val(Value::I32(7)), Val::I32(7)));
        assert_eq!(from_val(&Val::I64(-2)), Some(Value::I64(-2)));
        assert_eq!(from_val(&to_val(Value::F32(1.5))), Some(Value::F32(1.5)));
        assert_eq!(from_val(&to_val(Value::F64(-0.25))), Some(Value::F64(-0.25)));
    }

    #[test]
    fn test_call_completes_without_yield_interval() {
        let runner = runner();
        let module = runner.compile(ADD_WAT.as_bytes()).unwrap();
        let mut store = runner.new_context(0).unwrap();
        let instance = runner.instantiate(&mut store, &module).unwrap();
        runner.set_fuel(&mut store, 10_000).unwrap();

        let func = runner.lookup_export(&mut store, &instance, "add").unwrap();
        let call = runner.start_call(store, func, &[Value::I32(2), Value::I32(3)]);
        let (store, outcome, suspensions) = finish(&runner, call);

        assert_eq!(outcome, Ok(vec![Value::I32(5)]));
        assert_eq!(suspensions, 0);
        assert!(runner.fuel_remaining(&store) < 10_000);
    }

    #[test]
    fn test_call_suspends_at_yield_interval() {
        let runner = runner();
        let module = runner.compile(SPIN_WAT.as_bytes()).unwrap();
        let mut store = runner.new_context(0).unwrap();
        let instance = runner.instantiate(&mut store, &module).unwrap();
        runner.set_fuel(&mut store, 1_000_000).unwrap();
        runner.set_yield_interval(&mut store, Some(100)).unwrap();

        let func = runner.lookup_export(&mut store, &instance, "spin").unwrap();
        let call = runner.start_call(store, func, &[Value::I32(1_000)]);
        let (_, outcome, suspensions) = finish(&runner, call);

        assert_eq!(outcome, Ok(vec![Value::I32(1_000)]));
        assert!(suspensions > 10, "expected many suspensions, got {suspensions}");
    }

    #[test]
    fn test_call_runs_out_of_fuel() {
        let runner = runner();
        let module = runner.compile(SPIN_WAT.as_bytes()).unwrap();
        let mut store = runner.new_context(0).unwrap();
        let instance = runner.instantiate(&mut store, &module).unwrap();
        runner.set_fuel(&mut store, 500).unwrap();

        let func = runner.lookup_export(&mut store, &instance, "spin").unwrap();
        let call = runner.start_call(store, func, &[Value::I32(1_000_000)]);
        let (_, outcome, _) = finish(&runner, call);

        assert_eq!(outcome, Err(CallFault::OutOfFuel));
    }

    #[test]
    fn test_trap_is_classified() {
        let runner = runner();
        let module = runner
            .compile(br#"(module (func (export "boom") unreachable))"#)
            .unwrap();
        let mut store = runner.new_context(0).unwrap();
        let instance = runner.instantiate(&mut store, &module).unwrap();
        runner.set_fuel(&mut store, 1_000).unwrap();

        let func = runner.lookup_export(&mut store, &instance, "boom").unwrap();
        let call = runner.start_call(store, func, &[]);
        let (_, outcome, _) = finish(&runner, call);

        match outcome {
            Err(CallFault::Trap { code, .. }) => {
                assert_eq!(code.as_deref(), Some("UnreachableCodeReached"));
            }
            other => panic!("expected trap, got {other:?}"),
        }
    }

    #[test]
    fn test_instantiate_leaves_no_fuel() {
        let runner = runner();
        let module = runner.compile(SPIN_WAT.as_bytes()).unwrap();
        let mut store = runner.new_context(0).unwrap();
        let instance = runner.instantiate(&mut store, &module).unwrap();

        assert_eq!(runner.fuel_remaining(&store), 0);

        let func = runner.lookup_export(&mut store, &instance, "spin").unwrap();
        let call = runner.start_call(store, func, &[Value::I32(10_000)]);
        let (_, outcome, _) = finish(&runner, call);

        assert_eq!(outcome, Err(CallFault::OutOfFuel));
    }

    #[test]
    fn test_lookup_missing_export() {
        let runner = runner();
        let module = runner.compile(ADD_WAT.as_bytes()).unwrap();
        let mut store = runner.new_context(0).unwrap();
        let instance = runner.instantiate(&mut store, &module).unwrap();

        assert!(runner.lookup_export(&mut store, &instance, "missing").is_none());
    }

    #[test]
    fn test_instantiation_trap() {
        let runner = runner();
        let module = runner
            .compile(br#"(module (func $start unreachable) (start $start))"#)
            .unwrap();
        let mut store = runner.new_context(0).unwrap();

        let result = runner.instantiate(&mut store, &module);
        assert!(matches!(result, Err(EngineError::Instantiate { .. })));
    }
}
