use super::abi::describe_val_types;
use super::imports::{HostCallError, HostImportTable, HostState, ImportResolutionError};
use super::memory::MemoryView;
use crate::sink::OutputSink;
use std::fmt;
use wasmtime::{Config, Engine, Instance, Memory, Module, Store, Trap, TypedFunc, ValType};

// Budget used when no fuel limit is configured. wasmtime keeps fuel as a
// signed counter internally.
const UNMETERED_FUEL: u64 = i64::MAX as u64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WasmExecutionLimits {
    /// Fuel budget for a whole run, start function included. `None` runs to
    /// completion.
    pub max_fuel: Option<u64>,
}

impl WasmExecutionLimits {
    fn fuel_budget(self) -> u64 {
        self.max_fuel.unwrap_or(UNMETERED_FUEL)
    }
}

#[derive(Debug)]
pub enum WasmRuntimeError {
    EngineInit(String),
    ModuleCompile(String),
    ImportResolution(ImportResolutionError),
    LinkerSetup(String),
    InstantiationTrap(String),
    MissingMemoryExport(String),
    MissingEntryPoint(String),
    EntryPointSignature { name: String, found: String },
    HostCall(HostCallError),
    RuntimeTrap(String),
}

impl fmt::Display for WasmRuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EngineInit(message) => write!(f, "wasm engine init failed: {message}"),
            Self::ModuleCompile(message) => write!(f, "wasm module validation failed: {message}"),
            Self::ImportResolution(error) => write!(f, "import resolution failed: {error}"),
            Self::LinkerSetup(message) => write!(f, "failed to define host imports: {message}"),
            Self::InstantiationTrap(message) => {
                write!(f, "wasm module trapped during instantiation: {message}")
            }
            Self::MissingMemoryExport(name) => {
                write!(f, "wasm module missing required exported memory '{name}'")
            }
            Self::MissingEntryPoint(name) => {
                write!(f, "wasm module missing entry point export '{name}'")
            }
            Self::EntryPointSignature { name, found } => write!(
                f,
                "entry point '{name}' has type {found}, expected () -> (i32) or () -> (i64)"
            ),
            Self::HostCall(error) => write!(f, "host function failed: {error}"),
            Self::RuntimeTrap(message) => write!(f, "wasm module trapped: {message}"),
        }
    }
}

impl std::error::Error for WasmRuntimeError {}

impl From<ImportResolutionError> for WasmRuntimeError {
    fn from(value: ImportResolutionError) -> Self {
        Self::ImportResolution(value)
    }
}

#[derive(Clone)]
pub struct WasmCompiledModule {
    module: Module,
    wasm_len: usize,
}

impl WasmCompiledModule {
    pub fn wasm_len(&self) -> usize {
        self.wasm_len
    }
}

pub struct WasmRuntime {
    engine: Engine,
}

impl WasmRuntime {
    pub fn new() -> Result<Self, WasmRuntimeError> {
        let mut config = Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config).map_err(|error| {
            WasmRuntimeError::EngineInit(format!("failed to create wasmtime engine: {error}"))
        })?;
        Ok(Self { engine })
    }

    pub fn compile_module(
        &self,
        wasm_bytes: &[u8],
    ) -> Result<WasmCompiledModule, WasmRuntimeError> {
        let module = Module::from_binary(&self.engine, wasm_bytes).map_err(|error| {
            WasmRuntimeError::ModuleCompile(format!("module bytes were rejected: {error}"))
        })?;
        Ok(WasmCompiledModule {
            module,
            wasm_len: wasm_bytes.len(),
        })
    }

    /// Resolves imports against `imports`, then instantiates and runs any
    /// start function. Output written during the start function already goes
    /// to `sink`, read from the memory exported as `memory_export`.
    pub fn instantiate_module(
        &self,
        compiled: &WasmCompiledModule,
        imports: &HostImportTable,
        sink: Box<dyn OutputSink>,
        memory_export: &str,
        limits: WasmExecutionLimits,
    ) -> Result<WasmRuntimeInstance, WasmRuntimeError> {
        imports.resolve(&compiled.module)?;
        let linker = imports
            .build_linker(&self.engine)
            .map_err(|error| WasmRuntimeError::LinkerSetup(error.to_string()))?;

        let mut store = Store::new(&self.engine, HostState::new(sink, memory_export));
        store
            .set_fuel(limits.fuel_budget())
            .map_err(|error| {
                WasmRuntimeError::InstantiationTrap(format!(
                    "failed to initialize fuel budget: {error}"
                ))
            })?;
        let instance = linker
            .instantiate(&mut store, &compiled.module)
            .map_err(|error| match host_call_error(&error) {
                Some(host) => WasmRuntimeError::HostCall(host),
                None => WasmRuntimeError::InstantiationTrap(trap_message(&error)),
            })?;

        Ok(WasmRuntimeInstance {
            limits,
            store,
            instance,
        })
    }
}

/// A zero-argument entry export, already type-checked.
#[derive(Clone)]
pub enum WasmEntryPoint {
    I32(TypedFunc<(), i32>),
    I64(TypedFunc<(), i64>),
}

pub struct WasmRuntimeInstance {
    limits: WasmExecutionLimits,
    store: Store<HostState>,
    instance: Instance,
}

impl WasmRuntimeInstance {
    pub fn writes(&self) -> u64 {
        self.store.data().writes()
    }

    pub fn fuel_consumed(&self) -> Option<u64> {
        let budget = self.limits.fuel_budget();
        self.store
            .get_fuel()
            .ok()
            .map(|remaining| budget.saturating_sub(remaining))
    }

    /// Captures the exported memory so host functions read through it.
    pub fn bind_memory(&mut self, export: &str) -> Result<Memory, WasmRuntimeError> {
        let memory = self
            .instance
            .get_memory(&mut self.store, export)
            .ok_or_else(|| WasmRuntimeError::MissingMemoryExport(export.to_owned()))?;
        self.store.data_mut().bind_memory(memory);
        Ok(memory)
    }

    pub fn memory_view(&self) -> Option<MemoryView<'_>> {
        let memory = self.store.data().memory()?;
        Some(MemoryView::capture(&memory, &self.store))
    }

    /// Looks up `name` and checks it is `() -> i32` or `() -> i64`.
    pub fn entry_point(&mut self, name: &str) -> Result<WasmEntryPoint, WasmRuntimeError> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| WasmRuntimeError::MissingEntryPoint(name.to_owned()))?;
        let ty = func.ty(&self.store);
        let signature_error = || WasmRuntimeError::EntryPointSignature {
            name: name.to_owned(),
            found: format!(
                "{} -> {}",
                describe_val_types(ty.params()),
                describe_val_types(ty.results())
            ),
        };
        if ty.params().next().is_some() {
            return Err(signature_error());
        }

        let results: Vec<ValType> = ty.results().collect();
        match results.as_slice() {
            [ValType::I32] => func
                .typed::<(), i32>(&self.store)
                .map(WasmEntryPoint::I32)
                .map_err(|_| signature_error()),
            [ValType::I64] => func
                .typed::<(), i64>(&self.store)
                .map(WasmEntryPoint::I64)
                .map_err(|_| signature_error()),
            _ => Err(signature_error()),
        }
    }

    /// Runs a resolved entry point. `i32` results are sign-extended.
    pub fn call(&mut self, entry: WasmEntryPoint) -> Result<i64, WasmRuntimeError> {
        let outcome = match entry {
            WasmEntryPoint::I32(func) => func.call(&mut self.store, ()).map(i64::from),
            WasmEntryPoint::I64(func) => func.call(&mut self.store, ()),
        };
        outcome.map_err(|error| match host_call_error(&error) {
            Some(host) => WasmRuntimeError::HostCall(host),
            None => WasmRuntimeError::RuntimeTrap(trap_message(&error)),
        })
    }

    pub fn call_entry(&mut self, name: &str) -> Result<i64, WasmRuntimeError> {
        let entry = self.entry_point(name)?;
        self.call(entry)
    }
}

fn host_call_error(error: &wasmtime::Error) -> Option<HostCallError> {
    error.downcast_ref::<HostCallError>().cloned()
}

fn trap_message(error: &wasmtime::Error) -> String {
    match error.downcast_ref::<Trap>() {
        Some(trap) => trap.to_string(),
        None => error.to_string(),
    }
}
