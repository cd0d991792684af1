use crate::config::RunnerConfig;
use crate::sink::OutputSink;
use crate::source::{ByteSource, ByteSourceError};
use crate::wasm::{
    HostCallError, HostImportTable, MemoryAccessError, WasmModuleCache, WasmRuntime,
    WasmRuntimeError,
};
use std::fmt;
use std::sync::Arc;


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    BytesLoaded,
    Instantiated,
    MemoryBound,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunErrorKind {
    NotFound,
    IoFailure,
    ValidationFailed,
    ImportResolutionFailed,
    NoMemoryExported,
    MissingEntryPoint,
    OutOfBounds,
    InvalidEncoding,
    SinkFailure,
    InstantiationTrap,
    RuntimeTrap,
    NonZeroExit,
}

impl fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "NotFound",
            Self::IoFailure => "IOFailure",
            Self::ValidationFailed => "ValidationFailed",
            Self::ImportResolutionFailed => "ImportResolutionFailed",
            Self::NoMemoryExported => "NoMemoryExported",
            Self::MissingEntryPoint => "MissingEntryPoint",
            Self::OutOfBounds => "OutOfBounds",
            Self::InvalidEncoding => "InvalidEncoding",
            Self::SinkFailure => "SinkFailure",
            Self::InstantiationTrap => "InstantiationTrap",
            Self::RuntimeTrap => "RuntimeTrap",
            Self::NonZeroExit => "NonZeroExit",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum RunError {
    Source(ByteSourceError),
    Wasm(WasmRuntimeError),
    NonZeroExit(i64),
}

impl RunError {
    pub fn kind(&self) -> RunErrorKind {
        match self {
            Self::Source(ByteSourceError::NotFound { .. }) => RunErrorKind::NotFound,
            Self::Source(ByteSourceError::Io { .. }) => RunErrorKind::IoFailure,
            Self::Wasm(error) => match error {
                WasmRuntimeError::ModuleCompile(_) => RunErrorKind::ValidationFailed,
                WasmRuntimeError::ImportResolution(_) | WasmRuntimeError::LinkerSetup(_) => {
                    RunErrorKind::ImportResolutionFailed
                }
                WasmRuntimeError::EngineInit(_) | WasmRuntimeError::InstantiationTrap(_) => {
                    RunErrorKind::InstantiationTrap
                }
                WasmRuntimeError::MissingMemoryExport(_) => RunErrorKind::NoMemoryExported,
                WasmRuntimeError::MissingEntryPoint(_)
                | WasmRuntimeError::EntryPointSignature { .. } => RunErrorKind::MissingEntryPoint,
                WasmRuntimeError::HostCall(host) => match host {
                    HostCallError::Memory(MemoryAccessError::OutOfBounds { .. })
                    | HostCallError::MemoryUnavailable { .. } => RunErrorKind::OutOfBounds,
                    HostCallError::Memory(MemoryAccessError::InvalidEncoding { .. }) => {
                        RunErrorKind::InvalidEncoding
                    }
                    HostCallError::Sink(_) => RunErrorKind::SinkFailure,
                },
                WasmRuntimeError::RuntimeTrap(_) => RunErrorKind::RuntimeTrap,
            },
            Self::NonZeroExit(_) => RunErrorKind::NonZeroExit,
        }
    }

    /// Exit code returned by the entry point, when that is what failed.
    pub fn exit_code(&self) -> Option<i64> {
        match self {
            Self::NonZeroExit(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source(error) => write!(f, "{}: {error}", self.kind()),
            Self::Wasm(error) => write!(f, "{}: {error}", self.kind()),
            Self::NonZeroExit(code) => write!(f, "{}: wasm exited with code {code}", self.kind()),
        }
    }
}

impl std::error::Error for RunError {}

impl From<ByteSourceError> for RunError {
    fn from(value: ByteSourceError) -> Self {
        Self::Source(value)
    }
}

impl From<WasmRuntimeError> for RunError {
    fn from(value: WasmRuntimeError) -> Self {
        Self::Wasm(value)
    }
}

/// Outcome of one run: the states visited, in order, and the single result.
#[derive(Debug)]
pub struct RunReport {
    pub identifier: String,
    pub states: Vec<RunState>,
    pub result: Result<(), RunError>,
}

impl RunReport {
    pub fn final_state(&self) -> RunState {
        match self.states.last() {
            Some(&state) if state.is_terminal() => state,
            _ if self.result.is_ok() => RunState::Succeeded,
            _ => RunState::Failed,
        }
    }

    pub fn reached(&self, state: RunState) -> bool {
        self.states.contains(&state)
    }

    pub fn error_kind(&self) -> Option<RunErrorKind> {
        self.result.as_ref().err().map(RunError::kind)
    }

    pub fn into_result(self) -> Result<(), RunError> {
        self.result
    }
}

struct StateTrace<'a> {
    identifier: &'a str,
    states: Vec<RunState>,
}

impl<'a> StateTrace<'a> {
    fn new(identifier: &'a str) -> Self {
        Self {
            identifier,
            states: vec![RunState::Idle],
        }
    }

    fn advance(&mut self, state: RunState) {
        log::debug!("run '{}': {:?} -> {state:?}", self.identifier, self.current());
        self.states.push(state);
    }

    fn current(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Idle)
    }
}

/// Loads a module, links the host imports, runs its entry point, and turns
/// the exit code into a single outcome. Failed runs are never retried.
pub struct Runner<S> {
    source: S,
    runtime: Arc<WasmRuntime>,
    cache: WasmModuleCache,
    imports: HostImportTable,
    config: RunnerConfig,
}

impl<S: ByteSource> Runner<S> {
    pub fn new(source: S, config: RunnerConfig) -> Result<Self, WasmRuntimeError> {
        Self::with_imports(source, config, HostImportTable::with_core_imports())
    }

    pub fn with_imports(
        source: S,
        config: RunnerConfig,
        imports: HostImportTable,
    ) -> Result<Self, WasmRuntimeError> {
        let runtime = Arc::new(WasmRuntime::new()?);
        Ok(Self {
            source,
            cache: WasmModuleCache::new(runtime.clone()),
            runtime,
            imports,
            config,
        })
    }

    pub fn cache(&self) -> &WasmModuleCache {
        &self.cache
    }

    pub fn run(&self, identifier: &str, sink: impl OutputSink + 'static) -> RunReport {
        let mut trace = StateTrace::new(identifier);
        let result = self.drive(identifier, Box::new(sink), &mut trace);
        match &result {
            Ok(()) => trace.advance(RunState::Succeeded),
            Err(error) => {
                log::debug!("run '{identifier}' failed in {:?}: {error}", trace.current());
                trace.advance(RunState::Failed);
            }
        }
        RunReport {
            identifier: identifier.to_owned(),
            states: trace.states,
            result,
        }
    }

    fn drive(
        &self,
        identifier: &str,
        sink: Box<dyn OutputSink>,
        trace: &mut StateTrace<'_>,
    ) -> Result<(), RunError> {
        let bytes = pollster::block_on(self.source.fetch_bytes(identifier))?;
        trace.advance(RunState::BytesLoaded);

        let cached = self.cache.get_or_compile(&bytes)?;
        log::info!(
            "loaded wasm module '{identifier}' ({} bytes, sha256 {})",
            bytes.len(),
            cached.hash
        );
        let mut instance = self.runtime.instantiate_module(
            &cached.module,
            &self.imports,
            sink,
            &self.config.memory_export,
            self.config.limits,
        )?;
        trace.advance(RunState::Instantiated);

        instance.bind_memory(&self.config.memory_export)?;
        trace.advance(RunState::MemoryBound);

        let entry = instance.entry_point(&self.config.entry_point)?;
        trace.advance(RunState::Running);
        let exit_code = instance.call(entry);
        log::debug!(
            "run '{identifier}': {} writes, fuel used {:?}",
            instance.writes(),
            instance.fuel_consumed()
        );
        match exit_code? {
            0 => Ok(()),
            code => Err(RunError::NonZeroExit(code)),
        }
    }
}
