// Host side of the module boundary: compile, link `core.*` imports,
// instantiate, and read guest memory through bounds-checked views.
pub mod abi;
pub mod cache;
pub mod imports;
pub mod memory;
pub mod runtime;

pub use self::abi::{
    WasmScalar, WASM_ABI_ENTRY_EXPORT, WASM_ABI_IMPORT_NAMESPACE, WASM_ABI_IMPORT_WRITE,
    WASM_ABI_MEMORY_EXPORT,
};
pub use self::cache::{WasmCachedModule, WasmModuleCache, WasmModuleHash};
pub use self::imports::{
    core_write_binding, DuplicateImport, HostCallError, HostFuncInstaller, HostImportTable,
    HostState, ImportBinding, ImportKey, ImportMismatch, ImportResolutionError, ImportSignature,
};
pub use self::memory::{MemoryAccessError, MemoryView};
pub use self::runtime::{
    WasmCompiledModule, WasmEntryPoint, WasmExecutionLimits, WasmRuntime, WasmRuntimeError,
    WasmRuntimeInstance,
};
