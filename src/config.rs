use crate::wasm::{WasmExecutionLimits, WASM_ABI_ENTRY_EXPORT, WASM_ABI_MEMORY_EXPORT};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunnerConfig {
    pub entry_point: String,
    pub memory_export: String,
    pub limits: WasmExecutionLimits,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            entry_point: WASM_ABI_ENTRY_EXPORT.to_string(),
            memory_export: WASM_ABI_MEMORY_EXPORT.to_string(),
            limits: WasmExecutionLimits::default(),
        }
    }
}
