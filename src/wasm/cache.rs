use super::runtime::{WasmCompiledModule, WasmRuntime, WasmRuntimeError};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WasmModuleHash([u8; 32]);

impl WasmModuleHash {
    pub fn from_wasm_bytes(wasm_bytes: &[u8]) -> Self {
        let digest = Sha256::digest(wasm_bytes);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        Self(hash)
    }
}

impl fmt::Display for WasmModuleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct WasmCachedModule {
    pub hash: WasmModuleHash,
    pub module: Arc<WasmCompiledModule>,
}

/// Compiled modules keyed by the SHA-256 of their bytes, so repeated runs of
/// the same binary skip validation and compilation.
pub struct WasmModuleCache {
    runtime: Arc<WasmRuntime>,
    memory: RwLock<HashMap<WasmModuleHash, Arc<WasmCompiledModule>>>,
}

impl WasmModuleCache {
    pub fn new(runtime: Arc<WasmRuntime>) -> Self {
        Self {
            runtime,
            memory: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_compile(&self, wasm_bytes: &[u8]) -> Result<WasmCachedModule, WasmRuntimeError> {
        let hash = WasmModuleHash::from_wasm_bytes(wasm_bytes);
        if let Some(cached) = self.memory_read().get(&hash).cloned() {
            log::debug!("wasm module {hash} served from cache");
            return Ok(WasmCachedModule {
                hash,
                module: cached,
            });
        }

        let compiled = Arc::new(self.runtime.compile_module(wasm_bytes)?);
        self.memory_write().insert(hash, compiled.clone());
        Ok(WasmCachedModule {
            hash,
            module: compiled,
        })
    }

    pub fn contains(&self, hash: WasmModuleHash) -> bool {
        self.memory_read().contains_key(&hash)
    }

    pub fn remove(&self, hash: WasmModuleHash) -> bool {
        self.memory_write().remove(&hash).is_some()
    }

    pub fn entries(&self) -> usize {
        self.memory_read().len()
    }

    fn memory_read(&self) -> RwLockReadGuard<'_, HashMap<WasmModuleHash, Arc<WasmCompiledModule>>> {
        self.memory
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn memory_write(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<WasmModuleHash, Arc<WasmCompiledModule>>> {
        self.memory
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
