use super::abi::{
    describe_val_types, WasmScalar, WASM_ABI_IMPORT_NAMESPACE, WASM_ABI_IMPORT_WRITE,
};
use super::memory::{MemoryAccessError, MemoryView};
use crate::sink::OutputSink;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use wasmtime::{Caller, Engine, Extern, ExternType, FuncType, Linker, Memory, Module};

/// Per-store data visible to host functions.
pub struct HostState {
    sink: Box<dyn OutputSink>,
    memory_export: String,
    memory: Option<Memory>,
    writes: u64,
}

impl HostState {
    /// `memory_export` names the export host functions read from until the
    /// runner binds memory explicitly.
    pub fn new(sink: Box<dyn OutputSink>, memory_export: impl Into<String>) -> Self {
        Self {
            sink,
            memory_export: memory_export.into(),
            memory: None,
            writes: 0,
        }
    }

    pub fn bind_memory(&mut self, memory: Memory) {
        self.memory = Some(memory);
    }

    pub fn memory(&self) -> Option<Memory> {
        self.memory
    }

    /// Number of completed `core.write` calls.
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostCallError {
    Memory(MemoryAccessError),
    MemoryUnavailable { export: String },
    Sink(String),
}

impl fmt::Display for HostCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(error) => write!(f, "{error}"),
            Self::MemoryUnavailable { export } => {
                write!(f, "host call made before memory '{export}' was available")
            }
            Self::Sink(message) => write!(f, "output sink rejected write: {message}"),
        }
    }
}

impl std::error::Error for HostCallError {}

impl From<MemoryAccessError> for HostCallError {
    fn from(value: MemoryAccessError) -> Self {
        Self::Memory(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImportKey {
    pub namespace: &'static str,
    pub name: &'static str,
}

impl ImportKey {
    pub const fn new(namespace: &'static str, name: &'static str) -> Self {
        Self { namespace, name }
    }
}

impl fmt::Display for ImportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportSignature {
    pub params: &'static [WasmScalar],
    pub results: &'static [WasmScalar],
}

impl ImportSignature {
    pub const fn new(params: &'static [WasmScalar], results: &'static [WasmScalar]) -> Self {
        Self { params, results }
    }

    pub fn matches(&self, ty: &FuncType) -> bool {
        let params: Option<Vec<WasmScalar>> =
            ty.params().map(|ty| WasmScalar::from_val_type(&ty)).collect();
        let results: Option<Vec<WasmScalar>> =
            ty.results().map(|ty| WasmScalar::from_val_type(&ty)).collect();
        params.as_deref() == Some(self.params) && results.as_deref() == Some(self.results)
    }
}

impl fmt::Display for ImportSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |types: &[WasmScalar]| {
            types
                .iter()
                .map(|ty| ty.name())
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(self.params), join(self.results))
    }
}

pub type HostFuncInstaller = fn(&mut Linker<HostState>, ImportKey) -> wasmtime::Result<()>;

/// A host function exposed to modules under a fixed key.
#[derive(Clone, Copy)]
pub struct ImportBinding {
    pub key: ImportKey,
    pub signature: ImportSignature,
    install: HostFuncInstaller,
}

impl ImportBinding {
    pub const fn new(
        key: ImportKey,
        signature: ImportSignature,
        install: HostFuncInstaller,
    ) -> Self {
        Self {
            key,
            signature,
            install,
        }
    }
}

impl fmt::Debug for ImportBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportBinding")
            .field("key", &self.key)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

pub const CORE_WRITE_SIGNATURE: ImportSignature =
    ImportSignature::new(&[WasmScalar::I32, WasmScalar::I32], &[]);

pub fn core_write_binding() -> ImportBinding {
    ImportBinding::new(
        ImportKey::new(WASM_ABI_IMPORT_NAMESPACE, WASM_ABI_IMPORT_WRITE),
        CORE_WRITE_SIGNATURE,
        install_core_write,
    )
}

fn install_core_write(linker: &mut Linker<HostState>, key: ImportKey) -> wasmtime::Result<()> {
    linker.func_wrap(key.namespace, key.name, host_write)?;
    Ok(())
}

fn host_write(
    mut caller: Caller<'_, HostState>,
    offset: u32,
    length: u32,
) -> wasmtime::Result<()> {
    let memory = caller_memory(&mut caller)?;
    let text = MemoryView::capture(&memory, &caller)
        .read_utf8(offset, length)
        .map_err(HostCallError::from)?
        .to_owned();
    log::trace!("core.write offset={offset} len={length}: {text:?}");

    let state = caller.data_mut();
    state
        .sink
        .emit(&text)
        .map_err(|error| HostCallError::Sink(error.to_string()))?;
    state.writes += 1;
    Ok(())
}

// The start function runs before the runner binds memory, so fall back to the
// caller's own export under the configured name.
fn caller_memory(caller: &mut Caller<'_, HostState>) -> Result<Memory, HostCallError> {
    if let Some(memory) = caller.data().memory() {
        return Ok(memory);
    }
    let export = caller.data().memory_export.clone();
    caller
        .get_export(&export)
        .and_then(Extern::into_memory)
        .ok_or(HostCallError::MemoryUnavailable { export })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportMismatch {
    Missing,
    NotAFunction(&'static str),
    SignatureMismatch { expected: String, found: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportResolutionError {
    pub namespace: String,
    pub name: String,
    pub reason: ImportMismatch,
}

impl fmt::Display for ImportResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            namespace,
            name,
            reason,
        } = self;
        match reason {
            ImportMismatch::Missing => {
                write!(f, "import '{namespace}.{name}' is not provided by the host")
            }
            ImportMismatch::NotAFunction(kind) => write!(
                f,
                "import '{namespace}.{name}' is a {kind}; the host only provides functions"
            ),
            ImportMismatch::SignatureMismatch { expected, found } => write!(
                f,
                "import '{namespace}.{name}' has type {found}, host provides {expected}"
            ),
        }
    }
}

impl std::error::Error for ImportResolutionError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DuplicateImport(pub ImportKey);

impl fmt::Display for DuplicateImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host import '{}' is already registered", self.0)
    }
}

impl std::error::Error for DuplicateImport {}

/// Static registry of host functions, resolved against a module before it is
/// instantiated.
#[derive(Clone, Debug)]
pub struct HostImportTable {
    // Owned `(namespace, name)` keys so lookups by a module's import names are
    // direct.
    bindings: BTreeMap<(String, String), ImportBinding>,
}

impl Default for HostImportTable {
    fn default() -> Self {
        Self::with_core_imports()
    }
}

impl HostImportTable {
    pub fn empty() -> Self {
        Self {
            bindings: BTreeMap::new(),
        }
    }

    pub fn with_core_imports() -> Self {
        let mut table = Self::empty();
        let write = core_write_binding();
        table.bindings.insert(table_key(write.key), write);
        table
    }

    pub fn register(&mut self, binding: ImportBinding) -> Result<(), DuplicateImport> {
        match self.bindings.entry(table_key(binding.key)) {
            Entry::Occupied(_) => Err(DuplicateImport(binding.key)),
            Entry::Vacant(slot) => {
                slot.insert(binding);
                Ok(())
            }
        }
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<&ImportBinding> {
        self.bindings.get(&(namespace.to_owned(), name.to_owned()))
    }

    pub fn keys(&self) -> impl Iterator<Item = ImportKey> + '_ {
        self.bindings.values().map(|binding| binding.key)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn resolve(&self, module: &Module) -> Result<(), ImportResolutionError> {
        for import in module.imports() {
            let fail = |reason| ImportResolutionError {
                namespace: import.module().to_owned(),
                name: import.name().to_owned(),
                reason,
            };
            let func_ty = match import.ty() {
                ExternType::Func(func_ty) => func_ty,
                ExternType::Global(_) => return Err(fail(ImportMismatch::NotAFunction("global"))),
                ExternType::Table(_) => return Err(fail(ImportMismatch::NotAFunction("table"))),
                ExternType::Memory(_) => return Err(fail(ImportMismatch::NotAFunction("memory"))),
                #[allow(unreachable_patterns)]
                _ => return Err(fail(ImportMismatch::NotAFunction("extern"))),
            };
            let binding = self
                .get(import.module(), import.name())
                .ok_or_else(|| fail(ImportMismatch::Missing))?;
            if !binding.signature.matches(&func_ty) {
                return Err(fail(ImportMismatch::SignatureMismatch {
                    expected: binding.signature.to_string(),
                    found: format!(
                        "{} -> {}",
                        describe_val_types(func_ty.params()),
                        describe_val_types(func_ty.results())
                    ),
                }));
            }
        }
        Ok(())
    }

    pub fn build_linker(&self, engine: &Engine) -> wasmtime::Result<Linker<HostState>> {
        let mut linker = Linker::new(engine);
        for binding in self.bindings.values() {
            (binding.install)(&mut linker, binding.key)?;
        }
        Ok(linker)
    }
}

fn table_key(key: ImportKey) -> (String, String) {
    (key.namespace.to_owned(), key.name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CaptureSink;
    use wasmtime::Store;

    fn compile(engine: &Engine, text: &str) -> Module {
        let wasm = wat::parse_str(text).expect("wat should compile");
        Module::from_binary(engine, &wasm).expect("module should compile")
    }

    #[test]
    fn core_table_resolves_write_import() {
        let engine = Engine::default();
        let module = compile(
            &engine,
            r#"
            (module
              (import "core" "write" (func (param i32 i32)))
              (memory (export "memory") 1))
            "#,
        );
        let table = HostImportTable::with_core_imports();
        assert_eq!(table.len(), 1);
        assert!(table.get("core", "write").is_some());
        assert!(table.get("core", "read").is_none());
        assert!(table.get("env", "write").is_none());
        table.resolve(&module).expect("imports should resolve");
    }

    #[test]
    fn reject_unknown_import() {
        let engine = Engine::default();
        let module = compile(
            &engine,
            r#"(module (import "core" "read" (func (param i32 i32) (result i32))))"#,
        );
        let error = HostImportTable::default()
            .resolve(&module)
            .expect_err("resolve should fail");
        assert_eq!(error.namespace, "core");
        assert_eq!(error.name, "read");
        assert_eq!(error.reason, ImportMismatch::Missing);
    }

    #[test]
    fn reject_mismatched_write_signature() {
        let engine = Engine::default();
        let module = compile(
            &engine,
            r#"(module (import "core" "write" (func (param i64))))"#,
        );
        let error = HostImportTable::default()
            .resolve(&module)
            .expect_err("resolve should fail");
        assert!(matches!(
            error.reason,
            ImportMismatch::SignatureMismatch { .. }
        ));
        assert!(error.to_string().contains("(i64)"));
    }

    #[test]
    fn reject_memory_import() {
        let engine = Engine::default();
        let module = compile(&engine, r#"(module (import "core" "memory" (memory 1)))"#);
        let error = HostImportTable::default()
            .resolve(&module)
            .expect_err("resolve should fail");
        assert_eq!(error.reason, ImportMismatch::NotAFunction("memory"));
    }

    #[test]
    fn reject_duplicate_registration() {
        let mut table = HostImportTable::with_core_imports();
        let error = table
            .register(core_write_binding())
            .expect_err("duplicate should be rejected");
        assert_eq!(error.0, ImportKey::new("core", "write"));
        assert_eq!(table.len(), 1);
    }

    fn install_test_flush(linker: &mut Linker<HostState>, key: ImportKey) -> wasmtime::Result<()> {
        linker.func_wrap(
            key.namespace,
            key.name,
            |mut caller: Caller<'_, HostState>| -> wasmtime::Result<()> {
                caller
                    .data_mut()
                    .sink
                    .emit("<flush>")
                    .map_err(|error| HostCallError::Sink(error.to_string()))?;
                Ok(())
            },
        )?;
        Ok(())
    }

    #[test]
    fn extra_binding_links_alongside_write() {
        let mut table = HostImportTable::with_core_imports();
        table
            .register(ImportBinding::new(
                ImportKey::new("core", "flush"),
                ImportSignature::new(&[], &[]),
                install_test_flush,
            ))
            .expect("new key should register");
        assert_eq!(
            table.keys().collect::<Vec<_>>(),
            vec![ImportKey::new("core", "flush"), ImportKey::new("core", "write")]
        );

        let engine = Engine::default();
        let module = compile(
            &engine,
            r#"
            (module
              (import "core" "write" (func $write (param i32 i32)))
              (import "core" "flush" (func $flush))
              (memory (export "memory") 1)
              (data (i32.const 0) "hi")
              (func (export "main")
                (call $write (i32.const 0) (i32.const 2))
                (call $flush)))
            "#,
        );
        table.resolve(&module).expect("imports should resolve");

        let sink = CaptureSink::new();
        let linker = table.build_linker(&engine).expect("linker should build");
        let mut store = Store::new(&engine, HostState::new(Box::new(sink.clone()), "memory"));
        let instance = linker
            .instantiate(&mut store, &module)
            .expect("module should instantiate");
        instance
            .get_typed_func::<(), ()>(&mut store, "main")
            .expect("main should exist")
            .call(&mut store, ())
            .expect("main should run");

        assert_eq!(sink.lines(), vec!["hi", "<flush>"]);
        assert_eq!(store.data().writes(), 1);
    }
}
