// Names a module must use to interoperate with this host.
pub const WASM_ABI_IMPORT_NAMESPACE: &str = "core";
pub const WASM_ABI_IMPORT_WRITE: &str = "write";
pub const WASM_ABI_MEMORY_EXPORT: &str = "memory";
pub const WASM_ABI_ENTRY_EXPORT: &str = "main";

/// Scalar value types that may appear in a host import signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WasmScalar {
    I32,
    I64,
    F32,
    F64,
}

impl WasmScalar {
    pub fn from_val_type(ty: &wasmtime::ValType) -> Option<Self> {
        match ty {
            wasmtime::ValType::I32 => Some(Self::I32),
            wasmtime::ValType::I64 => Some(Self::I64),
            wasmtime::ValType::F32 => Some(Self::F32),
            wasmtime::ValType::F64 => Some(Self::F64),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

pub(crate) fn describe_val_types(types: impl Iterator<Item = wasmtime::ValType>) -> String {
    let names: Vec<&str> = types
        .map(|ty| WasmScalar::from_val_type(&ty).map_or("other", WasmScalar::name))
        .collect();
    format!("({})", names.join(", "))
}
