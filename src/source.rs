use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;

/// Immutable module binary as handed over by a [`ByteSource`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleBytes(Arc<[u8]>);

impl ModuleBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for ModuleBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ModuleBytes {
    fn from(value: Vec<u8>) -> Self {
        Self(value.into())
    }
}

impl From<&[u8]> for ModuleBytes {
    fn from(value: &[u8]) -> Self {
        Self(value.into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ByteSourceError {
    NotFound { identifier: String },
    Io { identifier: String, message: String },
}

impl fmt::Display for ByteSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "module '{identifier}' not found"),
            Self::Io {
                identifier,
                message,
            } => write!(f, "failed to read module '{identifier}': {message}"),
        }
    }
}

impl std::error::Error for ByteSourceError {}

/// Resolves a module identifier to its complete binary.
///
/// Fetching may suspend (e.g. a network read); the runner drives it to
/// completion before instantiation starts.
pub trait ByteSource {
    fn fetch_bytes(
        &self,
        identifier: &str,
    ) -> impl Future<Output = Result<ModuleBytes, ByteSourceError>>;
}

/// Reads modules from a directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct FileByteSource {
    root: PathBuf,
}

impl FileByteSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, identifier: &str) -> PathBuf {
        self.root.join(identifier)
    }
}

impl ByteSource for FileByteSource {
    async fn fetch_bytes(&self, identifier: &str) -> Result<ModuleBytes, ByteSourceError> {
        let path = self.path_for(identifier);
        log::debug!("reading module '{identifier}' from {}", path.display());
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes.into()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                Err(ByteSourceError::NotFound {
                    identifier: identifier.to_owned(),
                })
            }
            Err(error) => Err(ByteSourceError::Io {
                identifier: identifier.to_owned(),
                message: format!("{}: {error}", path.display()),
            }),
        }
    }
}

/// Serves modules that are already resident, e.g. embedded with
/// `include_bytes!`.
#[derive(Clone, Debug, Default)]
pub struct MemoryByteSource {
    modules: HashMap<String, ModuleBytes>,
}

impl MemoryByteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(
        mut self,
        identifier: impl Into<String>,
        bytes: impl Into<ModuleBytes>,
    ) -> Self {
        self.insert(identifier, bytes);
        self
    }

    pub fn insert(&mut self, identifier: impl Into<String>, bytes: impl Into<ModuleBytes>) {
        self.modules.insert(identifier.into(), bytes.into());
    }
}

impl ByteSource for MemoryByteSource {
    async fn fetch_bytes(&self, identifier: &str) -> Result<ModuleBytes, ByteSourceError> {
        self.modules
            .get(identifier)
            .cloned()
            .ok_or_else(|| ByteSourceError::NotFound {
                identifier: identifier.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_test_dir(tag: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be monotonic enough for tests")
            .as_nanos();
        dir.push(format!(
            "wasm-loader-source-{tag}-{}-{now_nanos}",
            std::process::id()
        ));
        dir
    }

    #[test]
    fn file_source_reads_module_bytes() {
        let dir = unique_test_dir("read");
        std::fs::create_dir_all(&dir).expect("test dir should be created");
        std::fs::write(dir.join("hello_world.wasm"), b"\0asm\x01\0\0\0")
            .expect("module should be written");

        let source = FileByteSource::new(&dir);
        let bytes = pollster::block_on(source.fetch_bytes("hello_world.wasm"))
            .expect("fetch should succeed");
        assert_eq!(bytes.as_slice(), b"\0asm\x01\0\0\0");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn file_source_reports_missing_module() {
        let source = FileByteSource::new(unique_test_dir("missing"));
        let error = pollster::block_on(source.fetch_bytes("missing.wasm"))
            .expect_err("fetch should fail");
        assert_eq!(
            error,
            ByteSourceError::NotFound {
                identifier: "missing.wasm".to_owned()
            }
        );
    }

    #[test]
    fn file_source_reports_io_failure_for_directory() {
        let dir = unique_test_dir("directory");
        std::fs::create_dir_all(dir.join("not_a_file.wasm")).expect("test dir should be created");

        let source = FileByteSource::new(&dir);
        let error = pollster::block_on(source.fetch_bytes("not_a_file.wasm"))
            .expect_err("fetch should fail");
        assert!(matches!(error, ByteSourceError::Io { .. }));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn memory_source_serves_registered_modules() {
        let source = MemoryByteSource::new().with_module("a.wasm", vec![1u8, 2, 3]);
        let bytes = pollster::block_on(source.fetch_bytes("a.wasm")).expect("fetch should succeed");
        assert_eq!(&*bytes, &[1, 2, 3]);
        assert!(matches!(
            pollster::block_on(source.fetch_bytes("b.wasm")),
            Err(ByteSourceError::NotFound { .. })
        ));
    }
}
