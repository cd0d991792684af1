pub mod config;
pub mod runner;
pub mod sink;
pub mod source;
pub mod wasm;

pub use config::RunnerConfig;
pub use runner::{RunError, RunErrorKind, RunReport, RunState, Runner};
pub use sink::{CaptureSink, OutputSink, StdoutSink};
pub use source::{ByteSource, ByteSourceError, FileByteSource, MemoryByteSource, ModuleBytes};
