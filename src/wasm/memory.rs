use std::fmt;
use std::ops::Range;
use wasmtime::{Memory, StoreContext};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryAccessError {
    OutOfBounds {
        offset: u32,
        length: u32,
        memory_len: usize,
    },
    InvalidEncoding {
        offset: u32,
        length: u32,
        valid_up_to: usize,
    },
}

impl fmt::Display for MemoryAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds {
                offset,
                length,
                memory_len,
            } => write!(
                f,
                "guest memory out-of-bounds offset={offset} len={length} memory_len={memory_len}"
            ),
            Self::InvalidEncoding {
                offset,
                length,
                valid_up_to,
            } => write!(
                f,
                "guest bytes offset={offset} len={length} are not valid utf-8 (valid up to {valid_up_to})"
            ),
        }
    }
}

impl std::error::Error for MemoryAccessError {}

/// Read-only window over a module's linear memory.
///
/// A view borrows the memory bytes as they are at capture time, so it must be
/// re-captured after anything that can grow memory (i.e. any call into the
/// module). Host functions capture a fresh view on every call.
#[derive(Clone, Copy)]
pub struct MemoryView<'a> {
    bytes: &'a [u8],
}

impl<'a> MemoryView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn capture<T: 'a>(memory: &Memory, store: impl Into<StoreContext<'a, T>>) -> Self {
        Self::new(memory.data(store))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn read(&self, offset: u32, length: u32) -> Result<&'a [u8], MemoryAccessError> {
        let range = checked_memory_range(offset, length, self.bytes.len())?;
        Ok(&self.bytes[range])
    }

    pub fn read_utf8(&self, offset: u32, length: u32) -> Result<&'a str, MemoryAccessError> {
        let bytes = self.read(offset, length)?;
        std::str::from_utf8(bytes).map_err(|error| MemoryAccessError::InvalidEncoding {
            offset,
            length,
            valid_up_to: error.valid_up_to(),
        })
    }
}

fn checked_memory_range(
    offset: u32,
    length: u32,
    memory_len: usize,
) -> Result<Range<usize>, MemoryAccessError> {
    let out_of_bounds = MemoryAccessError::OutOfBounds {
        offset,
        length,
        memory_len,
    };
    let start = usize::try_from(offset).map_err(|_| out_of_bounds.clone())?;
    let len = usize::try_from(length).map_err(|_| out_of_bounds.clone())?;
    let end = start.checked_add(len).ok_or_else(|| out_of_bounds.clone())?;
    if end > memory_len {
        return Err(out_of_bounds);
    }
    Ok(start..end)
}
