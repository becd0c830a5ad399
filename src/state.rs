//! Snapshots of a running cart.
//!
//! A [`State`] holds everything needed to resume a cart deterministically:
//! linear memory, the values of all exported globals and the disk. Its byte
//! form is
//!
//! ```text
//! [ 65536 bytes memory ][ u32 BE json length ][ json globals ][ u32 BE disk length ][ disk ]
//! ```
//!
//! where the globals are a JSON object mapping export names to stringified values.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};

use crate::{
    core::wasm4::{MEMORY_SIZE, STORAGE_SIZE},
    error::StateError,
};

/// A snapshot of memory, globals and disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    /// Linear memory, always [`MEMORY_SIZE`] bytes.
    pub memory: Vec<u8>,
    /// Exported globals by export name.
    pub globals: BTreeMap<String, String>,
    /// The written part of the disk.
    pub disk: Vec<u8>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            memory: vec![0; MEMORY_SIZE],
            globals: BTreeMap::new(),
            disk: Vec::new(),
        }
    }
}

impl State {
    /// Serialize into the snapshot byte layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        if self.memory.len() != MEMORY_SIZE {
            return Err(StateError::MemorySize {
                expected: MEMORY_SIZE,
                actual: self.memory.len(),
            });
        }
        if self.disk.len() > STORAGE_SIZE {
            return Err(StateError::DiskSize(self.disk.len()));
        }

        let globals = serde_json::to_vec(&self.globals)?;

        let mut bytes = Vec::with_capacity(MEMORY_SIZE + 8 + globals.len() + self.disk.len());
        bytes.extend_from_slice(&self.memory);
        bytes.extend_from_slice(&length_prefix(globals.len()));
        bytes.extend_from_slice(&globals);
        bytes.extend_from_slice(&length_prefix(self.disk.len()));
        bytes.extend_from_slice(&self.disk);
        Ok(bytes)
    }

    /// Parse the snapshot byte layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        let mut pos = 0;
        let memory = take(bytes, &mut pos, MEMORY_SIZE)?.to_vec();

        let globals_len = BigEndian::read_u32(take(bytes, &mut pos, 4)?) as usize;
        let globals = serde_json::from_slice(take(bytes, &mut pos, globals_len)?)?;

        let disk_len = BigEndian::read_u32(take(bytes, &mut pos, 4)?) as usize;
        if disk_len > STORAGE_SIZE {
            return Err(StateError::DiskSize(disk_len));
        }
        let disk = take(bytes, &mut pos, disk_len)?.to_vec();

        if pos != bytes.len() {
            return Err(StateError::TrailingBytes(bytes.len() - pos));
        }

        Ok(Self {
            memory,
            globals,
            disk,
        })
    }
}

fn length_prefix(len: usize) -> [u8; 4] {
    let mut buf = [0; 4];
    BigEndian::write_u32(&mut buf, len as u32);
    buf
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], StateError> {
    let end = pos.saturating_add(len);
    let slice = bytes.get(*pos..end).ok_or(StateError::Truncated {
        expected: end,
        actual: bytes.len(),
    })?;
    *pos = end;
    Ok(slice)
}
