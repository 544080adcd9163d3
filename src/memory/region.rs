//! Shared Regions - named byte buffers backed by memory maps.
//!
//! Anonymous regions are private scratch memory that never touches the
//! allocator; file-backed regions can be shared with another process or
//! survive a restart. Either way the mapping is released when the region
//! is dropped, on every exit path.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use serde::Serialize;

use crate::error::MemoryError;

/// Where a region's bytes live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum RegionKind {
    /// Private anonymous mapping
    Anonymous,
    /// Shared mapping of a file, created or extended to the region size
    File(PathBuf),
}

/// Summary of a region for stats reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegionInfo {
    pub name: String,
    pub kind: RegionKind,
    pub len: usize,
}

/// A named, fixed-size memory-mapped byte buffer.
pub struct SharedRegion {
    name: String,
    kind: RegionKind,
    map: MmapMut,
}

impl SharedRegion {
    /// Map `len` bytes of anonymous memory.
    pub fn anonymous(name: impl Into<String>, len: usize) -> Result<Self, MemoryError> {
        if len == 0 {
            return Err(MemoryError::InvalidRegionSize);
        }
        let map = MmapOptions::new().len(len).map_anon()?;
        Ok(Self {
            name: name.into(),
            kind: RegionKind::Anonymous,
            map,
        })
    }

    /// Map `len` bytes of the file at `path`, creating or growing it.
    pub fn file_backed(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        len: usize,
    ) -> Result<Self, MemoryError> {
        if len == 0 {
            return Err(MemoryError::InvalidRegionSize);
        }
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() < len as u64 {
            file.set_len(len as u64)?;
        }

        // SAFETY: the mapping is only sound while no one truncates the file
        // underneath us; regions own their files for their whole lifetime.
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        Ok(Self {
            name: name.into(),
            kind: RegionKind::File(path.to_path_buf()),
            map,
        })
    }

    /// Open a region described by `kind`.
    pub fn open(name: impl Into<String>, kind: RegionKind, len: usize) -> Result<Self, MemoryError> {
        match kind {
            RegionKind::Anonymous => Self::anonymous(name, len),
            RegionKind::File(path) => Self::file_backed(name, path, len),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> &RegionKind {
        &self.kind
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Flush dirty pages of a file-backed region. No-op for anonymous ones.
    pub fn flush(&self) -> Result<(), MemoryError> {
        if let RegionKind::File(_) = self.kind {
            self.map.flush()?;
        }
        Ok(())
    }

    pub fn info(&self) -> RegionInfo {
        RegionInfo {
            name: self.name.clone(),
            kind: self.kind.clone(),
            len: self.len(),
        }
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("len", &self.map.len())
            .finish()
    }
}
