//! File-backed shared memory segment for the row channel.
//!
//! A segment is a file (normally on tmpfs) mapped `MAP_SHARED` into both the
//! producer and the consumer process. It holds a fixed header followed by the
//! data region:
//!
//! ```text
//! offset  size  field
//! 0       4     magic ("DJTQ")
//! 4       1     format version
//! 5       1     writer attached flag
//! 6       1     producer finished flag
//! 7       1     reserved
//! 8       8     buffered row count
//! 16      8     read cursor (offset into the data region)
//! 24      8     write cursor (offset into the data region)
//! 32      ...   data region
//! ```
//!
//! The flags and counters are only ever accessed atomically.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use memmap2::MmapMut;

use super::error::ChannelError;

/// Header size in the segment file.
pub(crate) const SEGMENT_HEADER_SIZE: usize = 32;
/// Magic number for segment identification ("DJTQ").
const SEGMENT_MAGIC: u32 = 0x444A_5451;
/// Current segment format version.
const SEGMENT_VERSION: u8 = 1;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const WRITER_OFFSET: usize = 5;
const FINISHED_OFFSET: usize = 6;

/// 64-bit header counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counter {
    RowCount,
    ReadCursor,
    WriteCursor,
}

impl Counter {
    const fn offset(self) -> usize {
        match self {
            Counter::RowCount => 8,
            Counter::ReadCursor => 16,
            Counter::WriteCursor => 24,
        }
    }
}

/// One-byte header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flag {
    WriterAttached,
    ProducerFinished,
}

impl Flag {
    const fn offset(self) -> usize {
        match self {
            Flag::WriterAttached => WRITER_OFFSET,
            Flag::ProducerFinished => FINISHED_OFFSET,
        }
    }
}

/// A mapped channel segment.
///
/// This type is `Send` but not `Sync`: each process side owns exactly one
/// mapping through its reader or writer handle.
pub(crate) struct Segment {
    mmap: MmapMut,
    path: PathBuf,
    /// Capacity of the data region.
    capacity: usize,
}

impl Segment {
    /// Exclusively creates and zero-initializes a segment at `path`.
    pub(crate) fn create(path: &Path, capacity: usize) -> Result<Self, ChannelError> {
        let alloc_err = |source| ChannelError::AllocationFailed {
            path: path.to_path_buf(),
            source,
        };

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ChannelError::AlreadyExists {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(alloc_err(e)),
        };

        // set_len zero-fills, which leaves every counter and flag at zero.
        let mapped = file
            .set_len((SEGMENT_HEADER_SIZE + capacity) as u64)
            .and_then(|()| Self::map(&file));
        let mmap = match mapped {
            Ok(mmap) => mmap,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(path) {
                    tracing::warn!(
                        "Failed to remove partially created segment {}: {cleanup}",
                        path.display()
                    );
                }
                return Err(alloc_err(e));
            }
        };

        let mut segment = Self {
            mmap,
            path: path.to_path_buf(),
            capacity,
        };
        segment.mmap[VERSION_OFFSET] = SEGMENT_VERSION;
        // Magic last: a writer treats a zero magic as "not created yet".
        segment.magic().store(SEGMENT_MAGIC, Ordering::Release);

        tracing::info!(
            path = %path.display(),
            capacity,
            "created channel segment"
        );
        Ok(segment)
    }

    /// Attaches to an existing, initialized segment at `path`.
    pub(crate) fn attach(path: &Path) -> Result<Self, ChannelError> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ChannelError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(ChannelError::AttachFailed {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        let attach_err = |source| ChannelError::AttachFailed {
            path: path.to_path_buf(),
            source,
        };
        let len = file.metadata().map_err(attach_err)?.len();
        // On 32-bit systems this could truncate, but capacity is bounded by MAX_CAPACITY
        #[allow(clippy::cast_possible_truncation)]
        let len = len as usize;
        if len < SEGMENT_HEADER_SIZE {
            // The reader is between create and set_len.
            return Err(ChannelError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let mmap = Self::map(&file).map_err(attach_err)?;
        let mut segment = Self {
            mmap,
            path: path.to_path_buf(),
            capacity: len - SEGMENT_HEADER_SIZE,
        };

        match segment.magic().load(Ordering::Acquire) {
            0 => {
                return Err(ChannelError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            SEGMENT_MAGIC => {}
            other => {
                return Err(ChannelError::IncompatibleSegment {
                    path: path.to_path_buf(),
                    reason: format!("bad magic number {other:#010x}"),
                })
            }
        }
        let version = segment.mmap[VERSION_OFFSET];
        if version != SEGMENT_VERSION {
            return Err(ChannelError::IncompatibleSegment {
                path: path.to_path_buf(),
                reason: format!("unsupported format version {version}"),
            });
        }

        tracing::debug!(path = %path.display(), "attached channel segment");
        Ok(segment)
    }

    fn map(file: &File) -> std::io::Result<MmapMut> {
        // SAFETY: The file was opened read/write by this process and is only
        // resized by its creator before any other side maps it. Concurrent
        // access from the peer process goes through the atomic header words;
        // data bytes are only read below the published write cursor.
        #[allow(unsafe_code)]
        unsafe {
            MmapMut::map_mut(file)
        }
    }

    /// Path of the backing file.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Capacity of the data region.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// The data region.
    pub(crate) fn data(&self) -> &[u8] {
        &self.mmap[SEGMENT_HEADER_SIZE..]
    }

    /// The data region, writable.
    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.mmap[SEGMENT_HEADER_SIZE..]
    }

    /// Header counter as an atomic.
    pub(crate) fn counter(&mut self, counter: Counter) -> &AtomicU64 {
        let offset = counter.offset();
        // SAFETY: The mapping is page-aligned and at least SEGMENT_HEADER_SIZE
        // bytes long, so `offset` (a multiple of 8 below the header size) is
        // in bounds and suitably aligned for a u64. The pointer comes from a
        // unique borrow of the mapping and the returned reference borrows
        // `self`, so it cannot outlive the mapping.
        #[allow(unsafe_code)]
        unsafe {
            AtomicU64::from_ptr(self.mmap.as_mut_ptr().add(offset).cast::<u64>())
        }
    }

    /// Header flag as an atomic.
    pub(crate) fn flag(&mut self, flag: Flag) -> &AtomicU8 {
        let offset = flag.offset();
        // SAFETY: Single byte inside the mapped header; see `counter`.
        #[allow(unsafe_code)]
        unsafe {
            AtomicU8::from_ptr(self.mmap.as_mut_ptr().add(offset))
        }
    }

    fn magic(&mut self) -> &AtomicU32 {
        // SAFETY: Offset 0 of a page-aligned mapping; see `counter`.
        #[allow(unsafe_code)]
        unsafe {
            AtomicU32::from_ptr(self.mmap.as_mut_ptr().add(MAGIC_OFFSET).cast::<u32>())
        }
    }

    /// Unmaps the segment and deletes its backing file.
    pub(crate) fn remove(self) -> Result<(), ChannelError> {
        let Segment { mmap, path, .. } = self;
        drop(mmap);
        fs::remove_file(&path).map_err(|source| ChannelError::RemoveFailed {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), "removed channel segment");
        Ok(())
    }
}
