//! Thread-scoped file sessions
//!
//! A single OS handle has one cursor, so interleaved seek+read pairs from
//! different threads would corrupt each other. Instead every thread gets its
//! own handle for the duration of a scoped acquisition: entering opens a
//! fresh handle and seeks it to where this thread last left off, leaving
//! records the position and closes the handle. Per-thread state lives in a
//! sharded map keyed by thread id; each slot is only touched by its owner
//! and is removed when its thread exits.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

#[derive(Debug, Default)]
struct ThreadSlot {
    position: u64,
    active: bool,
}

type SlotMap = DashMap<ThreadId, ThreadSlot>;

// Removes the owning thread's slot from every live session at thread exit.
struct SlotReaper {
    id: ThreadId,
    maps: Vec<Weak<SlotMap>>,
}

impl Drop for SlotReaper {
    fn drop(&mut self) {
        for map in self.maps.drain(..).filter_map(|map| map.upgrade()) {
            map.remove(&self.id);
        }
    }
}

thread_local! {
    static REAPER: RefCell<Option<SlotReaper>> = RefCell::new(None);
}

fn reap_on_exit(slots: &Arc<SlotMap>, id: ThreadId) {
    // During thread teardown the reaper may already be gone; the slot then
    // outlives the thread until `forget_current_thread` or session drop.
    let _ = REAPER.try_with(|reaper| {
        let mut reaper = reaper.borrow_mut();
        let reaper = reaper.get_or_insert_with(|| SlotReaper {
            id,
            maps: Vec::new(),
        });
        reaper.maps.retain(|map| map.strong_count() > 0);
        reaper.maps.push(Arc::downgrade(slots));
    });
}

/// Per-thread handle pool over one file path.
///
/// Holds at most one slot per live thread that has entered it.
#[derive(Debug)]
pub struct FileSession {
    path: PathBuf,
    slots: Arc<SlotMap>,
}

impl FileSession {
    /// Create a session. Nothing is opened until [`FileSession::enter`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Path this session reads.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a handle for the calling thread.
    ///
    /// Acquisitions on one thread must be sequential: entering again while
    /// this thread's guard is alive fails with `ErrorKind::WouldBlock`.
    pub fn enter(&self) -> io::Result<SessionGuard<'_>> {
        let id = thread::current().id();

        let position = {
            let mut slot = match self.slots.entry(id) {
                Entry::Occupied(slot) => slot.into_ref(),
                Entry::Vacant(vacant) => {
                    reap_on_exit(&self.slots, id);
                    vacant.insert(ThreadSlot::default())
                }
            };
            if slot.active {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!(
                        "file session for {} re-entered on the same thread",
                        self.path.display()
                    ),
                ));
            }
            slot.active = true;
            slot.position
        };

        let opened = File::open(&self.path).and_then(|mut file| {
            file.seek(SeekFrom::Start(position))?;
            Ok(file)
        });

        match opened {
            Ok(file) => {
                trace!(path = %self.path.display(), ?id, position, "file session entered");
                Ok(SessionGuard {
                    session: self,
                    id,
                    file,
                })
            }
            Err(e) => {
                if let Some(mut slot) = self.slots.get_mut(&id) {
                    slot.active = false;
                }
                Err(e)
            }
        }
    }

    /// Position the calling thread left its last handle at.
    pub fn remembered_position(&self) -> u64 {
        self.slots
            .get(&thread::current().id())
            .map(|slot| slot.position)
            .unwrap_or(0)
    }

    /// Drop the calling thread's slot, e.g. before the thread exits.
    pub fn forget_current_thread(&self) {
        let id = thread::current().id();
        self.slots.remove_if(&id, |_, slot| !slot.active);
    }

    /// Number of live threads with a remembered slot.
    pub fn thread_count(&self) -> usize {
        self.slots.len()
    }
}

/// A thread's open handle; closes it and records the position on drop.
#[derive(Debug)]
pub struct SessionGuard<'a> {
    session: &'a FileSession,
    id: ThreadId,
    file: File,
}

impl SessionGuard<'_> {
    /// Seek to `offset` and read exactly `len` bytes.
    ///
    /// Ranges past the end of the file fail before anything is allocated.
    pub fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let file_len = self.file_len()?;
        if offset.checked_add(len as u64).map_or(true, |end| end > file_len) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at {} runs past end of {} ({} bytes)",
                    len,
                    offset,
                    self.session.path.display(),
                    file_len
                ),
            ));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Length of the underlying file.
    pub fn file_len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

impl Read for SessionGuard<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for SessionGuard<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let position = self.file.stream_position().ok();
        if let Some(mut slot) = self.session.slots.get_mut(&self.id) {
            if let Some(position) = position {
                slot.position = position;
            }
            slot.active = false;
        }
        trace!(path = %self.session.path.display(), id = ?self.id, ?position, "file session left");
    }
}
