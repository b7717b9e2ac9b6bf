use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::error::{BufferError, BufferResult};

type Release = Box<dyn FnOnce(Vec<u8>) + Send>;

/// How a buffer's bytes are owned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// Allocated and freed by the buffer.
    Owned,
    /// Handed in by a caller, returned to its release callback on drop.
    External,
    /// A byte range of a parent buffer, which it keeps alive.
    View,
    /// An independent copy of another buffer's contents.
    Copy,
}

enum Storage {
    Owned {
        data: UnsafeCell<Box<[u8]>>,
        copied: bool,
    },
    External {
        data: UnsafeCell<Vec<u8>>,
        release: Option<Release>,
    },
    View {
        parent: Arc<ReferencedBuffer>,
        offset: usize,
    },
}

/// A shareable byte buffer with a non-blocking exclusive lock.
///
/// Buffers are shared through `Arc`. The bytes are only reachable through
/// [`try_lock`](Self::try_lock), which hands out a [`BufferGuard`] when no
/// other guard is outstanding and `None` otherwise. It never blocks.
///
/// A view has no lock of its own: locking it locks the root buffer it was
/// cut from, so a view and its parent can never be accessed at once.
pub struct ReferencedBuffer {
    locked: AtomicBool,
    len: usize,
    storage: Storage,
}

// SAFETY: the bytes behind the UnsafeCells are only touched through a
// BufferGuard, and at most one guard per root buffer exists at a time
// (enforced by the compare-exchange in `try_lock`). The release callback is
// only touched from `drop`, which has exclusive access.
unsafe impl Send for ReferencedBuffer {}
// SAFETY: see above.
unsafe impl Sync for ReferencedBuffer {}

impl ReferencedBuffer {
    /// A zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::owned(data.into_boxed_slice(), false)
    }

    fn owned(data: Box<[u8]>, copied: bool) -> Self {
        Self {
            locked: AtomicBool::new(false),
            len: data.len(),
            storage: Storage::Owned {
                data: UnsafeCell::new(data),
                copied,
            },
        }
    }

    /// Wrap caller-owned bytes. `release` receives them back when the
    /// buffer is dropped.
    pub fn with_release<F>(data: Vec<u8>, release: F) -> Self
    where
        F: FnOnce(Vec<u8>) + Send + 'static,
    {
        Self {
            locked: AtomicBool::new(false),
            len: data.len(),
            storage: Storage::External {
                data: UnsafeCell::new(data),
                release: Some(Box::new(release)),
            },
        }
    }

    /// A view of `len` bytes of `parent` starting at `offset`.
    pub fn view(parent: &Arc<Self>, offset: usize, len: usize) -> BufferResult<Self> {
        let parent_len = parent.len();
        match offset.checked_add(len) {
            Some(end) if end <= parent_len => Ok(Self {
                locked: AtomicBool::new(false),
                len,
                storage: Storage::View {
                    parent: Arc::clone(parent),
                    offset,
                },
            }),
            _ => Err(BufferError::OutOfRange {
                offset,
                len,
                parent_len,
            }),
        }
    }

    /// An eager, independent copy of `source`. Fails if `source` is locked.
    pub fn copy_of(source: &Self) -> BufferResult<Self> {
        let guard = source.try_lock().ok_or(BufferError::Locked)?;
        Ok(Self::owned(Box::from(&*guard), true))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn kind(&self) -> BufferKind {
        match &self.storage {
            Storage::Owned { copied: false, .. } => BufferKind::Owned,
            Storage::Owned { copied: true, .. } => BufferKind::Copy,
            Storage::External { .. } => BufferKind::External,
            Storage::View { .. } => BufferKind::View,
        }
    }

    /// The buffer a view was cut from.
    pub fn parent(&self) -> Option<&Arc<ReferencedBuffer>> {
        match &self.storage {
            Storage::View { parent, .. } => Some(parent),
            _ => None,
        }
    }

    /// Byte offset into the parent; zero for anything but a view.
    pub fn offset(&self) -> usize {
        match &self.storage {
            Storage::View { offset, .. } => *offset,
            _ => 0,
        }
    }

    fn lock_flag(&self) -> &AtomicBool {
        match &self.storage {
            Storage::View { parent, .. } => parent.lock_flag(),
            _ => &self.locked,
        }
    }

    /// # Safety
    ///
    /// The caller must hold the root lock for the lifetime of any reference
    /// derived from the returned pointer.
    unsafe fn data_ptr(&self) -> *mut u8 {
        match &self.storage {
            Storage::Owned { data, .. } => (*data.get()).as_mut_ptr(),
            Storage::External { data, .. } => (*data.get()).as_mut_ptr(),
            Storage::View { parent, offset } => parent.data_ptr().add(*offset),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock_flag().load(Ordering::Acquire)
    }

    /// Take exclusive access, or `None` if a guard is already outstanding.
    pub fn try_lock(&self) -> Option<BufferGuard<'_>> {
        let flag = self.lock_flag();
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        // SAFETY: the root flag was just acquired, so no other guard aliases
        // these bytes until this guard releases it.
        let ptr = unsafe { self.data_ptr() };
        Some(BufferGuard {
            flag,
            ptr,
            len: self.len,
            _marker: PhantomData,
        })
    }

    /// Copy the contents out. Fails if the buffer is locked.
    pub fn to_vec(&self) -> BufferResult<Vec<u8>> {
        self.try_lock()
            .map(|guard| guard.to_vec())
            .ok_or(BufferError::Locked)
    }
}

impl From<Vec<u8>> for ReferencedBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl fmt::Debug for ReferencedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferencedBuffer")
            .field("kind", &self.kind())
            .field("len", &self.len)
            .field("offset", &self.offset())
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl Drop for ReferencedBuffer {
    fn drop(&mut self) {
        if *self.locked.get_mut() {
            warn!(len = self.len, kind = ?self.kind(), "buffer dropped while locked");
        }
        if let Storage::External { data, release } = &mut self.storage {
            if let Some(release) = release.take() {
                release(std::mem::take(data.get_mut()));
            }
        }
    }
}

/// Exclusive access to a buffer's bytes; unlocks on drop.
pub struct BufferGuard<'a> {
    flag: &'a AtomicBool,
    ptr: *mut u8,
    len: usize,
    _marker: PhantomData<&'a mut [u8]>,
}

impl Deref for BufferGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the guard holds the root lock and `ptr..ptr+len` lies
        // inside the locked allocation.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl DerefMut for BufferGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as for `deref`; `&mut self` makes the access unique.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for BufferGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
