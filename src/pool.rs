//! Fixed-size object pool backing crate-internal metadata (spans, radix
//! tree nodes). Bump allocation within OS-backed slabs, with a free list
//! for recycled objects. Never routes through the allocator it backs.

use crate::config::PAGE_SIZE;
use crate::platform;
use crate::sync::SpinMutex;
use core::marker::PhantomData;
use core::ptr;

/// Size of one slab requested from the OS, in bytes.
const SLAB_SIZE: usize = 128 * 1024;

struct FreeNode {
    next: *mut FreeNode,
}

struct PoolInner<T> {
    free_list: *mut FreeNode,
    bump_ptr: *mut u8,
    bump_end: *mut u8,
    _marker: PhantomData<T>,
}

// SAFETY: PoolInner is only accessed through a SpinMutex, which provides
// exclusive access. The raw pointers point to slab memory that outlives
// every thread that can observe it.
unsafe impl<T> Send for PoolInner<T> {}

impl<T> PoolInner<T> {
    const fn new() -> Self {
        Self {
            free_list: ptr::null_mut(),
            bump_ptr: ptr::null_mut(),
            bump_end: ptr::null_mut(),
            _marker: PhantomData,
        }
    }

    fn obj_size() -> usize {
        core::mem::size_of::<T>().max(core::mem::size_of::<*mut ()>())
    }

    unsafe fn alloc(&mut self) -> *mut T {
        if !self.free_list.is_null() {
            let node = self.free_list;
            self.free_list = unsafe { (*node).next };
            return node as *mut T;
        }

        let size = Self::obj_size();
        let align = core::mem::align_of::<T>();
        let start = self.bump_ptr as usize;
        let aligned = (start + align - 1) & !(align - 1);
        let end = aligned + size;

        if end <= self.bump_end as usize {
            self.bump_ptr = end as *mut u8;
            return aligned as *mut T;
        }

        let slab_size = SLAB_SIZE.max(PAGE_SIZE);
        let slab = unsafe { platform::page_alloc(slab_size) };
        if slab.is_null() {
            return ptr::null_mut();
        }
        self.bump_ptr = slab;
        self.bump_end = unsafe { slab.add(slab_size) };

        unsafe { self.alloc() }
    }

    unsafe fn free(&mut self, obj: *mut T) {
        let node = obj as *mut FreeNode;
        unsafe { (*node).next = self.free_list };
        self.free_list = node;
    }
}

/// A process-wide, lock-guarded slab allocator for a single metadata type.
///
/// Objects returned by [`Pool::alloc`] are uninitialized; callers must
/// write every field before use. Recycled objects are returned as-is
/// (not zeroed) — callers that need zeroed metadata must zero it
/// themselves, mirroring how span allocation zeroes fresh `Span`s.
pub struct Pool<T> {
    inner: SpinMutex<PoolInner<T>>,
}

impl<T> Pool<T> {
    pub const fn new() -> Self {
        Self {
            inner: SpinMutex::new(PoolInner::new()),
        }
    }

    /// Allocate one `T`-sized, `T`-aligned slot. Returns null only on OS
    /// allocation failure (which is itself treated as fatal by callers).
    pub fn alloc(&self) -> *mut T {
        unsafe { self.inner.lock().alloc() }
    }

    /// Return a slot to the pool for reuse.
    ///
    /// # Safety
    ///
    /// `obj` must have been returned by [`Pool::alloc`] on this pool and
    /// must not be referenced again after this call.
    pub unsafe fn free(&self, obj: *mut T) {
        unsafe { self.inner.lock().free(obj) };
    }
}
