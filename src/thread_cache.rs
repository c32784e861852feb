//! Thread Cache (front-end): per-thread free lists for lock-free allocation.
//!
//! Each thread gets its own ThreadCache via `thread_local!`. The fast path
//! (thread cache hit) requires zero synchronization. When the thread cache
//! is empty or full, it batches transfers directly to/from the central
//! free list, dropping its own bookkeeping lock before the central lock is
//! taken (see [`crate::central_free_list::fetch_range_dropping_lock`]).
//!
//! Growth is plain slow-start, no budget accounting: `max_length` starts
//! at 1 and grows by 2 on every miss, capped at the size class's batch
//! count. `list_too_long` always releases exactly `max_length` objects
//! and never shrinks it — there is no low-water-mark scavenging and no
//! global byte budget to steal from or return to.

use crate::central_free_list::{self, CentralCache};
use crate::page_heap::PageHeap;
use crate::pagemap::PageMap;
use crate::size_class::{self, TABLE_LEN};
use crate::span::FreeObject;
use crate::sync::SpinMutex;
use core::ptr;

/// Per-size-class free list within the thread cache.
struct FreeList {
    /// Head of the singly-linked intrusive free list.
    head: *mut FreeObject,
    /// Number of objects currently in this list.
    length: u32,
    /// Current growth ceiling before `list_too_long` kicks in.
    max_length: u32,
}

impl FreeList {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            length: 0,
            max_length: 1,
        }
    }

    #[inline]
    fn pop(&mut self) -> *mut FreeObject {
        let obj = self.head;
        if !obj.is_null() {
            self.head = unsafe { (*obj).next };
            self.length -= 1;
        }
        obj
    }

    #[inline]
    fn push(&mut self, obj: *mut FreeObject) {
        unsafe { (*obj).next = self.head };
        self.head = obj;
        self.length += 1;
    }

    /// Push a linked list of `count` objects.
    fn push_batch(&mut self, head: *mut FreeObject, count: u32) {
        if head.is_null() || count == 0 {
            return;
        }
        let mut tail = head;
        for _ in 1..count {
            let next = unsafe { (*tail).next };
            if next.is_null() {
                break;
            }
            tail = next;
        }
        unsafe { (*tail).next = self.head };
        self.head = head;
        self.length += count;
    }

    /// Pop up to `count` objects into a linked list. Returns (actual_count, head, tail).
    fn pop_batch(&mut self, count: u32) -> (u32, *mut FreeObject, *mut FreeObject) {
        let mut head: *mut FreeObject = ptr::null_mut();
        let mut tail: *mut FreeObject = ptr::null_mut();
        let mut popped = 0u32;
        while popped < count && !self.head.is_null() {
            let obj = self.head;
            self.head = unsafe { (*obj).next };
            unsafe { (*obj).next = head };
            if tail.is_null() {
                tail = obj; // First popped becomes tail after reversal
            }
            head = obj;
            self.length -= 1;
            popped += 1;
        }
        (popped, head, tail)
    }
}

/// Per-thread cache holding free lists for each size class.
pub struct ThreadCache {
    lists: [FreeList; TABLE_LEN],
    initialized: bool,
}

impl Default for ThreadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadCache {
    /// Const-constructible ThreadCache. Used with `#[thread_local]` for
    /// zero-cost TLS. Call `init()` before first use.
    pub const fn new_const() -> Self {
        Self {
            lists: [const { FreeList::new() }; TABLE_LEN],
            initialized: false,
        }
    }

    pub fn new() -> Self {
        Self {
            lists: [const { FreeList::new() }; TABLE_LEN],
            initialized: true,
        }
    }

    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[cold]
    pub fn init(&mut self) {
        self.initialized = true;
    }

    /// Flush all cached objects back to the central cache.
    /// Called on thread exit via `allocator::TcFlushGuard`.
    ///
    /// # Safety
    ///
    /// Must only be called once per thread cache lifetime (on thread exit).
    pub unsafe fn flush_and_destroy(
        &mut self,
        central: &CentralCache,
        page_heap: &SpinMutex<PageHeap>,
        pagemap: &PageMap,
    ) {
        for class in 1..=size_class::NUM_CLASSES {
            let list = &mut self.lists[class];
            if list.length > 0 {
                let (count, head, _tail) = list.pop_batch(list.length);
                if count > 0 {
                    unsafe {
                        central_free_list::release_range_dropping_lock(
                            central.get(class),
                            head,
                            count as usize,
                            page_heap,
                            pagemap,
                        )
                    };
                }
            }
        }
        self.initialized = false;
    }

    /// Allocate an object of the given size class.
    /// Returns null if allocation fails.
    ///
    /// # Safety
    ///
    /// `class` must be a valid index in `1..=size_class::NUM_CLASSES`.
    #[inline]
    pub unsafe fn allocate(
        &mut self,
        class: usize,
        central: &CentralCache,
        page_heap: &SpinMutex<PageHeap>,
        pagemap: &PageMap,
    ) -> *mut u8 {
        let list = &mut self.lists[class];
        let obj = list.pop();
        if !obj.is_null() {
            return obj as *mut u8;
        }
        unsafe { self.fetch_from_central(class, central, page_heap, pagemap) }
    }

    /// Deallocate an object of the given size class.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by a prior `allocate` call for `class`.
    #[inline]
    pub unsafe fn deallocate(
        &mut self,
        ptr: *mut u8,
        class: usize,
        central: &CentralCache,
        page_heap: &SpinMutex<PageHeap>,
        pagemap: &PageMap,
    ) {
        let list = &mut self.lists[class];
        list.push(ptr as *mut FreeObject);

        if list.length > list.max_length {
            unsafe { self.list_too_long(class, central, page_heap, pagemap) };
        }
    }

    /// Slow path: fetch a batch of objects from the central free list.
    ///
    /// Slow start: fetches `min(max_length, batch)` objects, then grows
    /// `max_length` by 2 (capped at the class's batch count) for next time.
    #[cold]
    unsafe fn fetch_from_central(
        &mut self,
        class: usize,
        central: &CentralCache,
        page_heap: &SpinMutex<PageHeap>,
        pagemap: &PageMap,
    ) -> *mut u8 {
        let batch = size_class::batch_count(class);
        let list = &mut self.lists[class];
        let num_to_move = (list.max_length as usize).min(batch).max(1);

        let (count, head) = unsafe {
            central_free_list::fetch_range_dropping_lock(
                central.get(class),
                class,
                num_to_move,
                page_heap,
                pagemap,
            )
        };

        if count == 0 || head.is_null() {
            return ptr::null_mut();
        }

        let result = head;
        let remaining_head = unsafe { (*head).next };
        let remaining_count = count - 1;

        if remaining_count > 0 {
            list.push_batch(remaining_head, remaining_count as u32);
        }

        list.max_length = (list.max_length + 2).min(batch as u32);

        result as *mut u8
    }

    /// Release exactly `max_length` objects back to the central cache.
    /// `max_length` itself never shrinks here.
    unsafe fn list_too_long(
        &mut self,
        class: usize,
        central: &CentralCache,
        page_heap: &SpinMutex<PageHeap>,
        pagemap: &PageMap,
    ) {
        let list = &mut self.lists[class];
        let to_release = list.max_length.min(list.length);
        if to_release == 0 {
            return;
        }

        let (count, head, _tail) = list.pop_batch(to_release);

        unsafe {
            central_free_list::release_range_dropping_lock(
                central.get(class),
                head,
                count as usize,
                page_heap,
                pagemap,
            )
        };
    }
}
