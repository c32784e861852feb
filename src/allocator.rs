//! Top-level allocator: ties all tiers together and implements GlobalAlloc.
//!
//! Static state lives here. The `TcMalloc` struct is zero-sized; all mutable
//! state is in module-level statics protected by spinlocks or atomics.
//!
//! Cache strategy (fastest to slowest):
//! - `std` feature: `std::thread_local!` with const-init (no lazy init
//!   overhead) and a paired flush guard that drains the cache to the
//!   Central Cache on thread exit
//! - neither: central free list only (locked, slowest)

use crate::PAGE_SIZE;
use crate::central_free_list::{self, CentralCache};
use crate::config::MAX_PAGES;
use crate::page_heap::PageHeap;
use crate::pagemap::PageMap;
use crate::size_class;
use crate::sync::SpinMutex;
use crate::{stat_add, stat_inc};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

#[cfg(feature = "std")]
use crate::thread_cache::ThreadCache;

use crate::span;

pub(crate) static PAGE_MAP: PageMap = PageMap::new();
pub(crate) static PAGE_HEAP: SpinMutex<PageHeap> = SpinMutex::new(PageHeap::new(&PAGE_MAP));
pub(crate) static CENTRAL_CACHE: CentralCache = CentralCache::new();

#[cfg(feature = "std")]
std::thread_local! {
    static TC_CELL: core::cell::UnsafeCell<ThreadCache> = const {
        core::cell::UnsafeCell::new(ThreadCache::new_const())
    };
}

// Thread-exit cleanup for `TC_CELL`: a `std::thread_local!` with no Drop
// impl is never flushed on thread exit, so every per-thread cached object
// would leak. `TcFlushGuard` is a second thread_local registered right
// after `TC_CELL` is first touched; std destroys thread locals in reverse
// registration order, so this guard's destructor runs while `TC_CELL` is
// still alive and drains it to the Central Cache.
#[cfg(feature = "std")]
struct TcFlushGuard;

#[cfg(feature = "std")]
impl Drop for TcFlushGuard {
    fn drop(&mut self) {
        let _ = TC_CELL.try_with(|cell| unsafe {
            let tc = &mut *cell.get();
            if tc.is_initialized() {
                tc.flush_and_destroy(&CENTRAL_CACHE, &PAGE_HEAP, &PAGE_MAP);
            }
        });
    }
}

#[cfg(feature = "std")]
std::thread_local! {
    static TC_GUARD: TcFlushGuard = const { TcFlushGuard };
}

/// tcmalloc-style allocator for Rust.
///
/// Register as the global allocator with:
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: rstcmalloc::TcMalloc = rstcmalloc::TcMalloc;
/// ```
pub struct TcMalloc;

unsafe impl GlobalAlloc for TcMalloc {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        if size == 0 {
            return layout.align() as *mut u8;
        }

        stat_inc!(alloc_count);
        stat_add!(alloc_bytes, size as u64);

        let align = layout.align();

        if align <= 8 {
            let class = size_class::index(size);
            if class != 0 {
                return unsafe { self.alloc_small(class) };
            }
        } else {
            let effective_size = size.max(align);
            let class = size_class::index(effective_size);
            if class != 0 {
                let class_size = size_class::class_to_size(class);
                if align > PAGE_SIZE || !class_size.is_multiple_of(align) {
                    return unsafe { self.alloc_large(layout) };
                }
                return unsafe { self.alloc_small(class) };
            }
        }

        unsafe { self.alloc_large(layout) }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        stat_inc!(dealloc_count);

        // Look up the actual size class from the span metadata, like tcmalloc.
        // We cannot trust layout.size() because realloc may return the same
        // pointer for a shrink (staying in-place when new_size fits in the
        // existing size class), so the caller's layout may not match the
        // span's real size class.
        let span = PAGE_MAP.get((ptr as usize) >> crate::PAGE_SHIFT);
        if span.is_null() {
            return;
        }

        let class = unsafe { (*span).size_class };
        if class != 0 {
            unsafe { self.dealloc_small(ptr, class) };
        } else {
            unsafe { PAGE_HEAP.lock().release_span(span) };
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.alloc(layout) };
        if !ptr.is_null() && layout.size() > 0 {
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if ptr.is_null() || layout.size() == 0 {
            let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
            return unsafe { self.alloc(new_layout) };
        }

        if new_size == 0 {
            unsafe { self.dealloc(ptr, layout) };
            return layout.align() as *mut u8;
        }

        stat_inc!(realloc_count);

        // Look up the REAL allocation size from span metadata, like tcmalloc.
        // We cannot trust layout.size() because prior reallocs may have returned
        // the same pointer for an in-place shrink, so the caller's layout may
        // carry a smaller size than the span's actual size class.
        let span = PAGE_MAP.get((ptr as usize) >> crate::PAGE_SHIFT);
        let old_usable = if !span.is_null() {
            let class = unsafe { (*span).size_class };
            if class != 0 {
                size_class::class_to_size(class)
            } else {
                (unsafe { (*span).num_pages }) * PAGE_SIZE
            }
        } else {
            layout.size() // Defensive fallback
        };

        // Fits in current allocation — return same pointer
        if new_size <= old_usable {
            return ptr;
        }

        // Must grow — allocate, copy, free
        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
        let new_ptr = unsafe { self.alloc(new_layout) };
        if !new_ptr.is_null() {
            unsafe { ptr::copy_nonoverlapping(ptr, new_ptr, old_usable.min(new_size)) };
            unsafe { self.dealloc(ptr, layout) };
        }
        new_ptr
    }
}

impl TcMalloc {
    #[cfg(feature = "std")]
    #[inline(always)]
    unsafe fn alloc_small(&self, class: usize) -> *mut u8 {
        match TC_CELL.try_with(|cell| unsafe {
            let tc = &mut *cell.get();
            if !tc.is_initialized() {
                tc.init();
                Self::register_flush_guard();
            }
            tc.allocate(class, &CENTRAL_CACHE, &PAGE_HEAP, &PAGE_MAP)
        }) {
            Ok(ptr) => ptr,
            Err(_) => unsafe { self.alloc_from_central(class) },
        }
    }

    #[cfg(feature = "std")]
    #[inline(always)]
    unsafe fn dealloc_small(&self, ptr: *mut u8, class: usize) {
        if TC_CELL
            .try_with(|cell| unsafe {
                let tc = &mut *cell.get();
                if !tc.is_initialized() {
                    tc.init();
                    Self::register_flush_guard();
                }
                tc.deallocate(ptr, class, &CENTRAL_CACHE, &PAGE_HEAP, &PAGE_MAP);
            })
            .is_err()
        {
            unsafe { self.dealloc_to_central(ptr, class) };
        }
    }

    /// Register this thread's flush guard so `TC_CELL` gets drained on
    /// thread exit. Idempotent — `try_with` only runs the init closure
    /// once per thread. Must be called only after `TC_CELL` itself has
    /// been touched (see [`TcFlushGuard`]'s doc comment).
    #[cfg(feature = "std")]
    #[cold]
    fn register_flush_guard() {
        let _ = TC_GUARD.try_with(|_| {});
    }

    #[cfg(not(feature = "std"))]
    #[inline(always)]
    unsafe fn alloc_small(&self, class: usize) -> *mut u8 {
        unsafe { self.alloc_from_central(class) }
    }

    #[cfg(not(feature = "std"))]
    #[inline(always)]
    unsafe fn dealloc_small(&self, ptr: *mut u8, class: usize) {
        unsafe { self.dealloc_to_central(ptr, class) };
    }

    unsafe fn alloc_from_central(&self, class: usize) -> *mut u8 {
        stat_inc!(thread_cache_misses);
        stat_inc!(central_cache_hits);
        let (count, head) = unsafe {
            central_free_list::fetch_range_dropping_lock(
                CENTRAL_CACHE.get(class),
                class,
                1,
                &PAGE_HEAP,
                &PAGE_MAP,
            )
        };
        if count == 0 || head.is_null() {
            ptr::null_mut()
        } else {
            head as *mut u8
        }
    }

    unsafe fn dealloc_to_central(&self, ptr: *mut u8, class: usize) {
        let obj = ptr as *mut crate::span::FreeObject;
        unsafe { (*obj).next = ptr::null_mut() };
        unsafe {
            central_free_list::release_range_dropping_lock(
                CENTRAL_CACHE.get(class),
                obj,
                1,
                &PAGE_HEAP,
                &PAGE_MAP,
            )
        };
    }

    unsafe fn alloc_large(&self, layout: Layout) -> *mut u8 {
        stat_inc!(page_heap_allocs);

        let size = layout.size();
        let align = layout.align();
        let size_pages = size.div_ceil(PAGE_SIZE);

        if align <= PAGE_SIZE {
            // Page alignment is sufficient — simple allocation
            let span = unsafe { PAGE_HEAP.lock().new_span(size_pages) };
            if span.is_null() {
                return ptr::null_mut();
            }
            unsafe {
                (*span).size_class = 0;
            }
            return unsafe { (*span).start_addr() };
        }

        // Over-aligned: align > PAGE_SIZE.
        // Over-allocate to guarantee an aligned region exists within.
        // Like tcmalloc's do_memalign: allocate extra, trim prefix/suffix.
        let align_pages = align / PAGE_SIZE;
        let total_pages = size_pages + align_pages - 1;

        let mut heap = PAGE_HEAP.lock();
        let span = unsafe { heap.new_span(total_pages) };
        if span.is_null() {
            return ptr::null_mut();
        }

        let start_addr = unsafe { (*span).start_addr() } as usize;
        let aligned_addr = (start_addr + align - 1) & !(align - 1);
        let prefix_pages = (aligned_addr - start_addr) / PAGE_SIZE;
        let suffix_pages = total_pages - prefix_pages - size_pages;

        unsafe {
            // new_span already registered the whole span to itself; splitting
            // it below re-registers each piece to its own span struct.
            PAGE_MAP.unregister_span(span);

            // Return prefix pages to page heap
            if prefix_pages > 0 {
                let prefix = span::alloc_span();
                if !prefix.is_null() {
                    (*prefix).start_page = (*span).start_page;
                    (*prefix).num_pages = prefix_pages;
                    heap.release_span(prefix);
                }
            }

            // Resize main span to the aligned region
            (*span).start_page += prefix_pages;
            (*span).num_pages = size_pages;
            (*span).size_class = 0;
            if size_pages > MAX_PAGES {
                // Oversize: `dealloc` routes this span through
                // `release_oversize_span`, which only ever removes
                // `start_page` from the page map. Registering every page
                // here would leave the rest pointing at a freed, recycled
                // `Span` after release — match the non-over-aligned
                // oversize path and map only the first page.
                PAGE_MAP.insert((*span).start_page, span);
            } else {
                PAGE_MAP.register_span(span);
            }

            // Return suffix pages to page heap
            if suffix_pages > 0 {
                let suffix = span::alloc_span();
                if !suffix.is_null() {
                    (*suffix).start_page = (*span).start_page + size_pages;
                    (*suffix).num_pages = suffix_pages;
                    heap.release_span(suffix);
                }
            }
        }

        aligned_addr as *mut u8
    }
}
