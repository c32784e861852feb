//! Tunable constants shared across every tier.
//!
//! There is no runtime configuration file: an allocator cannot safely read
//! one without itself allocating, so every knob here is a compile-time
//! constant. Changing one changes the crate's behavior uniformly; nothing
//! downstream should hardcode these values directly.

/// Page size shift. A page is `1 << PAGE_SHIFT` bytes.
pub const PAGE_SHIFT: usize = 13;

/// Page size in bytes (8 KiB).
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Largest size served by a size class. Requests above this go straight
/// to the page heap as large-object spans.
pub const SMALL_MAX: usize = 256 * 1024;

/// Number of size classes, including the class-0 sentinel ("not a small
/// size"). Classes 1..NUM_CLASSES partition `[1, SMALL_MAX]`.
pub const NUM_CLASSES: usize = 208;

/// Largest span (in pages) kept in a page heap bucket. Spans bigger than
/// this bypass the bucket array entirely and are never coalesced.
pub const MAX_PAGES: usize = 128;

/// Branch factor (bits consumed per level) of the page -> span radix tree.
pub const RADIX_BITS_PER_LEVEL: u32 = 6;

/// Number of children per radix tree node (`1 << RADIX_BITS_PER_LEVEL`).
pub const RADIX_FANOUT: usize = 1 << RADIX_BITS_PER_LEVEL;

/// Number of bits in a page id we track (usize is 64-bit on every platform
/// we support; the tree grows only as deep as the highest page id seen).
pub const RADIX_KEY_BITS: u32 = usize::BITS;
