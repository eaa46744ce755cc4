/// Page shift value (12 bits) for 4KB pages
pub const PAGE_SHIFT: usize = 12;
/// Standard page size (4096 bytes)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
/// Mask for extracting page offset
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Pageblock shift value (21 bits) for 2MB pageblocks
pub const PAGEBLOCK_SHIFT: usize = 21;
/// Pageblock size (2 MiB), the migration-type granule of the host allocator
pub const PAGEBLOCK_SIZE: usize = 1 << PAGEBLOCK_SHIFT;
/// Mask for extracting pageblock offset
pub const PAGEBLOCK_MASK: usize = PAGEBLOCK_SIZE - 1;
