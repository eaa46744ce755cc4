//! Wire format shared with the `buddyprobe` companion driver.
//!
//! Each query is a single ioctl on the driver's character device. The
//! argument records are fixed-layout `#[repr(C)]` structs; their sizes and
//! field offsets are ABI and are asserted at compile time. The command
//! numbers follow the classic `_IOR`/`_IOWR` encoding with the magic byte
//! [`PROBE_MAGIC`]; a driver built for a different kernel profile still
//! speaks the same commands (see
//! [`KernelProfile`](crate::probe::KernelProfile)).

/// Path of the driver's character device node.
pub const DEVICE_PATH: &str = "/dev/buddyprobe";

/// ioctl magic byte claimed by the driver.
pub const PROBE_MAGIC: u8 = b'B';

/// Command number of the free-list count query.
pub const NR_FREELIST_COUNT: u8 = 1;
/// Command number of the address-translation query.
pub const NR_TRANSLATE: u8 = 2;
/// Command number of the physical-read query.
pub const NR_READ_PHYS: u8 = 3;

/// Argument record of the free-list count query.
///
/// The request carries no fields; the driver fills `num_pages` with the
/// number of pages resident in the selected per-CPU free list of the CPU
/// executing the call.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FreelistCountArgs {
    /// Pages resident in the selected list at the instant of the snapshot.
    pub num_pages: u64,
}

/// Argument record of the address-translation query.
///
/// The caller fills `virt`; the driver pins the backing page, fills `phys`
/// with the physical address, and releases the pin. Fails if `virt` has no
/// resident backing page.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct TranslateArgs {
    /// Virtual address in the calling process's address space.
    pub virt: u64,
    /// Physical address backing `virt`, filled by the driver.
    pub phys: u64,
}

/// Argument record of the physical-read query.
///
/// The caller fills `phys`; the driver fills `data` with the eight bytes
/// starting at that physical address. Fails if the address cannot be
/// mapped to a kernel-accessible virtual address.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadPhysArgs {
    /// Physical address to read from.
    pub phys: u64,
    /// Eight bytes of physical memory, filled by the driver.
    pub data: u64,
}

const _: () = assert!(size_of::<FreelistCountArgs>() == 8);
const _: () = assert!(size_of::<TranslateArgs>() == 16);
const _: () = assert!(size_of::<ReadPhysArgs>() == 16);
const _: () = assert!(align_of::<TranslateArgs>() == 8);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    // _IOC bit layout: nr | type << 8 | size << 16 | dir << 30
    const IOC_READ: u64 = 2;
    const IOC_WRITE: u64 = 1;

    fn ioc(dir: u64, nr: u8, size: usize) -> u64 {
        (dir << 30) | ((size as u64) << 16) | ((PROBE_MAGIC as u64) << 8) | nr as u64
    }

    #[test]
    fn test_command_encoding_matches_ioctl_macros() {
        assert_eq!(
            ioc(IOC_READ, NR_FREELIST_COUNT, size_of::<FreelistCountArgs>()),
            nix::request_code_read!(PROBE_MAGIC, NR_FREELIST_COUNT, size_of::<FreelistCountArgs>())
                as u64
        );
        assert_eq!(
            ioc(
                IOC_READ | IOC_WRITE,
                NR_TRANSLATE,
                size_of::<TranslateArgs>()
            ),
            nix::request_code_readwrite!(PROBE_MAGIC, NR_TRANSLATE, size_of::<TranslateArgs>())
                as u64
        );
        assert_eq!(
            ioc(
                IOC_READ | IOC_WRITE,
                NR_READ_PHYS,
                size_of::<ReadPhysArgs>()
            ),
            nix::request_code_readwrite!(PROBE_MAGIC, NR_READ_PHYS, size_of::<ReadPhysArgs>())
                as u64
        );
    }

    #[test]
    fn test_record_field_offsets() {
        assert_eq!(offset_of!(TranslateArgs, virt), 0);
        assert_eq!(offset_of!(TranslateArgs, phys), 8);
        assert_eq!(offset_of!(ReadPhysArgs, phys), 0);
        assert_eq!(offset_of!(ReadPhysArgs, data), 8);
        assert_eq!(offset_of!(FreelistCountArgs, num_pages), 0);
    }
}
