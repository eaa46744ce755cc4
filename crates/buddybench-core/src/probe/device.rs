use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use log::debug;
use nix::errno::Errno;

use crate::probe::proto::{
    FreelistCountArgs, NR_FREELIST_COUNT, NR_READ_PHYS, NR_TRANSLATE, PROBE_MAGIC, ReadPhysArgs,
    TranslateArgs,
};
use crate::probe::service::{FreelistSelector, KernelProfile, QueryService, ServiceError};

nix::ioctl_read!(buddyprobe_freelist_count, PROBE_MAGIC, NR_FREELIST_COUNT, FreelistCountArgs);
nix::ioctl_readwrite!(buddyprobe_translate, PROBE_MAGIC, NR_TRANSLATE, TranslateArgs);
nix::ioctl_readwrite!(buddyprobe_read_phys, PROBE_MAGIC, NR_READ_PHYS, ReadPhysArgs);

/// Query service backed by the `buddyprobe` character device.
///
/// Every query is marshalled as one fixed-layout record and exchanged with
/// the driver through a single ioctl. The driver performs the page pinning
/// and CPU pinning on its side; this type only owns the device handle and
/// the errno mapping.
pub struct DeviceService {
    dev: File,
}

impl DeviceService {
    /// Opens the device node.
    ///
    /// The driver is expected to be built for the same kernel profile as
    /// `profile`; the selected free list is logged for diagnosis since the
    /// count command itself carries no request fields.
    ///
    /// # Errors
    ///
    /// Returns the `open` error if the node cannot be opened (driver not
    /// loaded, insufficient privileges).
    pub fn open(
        path: &Path,
        profile: KernelProfile,
        selector: FreelistSelector,
    ) -> io::Result<Self> {
        let dev = OpenOptions::new().read(true).write(true).open(path)?;
        debug!(
            "opened probe device {} (watching order-{} {:?} pages, list index {})",
            path.display(),
            selector.order,
            selector.migratetype,
            profile.pcp_list_index(selector.migratetype, selector.order),
        );
        Ok(DeviceService { dev })
    }
}

impl QueryService for DeviceService {
    fn freelist_count(&mut self) -> Result<u64, ServiceError> {
        let mut args = FreelistCountArgs::default();
        match unsafe { buddyprobe_freelist_count(self.dev.as_raw_fd(), &mut args) } {
            Ok(_) => Ok(args.num_pages),
            Err(e) => Err(errno_to_error(e, None, None)),
        }
    }

    fn translate(&mut self, virt: u64) -> Result<u64, ServiceError> {
        let mut args = TranslateArgs {
            virt,
            ..Default::default()
        };
        match unsafe { buddyprobe_translate(self.dev.as_raw_fd(), &mut args) } {
            Ok(_) => Ok(args.phys),
            Err(e) => Err(errno_to_error(e, Some(virt), None)),
        }
    }

    fn read_phys(&mut self, phys: u64) -> Result<u64, ServiceError> {
        let mut args = ReadPhysArgs {
            phys,
            ..Default::default()
        };
        match unsafe { buddyprobe_read_phys(self.dev.as_raw_fd(), &mut args) } {
            Ok(_) => Ok(args.data),
            Err(e) => Err(errno_to_error(e, None, Some(phys))),
        }
    }
}

// The driver reports EFAULT both for a failed user-copy and for a page
// that could not be pinned; with a virtual address in play the latter is
// the overwhelmingly likely cause.
fn errno_to_error(errno: Errno, virt: Option<u64>, phys: Option<u64>) -> ServiceError {
    match (errno, virt, phys) {
        (Errno::ENOTTY, ..) => ServiceError::Unsupported,
        (Errno::EFAULT, Some(virt), _) => ServiceError::NotResident { virt },
        (Errno::EINVAL, _, Some(phys)) => ServiceError::InvalidAddress { phys },
        (Errno::EFAULT, ..) => ServiceError::Marshal,
        (e, ..) => ServiceError::Io(io::Error::from_raw_os_error(e as i32)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping_is_operation_aware() {
        assert!(matches!(
            errno_to_error(Errno::ENOTTY, None, None),
            ServiceError::Unsupported
        ));
        assert!(matches!(
            errno_to_error(Errno::EFAULT, Some(0x1000), None),
            ServiceError::NotResident { virt: 0x1000 }
        ));
        assert!(matches!(
            errno_to_error(Errno::EINVAL, None, Some(0x2000)),
            ServiceError::InvalidAddress { phys: 0x2000 }
        ));
        assert!(matches!(
            errno_to_error(Errno::EFAULT, None, None),
            ServiceError::Marshal
        ));
        assert!(matches!(
            errno_to_error(Errno::EPERM, None, None),
            ServiceError::Io(_)
        ));
    }

    #[test]
    fn test_open_missing_device_fails() {
        let err = DeviceService::open(
            Path::new("/dev/buddyprobe-does-not-exist"),
            KernelProfile::default(),
            FreelistSelector::default(),
        );
        assert!(err.is_err());
    }
}
