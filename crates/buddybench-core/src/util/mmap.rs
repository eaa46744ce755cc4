use std::fs::File;
use std::io;
use std::os::fd::{FromRawFd, RawFd};
use std::ptr::null_mut;

use libc::{
    MAP_ANONYMOUS, MAP_FIXED, MAP_POPULATE, MAP_PRIVATE, MAP_SHARED, MREMAP_FIXED, MREMAP_MAYMOVE,
    O_RDWR, O_TMPFILE, PROT_READ, PROT_WRITE, S_IRUSR, S_IWUSR,
};

use crate::util::PAGE_SIZE;

/// Maps populated anonymous memory.
///
/// The mapping is private, readable and writable, and faulted in up front
/// so every page is resident on return.
///
/// # Errors
///
/// Returns the `mmap` error on failure.
pub fn map_populated(len: usize) -> io::Result<*mut u8> {
    let v = unsafe {
        libc::mmap(
            null_mut(),
            len,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS | MAP_POPULATE,
            -1,
            0,
        )
    };
    if v == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(v as *mut u8)
}

/// Maps `len` bytes of a file as a populated shared mapping.
///
/// # Errors
///
/// Returns the `mmap` error on failure.
pub fn map_shared_file(fd: RawFd, len: usize) -> io::Result<*mut u8> {
    let v = unsafe {
        libc::mmap(
            null_mut(),
            len,
            PROT_READ | PROT_WRITE,
            MAP_SHARED | MAP_POPULATE,
            fd,
            0,
        )
    };
    if v == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(v as *mut u8)
}

/// Maps one file page as a populated shared mapping at a fixed address.
///
/// # Safety
///
/// `MAP_FIXED` replaces whatever is mapped at `addr`. The caller must own
/// that address range.
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub fn map_fixed_shared_page(addr: *mut u8, fd: RawFd) -> io::Result<*mut u8> {
    let v = unsafe {
        libc::mmap(
            addr as *mut libc::c_void,
            PAGE_SIZE,
            PROT_READ | PROT_WRITE,
            MAP_FIXED | MAP_SHARED | MAP_POPULATE,
            fd,
            0,
        )
    };
    if v == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(v as *mut u8)
}

/// Moves a mapping of `len` bytes to a fixed destination address.
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub fn remap_fixed(old: *mut u8, len: usize, new: *mut u8) -> io::Result<*mut u8> {
    let v = unsafe {
        libc::mremap(
            old as *mut libc::c_void,
            len,
            len,
            MREMAP_FIXED | MREMAP_MAYMOVE,
            new as *mut libc::c_void,
        )
    };
    if v == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(v as *mut u8)
}

/// Unmap memory
///
/// # Safety
/// * `addr` must be a valid pointer to a memory region previously allocated by `mmap`
/// * `len` must be less than or equal the length of the memory region previously allocated by `mmap`
pub unsafe fn unmap(addr: *mut u8, len: usize) -> io::Result<()> {
    if unsafe { libc::munmap(addr as *mut libc::c_void, len) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Locks the pages of `addr..addr+len` into RAM.
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub fn lock_pages(addr: *mut u8, len: usize) -> io::Result<()> {
    if unsafe { libc::mlock(addr as *const libc::c_void, len) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Releases a page lock taken with [`lock_pages`].
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub fn unlock_pages(addr: *mut u8, len: usize) -> io::Result<()> {
    if unsafe { libc::munlock(addr as *const libc::c_void, len) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Opens an unnamed temporary file on the `/dev/shm` tmpfs.
///
/// The file has no directory entry and is released when the returned
/// [`File`] is dropped.
///
/// # Errors
///
/// Returns the `open` error on failure.
pub fn shm_tmpfile() -> io::Result<File> {
    let fd = unsafe {
        libc::open(
            c"/dev/shm".as_ptr(),
            O_TMPFILE | O_RDWR,
            (S_IRUSR | S_IWUSR) as libc::c_uint,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Returns the number of currently available physical memory bytes.
pub fn avail_phys_bytes() -> io::Result<usize> {
    let pages = unsafe { libc::sysconf(libc::_SC_AVPHYS_PAGES) };
    if pages < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(pages as usize * PAGE_SIZE)
}
