//! POSIX shared memory region
//!
//! Thin owner of a `shm_open` + `mmap` mapping. The producer creates the
//! region exclusively and unlinks it on drop; readers map it read-only.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::MetadataExt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing::{debug, trace, warn};

use crate::error::{Result, RtspCamError};

/// Longest accepted channel name (NAME_MAX minus the leading slash)
const MAX_NAME_LEN: usize = 254;

/// Mode for newly created regions; readers may run as another user
const REGION_MODE: libc::mode_t = 0o644;

fn posix_name(name: &str) -> Result<CString> {
    if name.is_empty() {
        return Err(RtspCamError::channel("channel name cannot be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(RtspCamError::channel(format!(
            "channel name is {} bytes, maximum is {}",
            name.len(),
            MAX_NAME_LEN
        )));
    }
    if name.contains('/') {
        return Err(RtspCamError::channel(format!(
            "channel name '{}' cannot contain '/'",
            name
        )));
    }
    CString::new(format!("/{}", name))
        .map_err(|_| RtspCamError::channel(format!("channel name '{}' contains a NUL byte", name)))
}

fn shm_open(name: &CString, flags: libc::c_int, mode: libc::mode_t) -> io::Result<OwnedFd> {
    let fd = unsafe { libc::shm_open(name.as_ptr(), flags, mode) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn map(fd: &OwnedFd, len: usize, prot: libc::c_int) -> io::Result<NonNull<u8>> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            prot,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(ptr as *mut u8).ok_or_else(|| io::Error::other("mmap returned null"))
}

/// Device and inode of the object a name currently refers to
type RegionId = (u64, u64);

fn region_id(file: &File) -> io::Result<RegionId> {
    let meta = file.metadata()?;
    Ok((meta.dev(), meta.ino()))
}

fn linked_id(name: &CString) -> io::Result<RegionId> {
    let fd = shm_open(name, libc::O_RDONLY, 0)?;
    region_id(&File::from(fd))
}

/// A mapped POSIX shared memory region
pub struct ShmRegion {
    name: String,
    c_name: CString,
    base: NonNull<u8>,
    len: usize,
    writable: bool,
    /// Identity of the object this owner created, if it is the owner
    owner: Option<RegionId>,
}

// The mapping is plain shared memory; concurrent access goes through the
// atomic accessors or bounds-checked copies.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Create a new region of `len` bytes, failing if the name already exists
    pub fn create_exclusive(name: &str, len: usize) -> Result<Self> {
        let c_name = posix_name(name)?;

        if Self::exists(name) {
            return Err(RtspCamError::ChannelInUse { name: name.to_string() });
        }

        let fd = match shm_open(
            &c_name,
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
            REGION_MODE,
        ) {
            Ok(fd) => fd,
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                return Err(RtspCamError::ChannelInUse { name: name.to_string() });
            }
            Err(e) => {
                return Err(RtspCamError::channel(format!(
                    "shm_open('{}') failed: {}",
                    name, e
                )));
            }
        };

        // From here on we own the name; unlink it if sizing or mapping fails
        let unlink_on_error = |e: io::Error, what: &str| {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            RtspCamError::channel(format!("{} for '{}' failed: {}", what, name, e))
        };

        let file = File::from(fd);
        file.set_len(len as u64)
            .map_err(|e| unlink_on_error(e, "ftruncate"))?;
        let id = region_id(&file).map_err(|e| unlink_on_error(e, "fstat"))?;
        let fd = OwnedFd::from(file);

        let base = map(&fd, len, libc::PROT_READ | libc::PROT_WRITE)
            .map_err(|e| unlink_on_error(e, "mmap"))?;

        debug!(name, len, "Created shared memory region");

        Ok(Self {
            name: name.to_string(),
            c_name,
            base,
            len,
            writable: true,
            owner: Some(id),
        })
    }

    /// Map an existing region read-only
    pub fn open_read_only(name: &str) -> Result<Self> {
        let c_name = posix_name(name)?;

        let fd = shm_open(&c_name, libc::O_RDONLY, 0).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                RtspCamError::channel(format!("no frame channel named '{}'", name))
            } else {
                RtspCamError::channel(format!("shm_open('{}') failed: {}", name, e))
            }
        })?;

        let file = File::from(fd);
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Err(RtspCamError::channel(format!(
                "frame channel '{}' has not been sized yet",
                name
            )));
        }
        let fd = OwnedFd::from(file);

        let base = map(&fd, len, libc::PROT_READ)
            .map_err(|e| RtspCamError::channel(format!("mmap for '{}' failed: {}", name, e)))?;

        trace!(name, len, "Opened shared memory region read-only");

        Ok(Self {
            name: name.to_string(),
            c_name,
            base,
            len,
            writable: false,
            owner: None,
        })
    }

    /// Whether a region with this name currently exists
    pub fn exists(name: &str) -> bool {
        match posix_name(name) {
            Ok(c_name) => shm_open(&c_name, libc::O_RDONLY, 0).is_ok(),
            Err(_) => false,
        }
    }

    /// Remove a region name; returns false if it did not exist
    pub fn unlink(name: &str) -> Result<bool> {
        let c_name = posix_name(name)?;
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::NotFound {
            Ok(false)
        } else {
            Err(RtspCamError::channel(format!(
                "shm_unlink('{}') failed: {}",
                name, err
            )))
        }
    }

    /// Region name without the leading slash
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the name still refers to the region this owner created
    ///
    /// False for read-only mappings, and for an owner whose name was
    /// unlinked and possibly reused by another producer.
    pub fn is_linked(&self) -> bool {
        match self.owner {
            Some(id) => linked_id(&self.c_name).is_ok_and(|linked| linked == id),
            None => false,
        }
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check_range(&self, offset: usize, size: usize) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(RtspCamError::channel(format!(
                "access of {} bytes at offset {} exceeds region size {}",
                size, offset, self.len
            ))),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(RtspCamError::channel(format!(
                "region '{}' is mapped read-only",
                self.name
            )))
        }
    }

    /// Copy `bytes` into the region at `offset`
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.check_range(offset, bytes.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.base.as_ptr().add(offset),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Copy `dst.len()` bytes out of the region starting at `offset`
    pub fn read_into(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check_range(offset, dst.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.base.as_ptr().add(offset),
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
        Ok(())
    }

    fn atomic_u32(&self, offset: usize) -> Result<&AtomicU32> {
        self.check_range(offset, 4)?;
        if offset % 4 != 0 {
            return Err(RtspCamError::channel(format!("offset {} is not 4-byte aligned", offset)));
        }
        Ok(unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU32) })
    }

    fn atomic_u64(&self, offset: usize) -> Result<&AtomicU64> {
        self.check_range(offset, 8)?;
        if offset % 8 != 0 {
            return Err(RtspCamError::channel(format!("offset {} is not 8-byte aligned", offset)));
        }
        Ok(unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU64) })
    }

    /// Atomically load a 32-bit field
    pub fn load_u32(&self, offset: usize, order: Ordering) -> Result<u32> {
        Ok(self.atomic_u32(offset)?.load(order))
    }

    /// Atomically store a 32-bit field
    pub fn store_u32(&mut self, offset: usize, value: u32, order: Ordering) -> Result<()> {
        self.check_writable()?;
        self.atomic_u32(offset)?.store(value, order);
        Ok(())
    }

    /// Atomically load a 64-bit field
    pub fn load_u64(&self, offset: usize, order: Ordering) -> Result<u64> {
        Ok(self.atomic_u64(offset)?.load(order))
    }

    /// Atomically store a 64-bit field
    pub fn store_u64(&mut self, offset: usize, value: u64, order: Ordering) -> Result<()> {
        self.check_writable()?;
        self.atomic_u64(offset)?.store(value, order);
        Ok(())
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        unsafe {
            if libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len) != 0 {
                warn!(
                    name = %self.name,
                    "munmap failed: {}",
                    io::Error::last_os_error()
                );
            }
        }
        if self.owner.is_some() {
            // The name may have been removed and taken by a new producer
            if !self.is_linked() {
                debug!(name = %self.name, "Name no longer refers to this region, not unlinking");
            } else if unsafe { libc::shm_unlink(self.c_name.as_ptr()) } != 0 {
                warn!(
                    name = %self.name,
                    "shm_unlink failed: {}",
                    io::Error::last_os_error()
                );
            }
        }
        trace!(name = %self.name, owner = self.owner.is_some(), "Released shared memory region");
    }
}
