//! Named POSIX shared memory holding exactly one frame

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use memmap2::{MmapMut, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use tracing::{debug, info, instrument, warn};

use crate::capture::{Frame, FrameShape};
use crate::error::StoreError;
use crate::store::resize::resize_frame;

/// Which side of the region this handle is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Allocated the region and is the only handle that unlinks it
    Creator,
    /// Attached to a region somebody else created
    Opener,
}

/// Latest-wins single frame slot shared between processes.
///
/// The region is exactly `shape.nbytes()` bytes of interleaved `u8` pixels, no
/// header; the shape is agreed out of band by name. Every copy in or out holds
/// an in-process mutex plus an exclusive `flock` on the region's descriptor, so
/// other processes using this type serialize against us too. Resizing happens
/// before the lock is taken.
pub struct SharedFrameStore {
    name: String,
    shape: FrameShape,
    role: Role,
    file: File,
    map: Mutex<Option<MmapMut>>,
    unlinked: AtomicBool,
}

/// Exclusive access to the mapped bytes for the duration of one copy
struct RegionGuard<'a> {
    map: MutexGuard<'a, Option<MmapMut>>,
    fd: RawFd,
}

impl RegionGuard<'_> {
    fn bytes(&self) -> Result<&[u8], StoreError> {
        match &*self.map {
            Some(map) => Ok(&map[..]),
            None => Err(StoreError::Closed),
        }
    }

    fn bytes_mut(&mut self) -> Result<&mut [u8], StoreError> {
        match &mut *self.map {
            Some(map) => Ok(&mut map[..]),
            None => Err(StoreError::Closed),
        }
    }
}

impl Drop for RegionGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: fd stays open for as long as the owning store, which outlives the guard
        unsafe {
            libc::flock(self.fd, libc::LOCK_UN);
        }
    }
}

/// POSIX shm names are a single path component with a leading slash
pub fn normalize_name(name: &str) -> String {
    if name.starts_with('/') {
        name.to_owned()
    } else {
        format!("/{name}")
    }
}

fn create_flags() -> OFlag {
    OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR
}

fn create_mode() -> Mode {
    Mode::S_IRUSR | Mode::S_IWUSR
}

impl SharedFrameStore {
    /// Allocate the region `name`, zero-filled.
    ///
    /// An existing region with the same name is assumed to be left over from a
    /// crashed run: it is unlinked and recreated. Two creators racing on the
    /// same name are not detected; the later one wins the name and the earlier
    /// one keeps writing to an orphaned region until it closes, at which point
    /// it unlinks the name out from under the winner.
    #[instrument(skip(shape), fields(shape = %shape))]
    pub fn create(name: &str, shape: FrameShape) -> Result<Self, StoreError> {
        if !shape.is_supported() {
            return Err(StoreError::UnsupportedShape(shape));
        }
        let name = normalize_name(name);

        let fd = match shm_open(name.as_str(), create_flags(), create_mode()) {
            Ok(fd) => fd,
            Err(Errno::EEXIST) => {
                warn!("Shared memory {name:?} exists, unlinking stale region and recreating");
                match shm_unlink(name.as_str()) {
                    Ok(()) | Err(Errno::ENOENT) => {}
                    Err(err) => return Err(err.into()),
                }
                shm_open(name.as_str(), create_flags(), create_mode())?
            }
            Err(err) => return Err(err.into()),
        };

        if let Err(err) = ftruncate(&fd, shape.nbytes() as libc::off_t) {
            let _ = shm_unlink(name.as_str());
            return Err(err.into());
        }

        let store = Self::map(name, shape, Role::Creator, File::from(fd))?;
        info!("Created shared frame store {:?} ({} bytes)", store.name, shape.nbytes());
        Ok(store)
    }

    /// Attach to an existing region without creating it
    #[instrument(skip(shape), fields(shape = %shape))]
    pub fn open(name: &str, shape: FrameShape) -> Result<Self, StoreError> {
        if !shape.is_supported() {
            return Err(StoreError::UnsupportedShape(shape));
        }
        let name = normalize_name(name);

        let fd = match shm_open(name.as_str(), OFlag::O_RDWR, Mode::empty()) {
            Ok(fd) => fd,
            Err(Errno::ENOENT) => return Err(StoreError::NotFound(name)),
            Err(err) => return Err(err.into()),
        };
        let file = File::from(fd);

        let actual = file.metadata()?.len() as usize;
        if actual < shape.nbytes() {
            return Err(StoreError::TooSmall {
                name,
                expected: shape.nbytes(),
                actual,
            });
        }

        let store = Self::map(name, shape, Role::Opener, file)?;
        debug!("Opened shared frame store {:?}", store.name);
        Ok(store)
    }

    fn map(name: String, shape: FrameShape, role: Role, file: File) -> Result<Self, StoreError> {
        // SAFETY: the region is only ever accessed through this type, which
        // serializes every access with the lock below
        let map = unsafe { MmapOptions::new().len(shape.nbytes()).map_mut(&file) };
        let map = match map {
            Ok(map) => map,
            Err(err) => {
                if role == Role::Creator {
                    let _ = shm_unlink(name.as_str());
                }
                return Err(err.into());
            }
        };

        Ok(Self {
            name,
            shape,
            role,
            file,
            map: Mutex::new(Some(map)),
            unlinked: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn nbytes(&self) -> usize {
        self.shape.nbytes()
    }

    fn lock(&self) -> Result<RegionGuard<'_>, StoreError> {
        let map = self.map.lock().map_err(|_| StoreError::Poisoned)?;
        if map.is_none() {
            return Err(StoreError::Closed);
        }
        let fd = self.file.as_raw_fd();
        loop {
            // SAFETY: plain syscall on a descriptor we own
            let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
            if rc == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        }
        Ok(RegionGuard { map, fd })
    }

    /// Replace the stored frame.
    ///
    /// Frames of a different shape are converted to the store's channel count
    /// and resized (bilinear) first, outside the lock.
    pub fn write(&self, frame: &Frame) -> Result<(), StoreError> {
        let resized;
        let pixels = if frame.shape == self.shape {
            &frame.data
        } else {
            resized = resize_frame(frame, self.shape)?;
            &resized.data
        };
        if pixels.len() != self.nbytes() {
            return Err(StoreError::ShapeMismatch {
                expected: self.shape,
                actual: frame.shape,
            });
        }

        let mut guard = self.lock()?;
        guard.bytes_mut()?[..pixels.len()].copy_from_slice(pixels);
        Ok(())
    }

    /// Copy out the current contents. A store that was never written reads as
    /// all zeros.
    pub fn read(&self) -> Result<Frame, StoreError> {
        let data = {
            let guard = self.lock()?;
            guard.bytes()?[..self.nbytes()].to_vec()
        };
        Frame::from_raw(self.shape, data).ok_or(StoreError::ShapeMismatch {
            expected: self.shape,
            actual: self.shape,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.map.lock().map(|m| m.is_none()).unwrap_or(true)
    }

    /// Detach from the region; the creator also unlinks it.
    ///
    /// Safe to call more than once. A region already removed by someone else
    /// is not an error.
    pub fn close(&self) -> Result<(), StoreError> {
        let mapping = match self.map.lock() {
            Ok(mut map) => map.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if mapping.is_some() {
            debug!("Detached from shared frame store {:?}", self.name);
        }
        drop(mapping);

        if self.role == Role::Creator && !self.unlinked.swap(true, Ordering::AcqRel) {
            match shm_unlink(self.name.as_str()) {
                Ok(()) => info!("Unlinked shared frame store {:?}", self.name),
                Err(Errno::ENOENT) => debug!("Shared frame store {:?} already removed", self.name),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

impl Drop for SharedFrameStore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("Failed to release shared frame store {:?}: {}", self.name, err);
        }
    }
}

impl std::fmt::Debug for SharedFrameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFrameStore")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("role", &self.role)
            .finish()
    }
}
