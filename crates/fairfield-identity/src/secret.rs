//! Secret material lifetime
//!
//! Every transient buffer that holds key material (derived vault keys,
//! decrypted plaintext, hex renderings of a private key) lives in a
//! [`SecretBuffer`] or a `Zeroizing` wrapper, so it is wiped when the scope
//! ends: on success, on early return and on the error path alike.
//!
//! Two process-level hardening measures are also provided:
//!
//! 1. **Core dump prevention** via `setrlimit(RLIMIT_CORE, 0)`, so a crash
//!    never writes an unlocked key to disk.
//! 2. **Page locking** via `mlock()`, so the OS does not swap secret pages.
//!
//! Both are best-effort: containers and unprivileged users may refuse them,
//! in which case a warning is logged and the process carries on.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use zeroize::Zeroize;

static CORE_DUMPS_DISABLED: AtomicBool = AtomicBool::new(false);

/// Overwrite a secret buffer with zeros.
///
/// Uses volatile writes through `zeroize`, so the compiler cannot elide the
/// wipe of a buffer that is about to be released.
pub fn secure_wipe(buffer: &mut [u8]) {
    buffer.zeroize();
}

/// Disable core dumps for the current process.
///
/// Returns `true` if core dumps are (now or already) disabled.
pub fn disable_core_dumps() -> bool {
    if CORE_DUMPS_DISABLED.swap(true, Ordering::SeqCst) {
        return true;
    }

    #[cfg(unix)]
    {
        let ok = unix::disable_core_dumps();
        if !ok {
            CORE_DUMPS_DISABLED.store(false, Ordering::SeqCst);
        }
        ok
    }

    #[cfg(not(unix))]
    {
        log::warn!("Core dump prevention is not supported on this platform");
        CORE_DUMPS_DISABLED.store(false, Ordering::SeqCst);
        false
    }
}

/// A fixed-length heap buffer for secret bytes.
///
/// The pages are locked on creation (best-effort) and the contents are wiped
/// before the pages are unlocked and released.
pub struct SecretBuffer {
    data: Vec<u8>,
    locked: bool,
}

impl SecretBuffer {
    /// Allocate a zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        let data = vec![0u8; len];
        let locked = data.is_empty() || lock_pages(&data);
        Self { data, locked }
    }

    /// Copy `bytes` into a new secret buffer.
    ///
    /// The caller remains responsible for wiping its own copy.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buffer = Self::new(bytes.len());
        buffer.data.copy_from_slice(bytes);
        buffer
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the pages are actually locked in memory.
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Deref for SecretBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for SecretBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl std::fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBuffer")
            .field("len", &self.data.len())
            .field("locked", &self.locked)
            .finish_non_exhaustive()
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        secure_wipe(&mut self.data);
        if self.locked && !self.data.is_empty() {
            unlock_pages(&self.data);
        }
    }
}

fn lock_pages(data: &[u8]) -> bool {
    #[cfg(unix)]
    {
        unix::mlock(data)
    }

    #[cfg(not(unix))]
    {
        let _ = data;
        log::debug!("mlock not supported on this platform");
        false
    }
}

fn unlock_pages(data: &[u8]) {
    #[cfg(unix)]
    unix::munlock(data);

    #[cfg(not(unix))]
    let _ = data;
}

#[cfg(unix)]
mod unix {
    pub fn disable_core_dumps() -> bool {
        let rlim = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: setrlimit reads a fully initialised rlimit struct
        let result = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &rlim) };
        if result != 0 {
            log::warn!(
                "Failed to disable core dumps: {}",
                std::io::Error::last_os_error()
            );
            return false;
        }
        true
    }

    pub fn mlock(data: &[u8]) -> bool {
        // SAFETY: the slice is a live allocation of exactly data.len() bytes
        let result = unsafe { libc::mlock(data.as_ptr() as *const libc::c_void, data.len()) };
        if result != 0 {
            log::debug!(
                "mlock failed for {} bytes: {}",
                data.len(),
                std::io::Error::last_os_error()
            );
            return false;
        }
        true
    }

    pub fn munlock(data: &[u8]) {
        // SAFETY: same region that was passed to mlock
        unsafe {
            libc::munlock(data.as_ptr() as *const libc::c_void, data.len());
        }
    }
}
