//! Owning wrapper over the platform dynamic loader.

use std::ffi::{c_void, CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// An address resolved from a loaded library.
///
/// Valid only while the library it came from stays loaded; holders keep
/// the owning [`Plugin`](crate::Plugin) alive alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol(NonNull<c_void>);

// SAFETY: a resolved symbol is a plain code/data address in a mapped
// library; it does not depend on the thread that resolved it.
unsafe impl Send for Symbol {}
unsafe impl Sync for Symbol {}

impl Symbol {
    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// A `dlopen` handle, closed exactly once on drop.
pub(crate) struct Library {
    handle: NonNull<c_void>,
    path: PathBuf,
}

// SAFETY: dlopen handles may be used and closed from any thread.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library").field("path", &self.path).finish()
    }
}

impl Library {
    /// Open with lazy binding so a plugin may reference host symbols that
    /// only some host binaries provide.
    pub(crate) fn open_lazy(path: &Path) -> Result<Self, String> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| "path contains an interior NUL byte".to_string())?;

        // SAFETY: c_path is a valid NUL-terminated string for the call.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL) };
        match NonNull::new(handle) {
            Some(handle) => Ok(Self {
                handle,
                path: path.to_path_buf(),
            }),
            None => Err(last_error()),
        }
    }

    pub(crate) fn symbol(&self, name: &str) -> Option<Symbol> {
        let c_name = CString::new(name).ok()?;
        // SAFETY: handle is open for the lifetime of self.
        let ptr = unsafe { libc::dlsym(self.handle.as_ptr(), c_name.as_ptr()) };
        NonNull::new(ptr).map(Symbol)
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        // SAFETY: handle came from dlopen and is closed only here.
        unsafe {
            libc::dlclose(self.handle.as_ptr());
        }
    }
}

fn last_error() -> String {
    // SAFETY: dlerror returns NULL or a NUL-terminated thread-local string.
    unsafe {
        let err = libc::dlerror();
        if err.is_null() {
            "unknown dynamic loader error".to_string()
        } else {
            CStr::from_ptr(err).to_string_lossy().into_owned()
        }
    }
}
