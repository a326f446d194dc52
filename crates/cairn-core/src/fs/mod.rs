//! Minimal filesystem surface consumed by the archiver.

mod local;

pub use local::LocalFs;

use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Flags for [`Fs::open`]. Reads are always `O_RDONLY`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Fail with `ELOOP` instead of following a trailing symlink
    /// (`O_NOFOLLOW`).
    pub nofollow: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        OpenFlags::default()
    }

    pub fn no_follow(mut self) -> Self {
        self.nofollow = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
    Other,
}

/// Stat summary for one filesystem entry.
///
/// Timestamps are nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub kind: FileKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Logical size.
    pub size: u64,
    /// Size as reported by the raw stat. Change detection compares the
    /// previous node against both sizes; a mismatch in either marks the
    /// file changed.
    pub stat_size: u64,
    pub mtime_ns: i64,
    pub ctime_ns: i64,
    pub atime_ns: i64,
    pub inode: u64,
    pub device: u64,
}

/// An open file. Closed on drop; owned by exactly one worker at a time.
pub trait FsHandle: Read + Send + fmt::Debug {
    fn metadata(&self) -> io::Result<Metadata>;
}

pub trait Fs: Send + Sync {
    fn open(&self, path: &Path, flags: OpenFlags) -> io::Result<Box<dyn FsHandle>>;

    /// Stat following symlinks.
    fn stat(&self, path: &Path) -> io::Result<Metadata>;

    /// Stat without following symlinks.
    fn lstat(&self, path: &Path) -> io::Result<Metadata>;

    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Directory entry names, sorted ascending by byte comparison.
    fn read_dir_names(&self, path: &Path) -> io::Result<Vec<String>>;

    /// Absolute form of `path`, lexically cleaned.
    fn abs(&self, path: &Path) -> io::Result<PathBuf>;

    /// Lexical normalization: resolves `.` and `..`, collapses separators.
    fn clean(&self, path: &Path) -> PathBuf;
}

/// Returns `true` when an open failed because the target is a symbolic
/// link or a socket (`ELOOP` / `ENXIO`); callers redo the stat with
/// [`Fs::lstat`] and carry on without a handle.
pub fn is_symlink_or_socket_error(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(err.raw_os_error(), Some(code) if code == libc::ELOOP || code == libc::ENXIO)
    }

    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}
