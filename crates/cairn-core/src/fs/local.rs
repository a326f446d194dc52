use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use super::{FileKind, Fs, FsHandle, Metadata, OpenFlags};

/// The local operating-system filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

#[derive(Debug)]
struct LocalHandle {
    file: File,
}

impl Read for LocalHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl FsHandle for LocalHandle {
    fn metadata(&self) -> io::Result<Metadata> {
        Ok(summarize(&self.file.metadata()?))
    }
}

impl Fs for LocalFs {
    fn open(&self, path: &Path, flags: OpenFlags) -> io::Result<Box<dyn FsHandle>> {
        let mut options = std::fs::OpenOptions::new();
        options.read(true);

        #[cfg(unix)]
        if flags.nofollow {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NOFOLLOW);
        }

        #[cfg(not(unix))]
        let _ = flags;

        let file = options.open(path)?;
        Ok(Box::new(LocalHandle { file }))
    }

    fn stat(&self, path: &Path) -> io::Result<Metadata> {
        Ok(summarize(&std::fs::metadata(path)?))
    }

    fn lstat(&self, path: &Path) -> io::Result<Metadata> {
        Ok(summarize(&std::fs::symlink_metadata(path)?))
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }

    fn read_dir_names(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn abs(&self, path: &Path) -> io::Result<PathBuf> {
        if path.is_absolute() {
            return Ok(self.clean(path));
        }
        Ok(self.clean(&std::env::current_dir()?.join(path)))
    }

    fn clean(&self, path: &Path) -> PathBuf {
        clean_lexical(path)
    }
}

/// Lexical path normalization: resolves `.` and `..` without touching the
/// filesystem and collapses separators. An empty result becomes `.`.
fn clean_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                } else if !path.is_absolute() {
                    // leading `..` of a relative path is kept verbatim
                    out.push(Component::ParentDir);
                }
                // `..` at an absolute root is dropped
            }
            Component::Normal(name) => {
                out.push(name);
                depth += 1;
            }
        }
    }

    if out.as_os_str().is_empty() {
        out.push(Component::CurDir);
    }
    out
}

fn summarize(metadata: &std::fs::Metadata) -> Metadata {
    let file_type = metadata.file_type();

    #[cfg(unix)]
    {
        use std::os::unix::fs::{FileTypeExt, MetadataExt};

        let kind = if file_type.is_file() {
            FileKind::File
        } else if file_type.is_dir() {
            FileKind::Dir
        } else if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_block_device() {
            FileKind::BlockDevice
        } else if file_type.is_char_device() {
            FileKind::CharDevice
        } else if file_type.is_fifo() {
            FileKind::Fifo
        } else if file_type.is_socket() {
            FileKind::Socket
        } else {
            FileKind::Other
        };

        Metadata {
            kind,
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            size: metadata.len(),
            stat_size: metadata.size(),
            mtime_ns: metadata.mtime() * 1_000_000_000 + metadata.mtime_nsec(),
            ctime_ns: metadata.ctime() * 1_000_000_000 + metadata.ctime_nsec(),
            atime_ns: metadata.atime() * 1_000_000_000 + metadata.atime_nsec(),
            inode: metadata.ino(),
            device: metadata.dev(),
        }
    }

    #[cfg(not(unix))]
    {
        let kind = if file_type.is_file() {
            FileKind::File
        } else if file_type.is_dir() {
            FileKind::Dir
        } else if file_type.is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::Other
        };

        Metadata {
            kind,
            mode: if metadata.permissions().readonly() {
                0o444
            } else {
                0o644
            },
            uid: 0,
            gid: 0,
            size: metadata.len(),
            stat_size: metadata.len(),
            mtime_ns: 0,
            ctime_ns: 0,
            atime_ns: 0,
            inode: 0,
            device: 0,
        }
    }
}
