//! Path attribute capture.
//!
//! `PathAttributes` is an lstat-style snapshot of a single filesystem entry:
//! kind, permission bits, ownership, size, mtime and (for symlinks) the link
//! target. Capture never follows symlinks, so a link is described by itself,
//! not by whatever it points at.
//!
//! The content digest is the expensive attribute. It is computed lazily on
//! first use and cached for the lifetime of the value.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Buffer size for digest reads (8KB)
const BUFFER_SIZE: usize = 8192;

/// Permission bits considered for metadata comparison: rwx for user, group
/// and other plus setuid, setgid and sticky.
pub const MODE_MASK: u32 = 0o7777;

/// Kind of a filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link (always treated as an opaque leaf)
    Symlink,
    /// Named pipe
    Fifo,
    /// Unix domain socket
    Socket,
    /// Block device node
    BlockDevice,
    /// Character device node
    CharDevice,
}

impl FileKind {
    fn from_file_type(ft: &fs::FileType) -> Self {
        if ft.is_symlink() {
            FileKind::Symlink
        } else if ft.is_dir() {
            FileKind::Directory
        } else if ft.is_fifo() {
            FileKind::Fifo
        } else if ft.is_socket() {
            FileKind::Socket
        } else if ft.is_block_device() {
            FileKind::BlockDevice
        } else if ft.is_char_device() {
            FileKind::CharDevice
        } else {
            FileKind::File
        }
    }
}

/// Snapshot of one filesystem entry's metadata.
#[derive(Debug, Clone)]
pub struct PathAttributes {
    /// Absolute path the attributes were captured from
    source: PathBuf,

    /// Entry kind
    pub kind: FileKind,

    /// Permission bits (masked with [`MODE_MASK`])
    pub mode: u32,

    /// Owning user id
    pub uid: u32,

    /// Owning group id
    pub gid: u32,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Modification time, unix seconds
    pub mtime: i64,

    /// Nanosecond part of the modification time
    pub mtime_nsec: i64,

    /// Link target for symlinks, None otherwise
    pub link_target: Option<PathBuf>,

    /// Lazily computed SHA-256 of the content, hex encoded
    digest: OnceCell<String>,
}

impl PathAttributes {
    /// Capture the attributes of `path` without following symlinks.
    ///
    /// Returns `Ok(None)` if the entry does not exist. Any other metadata
    /// read failure is an access error for the caller to localize.
    pub fn capture(path: &Path) -> std::io::Result<Option<Self>> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let kind = FileKind::from_file_type(&metadata.file_type());

        let link_target = if kind == FileKind::Symlink {
            Some(fs::read_link(path)?)
        } else {
            None
        };

        Ok(Some(Self {
            source: path.to_path_buf(),
            kind,
            mode: metadata.mode() & MODE_MASK,
            uid: metadata.uid(),
            gid: metadata.gid(),
            size: if kind == FileKind::File { metadata.len() } else { 0 },
            mtime: metadata.mtime(),
            mtime_nsec: metadata.mtime_nsec(),
            link_target,
            digest: OnceCell::new(),
        }))
    }

    /// Absolute path the attributes were captured from
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    /// Hex-encoded SHA-256 of the file content, computed on first use.
    ///
    /// Only meaningful for regular files; directories and special files
    /// digest to the empty content.
    pub fn digest(&self) -> std::io::Result<&str> {
        self.digest
            .get_or_try_init(|| {
                if self.kind == FileKind::File {
                    compute_digest(&self.source)
                } else {
                    Ok(hex::encode(Sha256::digest(b"")))
                }
            })
            .map(String::as_str)
    }
}

/// Stream a file through SHA-256 and hex encode the result.
fn compute_digest(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
