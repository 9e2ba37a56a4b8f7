//! File System Types
//!
//! The contract shared by every filesystem backend, plus the error and
//! metadata types that flow through it.

use std::collections::HashMap;
use std::io;
use std::time::SystemTime;
use thiserror::Error;

/// File system errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("ENOENT: no such file or directory, {operation} '{path}'")]
    NotFound { path: String, operation: String },

    #[error("EEXIST: file already exists, {operation} '{path}'")]
    AlreadyExists { path: String, operation: String },

    #[error("ENOTDIR: not a directory, {operation} '{path}'")]
    NotADirectory { path: String, operation: String },

    #[error("EISDIR: illegal operation on a directory, {operation} '{path}'")]
    IsDirectory { path: String, operation: String },

    #[error("ENOTEMPTY: directory not empty, {operation} '{path}'")]
    NotEmpty { path: String, operation: String },

    #[error("EINVAL: invalid argument, {operation} '{path}'")]
    InvalidArgument { path: String, operation: String },

    #[error("EBADF: file already closed, {operation} '{path}'")]
    Closed { path: String, operation: String },

    #[error("ERANGE: offset or size out of range, {operation} '{path}'")]
    OutOfRange { path: String, operation: String },

    #[error("ENOTSUP: operation not supported, {operation}")]
    Unsupported { operation: String },

    #[error("EOF")]
    Eof,

    #[error("{message}")]
    Other { message: String },
}

impl FsError {
    /// True for the end-of-data signal returned by `read`.
    pub fn is_eof(&self) -> bool {
        matches!(self, FsError::Eof)
    }

    /// Map a host I/O error onto the closest kind.
    pub fn from_io(err: io::Error, path: &str, operation: &str) -> Self {
        let path = path.to_string();
        let operation = operation.to_string();
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound { path, operation },
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists { path, operation },
            io::ErrorKind::NotADirectory => FsError::NotADirectory { path, operation },
            io::ErrorKind::IsADirectory => FsError::IsDirectory { path, operation },
            io::ErrorKind::DirectoryNotEmpty => FsError::NotEmpty { path, operation },
            io::ErrorKind::InvalidInput => FsError::InvalidArgument { path, operation },
            io::ErrorKind::Unsupported => FsError::Unsupported { operation },
            io::ErrorKind::UnexpectedEof => FsError::Eof,
            _ => FsError::Other {
                message: format!("{}: {}, {} '{}'", err.kind(), err, operation, path),
            },
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;

/// Permission bits plus the directory tag bit.
///
/// Permission bits are opaque: they are stored and reported, never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode(u32);

impl FileMode {
    /// The directory tag bit. Sits above every bit `chmod` accepts.
    pub const DIR: u32 = 1 << 31;

    pub fn file(perm: u32) -> Self {
        FileMode(perm & !Self::DIR)
    }

    pub fn dir(perm: u32) -> Self {
        FileMode(perm | Self::DIR)
    }

    pub fn is_dir(&self) -> bool {
        self.0 & Self::DIR != 0
    }

    /// The unix permission bits (`0o777`).
    pub fn perm(&self) -> u32 {
        self.0 & 0o777
    }

    /// Same kind, new permission value.
    pub fn with_perm(self, perm: u32) -> Self {
        if self.is_dir() {
            Self::dir(perm)
        } else {
            Self::file(perm)
        }
    }
}

impl std::fmt::Display for FileMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_dir() { 'd' } else { '-' };
        let mut s = String::with_capacity(10);
        s.push(kind);
        for shift in [6, 3, 0] {
            let bits = (self.0 >> shift) & 0o7;
            s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        f.write_str(&s)
    }
}

/// Snapshot of a node's metadata at the time of the call.
#[derive(Debug, Clone)]
pub struct FileInfo {
    name: String,
    size: u64,
    mode: FileMode,
    modified: SystemTime,
    sys: Option<std::fs::Metadata>,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, size: u64, mode: FileMode, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            size,
            mode,
            modified,
            sys: None,
        }
    }

    pub(crate) fn with_sys(mut self, meta: std::fs::Metadata) -> Self {
        self.sys = Some(meta);
        self
    }

    /// Base name of the entry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Length in bytes for files; zero for in-memory directories.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn mod_time(&self) -> SystemTime {
        self.modified
    }

    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    /// Backend-specific metadata. Always `None` for the in-memory backend.
    pub fn sys(&self) -> Option<&std::fs::Metadata> {
        self.sys.as_ref()
    }
}

/// Reference point for `File::seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// One batch of directory entries.
///
/// `eof` is set when a positive count was asked for and fewer entries than
/// that remained, so the batch is the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirBatch<T> {
    pub entries: Vec<T>,
    pub eof: bool,
}

impl<T> DirBatch<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> DirBatch<U> {
        DirBatch {
            entries: self.entries.into_iter().map(f).collect(),
            eof: self.eof,
        }
    }
}

/// Flags for `FileSystem::open_file`, modelled on `std::fs::OpenOptions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, yes: bool) -> Self {
        self.read = yes;
        self
    }

    pub fn write(mut self, yes: bool) -> Self {
        self.write = yes;
        self
    }

    pub fn append(mut self, yes: bool) -> Self {
        self.append = yes;
        self
    }

    pub fn create(mut self, yes: bool) -> Self {
        self.create = yes;
        self
    }

    pub fn create_new(mut self, yes: bool) -> Self {
        self.create_new = yes;
        self
    }

    pub fn truncate(mut self, yes: bool) -> Self {
        self.truncate = yes;
        self
    }
}

/// File content type
#[derive(Debug, Clone)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileContent::Text(s) => s.as_bytes(),
            FileContent::Binary(b) => b,
        }
    }
}

impl From<String> for FileContent {
    fn from(s: String) -> Self {
        FileContent::Text(s)
    }
}

impl From<&str> for FileContent {
    fn from(s: &str) -> Self {
        FileContent::Text(s.to_string())
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(v: Vec<u8>) -> Self {
        FileContent::Binary(v)
    }
}

/// Seed file for `MemFsOptions::files`, with optional permissions
#[derive(Debug, Clone)]
pub struct FileInit {
    pub content: FileContent,
    pub perm: Option<u32>,
}

impl From<String> for FileInit {
    fn from(s: String) -> Self {
        FileInit {
            content: FileContent::Text(s),
            perm: None,
        }
    }
}

impl From<&str> for FileInit {
    fn from(s: &str) -> Self {
        FileInit {
            content: FileContent::Text(s.to_string()),
            perm: None,
        }
    }
}

impl From<Vec<u8>> for FileInit {
    fn from(v: Vec<u8>) -> Self {
        FileInit {
            content: FileContent::Binary(v),
            perm: None,
        }
    }
}

/// Initial files map type
pub type InitialFiles = HashMap<String, FileInit>;

/// An open file or directory.
///
/// Every data and metadata call fails with `FsError::Closed` once `close`
/// has been called.
pub trait File: Send {
    /// Change the working directory of the owning filesystem to this
    /// handle's directory (its own node if a directory, else its parent).
    fn chdir(&self) -> FsResult<()>;

    fn chmod(&self, perm: u32) -> FsResult<()>;

    /// Unbind the handle. Closing twice is an error.
    fn close(&mut self) -> FsResult<()>;

    /// The path exactly as passed to `open`/`create`/`open_file`, not its
    /// base name, so both backends report the same value as `std::fs`
    /// callers would expect.
    fn name(&self) -> &str;

    /// Read from the cursor. Returns `FsError::Eof` when the cursor is at or
    /// past the end and `buf` is non-empty.
    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize>;

    /// Seek to `pos`, then read.
    fn read_at(&mut self, buf: &mut [u8], pos: i64) -> FsResult<usize> {
        self.seek(pos, Whence::Start)?;
        self.read(buf)
    }

    /// Up to `n` entries past the directory cursor; `n <= 0` means all
    /// remaining. The batch is flagged `eof` when `n > 0` and fewer than `n`
    /// entries were left.
    fn readdir(&mut self, n: i32) -> FsResult<DirBatch<FileInfo>>;

    fn readdirnames(&mut self, n: i32) -> FsResult<DirBatch<String>> {
        Ok(self.readdir(n)?.map(|e| e.name))
    }

    fn stat(&self) -> FsResult<FileInfo>;

    fn sync(&self) -> FsResult<()>;

    /// Move the cursor. No clamping: negative or past-end offsets only
    /// affect later reads and writes.
    fn seek(&mut self, delta: i64, whence: Whence) -> FsResult<i64>;

    fn truncate(&self, size: i64) -> FsResult<()>;

    fn write(&mut self, buf: &[u8]) -> FsResult<usize>;

    /// Seek to `pos`, then write.
    fn write_at(&mut self, buf: &[u8], pos: i64) -> FsResult<usize> {
        self.seek(pos, Whence::Start)?;
        self.write(buf)
    }

    fn write_string(&mut self, s: &str) -> FsResult<usize> {
        self.write(s.as_bytes())
    }
}

/// Abstract filesystem interface that can be implemented by different backends.
pub trait FileSystem: Send + Sync {
    fn chdir(&self, path: &str) -> FsResult<()>;

    /// Absolute path of the current working directory.
    fn getwd(&self) -> FsResult<String>;

    fn mkdir(&self, path: &str, perm: u32) -> FsResult<()>;

    /// Create `path` and any missing parents. Existing directories along the
    /// way are not an error.
    fn mkdir_all(&self, path: &str, perm: u32) -> FsResult<()>;

    /// Remove a file or an empty directory.
    fn remove(&self, path: &str) -> FsResult<()>;

    /// Remove `path` and everything below it.
    fn remove_all(&self, path: &str) -> FsResult<()>;

    fn rename(&self, old: &str, new: &str) -> FsResult<()>;

    /// Create or truncate a file and open it at offset 0.
    fn create(&self, path: &str) -> FsResult<Box<dyn File>>;

    fn open(&self, path: &str) -> FsResult<Box<dyn File>>;

    fn open_file(&self, path: &str, options: &OpenOptions, perm: u32) -> FsResult<Box<dyn File>>;

    fn stat(&self, path: &str) -> FsResult<FileInfo>;

    /// Read an entire file through the handle interface.
    fn read_file(&self, path: &str) -> FsResult<Vec<u8>> {
        let mut file = self.open(path)?;
        let mut content = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => content.extend_from_slice(&chunk[..n]),
                Err(e) if e.is_eof() => break,
                Err(e) => return Err(e),
            }
        }
        file.close()?;
        Ok(content)
    }

    /// Replace the content of a file, creating it if needed.
    fn write_file(&self, path: &str, content: &[u8]) -> FsResult<()> {
        let mut file = self.create(path)?;
        let mut written = 0;
        while written < content.len() {
            written += file.write(&content[written..])?;
        }
        file.close()
    }
}

// ============================================================================
// Tests
// ============================================================================
