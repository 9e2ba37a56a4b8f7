//! Native File System
//!
//! Forwards every call to the host OS through `std::fs` and `std::env`.
//! The working directory is the process's own.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::debug;

use super::path::basename;
use super::types::*;

/// Filesystem backed by real disk I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFs;

impl NativeFs {
    pub fn new() -> Self {
        NativeFs
    }
}

fn info_from_metadata(name: &str, meta: fs::Metadata) -> FileInfo {
    let perm = permission_bits(&meta);
    let mode = if meta.is_dir() {
        FileMode::dir(perm)
    } else {
        FileMode::file(perm)
    };
    let modified = meta.modified().unwrap_or(UNIX_EPOCH);
    FileInfo::new(name, meta.len(), mode, modified).with_sys(meta)
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| basename(&path.to_string_lossy()).to_string())
}

fn std_options(options: &OpenOptions, perm: u32) -> fs::OpenOptions {
    let mut std_opts = fs::OpenOptions::new();
    std_opts
        .read(options.read)
        .write(options.write)
        .append(options.append)
        .create(options.create)
        .create_new(options.create_new)
        .truncate(options.truncate);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        std_opts.mode(perm);
    }
    #[cfg(not(unix))]
    let _ = perm;
    std_opts
}

fn dir_builder(perm: u32, recursive: bool) -> fs::DirBuilder {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(recursive);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(perm);
    }
    #[cfg(not(unix))]
    let _ = perm;
    builder
}

impl FileSystem for NativeFs {
    fn chdir(&self, path: &str) -> FsResult<()> {
        std::env::set_current_dir(path).map_err(|e| FsError::from_io(e, path, "chdir"))
    }

    fn getwd(&self) -> FsResult<String> {
        std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|e| FsError::from_io(e, ".", "getwd"))
    }

    fn mkdir(&self, path: &str, perm: u32) -> FsResult<()> {
        dir_builder(perm, false)
            .create(path)
            .map_err(|e| FsError::from_io(e, path, "mkdir"))
    }

    fn mkdir_all(&self, path: &str, perm: u32) -> FsResult<()> {
        dir_builder(perm, true)
            .create(path)
            .map_err(|e| FsError::from_io(e, path, "mkdir"))
    }

    fn remove(&self, path: &str) -> FsResult<()> {
        let meta = fs::symlink_metadata(path).map_err(|e| FsError::from_io(e, path, "rm"))?;
        let result = if meta.is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|e| FsError::from_io(e, path, "rm"))
    }

    fn remove_all(&self, path: &str) -> FsResult<()> {
        let meta = fs::symlink_metadata(path).map_err(|e| FsError::from_io(e, path, "rm"))?;
        let result = if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|e| FsError::from_io(e, path, "rm"))
    }

    fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        fs::rename(old, new).map_err(|e| FsError::from_io(e, old, "rename"))
    }

    fn create(&self, path: &str) -> FsResult<Box<dyn File>> {
        let options = OpenOptions::new().read(true).write(true).create(true).truncate(true);
        self.open_file(path, &options, 0o666)
    }

    fn open(&self, path: &str) -> FsResult<Box<dyn File>> {
        self.open_file(path, &OpenOptions::new().read(true), 0)
    }

    fn open_file(&self, path: &str, options: &OpenOptions, perm: u32) -> FsResult<Box<dyn File>> {
        let file = std_options(options, perm)
            .open(path)
            .map_err(|e| FsError::from_io(e, path, "open"))?;
        let abs = std::path::absolute(path).unwrap_or_else(|_| PathBuf::from(path));
        debug!(path, "native open");
        Ok(Box::new(NativeFile {
            file: Some(file),
            name: path.to_string(),
            path: abs,
            entries: None,
        }))
    }

    fn stat(&self, path: &str) -> FsResult<FileInfo> {
        let meta = fs::metadata(path).map_err(|e| FsError::from_io(e, path, "stat"))?;
        Ok(info_from_metadata(&file_name(Path::new(path)), meta))
    }
}

/// Handle onto a host file or directory.
#[derive(Debug)]
pub struct NativeFile {
    file: Option<fs::File>,
    name: String,
    path: PathBuf,
    entries: Option<fs::ReadDir>,
}

impl NativeFile {
    fn inner(&self, operation: &str) -> FsResult<&fs::File> {
        self.file.as_ref().ok_or_else(|| FsError::Closed {
            path: self.name.clone(),
            operation: operation.to_string(),
        })
    }

    fn io_err(&self, operation: &str) -> impl Fn(std::io::Error) -> FsError + '_ {
        let operation = operation.to_string();
        move |e| FsError::from_io(e, &self.name, &operation)
    }
}

impl File for NativeFile {
    fn chdir(&self) -> FsResult<()> {
        let meta = self.inner("chdir")?.metadata().map_err(self.io_err("chdir"))?;
        let target = if meta.is_dir() {
            self.path.as_path()
        } else {
            self.path.parent().unwrap_or(Path::new("/"))
        };
        std::env::set_current_dir(target).map_err(self.io_err("chdir"))
    }

    #[cfg(unix)]
    fn chmod(&self, perm: u32) -> FsResult<()> {
        use std::os::unix::fs::PermissionsExt;
        self.inner("chmod")?
            .set_permissions(fs::Permissions::from_mode(perm))
            .map_err(self.io_err("chmod"))
    }

    #[cfg(not(unix))]
    fn chmod(&self, _perm: u32) -> FsResult<()> {
        self.inner("chmod")?;
        Err(FsError::Unsupported { operation: "chmod".to_string() })
    }

    fn close(&mut self) -> FsResult<()> {
        self.inner("close")?;
        self.file = None;
        self.entries = None;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let mut file = self.inner("read")?;
        let n = file.read(buf).map_err(self.io_err("read"))?;
        if n == 0 && !buf.is_empty() {
            return Err(FsError::Eof);
        }
        Ok(n)
    }

    fn readdir(&mut self, n: i32) -> FsResult<DirBatch<FileInfo>> {
        self.inner("readdir")?;
        if self.entries.is_none() {
            let iter = fs::read_dir(&self.path).map_err(self.io_err("readdir"))?;
            self.entries = Some(iter);
        }
        let limit = if n > 0 { n as usize } else { usize::MAX };
        let mut out = Vec::new();
        while out.len() < limit {
            let Some(entries) = self.entries.as_mut() else { break };
            let Some(entry) = entries.next() else { break };
            let entry = entry.map_err(|e| FsError::from_io(e, &self.name, "readdir"))?;
            let meta = entry
                .metadata()
                .map_err(|e| FsError::from_io(e, &self.name, "readdir"))?;
            out.push(info_from_metadata(&entry.file_name().to_string_lossy(), meta));
        }
        let eof = n > 0 && out.len() < limit;
        Ok(DirBatch { entries: out, eof })
    }

    fn stat(&self) -> FsResult<FileInfo> {
        let meta = self.inner("stat")?.metadata().map_err(self.io_err("stat"))?;
        Ok(info_from_metadata(&file_name(&self.path), meta))
    }

    fn sync(&self) -> FsResult<()> {
        self.inner("sync")?.sync_all().map_err(self.io_err("sync"))
    }

    fn seek(&mut self, delta: i64, whence: Whence) -> FsResult<i64> {
        let pos = match whence {
            Whence::Start => {
                let start = u64::try_from(delta).map_err(|_| FsError::OutOfRange {
                    path: self.name.clone(),
                    operation: "seek".to_string(),
                })?;
                SeekFrom::Start(start)
            }
            Whence::Current => SeekFrom::Current(delta),
            Whence::End => SeekFrom::End(delta),
        };
        let mut file = self.inner("seek")?;
        let offset = file.seek(pos).map_err(self.io_err("seek"))?;
        Ok(offset as i64)
    }

    fn truncate(&self, size: i64) -> FsResult<()> {
        let size = u64::try_from(size).map_err(|_| FsError::OutOfRange {
            path: self.name.clone(),
            operation: "truncate".to_string(),
        })?;
        self.inner("truncate")?.set_len(size).map_err(self.io_err("truncate"))
    }

    fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        let mut file = self.inner("write")?;
        file.write(buf).map_err(self.io_err("write"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn join(dir: &tempfile::TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().into_owned()
    }

    #[test]
    fn test_create_write_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = NativeFs::new();
        let path = join(&tmp, "foo.txt");
        let mut f = fs.create(&path).unwrap();
        f.write_string("Hello world").unwrap();
        f.close().unwrap();

        let mut f = fs.open(&path).unwrap();
        let info = f.stat().unwrap();
        assert_eq!(info.size(), 11);
        assert_eq!(info.name(), "foo.txt");
        assert!(info.sys().is_some());
        let mut out = vec![0u8; 11];
        assert_eq!(f.read(&mut out).unwrap(), 11);
        assert_eq!(out, b"Hello world");
        assert_eq!(f.read(&mut out), Err(FsError::Eof));
    }

    #[test]
    fn test_mkdir_and_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = NativeFs::new();
        let dir = join(&tmp, "a");
        fs.mkdir(&dir, 0o755).unwrap();
        assert!(matches!(fs.mkdir(&dir, 0o755), Err(FsError::AlreadyExists { .. })));
        fs.write_file(&join(&tmp, "a/f.txt"), b"x").unwrap();
        assert!(matches!(fs.remove(&dir), Err(FsError::NotEmpty { .. })));
        fs.remove_all(&dir).unwrap();
        assert!(matches!(fs.stat(&dir), Err(FsError::NotFound { .. })));
    }

    #[test]
    fn test_mkdir_all_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = NativeFs::new();
        let deep = join(&tmp, "a/b/c");
        fs.mkdir_all(&deep, 0o755).unwrap();
        fs.mkdir_all(&deep, 0o755).unwrap();
        assert!(fs.stat(&deep).unwrap().is_dir());
    }

    #[test]
    fn test_readdir_batches() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = NativeFs::new();
        fs.mkdir(&join(&tmp, "a"), 0o755).unwrap();
        fs.write_file(&join(&tmp, "b.txt"), b"").unwrap();
        fs.write_file(&join(&tmp, "c.txt"), b"").unwrap();

        let mut dir = fs.open(&tmp.path().to_string_lossy()).unwrap();
        let first = dir.readdirnames(2).unwrap();
        assert!(!first.eof);
        let second = dir.readdirnames(2).unwrap();
        assert_eq!(second.entries.len(), 1);
        assert!(second.eof);
        assert!(dir.readdirnames(2).unwrap().eof);
        let mut names: Vec<String> = first.entries.into_iter().chain(second.entries).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b.txt", "c.txt"]);
    }

    #[test]
    fn test_seek_and_truncate() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = NativeFs::new();
        let path = join(&tmp, "s");
        let mut f = fs.create(&path).unwrap();
        f.write(b"12345").unwrap();
        assert_eq!(f.seek(0, Whence::End).unwrap(), 5);
        f.write(b"678").unwrap();
        assert_eq!(f.stat().unwrap().size(), 8);
        f.truncate(3).unwrap();
        assert!(matches!(f.truncate(-1), Err(FsError::OutOfRange { .. })));
        assert!(matches!(f.seek(-1, Whence::Start), Err(FsError::OutOfRange { .. })));
        assert_eq!(fs.read_file(&path).unwrap(), b"123");
    }

    #[test]
    fn test_rename_and_open_file() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = NativeFs::new();
        let a = join(&tmp, "a");
        let b = join(&tmp, "b");
        fs.write_file(&a, b"data").unwrap();
        fs.rename(&a, &b).unwrap();
        assert_eq!(fs.read_file(&b).unwrap(), b"data");

        let exclusive = OpenOptions::new().write(true).create_new(true);
        assert!(matches!(fs.open_file(&b, &exclusive, 0o600), Err(FsError::AlreadyExists { .. })));
        let missing = OpenOptions::new().read(true);
        assert!(matches!(fs.open_file(&a, &missing, 0o600), Err(FsError::NotFound { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_chmod() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = NativeFs::new();
        let path = join(&tmp, "m");
        let f = fs.create(&path).unwrap();
        f.chmod(0o600).unwrap();
        assert_eq!(fs.stat(&path).unwrap().mode().perm(), 0o600);
    }

    #[test]
    fn test_closed_handle() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = NativeFs::new();
        let mut f = fs.create(&join(&tmp, "c")).unwrap();
        f.close().unwrap();
        assert!(matches!(f.write(b"x"), Err(FsError::Closed { .. })));
        assert!(matches!(f.stat(), Err(FsError::Closed { .. })));
        assert!(matches!(f.close(), Err(FsError::Closed { .. })));
    }
}
