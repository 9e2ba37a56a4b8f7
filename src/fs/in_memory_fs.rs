//! In-Memory File System Implementation
//!
//! A tree of nodes held entirely in process memory, usable anywhere the
//! native filesystem is. Handles carry their own cursor and stay bound to
//! their node even if it is removed from the tree; the node is reclaimed
//! once the last handle closes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use super::path::{self, getpath};
use super::tree::{Node, NodeId, NodeKind, Tree, TreeError};
use super::types::*;

/// 1 GiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1 << 30;

/// Options for constructing an `InMemoryFs`.
#[derive(Debug, Clone)]
pub struct MemFsOptions {
    /// Permission bits of the root directory.
    pub root_perm: u32,
    /// Permission bits given to files made by `create`.
    pub file_perm: u32,
    /// Largest size a file may grow to through `write` or `truncate`.
    pub max_file_size: u64,
    /// Initial working directory, created if missing.
    pub cwd: Option<String>,
    /// Files to seed, parent directories included.
    pub files: InitialFiles,
}

impl Default for MemFsOptions {
    fn default() -> Self {
        Self {
            root_perm: 0o755,
            file_perm: 0o666,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            cwd: None,
            files: InitialFiles::new(),
        }
    }
}

/// In-memory virtual file system.
///
/// Cloning yields another view of the same tree.
#[derive(Debug, Clone)]
pub struct InMemoryFs {
    tree: Arc<Mutex<Tree>>,
    file_perm: u32,
    max_file_size: u64,
}

fn lock(tree: &Mutex<Tree>) -> MutexGuard<'_, Tree> {
    tree.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryFs {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let defaults = MemFsOptions::default();
        Self {
            tree: Arc::new(Mutex::new(Tree::new(defaults.root_perm))),
            file_perm: defaults.file_perm,
            max_file_size: defaults.max_file_size,
        }
    }

    pub fn with_options(options: MemFsOptions) -> FsResult<Self> {
        let fs = Self {
            tree: Arc::new(Mutex::new(Tree::new(options.root_perm))),
            file_perm: options.file_perm,
            max_file_size: options.max_file_size,
        };
        for (path, init) in &options.files {
            fs.seed_file(path, init)?;
        }
        if let Some(cwd) = &options.cwd {
            fs.mkdir_all(cwd, 0o755)?;
            fs.chdir(cwd)?;
        }
        Ok(fs)
    }

    /// Create with initial files.
    pub fn with_files(files: &InitialFiles) -> FsResult<Self> {
        Self::with_options(MemFsOptions {
            files: files.clone(),
            ..Default::default()
        })
    }

    fn seed_file(&self, path: &str, init: &FileInit) -> FsResult<()> {
        let abs = path::normalize_path(path);
        self.mkdir_all(path::dirname(&abs), 0o755)?;
        let mut file = self.create(&abs)?;
        file.write(init.content.as_bytes())?;
        if let Some(perm) = init.perm {
            file.chmod(perm)?;
        }
        file.close()
    }

    /// Number of nodes held in memory, including detached nodes kept alive by
    /// open handles.
    pub fn live_nodes(&self) -> usize {
        lock(&self.tree).len()
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        lock(&self.tree)
    }

    fn handle(&self, tree: &mut Tree, id: NodeId, name: &str, append: bool) -> Box<dyn File> {
        tree.acquire(id);
        Box::new(InMemoryFile {
            tree: Arc::clone(&self.tree),
            node: Some(id),
            name: name.to_string(),
            offset: 0,
            listing: None,
            append,
            max_size: self.max_file_size,
        })
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

fn mkdir_at(tree: &mut Tree, abs: &str, perm: u32) -> Result<NodeId, TreeError> {
    let (parent, name) = tree.resolve_parent(abs)?;
    tree.insert(parent, name, NodeKind::directory(), FileMode::dir(perm))
}

fn is_dir(tree: &Tree, id: NodeId) -> bool {
    tree.get(id).is_some_and(Node::is_dir)
}

fn has_children(tree: &Tree, id: NodeId) -> bool {
    tree.get(id)
        .and_then(Node::children)
        .is_some_and(|c| !c.is_empty())
}

fn truncate_node(tree: &mut Tree, id: NodeId) {
    if let Some(node) = tree.get_mut(id) {
        if let Some(buffer) = node.buffer_mut() {
            buffer.clear();
        }
        node.touch();
    }
}

// ============================================================================
// FileSystem trait implementation
// ============================================================================

impl FileSystem for InMemoryFs {
    fn chdir(&self, path: &str) -> FsResult<()> {
        let mut tree = self.lock();
        let abs = getpath(&tree.cwd_path(), path);
        let id = tree.resolve(&abs).map_err(|e| e.at(path, "chdir"))?;
        tree.set_cwd(id).map_err(|e| e.at(path, "chdir"))?;
        debug!(path = %abs, "chdir");
        Ok(())
    }

    fn getwd(&self) -> FsResult<String> {
        Ok(self.lock().cwd_path())
    }

    fn mkdir(&self, path: &str, perm: u32) -> FsResult<()> {
        let mut tree = self.lock();
        let abs = getpath(&tree.cwd_path(), path);
        mkdir_at(&mut tree, &abs, perm).map_err(|e| e.at(path, "mkdir"))?;
        debug!(path = %abs, perm = format_args!("{:o}", perm), "mkdir");
        Ok(())
    }

    fn mkdir_all(&self, path: &str, perm: u32) -> FsResult<()> {
        let mut tree = self.lock();
        let abs = getpath(&tree.cwd_path(), path);
        let mut prefix = "/".to_string();
        for part in path::components(&abs) {
            prefix = path::join(&prefix, part);
            match mkdir_at(&mut tree, &prefix, perm) {
                Ok(_) => debug!(path = %prefix, "mkdir"),
                Err(TreeError::AlreadyExists)
                    if tree.resolve(&prefix).is_ok_and(|id| is_dir(&tree, id)) => {}
                Err(e) => return Err(e.at(&prefix, "mkdir")),
            }
        }
        Ok(())
    }

    fn remove(&self, path: &str) -> FsResult<()> {
        let mut tree = self.lock();
        let abs = getpath(&tree.cwd_path(), path);
        let id = tree.resolve(&abs).map_err(|e| e.at(path, "rm"))?;
        if has_children(&tree, id) {
            return Err(TreeError::NotEmpty.at(path, "rm"));
        }
        tree.detach(id).map_err(|e| e.at(path, "rm"))?;
        debug!(path = %abs, "remove");
        Ok(())
    }

    fn remove_all(&self, path: &str) -> FsResult<()> {
        let mut tree = self.lock();
        let abs = getpath(&tree.cwd_path(), path);
        let id = tree.resolve(&abs).map_err(|e| e.at(path, "rm"))?;
        tree.detach(id).map_err(|e| e.at(path, "rm"))?;
        debug!(path = %abs, "remove_all");
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        let mut tree = self.lock();
        let cwd = tree.cwd_path();
        let src_abs = getpath(&cwd, old);
        let dst_abs = getpath(&cwd, new);
        let src = tree.resolve(&src_abs).map_err(|e| e.at(old, "rename"))?;
        if src == tree.root() || dst_abs == "/" {
            return Err(TreeError::InvalidArgument.at(old, "rename"));
        }
        let (dst_parent, dst_name) = tree.resolve_parent(&dst_abs).map_err(|e| e.at(new, "rename"))?;

        if let Some(existing) = tree.child(dst_parent, dst_name).filter(|&id| id != src) {
            match (is_dir(&tree, src), is_dir(&tree, existing)) {
                (false, true) => return Err(TreeError::IsDirectory.at(new, "rename")),
                (true, false) => return Err(TreeError::NotADirectory.at(new, "rename")),
                (true, true) if has_children(&tree, existing) => {
                    return Err(TreeError::NotEmpty.at(new, "rename"));
                }
                _ => {}
            }
        }

        tree.move_node(src, dst_parent, dst_name).map_err(|e| e.at(new, "rename"))?;
        debug!(from = %src_abs, to = %dst_abs, "rename");
        Ok(())
    }

    fn create(&self, path: &str) -> FsResult<Box<dyn File>> {
        let mut tree = self.lock();
        let abs = getpath(&tree.cwd_path(), path);
        let (parent, name) = tree.resolve_parent(&abs).map_err(|e| e.at(path, "open"))?;
        let id = match tree.child(parent, name) {
            Some(existing) if is_dir(&tree, existing) => {
                return Err(TreeError::AlreadyExists.at(path, "open"));
            }
            Some(existing) => {
                truncate_node(&mut tree, existing);
                existing
            }
            None => tree
                .insert(parent, name, NodeKind::file(), FileMode::file(self.file_perm))
                .map_err(|e| e.at(path, "open"))?,
        };
        debug!(path = %abs, "create");
        Ok(self.handle(&mut tree, id, path, false))
    }

    fn open(&self, path: &str) -> FsResult<Box<dyn File>> {
        let mut tree = self.lock();
        let abs = getpath(&tree.cwd_path(), path);
        let id = tree.resolve(&abs).map_err(|e| e.at(path, "open"))?;
        trace!(path = %abs, "open");
        Ok(self.handle(&mut tree, id, path, false))
    }

    fn open_file(&self, path: &str, options: &OpenOptions, perm: u32) -> FsResult<Box<dyn File>> {
        let mut tree = self.lock();
        let abs = getpath(&tree.cwd_path(), path);
        let existing = match tree.resolve_parent(&abs) {
            Ok((parent, name)) => tree.child(parent, name),
            Err(TreeError::AlreadyExists) => Some(tree.root()),
            Err(e) => return Err(e.at(path, "open")),
        };

        let id = match existing {
            Some(_) if options.create_new => {
                return Err(TreeError::AlreadyExists.at(path, "open"));
            }
            Some(id) => {
                if options.truncate {
                    if is_dir(&tree, id) {
                        return Err(TreeError::IsDirectory.at(path, "open"));
                    }
                    truncate_node(&mut tree, id);
                }
                id
            }
            None if options.create || options.create_new => {
                let (parent, name) = tree.resolve_parent(&abs).map_err(|e| e.at(path, "open"))?;
                let id = tree
                    .insert(parent, name, NodeKind::file(), FileMode::file(perm))
                    .map_err(|e| e.at(path, "open"))?;
                debug!(path = %abs, perm = format_args!("{:o}", perm), "create");
                id
            }
            None => return Err(TreeError::NotFound.at(path, "open")),
        };
        Ok(self.handle(&mut tree, id, path, options.append))
    }

    fn stat(&self, path: &str) -> FsResult<FileInfo> {
        let tree = self.lock();
        let abs = getpath(&tree.cwd_path(), path);
        let id = tree.resolve(&abs).map_err(|e| e.at(path, "stat"))?;
        tree.get(id)
            .map(Node::info)
            .ok_or_else(|| TreeError::NotFound.at(path, "stat"))
    }
}

// ============================================================================
// File handle
// ============================================================================

/// Cursor-bearing handle onto one node of an `InMemoryFs`.
#[derive(Debug)]
pub struct InMemoryFile {
    tree: Arc<Mutex<Tree>>,
    node: Option<NodeId>,
    name: String,
    offset: i64,
    /// Names still to be listed by `readdir`, taken on its first call.
    listing: Option<VecDeque<String>>,
    append: bool,
    max_size: u64,
}

impl InMemoryFile {
    fn closed(&self, operation: &str) -> FsError {
        FsError::Closed {
            path: self.name.clone(),
            operation: operation.to_string(),
        }
    }

    fn error(&self, kind: TreeError, operation: &str) -> FsError {
        kind.at(&self.name, operation)
    }

    fn out_of_range(&self, operation: &str) -> FsError {
        FsError::OutOfRange {
            path: self.name.clone(),
            operation: operation.to_string(),
        }
    }

    /// Set `buffer` to `len` bytes, zero-filling growth. Sizes above the
    /// limit or that cannot be allocated fail `OutOfRange`.
    fn resize(&self, buffer: &mut Vec<u8>, len: u64, operation: &str) -> FsResult<()> {
        let len = usize::try_from(len)
            .ok()
            .filter(|_| len <= self.max_size)
            .ok_or_else(|| self.out_of_range(operation))?;
        if len > buffer.len() {
            buffer
                .try_reserve_exact(len - buffer.len())
                .map_err(|_| self.out_of_range(operation))?;
        }
        buffer.resize(len, 0);
        Ok(())
    }

    fn id(&self, operation: &str) -> FsResult<NodeId> {
        self.node.ok_or_else(|| self.closed(operation))
    }

    /// Lock the tree and hand back the bound node id.
    fn bound(&self, operation: &str) -> FsResult<(MutexGuard<'_, Tree>, NodeId)> {
        let id = self.id(operation)?;
        Ok((lock(&self.tree), id))
    }
}

impl File for InMemoryFile {
    fn chdir(&self) -> FsResult<()> {
        let (mut tree, id) = self.bound("chdir")?;
        let node = tree.get(id).ok_or_else(|| self.closed("chdir"))?;
        let target = if node.is_dir() {
            id
        } else {
            node.parent().ok_or_else(|| self.error(TreeError::NotFound, "chdir"))?
        };
        tree.set_cwd(target).map_err(|e| self.error(e, "chdir"))?;
        debug!(path = %tree.cwd_path(), "chdir via handle");
        Ok(())
    }

    fn chmod(&self, perm: u32) -> FsResult<()> {
        let (mut tree, id) = self.bound("chmod")?;
        let node = tree.get_mut(id).ok_or_else(|| self.closed("chmod"))?;
        node.mode = node.mode.with_perm(perm);
        Ok(())
    }

    fn close(&mut self) -> FsResult<()> {
        let id = self.node.take().ok_or_else(|| self.closed("close"))?;
        lock(&self.tree).release(id);
        trace!(path = %self.name, "close");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let id = self.id("read")?;
        let tree = lock(&self.tree);
        let node = tree.get(id).ok_or_else(|| self.closed("read"))?;
        let data = node
            .buffer()
            .ok_or_else(|| self.error(TreeError::IsDirectory, "read"))?;
        if buf.is_empty() {
            return Ok(0);
        }
        if self.offset < 0 {
            return Err(self.out_of_range("read"));
        }
        let pos = self.offset as usize;
        if pos >= data.len() {
            return Err(FsError::Eof);
        }
        let n = buf.len().min(data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        drop(tree);
        self.offset += n as i64;
        trace!(path = %self.name, n, offset = self.offset, "read");
        Ok(n)
    }

    fn readdir(&mut self, n: i32) -> FsResult<DirBatch<FileInfo>> {
        let id = self.id("readdir")?;
        let tree = lock(&self.tree);
        let node = tree.get(id).ok_or_else(|| self.closed("readdir"))?;
        let children = node
            .children()
            .ok_or_else(|| self.error(TreeError::NotADirectory, "readdir"))?;
        let listing = self
            .listing
            .get_or_insert_with(|| children.keys().cloned().collect());
        let limit = if n > 0 { n as usize } else { usize::MAX };
        let mut entries = Vec::new();
        while entries.len() < limit {
            let Some(name) = listing.pop_front() else {
                break;
            };
            // skip names removed since the listing was taken
            if let Some(child) = children.get(&name).and_then(|&c| tree.get(c)) {
                entries.push(child.info());
            }
        }
        drop(tree);
        let eof = n > 0 && entries.len() < limit;
        trace!(path = %self.name, count = entries.len(), eof, "readdir");
        Ok(DirBatch { entries, eof })
    }

    fn stat(&self) -> FsResult<FileInfo> {
        let (tree, id) = self.bound("stat")?;
        tree.get(id).map(Node::info).ok_or_else(|| self.closed("stat"))
    }

    fn sync(&self) -> FsResult<()> {
        self.bound("sync").map(|_| ())
    }

    fn seek(&mut self, delta: i64, whence: Whence) -> FsResult<i64> {
        let id = self.id("seek")?;
        let tree = lock(&self.tree);
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.offset,
            Whence::End => tree.get(id).map_or(0, |n| n.size() as i64),
        };
        drop(tree);
        self.offset = base
            .checked_add(delta)
            .ok_or_else(|| self.out_of_range("seek"))?;
        Ok(self.offset)
    }

    fn truncate(&self, size: i64) -> FsResult<()> {
        if size < 0 {
            return Err(self.out_of_range("truncate"));
        }
        let (mut tree, id) = self.bound("truncate")?;
        let node = tree.get_mut(id).ok_or_else(|| self.closed("truncate"))?;
        let buffer = node
            .buffer_mut()
            .ok_or_else(|| self.error(TreeError::IsDirectory, "truncate"))?;
        self.resize(buffer, size as u64, "truncate")?;
        node.touch();
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        let id = self.id("write")?;
        let mut tree = lock(&self.tree);
        let node = tree.get_mut(id).ok_or_else(|| self.closed("write"))?;
        let data = node
            .buffer_mut()
            .ok_or_else(|| self.error(TreeError::IsDirectory, "write"))?;
        if self.append {
            self.offset = data.len() as i64;
        }
        if self.offset < 0 {
            return Err(self.out_of_range("write"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let end = (self.offset as u64).saturating_add(buf.len() as u64);
        if end > data.len() as u64 {
            // Any gap between the old end and the offset reads back as zeros.
            self.resize(data, end, "write")?;
        }
        let end = end as usize;
        let pos = end - buf.len();
        data[pos..end].copy_from_slice(buf);
        node.touch();
        drop(tree);
        self.offset = end as i64;
        trace!(path = %self.name, n = buf.len(), offset = self.offset, "write");
        Ok(buf.len())
    }
}

impl Drop for InMemoryFile {
    fn drop(&mut self) {
        if let Some(id) = self.node.take() {
            lock(&self.tree).release(id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
