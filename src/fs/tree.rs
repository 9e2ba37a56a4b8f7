//! Node arena
//!
//! Every node lives in one slot vector owned by the `Tree`. Parent and child
//! links are `NodeId` indices, so the parent back-reference never owns
//! anything.
//!
//! A node removed from the tree while a handle still refers to it stays in
//! the arena, detached, until the last handle into its detached subtree is
//! released.

use std::time::SystemTime;

use indexmap::IndexMap;
use tracing::{debug, trace};

use super::path;
use super::types::{FileInfo, FileMode, FsError};

/// Index of a node slot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Payload of a node.
#[derive(Debug)]
pub enum NodeKind {
    Directory { children: IndexMap<String, NodeId> },
    File { buffer: Vec<u8> },
}

impl NodeKind {
    pub fn directory() -> Self {
        NodeKind::Directory { children: IndexMap::new() }
    }

    pub fn file() -> Self {
        NodeKind::File { buffer: Vec::new() }
    }
}

#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub mode: FileMode,
    pub modified: SystemTime,
    parent: Option<NodeId>,
    handles: usize,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> Option<&IndexMap<String, NodeId>> {
        match &self.kind {
            NodeKind::Directory { children } => Some(children),
            NodeKind::File { .. } => None,
        }
    }

    pub fn buffer(&self) -> Option<&Vec<u8>> {
        match &self.kind {
            NodeKind::File { buffer } => Some(buffer),
            NodeKind::Directory { .. } => None,
        }
    }

    pub fn buffer_mut(&mut self) -> Option<&mut Vec<u8>> {
        match &mut self.kind {
            NodeKind::File { buffer } => Some(buffer),
            NodeKind::Directory { .. } => None,
        }
    }

    pub fn size(&self) -> u64 {
        self.buffer().map_or(0, |b| b.len() as u64)
    }

    pub fn touch(&mut self) {
        self.modified = SystemTime::now();
    }

    pub fn info(&self) -> FileInfo {
        FileInfo::new(self.name.clone(), self.size(), self.mode, self.modified)
    }
}

/// Structural failures, turned into `FsError` by the caller which knows the
/// path and operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeError {
    NotFound,
    NotADirectory,
    IsDirectory,
    AlreadyExists,
    NotEmpty,
    InvalidArgument,
}

impl TreeError {
    pub fn at(self, path: &str, operation: &str) -> FsError {
        let path = path.to_string();
        let operation = operation.to_string();
        match self {
            TreeError::NotFound => FsError::NotFound { path, operation },
            TreeError::NotADirectory => FsError::NotADirectory { path, operation },
            TreeError::IsDirectory => FsError::IsDirectory { path, operation },
            TreeError::AlreadyExists => FsError::AlreadyExists { path, operation },
            TreeError::NotEmpty => FsError::NotEmpty { path, operation },
            TreeError::InvalidArgument => FsError::InvalidArgument { path, operation },
        }
    }
}

/// Owner of every node. `cwd` always names an attached directory.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    root: NodeId,
    cwd: NodeId,
}

impl Tree {
    pub fn new(root_perm: u32) -> Self {
        let root = Node {
            name: "/".to_string(),
            kind: NodeKind::directory(),
            mode: FileMode::dir(root_perm),
            modified: SystemTime::now(),
            parent: None,
            handles: 0,
        };
        Self {
            nodes: vec![Some(root)],
            free: Vec::new(),
            root: NodeId(0),
            cwd: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn cwd(&self) -> NodeId {
        self.cwd
    }

    pub fn set_cwd(&mut self, id: NodeId) -> Result<(), TreeError> {
        if !self.is_attached(id) {
            return Err(TreeError::NotFound);
        }
        if !self.node(id).is_dir() {
            return Err(TreeError::NotADirectory);
        }
        self.cwd = id;
        Ok(())
    }

    pub fn cwd_path(&self) -> String {
        self.path_of(self.cwd).unwrap_or_else(|| "/".to_string())
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Ids reachable from the tree or held by a handle are always live.
    fn node(&self, id: NodeId) -> &Node {
        match self.get(id) {
            Some(node) => node,
            None => unreachable!("stale node id {:?}", id),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match self.get_mut(id) {
            Some(node) => node,
            None => unreachable!("stale node id {:?}", id),
        }
    }

    /// Number of live nodes, detached ones included.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self.node(dir).children().and_then(|c| c.get(name).copied())
    }

    /// Walk a normalized absolute path from the root. A missing component or
    /// a file in the middle of the path is `NotFound`.
    pub fn resolve(&self, abs: &str) -> Result<NodeId, TreeError> {
        let mut ptr = self.root;
        for part in path::components(abs) {
            match self.child(ptr, part) {
                Some(child) => ptr = child,
                None => {
                    trace!(path = abs, missing = part, "resolve failed");
                    return Err(TreeError::NotFound);
                }
            }
        }
        Ok(ptr)
    }

    /// Resolve the directory that would hold the last component of `abs`.
    pub fn resolve_parent<'p>(&self, abs: &'p str) -> Result<(NodeId, &'p str), TreeError> {
        let (dir, name) = path::split_parent(abs).ok_or(TreeError::AlreadyExists)?;
        let parent = self.resolve(dir)?;
        if !self.node(parent).is_dir() {
            return Err(TreeError::NotADirectory);
        }
        Ok((parent, name))
    }

    /// Add a new child under `parent`. Names are unique among siblings.
    pub fn insert(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        mode: FileMode,
    ) -> Result<NodeId, TreeError> {
        match self.node(parent).children() {
            None => return Err(TreeError::NotADirectory),
            Some(children) if children.contains_key(name) => return Err(TreeError::AlreadyExists),
            Some(_) => {}
        }
        let node = Node {
            name: name.to_string(),
            kind,
            mode,
            modified: SystemTime::now(),
            parent: Some(parent),
            handles: 0,
        };
        let id = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        };
        self.link(parent, name, id);
        Ok(id)
    }

    fn link(&mut self, parent: NodeId, name: &str, id: NodeId) {
        let dir = self.node_mut(parent);
        if let NodeKind::Directory { children } = &mut dir.kind {
            children.insert(name.to_string(), id);
        }
        dir.touch();
    }

    fn unlink(&mut self, id: NodeId) {
        let Some(parent) = self.node(id).parent else {
            return;
        };
        let name = self.node(id).name.clone();
        let dir = self.node_mut(parent);
        if let NodeKind::Directory { children } = &mut dir.kind {
            children.shift_remove(&name);
        }
        dir.touch();
        self.node_mut(id).parent = None;
    }

    /// Full path by walking parent links. `None` once detached.
    pub fn path_of(&self, id: NodeId) -> Option<String> {
        let mut names = Vec::new();
        let mut ptr = id;
        while ptr != self.root {
            let node = self.get(ptr)?;
            names.push(node.name.as_str());
            ptr = node.parent?;
        }
        names.reverse();
        Some(format!("/{}", names.join("/")))
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.top_of(id) == self.root
    }

    /// Topmost ancestor: the root for attached nodes, the detached subtree's
    /// head otherwise.
    fn top_of(&self, id: NodeId) -> NodeId {
        let mut ptr = id;
        while let Some(parent) = self.get(ptr).and_then(|n| n.parent) {
            ptr = parent;
        }
        ptr
    }

    /// True if `ancestor` is `id` or lies on its parent chain.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut ptr = Some(id);
        while let Some(cur) = ptr {
            if cur == ancestor {
                return true;
            }
            ptr = self.get(cur).and_then(|n| n.parent);
        }
        false
    }

    /// Remove `id` and its subtree from the tree. If the working directory
    /// was inside, it moves up to `id`'s parent.
    pub fn detach(&mut self, id: NodeId) -> Result<(), TreeError> {
        let Some(parent) = self.node(id).parent else {
            return Err(TreeError::InvalidArgument);
        };
        if self.is_ancestor(id, self.cwd) {
            debug!(node = ?id, "working directory removed, moving to parent");
            self.cwd = parent;
        }
        self.unlink(id);
        self.reclaim_if_unreferenced(id);
        Ok(())
    }

    /// Re-parent `id` as `new_parent/new_name`, replacing whatever is there
    /// (the caller has already checked the replacement is allowed).
    pub fn move_node(&mut self, id: NodeId, new_parent: NodeId, new_name: &str) -> Result<(), TreeError> {
        if self.node(id).parent.is_none() || self.is_ancestor(id, new_parent) {
            return Err(TreeError::InvalidArgument);
        }
        if let Some(existing) = self.child(new_parent, new_name) {
            if existing == id {
                return Ok(());
            }
            self.detach(existing)?;
        }
        self.unlink(id);
        let node = self.node_mut(id);
        node.name = new_name.to_string();
        node.parent = Some(new_parent);
        self.link(new_parent, new_name, id);
        Ok(())
    }

    /// Register a handle bound to `id`.
    pub fn acquire(&mut self, id: NodeId) {
        self.node_mut(id).handles += 1;
    }

    /// Drop a handle bound to `id`; reclaims its detached subtree when this
    /// was the last reference into it.
    pub fn release(&mut self, id: NodeId) {
        let node = self.node_mut(id);
        node.handles = node.handles.saturating_sub(1);
        let top = self.top_of(id);
        if top != self.root {
            self.reclaim_if_unreferenced(top);
        }
    }

    fn subtree(&self, top: NodeId) -> Vec<NodeId> {
        let mut out = vec![top];
        let mut i = 0;
        while i < out.len() {
            if let Some(children) = self.node(out[i]).children() {
                out.extend(children.values().copied());
            }
            i += 1;
        }
        out
    }

    fn reclaim_if_unreferenced(&mut self, top: NodeId) {
        let ids = self.subtree(top);
        if ids.iter().any(|&id| self.node(id).handles > 0) {
            debug!(node = ?top, "detached subtree still referenced by open handles");
            return;
        }
        for id in &ids {
            self.nodes[id.0] = None;
            self.free.push(id.0);
        }
        debug!(node = ?top, freed = ids.len(), "reclaimed detached subtree");
    }
}

// ============================================================================
// Tests
// ============================================================================
