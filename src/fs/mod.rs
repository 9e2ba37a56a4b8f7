//! File System Module
//!
//! One contract, two backends:
//! - InMemoryFs: a tree of nodes held in process memory (for tests)
//! - NativeFs: direct passthrough to the host OS

pub mod types;
pub mod path;
pub mod tree;
pub mod in_memory_fs;
pub mod native_fs;

pub use types::*;
pub use in_memory_fs::{InMemoryFile, InMemoryFs, MemFsOptions};
pub use native_fs::{NativeFile, NativeFs};
