//! fauxfile - A substitutable filesystem
//!
//! Code written against the `FileSystem` trait can run on the real disk
//! (`NativeFs`) or on a deterministic in-memory tree (`InMemoryFs`).

pub mod fs;
pub mod shell;

pub use fs::{
    DirBatch, File, FileInfo, FileMode, FileSystem, FsError, FsResult, InMemoryFs, MemFsOptions,
    NativeFs, OpenOptions, Whence,
};
pub use shell::{ExecResult, Session, SessionOptions};
