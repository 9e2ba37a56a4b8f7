//! Script Session
//!
//! A small command language for driving any `FileSystem` from a script:
//!
//! ```text
//! mkdir -p /srv/www; cd /srv/www
//! write index.html "<h1>hi</h1>"
//! cat index.html; ls; stat index.html
//! ```
//!
//! Statements are separated by newlines or `;`. Single and double quotes
//! group words; `#` starts a comment.

use serde::Serialize;
use tracing::debug;

use crate::fs::{File, FileSystem, FsError, FsResult, OpenOptions};

/// Result of running a script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
}

impl ExecResult {
    pub fn new(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self { stdout, stderr, exit_code }
    }
}

/// Options for creating a `Session`.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Stop at the first failing command
    pub errexit: bool,
}

/// Runs scripts against one filesystem, keeping its working directory
/// between calls.
pub struct Session {
    fs: Box<dyn FileSystem>,
    options: SessionOptions,
}

impl Session {
    pub fn new(fs: Box<dyn FileSystem>, options: SessionOptions) -> Self {
        Self { fs, options }
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    /// Execute a script.
    pub fn exec(&mut self, script: &str) -> ExecResult {
        let mut result = ExecResult::default();
        for words in parse_script(script) {
            debug!(command = ?words, "exec");
            match self.run(&words, &mut result.stdout) {
                Ok(()) => result.exit_code = 0,
                Err(e) => {
                    result.stderr.push_str(&format!("fauxfile: {}: {}\n", words[0], e));
                    result.exit_code = 1;
                    if self.options.errexit {
                        break;
                    }
                }
            }
        }
        result
    }

    fn run(&self, words: &[String], out: &mut String) -> Result<(), String> {
        let args: Vec<&str> = words[1..].iter().map(String::as_str).collect();
        let fs = self.fs.as_ref();
        match (words[0].as_str(), args.as_slice()) {
            ("pwd", []) => {
                out.push_str(&fs.getwd().map_err(err)?);
                out.push('\n');
            }
            ("cd", [path]) => fs.chdir(path).map_err(err)?,
            ("cd", []) => fs.chdir("/").map_err(err)?,
            ("mkdir", ["-p", paths @ ..]) if !paths.is_empty() => {
                for path in paths {
                    fs.mkdir_all(path, 0o755).map_err(err)?;
                }
            }
            ("mkdir", paths) if !paths.is_empty() => {
                for path in paths {
                    fs.mkdir(path, 0o755).map_err(err)?;
                }
            }
            ("touch", paths) if !paths.is_empty() => {
                let opts = OpenOptions::new().write(true).create(true);
                for path in paths {
                    fs.open_file(path, &opts, 0o666).and_then(close).map_err(err)?;
                }
            }
            ("write", [path, text @ ..]) => {
                let mut file = fs.create(path).map_err(err)?;
                write_line(file.as_mut(), text).map_err(err)?;
            }
            ("append", [path, text @ ..]) => {
                let opts = OpenOptions::new().write(true).append(true).create(true);
                let mut file = fs.open_file(path, &opts, 0o666).map_err(err)?;
                write_line(file.as_mut(), text).map_err(err)?;
            }
            ("cat", paths) if !paths.is_empty() => {
                for path in paths {
                    let bytes = fs.read_file(path).map_err(err)?;
                    out.push_str(&String::from_utf8_lossy(&bytes));
                }
            }
            ("ls", []) => list(fs, ".", out).map_err(err)?,
            ("ls", paths) => {
                for path in paths {
                    list(fs, path, out).map_err(err)?;
                }
            }
            ("stat", paths) if !paths.is_empty() => {
                for path in paths {
                    let info = fs.stat(path).map_err(err)?;
                    out.push_str(&format!("{} {} {}\n", info.mode(), info.size(), info.name()));
                }
            }
            ("rm", ["-r", paths @ ..]) if !paths.is_empty() => {
                for path in paths {
                    fs.remove_all(path).map_err(err)?;
                }
            }
            ("rm", paths) if !paths.is_empty() => {
                for path in paths {
                    fs.remove(path).map_err(err)?;
                }
            }
            ("mv", [old, new]) => fs.rename(old, new).map_err(err)?,
            ("chmod", [mode, path]) => {
                let perm = u32::from_str_radix(mode, 8)
                    .map_err(|_| format!("invalid mode: '{}'", mode))?;
                let file = fs.open(path).map_err(err)?;
                file.chmod(perm).map_err(err)?;
            }
            ("truncate", [path, size]) => {
                let size: i64 = size.parse().map_err(|_| format!("invalid size: '{}'", size))?;
                let opts = OpenOptions::new().write(true);
                let file = fs.open_file(path, &opts, 0).map_err(err)?;
                file.truncate(size).map_err(err)?;
            }
            (cmd, _) if is_known(cmd) => return Err("wrong number of arguments".to_string()),
            (cmd, _) => return Err(format!("command not found: {}", cmd)),
        }
        Ok(())
    }
}

const COMMANDS: &[&str] = &[
    "pwd", "cd", "mkdir", "touch", "write", "append", "cat", "ls", "stat", "rm", "mv", "chmod",
    "truncate",
];

fn is_known(cmd: &str) -> bool {
    COMMANDS.contains(&cmd)
}

fn err(e: FsError) -> String {
    e.to_string()
}

fn close(mut file: Box<dyn File>) -> FsResult<()> {
    file.close()
}

fn write_line(file: &mut dyn File, words: &[&str]) -> FsResult<()> {
    let mut line = words.join(" ");
    line.push('\n');
    file.write_string(&line)?;
    file.close()
}

fn list(fs: &dyn FileSystem, path: &str, out: &mut String) -> FsResult<()> {
    let info = fs.stat(path)?;
    if !info.is_dir() {
        out.push_str(info.name());
        out.push('\n');
        return Ok(());
    }
    let mut dir = fs.open(path)?;
    let mut entries = dir.readdir(-1)?.entries;
    dir.close()?;
    entries.sort_by(|a, b| a.name().cmp(b.name()));
    for entry in entries {
        out.push_str(entry.name());
        if entry.is_dir() {
            out.push('/');
        }
        out.push('\n');
    }
    Ok(())
}

/// Split a script into statements of words.
fn parse_script(script: &str) -> Vec<Vec<String>> {
    let mut statements = Vec::new();
    let mut words: Vec<String> = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = script.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => word.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    word.push(next);
                    in_word = true;
                }
            }
            (None, '#') if !in_word => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
                end_statement(&mut statements, &mut words);
            }
            (None, ';' | '\n') => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
                end_statement(&mut statements, &mut words);
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            (None, c) => {
                word.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(word);
    }
    end_statement(&mut statements, &mut words);
    statements
}

fn end_statement(statements: &mut Vec<Vec<String>>, words: &mut Vec<String>) {
    if !words.is_empty() {
        statements.push(std::mem::take(words));
    }
}

// ============================================================================
// Tests
// ============================================================================
