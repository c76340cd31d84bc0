// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Filesystem operations on the board, each carried out by generated
//! scripts inside its own raw REPL session.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use crate::literal::{self, LiteralError};
use crate::protocol::FILE_CHUNK_SIZE;
use crate::raw_repl::{RawReplSession, ReplError, SessionOptions};
use crate::script::{self, Command, ScriptError};
use crate::serial::SerialLink;
use crate::tree;

// ============================================================================
// Remote Errors
// ============================================================================

/// Failure printed by the board, classified by its errno marker.
///
/// Each variant carries the short form of the traceback, see [`summary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    NotFound(String),
    AlreadyExists(String),
    NotEmpty(String),
    Other(String),
}

const NOT_FOUND_MARKERS: &[&str] = &["ENOENT", "[Errno 2]"];
const EXISTS_MARKERS: &[&str] = &["EEXIST", "[Errno 17]"];
const NOT_EMPTY_MARKERS: &[&str] = &["EACCES", "[Errno 13]", "ENOTEMPTY", "[Errno 39]"];

impl RemoteError {
    pub fn parse(stderr: &[u8]) -> Self {
        let text = String::from_utf8_lossy(stderr);
        let has = |markers: &[&str]| markers.iter().any(|m| text.contains(m));
        let message = summary(stderr);

        if has(NOT_FOUND_MARKERS) {
            RemoteError::NotFound(message)
        } else if has(EXISTS_MARKERS) {
            RemoteError::AlreadyExists(message)
        } else if has(NOT_EMPTY_MARKERS) {
            RemoteError::NotEmpty(message)
        } else {
            RemoteError::Other(message)
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RemoteError::NotFound(m)
            | RemoteError::AlreadyExists(m)
            | RemoteError::NotEmpty(m)
            | RemoteError::Other(m) => m,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Last line of a traceback, e.g. `OSError: [Errno 2] ENOENT`
pub fn summary(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| "There was an error.".to_string())
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum FsError {
    #[error("No such file or directory: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Directory is not empty: {0}")]
    NotEmpty(String),
    #[error("{0}")]
    Remote(RemoteError),
    #[error("Could not parse board output: {0}")]
    Parse(String),
    #[error(transparent)]
    Repl(#[from] ReplError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LiteralError> for FsError {
    fn from(err: LiteralError) -> Self {
        FsError::Parse(err.to_string())
    }
}

/// Runs `command`, turning anything on stderr into [`FsError::Remote`]
pub(crate) fn run_command(session: &mut RawReplSession<'_>, command: &Command) -> Result<Vec<u8>, FsError> {
    let response = session.execute(command.as_str())?;
    if response.is_success() {
        Ok(response.stdout)
    } else {
        Err(FsError::Remote(RemoteError::parse(&response.stderr)))
    }
}

pub(crate) fn stdout_text(stdout: &[u8]) -> Result<String, FsError> {
    String::from_utf8(stdout.to_vec()).map_err(|e| FsError::Parse(e.to_string()))
}

// ============================================================================
// File System
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    /// Only known for long listings
    pub size: Option<u64>,
}

pub struct DeviceFileSystem {
    link: Arc<SerialLink>,
    options: SessionOptions,
}

impl DeviceFileSystem {
    pub fn new(link: Arc<SerialLink>, options: SessionOptions) -> Self {
        DeviceFileSystem { link, options }
    }

    pub fn link(&self) -> &Arc<SerialLink> {
        &self.link
    }

    fn session(&self) -> Result<RawReplSession<'_>, FsError> {
        Ok(RawReplSession::begin(&self.link, self.options.clone())?)
    }

    /// Runs a single command in a fresh session
    fn run_once(&self, command: &Command) -> Result<Vec<u8>, FsError> {
        let mut session = self.session()?;
        let out = run_command(&mut session, command)?;
        session.exit_raw_mode()?;
        Ok(out)
    }

    pub fn ls(&self, directory: &str, long: bool) -> Result<Vec<FileEntry>, FsError> {
        let mut directory = directory.to_string();
        if !directory.ends_with('/') {
            directory.push('/');
        }

        let out = match self.run_once(&script::list_dir(&directory, long)?) {
            Err(FsError::Remote(RemoteError::NotFound(_))) => return Err(FsError::NotFound(directory)),
            other => other?,
        };

        let names = literal::parse_str_list(&stdout_text(&out)?)?;
        if !long {
            return Ok(names
                .into_iter()
                .map(|name| FileEntry { name, size: None })
                .collect());
        }

        names.iter().map(|item| parse_long_entry(item)).collect()
    }

    pub fn get(&self, filename: &str) -> Result<Vec<u8>, FsError> {
        let out = match self.run_once(&script::read_file(filename)?) {
            Err(FsError::Remote(RemoteError::NotFound(_))) => return Err(FsError::NotFound(filename.to_string())),
            other => other?,
        };

        let digits: Vec<u8> = out.into_iter().filter(|b| !b.is_ascii_whitespace()).collect();
        hex::decode(digits).map_err(|e| FsError::Parse(e.to_string()))
    }

    /// Writes `data` FILE_CHUNK_SIZE bytes per evaluation
    pub fn put(&self, filename: &str, data: &[u8]) -> Result<(), FsError> {
        let mut session = self.session()?;

        match run_command(&mut session, &script::open_for_write(filename)?) {
            Err(FsError::Remote(RemoteError::NotFound(_))) => return Err(FsError::NotFound(filename.to_string())),
            other => other?,
        };

        for (i, chunk) in data.chunks(FILE_CHUNK_SIZE).enumerate() {
            run_command(&mut session, &script::write_chunk(chunk))?;
            log::debug!("Wrote chunk {} of {} ({} bytes)", i + 1, data.len().div_ceil(FILE_CHUNK_SIZE), chunk.len());
        }

        run_command(&mut session, &script::close_file())?;
        session.exit_raw_mode()?;
        log::info!("Put {} ({} bytes)", filename, data.len());
        Ok(())
    }

    pub fn rm(&self, filename: &str) -> Result<(), FsError> {
        match self.run_once(&script::remove(filename)?) {
            Ok(_) => Ok(()),
            Err(FsError::Remote(RemoteError::NotFound(_))) => Err(FsError::NotFound(filename.to_string())),
            Err(FsError::Remote(RemoteError::NotEmpty(_))) => Err(FsError::NotEmpty(filename.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Creates one directory; parents must already exist
    pub fn mkdir(&self, directory: &str, exists_ok: bool) -> Result<(), FsError> {
        match self.run_once(&script::make_dir(directory)?) {
            Ok(_) => Ok(()),
            Err(FsError::Remote(RemoteError::AlreadyExists(_))) if exists_ok => Ok(()),
            Err(FsError::Remote(RemoteError::AlreadyExists(_))) => Err(FsError::AlreadyExists(directory.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Removes `directory` with all of its contents
    pub fn rmdir(&self, directory: &str, missing_ok: bool) -> Result<(), FsError> {
        match self.run_once(&script::remove_tree(directory)?) {
            Ok(_) => Ok(()),
            Err(FsError::Remote(RemoteError::NotFound(_))) if missing_ok => Ok(()),
            Err(FsError::Remote(RemoteError::NotFound(_))) => Err(FsError::NotFound(directory.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Runs a host script on the board. Without `wait_output` the script is
    /// only started and `None` is returned.
    pub fn run(&self, filename: &Path, wait_output: bool) -> Result<Option<Vec<u8>>, FsError> {
        let code = std::fs::read_to_string(filename)?;
        let mut session = self.session()?;

        let out = if wait_output {
            let response = session.execute(&code)?;
            if !response.is_success() {
                return Err(FsError::Remote(RemoteError::parse(&response.stderr)));
            }
            Some(response.stdout)
        } else {
            session.exec_no_follow(code.as_bytes())?;
            None
        };

        session.exit_raw_mode()?;
        Ok(out)
    }

    /// Fields of `os.uname()`, e.g. `release` and `machine`
    pub fn version(&self) -> Result<BTreeMap<String, String>, FsError> {
        let out = self.run_once(&script::uname())?;
        let fields = literal::parse_named_tuple(&stdout_text(&out)?)?;
        Ok(fields.into_iter().collect())
    }

    /// Every file below `root`; empty directories end with `/`
    pub fn tree(&self, root: &str) -> Result<Vec<String>, FsError> {
        let mut session = self.session()?;
        let paths = tree::walk(&mut session, root)?;
        session.exit_raw_mode()?;
        Ok(paths)
    }

    /// Copies a device file to the host
    pub fn get_to(&self, filename: &str, target: &Path) -> Result<(), FsError> {
        let data = self.get(filename)?;
        std::fs::write(target, data)?;
        Ok(())
    }

    /// Copies a host file to the board, by default under its own name.
    /// Returns the device path written.
    pub fn put_from(&self, source: &Path, target: Option<&str>) -> Result<String, FsError> {
        if !source.is_file() {
            return Err(FsError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("No such file: {}", source.display()),
            )));
        }
        let data = std::fs::read(source)?;
        let target = match target {
            Some(t) => t.to_string(),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| FsError::Parse(format!("no file name in {}", source.display())))?,
        };
        self.put(&target, &data)?;
        Ok(target)
    }
}

fn parse_long_entry(item: &str) -> Result<FileEntry, FsError> {
    let malformed = || FsError::Parse(format!("unexpected listing entry {:?}", item));
    let (name, size) = item.rsplit_once(" - ").ok_or_else(malformed)?;
    let size = size
        .strip_suffix(" bytes")
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(malformed)?;
    Ok(FileEntry {
        name: name.to_string(),
        size: Some(size),
    })
}

// ============================================================================
// Tests
// ============================================================================
