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

//! Remote scripts for filesystem operations.
//!
//! Every path reaches the generated source through [`py_str`], so quotes,
//! backslashes and control characters in names cannot change the script.

use std::fmt;
use thiserror::Error;
use crate::literal::{py_bytes, py_str};
use crate::protocol::FILE_CHUNK_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("path contains a NUL byte: {0:?}")]
    NulInPath(String),
}

/// Source text for one raw REPL evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    source: String,
}

impl Command {
    fn new(source: String) -> Self {
        Command { source }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn path_literal(path: &str) -> Result<String, ScriptError> {
    if path.contains('\0') {
        return Err(ScriptError::NulInPath(path.to_string()));
    }
    Ok(py_str(path))
}

// Some ports only ship the module as `uos`
const IMPORT_OS: &str = "\
try:
    import os
except ImportError:
    import uos as os
";

/// Prints the entries of `directory`, bare or as `name - size bytes`
pub fn list_dir(directory: &str, long: bool) -> Result<Command, ScriptError> {
    let dir = path_literal(directory)?;
    let body = if long {
        format!(
            "\
d = {dir}
r = []
for f in os.listdir(d):
    size = os.stat(d + f)[6]
    r.append('{{}} - {{}} bytes'.format(f, size))
print(r)
"
        )
    } else {
        format!("print(os.listdir({dir}))\n")
    };
    Ok(Command::new(format!("{IMPORT_OS}{body}")))
}

/// Prints the `os.stat` tuple of `path`
pub fn stat(path: &str) -> Result<Command, ScriptError> {
    let path = path_literal(path)?;
    Ok(Command::new(format!("{IMPORT_OS}print(os.stat({path}))\n")))
}

/// Echoes `filename` hex encoded, FILE_CHUNK_SIZE bytes per read.
///
/// Raw bytes could contain the 0x04 that separates stdout from stderr.
pub fn read_file(filename: &str) -> Result<Command, ScriptError> {
    let file = path_literal(filename)?;
    Ok(Command::new(format!(
        "\
import sys
try:
    from binascii import hexlify
except ImportError:
    from ubinascii import hexlify
with open({file}, 'rb') as infile:
    while True:
        result = infile.read({FILE_CHUNK_SIZE})
        if result == b'':
            break
        sys.stdout.write(hexlify(result))
"
    )))
}

/// Binds `f` to `filename` opened for binary writing
pub fn open_for_write(filename: &str) -> Result<Command, ScriptError> {
    let file = path_literal(filename)?;
    Ok(Command::new(format!("f = open({file}, 'wb')")))
}

/// Writes one chunk through the handle bound by [`open_for_write`]
pub fn write_chunk(chunk: &[u8]) -> Command {
    Command::new(format!("f.write({})", py_bytes(chunk)))
}

pub fn close_file() -> Command {
    Command::new("f.close()".to_string())
}

pub fn remove(path: &str) -> Result<Command, ScriptError> {
    let path = path_literal(path)?;
    Ok(Command::new(format!("{IMPORT_OS}os.remove({path})\n")))
}

pub fn make_dir(directory: &str) -> Result<Command, ScriptError> {
    let dir = path_literal(directory)?;
    Ok(Command::new(format!("{IMPORT_OS}os.mkdir({dir})\n")))
}

/// Deletes `directory` and everything below it.
///
/// There is no walk primitive on the board: every entry is first removed
/// as a file, whatever survives must be a directory and is recursed into,
/// then the emptied directory itself goes.
pub fn remove_tree(directory: &str) -> Result<Command, ScriptError> {
    let dir = path_literal(directory)?;
    Ok(Command::new(format!(
        "\
{IMPORT_OS}def rmdir(directory):
    os.chdir(directory)
    for f in os.listdir():
        try:
            os.remove(f)
        except OSError:
            pass
    for f in os.listdir():
        rmdir(f)
    os.chdir('..')
    os.rmdir(directory)
rmdir({dir})
"
    )))
}

/// Prints the interpreter's `os.uname()` record
pub fn uname() -> Command {
    Command::new(format!("{IMPORT_OS}print(os.uname())\n"))
}
