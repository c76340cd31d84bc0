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

//! Recursive listing of the board's filesystem.
//!
//! The interpreter only offers `os.listdir` and `os.stat`, so the walk is
//! driven from the host with one round trip per entry.

use crate::files::{run_command, stdout_text, FsError, RemoteError};
use crate::literal;
use crate::raw_repl::RawReplSession;
use crate::script;

const S_IFMT: i64 = 0xF000;
const S_IFDIR: i64 = 0x4000;
const S_IFREG: i64 = 0x8000;

/// Depth first walk below `root`. Files are returned by full path, empty
/// directories with a trailing `/`.
pub fn walk(session: &mut RawReplSession<'_>, root: &str) -> Result<Vec<String>, FsError> {
    let mut found = Vec::new();
    let names = list(session, root)?;
    descend(session, root, names, &mut found)?;
    Ok(found)
}

fn descend(
    session: &mut RawReplSession<'_>,
    path: &str,
    names: Vec<String>,
    found: &mut Vec<String>,
) -> Result<(), FsError> {
    for name in names {
        let full = join(path, &name);
        match stat_mode(session, &full)? & S_IFMT {
            S_IFDIR => {
                let children = list(session, &full)?;
                if children.is_empty() {
                    found.push(format!("{}/", full));
                } else {
                    descend(session, &full, children, found)?;
                }
            }
            S_IFREG => found.push(full),
            other => log::debug!("Skipping {} (mode {:#x})", full, other),
        }
    }
    Ok(())
}

fn list(session: &mut RawReplSession<'_>, path: &str) -> Result<Vec<String>, FsError> {
    let out = match run_command(session, &script::list_dir(path, false)?) {
        Err(FsError::Remote(RemoteError::NotFound(_))) => return Err(FsError::NotFound(path.to_string())),
        other => other?,
    };
    Ok(literal::parse_str_list(&stdout_text(&out)?)?)
}

fn stat_mode(session: &mut RawReplSession<'_>, path: &str) -> Result<i64, FsError> {
    let out = run_command(session, &script::stat(path)?)?;
    let fields = literal::parse_int_tuple(&stdout_text(&out)?)?;
    fields
        .first()
        .copied()
        .ok_or_else(|| FsError::Parse(format!("empty stat result for {}", path)))
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else if path.ends_with('/') {
        format!("{}{}", path, name)
    } else {
        format!("{}/{}", path, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::files::DeviceFileSystem;
    use crate::raw_repl::SessionOptions;
    use crate::testing::FakeBoard;

    fn sample_board() -> FakeBoard {
        let board = FakeBoard::new();
        board.add_file("boot.py", b"");
        board.add_dir("lib");
        board.add_file("lib/util.py", b"x = 1");
        board.add_dir("lib/drivers");
        board.add_file("lib/drivers/led.py", b"");
        board.add_dir("empty");
        board
    }

    #[test]
    fn test_join() {
        assert_eq!(join(".", "a"), "./a");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("/lib", "a"), "/lib/a");
    }

    #[test]
    fn test_walk_from_dot() {
        let board = sample_board();
        let link = board.link();
        let mut session = RawReplSession::begin(&link, SessionOptions::immediate()).unwrap();

        let mut paths = walk(&mut session, ".").unwrap();
        paths.sort();
        assert_eq!(paths, vec![
            "./boot.py",
            "./empty/",
            "./lib/drivers/led.py",
            "./lib/util.py",
        ]);
    }

    #[test]
    fn test_tree_uses_one_session() {
        let board = sample_board();
        let fs = DeviceFileSystem::new(Arc::new(board.link()), SessionOptions::immediate());

        let mut paths = fs.tree("/lib").unwrap();
        paths.sort();
        assert_eq!(paths, vec!["/lib/drivers/led.py", "/lib/util.py"]);
        assert_eq!(board.state().soft_resets, 1);
        assert!(!board.state().raw);
    }

    #[test]
    fn test_walk_missing_root() {
        let board = FakeBoard::new();
        let fs = DeviceFileSystem::new(Arc::new(board.link()), SessionOptions::immediate());
        assert!(matches!(fs.tree("/nope"), Err(FsError::NotFound(p)) if p == "/nope"));
    }
}
