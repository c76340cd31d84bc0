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

//! In-memory boards for tests.
//!
//! [`FakeBoard`] speaks the raw REPL and understands the scripts built in
//! [`crate::script`] well enough to keep a small filesystem. [`FakeFlashDevice`]
//! acknowledges framed flash commands.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use crate::frame::{self, Command, FrameParser, Payload};
use crate::literal;
use crate::protocol::*;
use crate::serial::{SerialLink, SerialPort};

fn timed_out() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "Fake timeout")
}

fn read_output(output: &mut VecDeque<u8>, buf: &mut [u8]) -> usize {
    let n = buf.len().min(output.len());
    for (slot, byte) in buf.iter_mut().zip(output.drain(..n)) {
        *slot = byte;
    }
    n
}

// ============================================================================
// Raw REPL Board
// ============================================================================

const FRIENDLY_BANNER: &[u8] =
    b"MicroPython v1.20.0 on 2023-04-26; Fake board with FAKE0\r\nType \"help()\" for more information.\r\n>>> ";

const UNAME: &str = "(sysname='fakeboard', nodename='fakeboard', release='1.20.0', \
                     version='v1.20.0 on 2023-04-26', machine='Fake board with FAKE0')";

#[derive(Debug, Default)]
pub struct BoardState {
    pub raw: bool,
    /// Files by normalized path, e.g. `lib/util.py`
    pub files: BTreeMap<String, Vec<u8>>,
    /// Directories by normalized path; the root is implicit
    pub dirs: BTreeSet<String>,
    /// Length of every `write_all` the host made
    pub write_sizes: Vec<usize>,
    /// Every script evaluated, in order
    pub executed: Vec<String>,
    pub soft_resets: u32,
    /// Print the friendly banner after a soft reboot instead of the raw one
    pub quiet_reset: bool,
    input: Vec<u8>,
    output: VecDeque<u8>,
    open_file: Option<String>,
}

#[derive(Clone, Default)]
pub struct FakeBoard {
    state: Arc<Mutex<BoardState>>,
}

impl FakeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self) -> SerialLink {
        SerialLink::new("fake", Box::new(FakeBoardPort { state: self.state.clone() }))
    }

    pub fn state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap()
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.state().files.insert(normalize(path), data.to_vec());
    }

    pub fn add_dir(&self, path: &str) {
        self.state().dirs.insert(normalize(path));
    }
}

struct FakeBoardPort {
    state: Arc<Mutex<BoardState>>,
}

impl SerialPort for FakeBoardPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.write_sizes.push(buf.len());
        for &byte in buf {
            state.receive(byte);
        }
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.output.is_empty() {
                return Ok(read_output(&mut state.output, buf));
            }
        }
        std::thread::sleep(timeout.min(Duration::from_millis(1)));
        Err(timed_out())
    }
}

impl BoardState {
    fn send(&mut self, bytes: &[u8]) {
        self.output.extend(bytes);
    }

    fn receive(&mut self, byte: u8) {
        match (self.raw, byte) {
            (true, CTRL_A) => {
                self.input.clear();
                self.send(RAW_REPL_BANNER);
            }
            (true, CTRL_B) => {
                self.raw = false;
                self.input.clear();
                self.send(b"\r\n>>> ");
            }
            (true, CTRL_C) => self.input.clear(),
            (true, CTRL_D) if self.input.is_empty() => self.soft_reboot(),
            (true, CTRL_D) => self.evaluate(),
            (true, other) => self.input.push(other),
            (false, CTRL_A) => {
                self.raw = true;
                self.input.clear();
                self.send(b"\r\n");
                self.send(RAW_REPL_BANNER);
            }
            (false, CTRL_B) => self.send(FRIENDLY_BANNER),
            (false, CTRL_C) => self.send(b"\r\n>>> "),
            (false, _) => {}
        }
    }

    fn soft_reboot(&mut self) {
        self.soft_resets += 1;
        self.open_file = None;
        self.send(b"OK\r\nMPY: soft reboot\r\n");
        if self.quiet_reset {
            self.raw = false;
            self.send(FRIENDLY_BANNER);
        } else {
            self.send(RAW_REPL_BANNER);
        }
    }

    fn evaluate(&mut self) {
        let source = String::from_utf8_lossy(&self.input).into_owned();
        self.input.clear();
        self.executed.push(source.clone());

        let (stdout, stderr) = match self.interpret(&source) {
            Ok(out) => (out, Vec::new()),
            Err(err) => (Vec::new(), err),
        };
        self.send(EXEC_ACCEPTED);
        self.send(&stdout);
        self.send(&[CTRL_D]);
        self.send(&stderr);
        self.send(EXEC_TERMINATOR);
    }

    /// Recognizes the generated scripts by their distinctive statements
    fn interpret(&mut self, source: &str) -> Result<Vec<u8>, Vec<u8>> {
        if source.contains("def rmdir(") {
            let dir = literal_after(source, "\nrmdir(")?;
            return self.remove_tree(&dir);
        }
        if source.contains("r.append(") {
            let dir = literal_after(source, "d = ")?;
            return self.long_listing(&dir);
        }
        if source.contains("hexlify") {
            let file = literal_after(source, "with open(")?;
            let data = self.files.get(&normalize(&file)).ok_or_else(|| os_error(2, "ENOENT"))?;
            return Ok(hex::encode(data).into_bytes());
        }
        if source.contains("print(os.listdir(") {
            let dir = literal_after(source, "print(os.listdir(")?;
            let names = self.children(&dir)?;
            return Ok(print_line(&repr_list(&names)));
        }
        if source.contains("print(os.stat(") {
            let path = literal_after(source, "print(os.stat(")?;
            return self.stat(&path).map(|stat| print_line(&stat));
        }
        if source.contains("os.uname()") {
            return Ok(print_line(UNAME));
        }
        if source.starts_with("f = open(") {
            let file = normalize(&literal_after(source, "f = open(")?);
            if !self.is_dir(parent(&file)) || self.is_dir(&file) {
                return Err(os_error(2, "ENOENT"));
            }
            self.files.insert(file.clone(), Vec::new());
            self.open_file = Some(file);
            return Ok(Vec::new());
        }
        if let Some(rest) = source.strip_prefix("f.write(") {
            let (chunk, _) = literal::parse_bytes(rest).map_err(|e| traceback("SyntaxError", &e.to_string()))?;
            let file = self.open_file.clone().ok_or_else(|| traceback("NameError", "name 'f' isn't defined"))?;
            self.files.entry(file).or_default().extend_from_slice(&chunk);
            return Ok(Vec::new());
        }
        if source == "f.close()" {
            return match self.open_file.take() {
                Some(_) => Ok(Vec::new()),
                None => Err(traceback("NameError", "name 'f' isn't defined")),
            };
        }
        if source.contains("os.remove(") {
            let path = normalize(&literal_after(source, "os.remove(")?);
            if self.files.remove(&path).is_some() {
                return Ok(Vec::new());
            }
            return Err(if self.is_dir(&path) { os_error(13, "EACCES") } else { os_error(2, "ENOENT") });
        }
        if source.contains("os.mkdir(") {
            let path = normalize(&literal_after(source, "os.mkdir(")?);
            if self.is_dir(&path) || self.files.contains_key(&path) {
                return Err(os_error(17, "EEXIST"));
            }
            if !self.is_dir(parent(&path)) {
                return Err(os_error(2, "ENOENT"));
            }
            self.dirs.insert(path);
            return Ok(Vec::new());
        }
        run_statements(source)
    }

    fn is_dir(&self, path: &str) -> bool {
        path.is_empty() || self.dirs.contains(path)
    }

    fn children(&self, dir: &str) -> Result<Vec<String>, Vec<u8>> {
        let dir = normalize(dir);
        if !self.is_dir(&dir) {
            return Err(os_error(2, "ENOENT"));
        }
        let names: BTreeSet<String> = self
            .files
            .keys()
            .chain(self.dirs.iter())
            .filter(|path| !path.is_empty() && parent(path) == dir)
            .map(|path| base_name(path).to_string())
            .collect();
        Ok(names.into_iter().collect())
    }

    fn stat(&self, path: &str) -> Result<String, Vec<u8>> {
        let path = normalize(path);
        let (mode, size) = if let Some(data) = self.files.get(&path) {
            (0x8000, data.len())
        } else if self.is_dir(&path) {
            (0x4000, 0)
        } else {
            return Err(os_error(2, "ENOENT"));
        };
        Ok(format!("({}, 0, 0, 0, 0, 0, {}, 0, 0, 0)", mode, size))
    }

    fn long_listing(&self, dir: &str) -> Result<Vec<u8>, Vec<u8>> {
        let base = normalize(dir);
        let entries: Vec<String> = self
            .children(dir)?
            .into_iter()
            .map(|name| {
                let path = if base.is_empty() { name.clone() } else { format!("{}/{}", base, name) };
                let size = self.files.get(&path).map_or(0, Vec::len);
                format!("{} - {} bytes", name, size)
            })
            .collect();
        Ok(print_line(&repr_list(&entries)))
    }

    fn remove_tree(&mut self, dir: &str) -> Result<Vec<u8>, Vec<u8>> {
        let dir = normalize(dir);
        if dir.is_empty() || !self.dirs.contains(&dir) {
            return Err(os_error(2, "ENOENT"));
        }
        let prefix = format!("{}/", dir);
        self.files.retain(|path, _| !path.starts_with(&prefix));
        self.dirs.retain(|path| *path != dir && !path.starts_with(&prefix));
        Ok(Vec::new())
    }
}

/// `print(...)` and `raise ...` lines of a user script
fn run_statements(source: &str) -> Result<Vec<u8>, Vec<u8>> {
    let mut stdout = Vec::new();
    for line in source.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("print(") {
            let (text, _) = literal::parse_str(rest).map_err(|e| traceback("SyntaxError", &e.to_string()))?;
            stdout.extend_from_slice(text.as_bytes());
            stdout.extend_from_slice(b"\r\n");
        } else if let Some(rest) = line.strip_prefix("raise ") {
            let (name, arg) = rest.split_once('(').unwrap_or((rest, "''"));
            let (message, _) = literal::parse_str(arg).unwrap_or_default();
            return Err(traceback(name, &message));
        }
    }
    Ok(stdout)
}

fn literal_after(source: &str, marker: &str) -> Result<String, Vec<u8>> {
    let start = source
        .rfind(marker)
        .ok_or_else(|| traceback("SyntaxError", "invalid syntax"))?;
    literal::parse_str(&source[start + marker.len()..])
        .map(|(value, _)| value)
        .map_err(|e| traceback("SyntaxError", &e.to_string()))
}

fn traceback(name: &str, message: &str) -> Vec<u8> {
    format!(
        "Traceback (most recent call last):\r\n  File \"<stdin>\", line 1, in <module>\r\n{}: {}\r\n",
        name, message
    )
    .into_bytes()
}

fn os_error(errno: u32, name: &str) -> Vec<u8> {
    traceback("OSError", &format!("[Errno {}] {}", errno, name))
}

fn print_line(text: &str) -> Vec<u8> {
    format!("{}\r\n", text).into_bytes()
}

/// Paths relative to the root, without `.` and empty components
fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    parts.join("/")
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

fn base_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// The interpreter's `repr` of a string
fn repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::new();
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c == '\x7f' => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn repr_list(items: &[String]) -> String {
    let items: Vec<String> = items.iter().map(|item| repr(item)).collect();
    format!("[{}]", items.join(", "))
}

// ============================================================================
// Flash Device
// ============================================================================

#[derive(Default)]
pub struct FlashState {
    /// Every command payload decoded, in arrival order
    pub received: Vec<Payload>,
    pub acks_sent: usize,
    /// Never reply
    pub silent: bool,
    /// Swallow the replies to this many frames
    pub drop_acks: u32,
    /// Swallow the reply to the n-th frame when `drop_pattern[n]` is set
    pub drop_pattern: Vec<bool>,
    /// Answer this many frames with a failure status
    pub fail_next: u32,
    /// Hold every reply back this long
    pub ack_delay: Duration,
    parser: FrameParser,
    delayed: VecDeque<(Instant, Vec<u8>)>,
    output: VecDeque<u8>,
}

#[derive(Clone, Default)]
pub struct FakeFlashDevice {
    state: Arc<Mutex<FlashState>>,
}

impl FakeFlashDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self) -> SerialLink {
        SerialLink::new("fake-flash", Box::new(FakeFlashPort { state: self.state.clone() }))
    }

    pub fn state(&self) -> MutexGuard<'_, FlashState> {
        self.state.lock().unwrap()
    }
}

struct FakeFlashPort {
    state: Arc<Mutex<FlashState>>,
}

impl FlashState {
    fn reply(&mut self, index: usize) {
        if self.silent || self.drop_pattern.get(index) == Some(&true) {
            return;
        }
        if self.drop_acks > 0 {
            self.drop_acks -= 1;
            return;
        }
        let status = if self.fail_next > 0 {
            self.fail_next -= 1;
            1
        } else {
            self.acks_sent += 1;
            STATUS_OK
        };
        let frame = frame::encode_command(&Command::Status { status }).unwrap();
        self.delayed.push_back((Instant::now() + self.ack_delay, frame));
    }

    fn release_due(&mut self) {
        let now = Instant::now();
        while self.delayed.front().is_some_and(|(due, _)| *due <= now) {
            if let Some((_, frame)) = self.delayed.pop_front() {
                self.output.extend(frame);
            }
        }
    }
}

impl SerialPort for FakeFlashPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap();
        for bytes in state.parser.feed(buf) {
            let payload = Payload::from_bytes(&bytes).unwrap();
            state.received.push(payload);
            let index = state.received.len() - 1;
            state.reply(index);
        }
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        {
            let mut state = self.state.lock().unwrap();
            state.release_due();
            if !state.output.is_empty() {
                return Ok(read_output(&mut state.output, buf));
            }
        }
        std::thread::sleep(timeout.min(Duration::from_millis(1)));
        Err(timed_out())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/"), "");
        assert_eq!(normalize("./lib//util.py"), "lib/util.py");
        assert_eq!(normalize("/lib/../boot.py"), "boot.py");
    }

    #[test]
    fn test_repr_matches_interpreter_quoting() {
        assert_eq!(repr("a.py"), "'a.py'");
        assert_eq!(repr("it's"), "\"it's\"");
        assert_eq!(repr("it's \"odd\""), "'it\\'s \"odd\"'");
        assert_eq!(literal::parse_str(&repr("it's \"odd\"")).unwrap().0, "it's \"odd\"");
    }
}
