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

//! Raw REPL session: interrupt the board, switch the interpreter into raw
//! mode, evaluate scripts and capture their stdout/stderr.

use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use crate::protocol::*;
use crate::serial::{is_timeout, LinkGuard, SerialLink, SerialPort};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ReplError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Timed out waiting for {expected:?}")]
    Timeout { expected: String },
    #[error("Serial link is closed")]
    NotConnected,
    #[error("Session is not in raw REPL mode")]
    NotInRawMode,
    #[error("Board did not accept the script")]
    CommandRejected,
    #[error("Malformed response from board")]
    MalformedResponse,
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Deadline for every blocking read
    pub timeout: Duration,
    /// Pause after each Ctrl-C
    pub interrupt_delay: Duration,
    /// Pause between RAW_CHUNK_SIZE writes of a script
    pub chunk_delay: Duration,
    /// Extra Ctrl-A attempts when the raw banner does not follow a soft reboot
    pub banner_retries: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            timeout: DEFAULT_TIMEOUT,
            interrupt_delay: DEFAULT_INTERRUPT_DELAY,
            chunk_delay: DEFAULT_CHUNK_DELAY,
            banner_retries: DEFAULT_BANNER_RETRIES,
        }
    }
}

#[cfg(test)]
impl SessionOptions {
    pub fn immediate() -> Self {
        SessionOptions {
            timeout: Duration::from_millis(500),
            interrupt_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            banner_retries: DEFAULT_BANNER_RETRIES,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplState {
    Normal,
    Raw,
    Executing,
}

/// Output of one evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.stderr.is_empty()
    }
}

/// Holds the link for its whole lifetime; dropping a session that is still
/// in raw mode sends Ctrl-B.
pub struct RawReplSession<'a> {
    link: LinkGuard<'a>,
    options: SessionOptions,
    state: ReplState,
    pending: Vec<u8>,
}

impl<'a> RawReplSession<'a> {
    /// Waits for exclusive use of `link`
    pub fn new(link: &'a SerialLink, options: SessionOptions) -> Self {
        RawReplSession {
            link: link.lock(),
            options,
            state: ReplState::Normal,
            pending: Vec::new(),
        }
    }

    /// Locks `link` and enters raw mode
    pub fn begin(link: &'a SerialLink, options: SessionOptions) -> Result<Self, ReplError> {
        let mut session = Self::new(link, options);
        session.enter_raw_mode()?;
        Ok(session)
    }

    pub fn state(&self) -> ReplState {
        self.state
    }

    /// Interrupts the board and switches it into raw mode with a soft
    /// reboot in between. On failure after Ctrl-A the board is sent Ctrl-B
    /// and the session stays `Normal`.
    pub fn enter_raw_mode(&mut self) -> Result<(), ReplError> {
        // Leave raw mode if a previous session left us there
        self.write(&[CTRL_B])?;

        // Break out of whatever program is running
        for _ in 0..3 {
            self.write(&[b'\r', CTRL_C])?;
            if !self.options.interrupt_delay.is_zero() {
                thread::sleep(self.options.interrupt_delay);
            }
        }
        self.drain()?;

        self.write(&[b'\r', CTRL_A])?;
        if let Err(e) = self.await_raw_prompt() {
            if let Err(exit) = self.exit_raw_mode() {
                log::warn!("Could not leave raw REPL: {}", exit);
            }
            return Err(e);
        }

        self.state = ReplState::Raw;
        log::debug!("Entered raw REPL");
        Ok(())
    }

    fn await_raw_prompt(&mut self) -> Result<(), ReplError> {
        let timeout = self.options.timeout;
        self.read_until(RAW_REPL_BANNER, timeout)?;
        log::debug!("Raw REPL banner received");

        self.write(&[CTRL_D])?;
        self.read_until(SOFT_REBOOT_BANNER, timeout)?;
        log::debug!("Soft reboot");

        // Some ports come back to the friendly prompt after the reset, in
        // which case raw mode has to be requested again
        let mut retries = 0;
        loop {
            let seen = match self.read_until_any(&[RAW_REPL_BANNER, FRIENDLY_PROMPT], timeout) {
                Ok((0, _)) => break,
                Ok(_) => "friendly prompt",
                Err(ReplError::Timeout { .. }) => "nothing",
                Err(e) => return Err(e),
            };
            if retries >= self.options.banner_retries {
                return Err(ReplError::Timeout {
                    expected: String::from_utf8_lossy(RAW_REPL_BANNER).into_owned(),
                });
            }
            retries += 1;
            log::warn!("Got {} after soft reboot, sending Ctrl-A again ({})", seen, retries);
            self.write(&[b'\r', CTRL_A])?;
        }

        self.drain()
    }

    /// Evaluates `code` and waits for its complete output
    pub fn execute(&mut self, code: &str) -> Result<Response, ReplError> {
        self.submit(code.as_bytes())?;

        let raw = self.read_until(EXEC_TERMINATOR, self.options.timeout)?;
        let response = parse_response(&raw)?;
        self.state = ReplState::Raw;

        if !response.is_success() {
            log::debug!("Script failed: {}", String::from_utf8_lossy(&response.stderr));
        }
        Ok(response)
    }

    /// Starts `code` and returns as soon as the board accepted it
    pub fn exec_no_follow(&mut self, code: &[u8]) -> Result<(), ReplError> {
        self.submit(code)?;
        self.read_until(EXEC_ACCEPTED, self.options.timeout)?;
        self.state = ReplState::Raw;
        Ok(())
    }

    /// Best effort: nothing is read back
    pub fn exit_raw_mode(&mut self) -> Result<(), ReplError> {
        self.state = ReplState::Normal;
        self.pending.clear();
        self.write(&[CTRL_B])?;
        log::debug!("Left raw REPL");
        Ok(())
    }

    fn submit(&mut self, code: &[u8]) -> Result<(), ReplError> {
        if self.state != ReplState::Raw {
            return Err(ReplError::NotInRawMode);
        }
        self.state = ReplState::Executing;

        // The board's receive buffer is tiny, never hand it more than a chunk
        let delay = self.options.chunk_delay;
        let port = self.port()?;
        for chunk in code.chunks(RAW_CHUNK_SIZE) {
            port.write_all(chunk)?;
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
        self.write(&[CTRL_D])
    }

    fn port(&mut self) -> Result<&mut dyn SerialPort, ReplError> {
        self.link.port().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotConnected => ReplError::NotConnected,
            _ => ReplError::Io(e),
        })
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), ReplError> {
        self.port()?.write_all(bytes)?;
        Ok(())
    }

    /// Returns everything up to and including `token`; bytes read past it
    /// are kept for the next call.
    fn read_until(&mut self, token: &[u8], timeout: Duration) -> Result<Vec<u8>, ReplError> {
        self.read_until_any(&[token], timeout).map(|(_, bytes)| bytes)
    }

    /// Like [`Self::read_until`] for whichever of `tokens` shows up first;
    /// also returns the index of that token.
    fn read_until_any(&mut self, tokens: &[&[u8]], timeout: Duration) -> Result<(usize, Vec<u8>), ReplError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 256];
        loop {
            let first = tokens
                .iter()
                .enumerate()
                .filter_map(|(i, token)| find(&self.pending, token).map(|pos| (pos, i)))
                .min();
            if let Some((pos, i)) = first {
                let rest = self.pending.split_off(pos + tokens[i].len());
                return Ok((i, std::mem::replace(&mut self.pending, rest)));
            }

            let now = Instant::now();
            if now >= deadline {
                let expected: Vec<String> = tokens.iter().map(|t| String::from_utf8_lossy(t).into_owned()).collect();
                return Err(ReplError::Timeout {
                    expected: expected.join(" or "),
                });
            }

            let port = self.port()?;
            match port.read_timeout(&mut buf, deadline - now) {
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if is_timeout(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Discards whatever the board has already sent
    fn drain(&mut self) -> Result<(), ReplError> {
        self.pending.clear();
        let deadline = Instant::now() + self.options.timeout;
        let mut buf = [0u8; 256];
        let port = self.port()?;
        while Instant::now() < deadline {
            match port.read_timeout(&mut buf, Duration::from_millis(10)) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if is_timeout(&e) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for RawReplSession<'_> {
    fn drop(&mut self) {
        if self.state != ReplState::Normal {
            if let Err(e) = self.exit_raw_mode() {
                log::warn!("Could not leave raw REPL: {}", e);
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Splits `OK<stdout>\x04<stderr>\x04>` into its two streams
fn parse_response(raw: &[u8]) -> Result<Response, ReplError> {
    let body = raw
        .strip_prefix(EXEC_ACCEPTED)
        .ok_or(ReplError::CommandRejected)?;
    let body = body
        .strip_suffix(EXEC_TERMINATOR)
        .ok_or(ReplError::MalformedResponse)?;
    let split = body
        .iter()
        .position(|&b| b == CTRL_D)
        .ok_or(ReplError::MalformedResponse)?;

    Ok(Response {
        stdout: body[..split].to_vec(),
        stderr: body[split + 1..].to_vec(),
    })
}

// ============================================================================
// Tests
// ============================================================================
