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

//! Frames of the flash protocol.
//!
//! ```text
//! F3 | head checksum | len lo | len hi | payload ... | payload checksum | F4
//! payload = protocol id | device id | service id | command id | cmd len (2, LE) | data
//! ```
//!
//! The head checksum is the additive checksum of `F3, len lo, len hi`.

use thiserror::Error;
use crate::protocol::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame payload of {0} bytes exceeds 65535")]
    TooLarge(usize),
}

// ============================================================================
// Checksums
// ============================================================================

/// Sum of all bytes, mod 256
pub fn additive_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// XOR of the data taken as 4-byte groups. A trailing partial group is
/// folded into the low positions.
pub fn xor32(data: &[u8]) -> [u8; 4] {
    let mut sum = [0u8; 4];
    for group in data.chunks(4) {
        for (acc, &b) in sum.iter_mut().zip(group) {
            *acc ^= b;
        }
    }
    sum
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FileHeader {
        file_type: u8,
        size: u32,
        checksum: [u8; 4],
        path: String,
    },
    FileBlock {
        offset: u32,
        data: Vec<u8>,
    },
    FileDelete {
        path: String,
    },
    Status {
        status: u8,
    },
}

impl Command {
    pub fn id(&self) -> u8 {
        match self {
            Command::FileHeader { .. } => CMD_FILE_HEADER,
            Command::FileBlock { .. } => CMD_FILE_BLOCK,
            Command::FileDelete { .. } => CMD_FILE_DELETE,
            Command::Status { .. } => CMD_STATUS,
        }
    }

    fn body(&self) -> Vec<u8> {
        match self {
            Command::FileHeader { file_type, size, checksum, path } => {
                let mut body = Vec::with_capacity(9 + path.len());
                body.push(*file_type);
                body.extend_from_slice(&size.to_le_bytes());
                body.extend_from_slice(checksum);
                body.extend_from_slice(path.as_bytes());
                body
            }
            Command::FileBlock { offset, data } => {
                let mut body = Vec::with_capacity(4 + data.len());
                body.extend_from_slice(&offset.to_le_bytes());
                body.extend_from_slice(data);
                body
            }
            Command::FileDelete { path } => path.as_bytes().to_vec(),
            Command::Status { status } => vec![*status],
        }
    }
}

// ============================================================================
// Payload
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub protocol_id: u8,
    pub device_id: u8,
    pub service_id: u8,
    pub command_id: u8,
    pub data: Vec<u8>,
}

impl Payload {
    pub fn new(command: &Command) -> Self {
        Payload {
            protocol_id: PROTOCOL_ID,
            device_id: DEVICE_ID,
            service_id: SERVICE_ID,
            command_id: command.id(),
            data: command.body(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let len = u16::try_from(self.data.len()).map_err(|_| FrameError::TooLarge(self.data.len()))?;
        let mut bytes = Vec::with_capacity(6 + self.data.len());
        bytes.push(self.protocol_id);
        bytes.push(self.device_id);
        bytes.push(self.service_id);
        bytes.push(self.command_id);
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&self.data);
        Ok(bytes)
    }

    /// Inverse of [`Payload::to_bytes`]; `None` when the command length
    /// disagrees with the bytes present.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 6 {
            return None;
        }
        let len = u16::from_le_bytes([bytes[4], bytes[5]]) as usize;
        let data = &bytes[6..];
        if data.len() != len {
            return None;
        }
        Some(Payload {
            protocol_id: bytes[0],
            device_id: bytes[1],
            service_id: bytes[2],
            command_id: bytes[3],
            data: data.to_vec(),
        })
    }

    /// A status reply reporting success
    pub fn is_success_status(&self) -> bool {
        self.protocol_id == PROTOCOL_ID
            && self.command_id == CMD_STATUS
            && self.data.first() == Some(&STATUS_OK)
    }
}

/// Wraps `payload` in head, length, checksums and end marker
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u16::try_from(payload.len()).map_err(|_| FrameError::TooLarge(payload.len()))?;
    let [lo, hi] = len.to_le_bytes();

    let mut frame = Vec::with_capacity(payload.len() + 6);
    frame.push(FRAME_HEAD);
    frame.push(additive_checksum(&[FRAME_HEAD, lo, hi]));
    frame.push(lo);
    frame.push(hi);
    frame.extend_from_slice(payload);
    frame.push(additive_checksum(payload));
    frame.push(FRAME_END);
    Ok(frame)
}

pub fn encode_command(command: &Command) -> Result<Vec<u8>, FrameError> {
    encode_frame(&Payload::new(command).to_bytes()?)
}

// ============================================================================
// Incremental Parser
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Head,
    HeadCheck,
    Len1,
    Len2,
    Data,
    Check,
    End,
}

/// Byte-at-a-time frame decoder.
///
/// A checksum or end marker mismatch drops the frame in progress and the
/// parser goes back to hunting for the next head byte.
pub struct FrameParser {
    state: ParserState,
    buf: Vec<u8>,
    data_len: usize,
    checksum: u8,
    head_checksum: u8,
    recv_head_checksum: u8,
    dropped: u64,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        FrameParser {
            state: ParserState::Head,
            buf: Vec::new(),
            data_len: 0,
            checksum: 0,
            head_checksum: 0,
            recv_head_checksum: 0,
            dropped: 0,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Frames discarded so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Returns the payload once `byte` completes a valid frame
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        match self.state {
            ParserState::Head => {
                if byte == FRAME_HEAD {
                    self.buf.clear();
                    self.checksum = 0;
                    self.head_checksum = byte;
                    self.state = ParserState::HeadCheck;
                }
            }
            ParserState::HeadCheck => {
                self.recv_head_checksum = byte;
                self.state = ParserState::Len1;
            }
            ParserState::Len1 => {
                self.head_checksum = self.head_checksum.wrapping_add(byte);
                self.data_len = byte as usize;
                self.state = ParserState::Len2;
            }
            ParserState::Len2 => {
                self.head_checksum = self.head_checksum.wrapping_add(byte);
                if self.head_checksum == self.recv_head_checksum {
                    self.data_len += (byte as usize) << 8;
                    self.state = if self.data_len == 0 {
                        ParserState::Check
                    } else {
                        ParserState::Data
                    };
                } else {
                    self.discard("head checksum");
                }
            }
            ParserState::Data => {
                self.checksum = self.checksum.wrapping_add(byte);
                self.buf.push(byte);
                if self.buf.len() == self.data_len {
                    self.state = ParserState::Check;
                }
            }
            ParserState::Check => {
                if self.checksum == byte {
                    self.state = ParserState::End;
                } else {
                    self.discard("payload checksum");
                }
            }
            ParserState::End => {
                self.state = ParserState::Head;
                if byte == FRAME_END {
                    return Some(std::mem::take(&mut self.buf));
                }
                self.discard("end marker");
            }
        }
        None
    }

    /// Feeds every byte of `bytes`, collecting the completed payloads
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    fn discard(&mut self, reason: &str) {
        log::warn!("Dropping frame: bad {}", reason);
        self.dropped += 1;
        self.buf.clear();
        self.state = ParserState::Head;
    }
}

// ============================================================================
// Tests
// ============================================================================
