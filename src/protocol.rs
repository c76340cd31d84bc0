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

//! Wire constants for the raw REPL and the framed flash protocol

use std::time::Duration;

// ============================================================================
// Raw REPL control bytes
// ============================================================================

/// Ctrl-A - enter raw REPL
pub const CTRL_A: u8 = 0x01;

/// Ctrl-B - leave raw REPL (harmless when not in raw mode)
pub const CTRL_B: u8 = 0x02;

/// Ctrl-C - interrupt the running program
pub const CTRL_C: u8 = 0x03;

/// Ctrl-D - evaluate the buffered script, or soft reset on an empty buffer
pub const CTRL_D: u8 = 0x04;

/// Printed once the interpreter is ready to accept a raw script
pub const RAW_REPL_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";

/// Prompt of the interactive (non raw) REPL
pub const FRIENDLY_PROMPT: &[u8] = b">>> ";

/// Printed by the interpreter when a soft reset starts
pub const SOFT_REBOOT_BANNER: &[u8] = b"soft reboot\r\n";

/// Acknowledges that a raw script was accepted for evaluation
pub const EXEC_ACCEPTED: &[u8] = b"OK";

/// Ends the stdout/stderr pair of an evaluation
pub const EXEC_TERMINATOR: &[u8] = b"\x04>";

/// Largest single write while talking to the raw REPL
pub const RAW_CHUNK_SIZE: usize = 32;

/// Largest slice of file data a generated script reads or writes per step
pub const FILE_CHUNK_SIZE: usize = 32;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_INTERRUPT_DELAY: Duration = Duration::from_millis(10);
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(10);
pub const DEFAULT_BANNER_RETRIES: u32 = 3;

// ============================================================================
// Framed flash protocol
// ============================================================================

/// First byte of every frame
pub const FRAME_HEAD: u8 = 0xF3;

/// Last byte of every frame
pub const FRAME_END: u8 = 0xF4;

pub const PROTOCOL_ID: u8 = 0x01;
pub const DEVICE_ID: u8 = 0x00;
pub const SERVICE_ID: u8 = 0x5E;

/// File header: type, size, xor checksum, target path
pub const CMD_FILE_HEADER: u8 = 0x01;

/// File block: offset followed by at most FILE_BLOCK_SIZE bytes
pub const CMD_FILE_BLOCK: u8 = 0x02;

/// File delete: target path
pub const CMD_FILE_DELETE: u8 = 0x03;

/// Status reply from the device
pub const CMD_STATUS: u8 = 0xF0;

/// Status byte meaning the last command succeeded
pub const STATUS_OK: u8 = 0x00;

/// Regular python source file
pub const FILE_TYPE_SCRIPT: u8 = 0x00;

/// Largest data section of a file block
pub const FILE_BLOCK_SIZE: usize = 240;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_HEADER_RETRIES: u32 = 5;
pub const DEFAULT_BLOCK_RETRIES: u32 = 3;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Where flashed scripts land unless told otherwise
pub const DEFAULT_FLASH_TARGET: &str = "/flash/main.py";
