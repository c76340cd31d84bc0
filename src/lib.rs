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

//! Host-side tooling for MicroPython boards on a serial line.
//!
//! Two ways of talking to a board live here: the raw REPL, used to drive
//! the board's filesystem with generated scripts ([`files`]), and a framed
//! binary protocol for pushing a script into flash ([`transfer`]).

pub mod protocol;
pub mod serial;
pub mod raw_repl;
pub mod literal;
pub mod script;
pub mod files;
pub mod tree;
pub mod frame;
pub mod transfer;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
