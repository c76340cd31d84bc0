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

//! File transfer over the framed flash protocol.
//!
//! Two workers share a transfer: the sender walks the state machine below
//! and hands encoded frames to the link worker, which owns the port, writes
//! those frames, decodes whatever comes back and forwards the payloads.
//! Every command gets its own timeout window and retry budget.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use thiserror::Error;
use crate::frame::{self, Command, FrameError, FrameParser, Payload};
use crate::protocol::*;
use crate::serial::{is_timeout, SerialLink, SerialPort};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No acknowledgement for {command} after {attempts} attempts")]
    Timeout { command: String, attempts: u32 },
    #[error("Serial link closed during transfer")]
    LinkClosed,
    #[error("Target path too long: {0}")]
    PathTooLong(String),
    #[error("File too large for the protocol: {0} bytes")]
    FileTooLarge(usize),
}

impl From<FrameError> for TransferError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::TooLarge(n) => TransferError::FileTooLarge(n),
        }
    }
}

// ============================================================================
// Options, Events, Job
// ============================================================================

#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// How long to wait for the acknowledgement of one command
    pub command_timeout: Duration,
    /// Resends of the file header before giving up
    pub header_retries: u32,
    /// Resends of a single block before giving up
    pub block_retries: u32,
    /// Data bytes per block, at most FILE_BLOCK_SIZE
    pub block_size: usize,
    /// Read timeout of the link worker between checks for outgoing frames
    pub poll_interval: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            header_retries: DEFAULT_HEADER_RETRIES,
            block_retries: DEFAULT_BLOCK_RETRIES,
            block_size: FILE_BLOCK_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl TransferOptions {
    fn block_size(&self) -> usize {
        self.block_size.clamp(1, FILE_BLOCK_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// Percentage of the file acknowledged so far
    Progress(f32),
    Retrying { command: String, attempt: u32 },
    Complete,
    Failed(String),
}

/// One file on its way to the board
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub source: Option<PathBuf>,
    pub target: String,
    data: Vec<u8>,
    offset: usize,
    retries: u32,
}

impl TransferJob {
    pub fn new(target: impl Into<String>, data: Vec<u8>) -> Self {
        TransferJob {
            source: None,
            target: target.into(),
            data,
            offset: 0,
            retries: 0,
        }
    }

    pub fn from_file(source: &Path, target: impl Into<String>) -> std::io::Result<Self> {
        let data = std::fs::read(source)?;
        let mut job = Self::new(target, data);
        job.source = Some(source.to_path_buf());
        Ok(job)
    }

    pub fn total_len(&self) -> usize {
        self.data.len()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_done(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn next_block(&self, block_size: usize) -> &[u8] {
        let end = (self.offset + block_size).min(self.data.len());
        &self.data[self.offset..end]
    }

    fn progress(&self) -> f32 {
        if self.data.is_empty() {
            100.0
        } else {
            100.0 * self.offset as f32 / self.data.len() as f32
        }
    }
}

// ============================================================================
// States
// ============================================================================

pub struct SendHeader;
pub struct SendBlock;
pub struct SendDelete;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    frames: Sender<Vec<u8>>,
    acks: Receiver<Payload>,
    job: TransferJob,
    options: TransferOptions,
}

pub enum Step {
    Next(Box<dyn SenderState>),
    Done,
}

pub trait SenderState: Send {
    fn step(self: Box<Self>, events: &mut dyn FnMut(TransferEvent)) -> Result<Step, TransferError>;
}

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            frames: self.frames,
            acks: self.acks,
            job: self.job,
            options: self.options,
        })
    }

    /// Sends `frame` until a success status comes back or the retry budget
    /// runs out
    fn send_command(
        &mut self,
        name: &str,
        frame: Vec<u8>,
        retries: u32,
        events: &mut dyn FnMut(TransferEvent),
    ) -> Result<(), TransferError> {
        while self.acks.try_recv().is_ok() {}

        self.job.retries = 0;
        let first_sent = Instant::now();
        loop {
            self.frames.send(frame.clone()).map_err(|_| TransferError::LinkClosed)?;
            let last_sent = Instant::now();
            log::debug!("Sent {} ({} bytes)", name, frame.len());

            if self.wait_for_ack()? {
                if self.job.retries > 0 {
                    self.absorb_late_acks(self.job.retries, last_sent - first_sent);
                }
                return Ok(());
            }
            if self.job.retries >= retries {
                log::error!("Send {} time out!", name);
                return Err(TransferError::Timeout {
                    command: name.to_string(),
                    attempts: retries + 1,
                });
            }

            self.job.retries += 1;
            log::warn!("Resend the {} [{}]", name, self.job.retries);
            events(TransferEvent::Retrying {
                command: name.to_string(),
                attempt: self.job.retries,
            });
        }
    }

    /// Waits up to `command_timeout` for a success status.
    ///
    /// Status frames carry no sequence number, so any success status counts,
    /// including one answering an earlier copy of the same command. Copies
    /// still unanswered are soaked up by [`Self::absorb_late_acks`] before the
    /// next command goes out.
    fn wait_for_ack(&mut self) -> Result<bool, TransferError> {
        let deadline = Instant::now() + self.options.command_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.acks.recv_timeout(remaining) {
                Ok(payload) if payload.is_success_status() => return Ok(true),
                Ok(payload) => {
                    log::debug!("Ignoring reply {:?}", payload);
                }
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => return Err(TransferError::LinkClosed),
            }
        }
    }

    /// Consumes the replies to the `outstanding` resent copies of a command
    /// that was just acknowledged.
    ///
    /// Replies are assumed to come back in order with the latency of the one
    /// already received, so the last copy is answered within `spread` (the
    /// time between the first and last copy) plus one `command_timeout`.
    fn absorb_late_acks(&mut self, outstanding: u32, spread: Duration) {
        let deadline = Instant::now() + spread + self.options.command_timeout;
        let mut outstanding = outstanding;
        while outstanding > 0 {
            match self.acks.recv_deadline(deadline) {
                Ok(payload) if payload.is_success_status() => {
                    outstanding -= 1;
                    log::debug!("Absorbed late acknowledgement");
                }
                Ok(payload) => log::debug!("Ignoring reply {:?}", payload),
                Err(_) => break,
            }
        }
        if outstanding > 0 {
            log::debug!("{} resent copies were never answered", outstanding);
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<SendHeader> {
    fn step(self: Box<Self>, events: &mut dyn FnMut(TransferEvent)) -> Result<Step, TransferError> {
        let mut fsm = *self;

        let size = u32::try_from(fsm.job.total_len())
            .map_err(|_| TransferError::FileTooLarge(fsm.job.total_len()))?;
        let header = Command::FileHeader {
            file_type: FILE_TYPE_SCRIPT,
            size,
            checksum: frame::xor32(&fsm.job.data),
            path: fsm.job.target.clone(),
        };
        // Size and checksum are fixed width, only the path can overflow the frame
        let encoded = frame::encode_command(&header)
            .map_err(|_| TransferError::PathTooLong(fsm.job.target.clone()))?;
        let retries = fsm.options.header_retries;
        fsm.send_command("file header", encoded, retries, events)?;
        log::info!("Header acknowledged: {} ({} bytes)", fsm.job.target, size);

        Ok(Step::Next(fsm.transition::<SendBlock>()))
    }
}

impl SenderState for SenderFsm<SendBlock> {
    fn step(self: Box<Self>, events: &mut dyn FnMut(TransferEvent)) -> Result<Step, TransferError> {
        let mut fsm = *self;
        if fsm.job.is_done() {
            return Ok(Step::Done);
        }

        let block = fsm.job.next_block(fsm.options.block_size()).to_vec();
        let sent = block.len();
        let command = Command::FileBlock {
            offset: fsm.job.offset as u32,
            data: block,
        };
        let encoded = frame::encode_command(&command)?;
        let retries = fsm.options.block_retries;
        fsm.send_command("file block", encoded, retries, events)?;

        fsm.job.offset += sent;
        let progress = fsm.job.progress();
        log::info!("{:.0}% ({} of {} bytes)", progress, fsm.job.offset, fsm.job.total_len());
        events(TransferEvent::Progress(progress));

        Ok(Step::Next(Box::new(fsm)))
    }
}

impl SenderState for SenderFsm<SendDelete> {
    fn step(self: Box<Self>, events: &mut dyn FnMut(TransferEvent)) -> Result<Step, TransferError> {
        let mut fsm = *self;
        let command = Command::FileDelete {
            path: fsm.job.target.clone(),
        };
        let encoded = frame::encode_command(&command)
            .map_err(|_| TransferError::PathTooLong(fsm.job.target.clone()))?;
        let retries = fsm.options.header_retries;
        fsm.send_command("file delete", encoded, retries, events)?;
        log::info!("Deleted {}", fsm.job.target);
        Ok(Step::Done)
    }
}

impl<S> SenderFsm<S>
where
    SenderFsm<S>: SenderState,
{
    fn boxed(
        frames: Sender<Vec<u8>>,
        acks: Receiver<Payload>,
        job: TransferJob,
        options: TransferOptions,
    ) -> Box<dyn SenderState>
    where
        S: 'static,
    {
        Box::new(SenderFsm::<S> {
            state: PhantomData,
            frames,
            acks,
            job,
            options,
        })
    }
}

// ============================================================================
// Link Worker
// ============================================================================

/// Writes queued frames and forwards every decoded payload until the frame
/// queue is closed
fn link_worker(
    port: &mut dyn SerialPort,
    frames: Receiver<Vec<u8>>,
    acks: Sender<Payload>,
    poll_interval: Duration,
) -> std::io::Result<()> {
    let mut parser = FrameParser::new();
    let mut buf = [0u8; 256];

    loop {
        match frames.try_recv() {
            Ok(frame) => {
                port.write_all(&frame)?;
                continue;
            }
            Err(TryRecvError::Disconnected) => return Ok(()),
            Err(TryRecvError::Empty) => {}
        }

        let n = match port.read_timeout(&mut buf, poll_interval) {
            Ok(n) => n,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => return Err(e),
        };

        for &byte in &buf[..n] {
            let Some(bytes) = parser.push(byte) else { continue };
            let Some(payload) = Payload::from_bytes(&bytes) else {
                log::warn!("Dropping frame with inconsistent command length");
                continue;
            };
            match acks.try_send(payload) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => log::warn!("Reply queue full, dropping reply"),
                Err(TrySendError::Disconnected(_)) => return Ok(()),
            }
        }
    }
}

// ============================================================================
// Transfer
// ============================================================================

pub struct FlashTransfer<'a> {
    link: &'a SerialLink,
    options: TransferOptions,
}

impl<'a> FlashTransfer<'a> {
    pub fn new(link: &'a SerialLink, options: TransferOptions) -> Self {
        FlashTransfer { link, options }
    }

    /// Sends `job` and closes the link afterwards, whatever the outcome
    pub fn send(&self, job: TransferJob, events: &mut dyn FnMut(TransferEvent)) -> Result<(), TransferError> {
        log::info!("Sending {} bytes to {}", job.total_len(), job.target);
        self.run(job, events, SenderFsm::<SendHeader>::boxed)
    }

    /// Asks the board to delete `path` and closes the link afterwards
    pub fn delete(&self, path: &str, events: &mut dyn FnMut(TransferEvent)) -> Result<(), TransferError> {
        let job = TransferJob::new(path, Vec::new());
        self.run(job, events, SenderFsm::<SendDelete>::boxed)
    }

    fn run(
        &self,
        job: TransferJob,
        events: &mut dyn FnMut(TransferEvent),
        first: fn(Sender<Vec<u8>>, Receiver<Payload>, TransferJob, TransferOptions) -> Box<dyn SenderState>,
    ) -> Result<(), TransferError> {
        let mut guard = self.link.lock();
        let result = match guard.port() {
            Ok(port) => {
                let (frame_tx, frame_rx) = channel::bounded::<Vec<u8>>(4);
                let (ack_tx, ack_rx) = channel::bounded::<Payload>(16);
                let poll_interval = self.options.poll_interval;
                let fsm = first(frame_tx, ack_rx, job, self.options.clone());

                thread::scope(|scope| {
                    let receiver = scope.spawn(move || link_worker(port, frame_rx, ack_tx, poll_interval));
                    let sent = drive(fsm, events);
                    let received = receiver
                        .join()
                        .unwrap_or_else(|_| Err(std::io::Error::other("link worker panicked")));
                    match (sent, received) {
                        (Err(TransferError::LinkClosed), Err(e)) => Err(TransferError::Io(e)),
                        (Err(e), _) => Err(e),
                        (Ok(()), Err(e)) => Err(TransferError::Io(e)),
                        (Ok(()), Ok(())) => Ok(()),
                    }
                })
            }
            Err(_) => Err(TransferError::LinkClosed),
        };
        guard.close();

        match &result {
            Ok(()) => {
                log::info!("Complete file transfer!");
                events(TransferEvent::Complete);
            }
            Err(e) => {
                log::error!("Transfer failed: {}", e);
                events(TransferEvent::Failed(e.to_string()));
            }
        }
        result
    }
}

fn drive(mut state: Box<dyn SenderState>, events: &mut dyn FnMut(TransferEvent)) -> Result<(), TransferError> {
    loop {
        match state.step(events)? {
            Step::Next(next) => state = next,
            Step::Done => return Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
