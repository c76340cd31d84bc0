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

//! Background file manager.
//!
//! Keeps board I/O off the caller's thread: requests go in over one
//! channel, outcomes come back as events over another. The worker lists the
//! root directory as soon as it starts.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use crossbeam::channel::{self, Receiver, Sender};
use crate::files::DeviceFileSystem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsRequest {
    List,
    /// Copy a board file to the host
    Get { remote: String, local: PathBuf },
    /// Copy a host file to the board under its own name
    Put { local: PathBuf },
    Delete { remote: String },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    ListFiles(Vec<String>),
    GotFile(String),
    PutFile(String),
    DeletedFile(String),
    ListFailed,
    GetFailed(String),
    PutFailed(PathBuf),
    DeleteFailed(String),
}

pub struct FileManager {
    requests: Sender<FsRequest>,
    events: Receiver<FsEvent>,
    handle: Option<JoinHandle<()>>,
}

impl FileManager {
    pub fn spawn(fs: DeviceFileSystem) -> std::io::Result<Self> {
        let (request_tx, request_rx) = channel::unbounded();
        let (event_tx, event_rx) = channel::unbounded();

        let handle = thread::Builder::new()
            .name("file-manager".to_string())
            .spawn(move || serve(fs, request_rx, event_tx))?;

        Ok(FileManager {
            requests: request_tx,
            events: event_rx,
            handle: Some(handle),
        })
    }

    /// Queues `request`; false once the worker has stopped
    pub fn request(&self, request: FsRequest) -> bool {
        self.requests.send(request).is_ok()
    }

    pub fn events(&self) -> &Receiver<FsEvent> {
        &self.events
    }

    /// Finishes the queued requests, then stops the worker
    pub fn shutdown(&mut self) {
        let _ = self.requests.send(FsRequest::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("File manager thread panicked");
            }
        }
    }
}

impl Drop for FileManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(fs: DeviceFileSystem, requests: Receiver<FsRequest>, events: Sender<FsEvent>) {
    log::debug!("File manager started on {}", fs.link().name());

    let mut pending = Some(FsRequest::List);
    loop {
        let request = match pending.take() {
            Some(request) => request,
            None => match requests.recv() {
                Ok(request) => request,
                Err(_) => break,
            },
        };
        let Some(event) = handle(&fs, request) else { break };
        if events.send(event).is_err() {
            break;
        }
    }

    log::debug!("File manager stopped");
}

/// Carries out one request; `None` asks the worker to stop
fn handle(fs: &DeviceFileSystem, request: FsRequest) -> Option<FsEvent> {
    let event = match request {
        FsRequest::List => match fs.ls("/", false) {
            Ok(entries) => FsEvent::ListFiles(entries.into_iter().map(|e| e.name).collect()),
            Err(e) => {
                log::error!("Could not list files: {}", e);
                FsEvent::ListFailed
            }
        },
        FsRequest::Get { remote, local } => match fs.get_to(&remote, &local) {
            Ok(()) => FsEvent::GotFile(remote),
            Err(e) => {
                log::error!("Could not get {}: {}", remote, e);
                FsEvent::GetFailed(remote)
            }
        },
        FsRequest::Put { local } => match fs.put_from(&local, None) {
            Ok(remote) => FsEvent::PutFile(remote),
            Err(e) => {
                log::error!("Could not put {}: {}", local.display(), e);
                FsEvent::PutFailed(local)
            }
        },
        FsRequest::Delete { remote } => match fs.rm(&remote) {
            Ok(()) => FsEvent::DeletedFile(remote),
            Err(e) => {
                log::error!("Could not delete {}: {}", remote, e);
                FsEvent::DeleteFailed(remote)
            }
        },
        FsRequest::Shutdown => return None,
    };
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use crate::raw_repl::SessionOptions;
    use crate::testing::FakeBoard;

    const WAIT: Duration = Duration::from_secs(5);

    fn manager_for(board: &FakeBoard) -> FileManager {
        let fs = DeviceFileSystem::new(Arc::new(board.link()), SessionOptions::immediate());
        FileManager::spawn(fs).unwrap()
    }

    #[test]
    fn test_lists_files_on_start() {
        let board = FakeBoard::new();
        board.add_file("main.py", b"");
        board.add_file("boot.py", b"");
        let manager = manager_for(&board);

        let event = manager.events().recv_timeout(WAIT).unwrap();
        assert_eq!(event, FsEvent::ListFiles(vec!["boot.py".to_string(), "main.py".to_string()]));
    }

    #[test]
    fn test_put_get_delete() {
        let board = FakeBoard::new();
        let manager = manager_for(&board);
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("blink.py");
        std::fs::write(&local, b"led.on()\n").unwrap();

        assert_eq!(manager.events().recv_timeout(WAIT).unwrap(), FsEvent::ListFiles(vec![]));

        assert!(manager.request(FsRequest::Put { local: local.clone() }));
        assert_eq!(manager.events().recv_timeout(WAIT).unwrap(), FsEvent::PutFile("blink.py".to_string()));

        let copy = dir.path().join("copy.py");
        manager.request(FsRequest::Get { remote: "blink.py".to_string(), local: copy.clone() });
        assert_eq!(manager.events().recv_timeout(WAIT).unwrap(), FsEvent::GotFile("blink.py".to_string()));
        assert_eq!(std::fs::read(&copy).unwrap(), b"led.on()\n");

        manager.request(FsRequest::Delete { remote: "blink.py".to_string() });
        assert_eq!(manager.events().recv_timeout(WAIT).unwrap(), FsEvent::DeletedFile("blink.py".to_string()));
        assert!(board.state().files.is_empty());
    }

    #[test]
    fn test_failures_are_reported_as_events() {
        let board = FakeBoard::new();
        let manager = manager_for(&board);
        let dir = tempfile::tempdir().unwrap();
        manager.events().recv_timeout(WAIT).unwrap();

        manager.request(FsRequest::Get { remote: "nope.py".to_string(), local: dir.path().join("nope.py") });
        assert_eq!(manager.events().recv_timeout(WAIT).unwrap(), FsEvent::GetFailed("nope.py".to_string()));

        let missing = dir.path().join("missing.py");
        manager.request(FsRequest::Put { local: missing.clone() });
        assert_eq!(manager.events().recv_timeout(WAIT).unwrap(), FsEvent::PutFailed(missing));

        manager.request(FsRequest::Delete { remote: "nope.py".to_string() });
        assert_eq!(manager.events().recv_timeout(WAIT).unwrap(), FsEvent::DeleteFailed("nope.py".to_string()));
    }

    #[test]
    fn test_list_failure_on_closed_link() {
        let board = FakeBoard::new();
        let link = Arc::new(board.link());
        link.close();
        let manager = FileManager::spawn(DeviceFileSystem::new(link, SessionOptions::immediate())).unwrap();
        assert_eq!(manager.events().recv_timeout(WAIT).unwrap(), FsEvent::ListFailed);
    }

    #[test]
    fn test_shutdown_stops_worker() {
        let board = FakeBoard::new();
        let mut manager = manager_for(&board);
        manager.shutdown();
        assert!(!manager.request(FsRequest::List));
        // The initial listing may or may not have finished before shutdown
        assert!(manager.events().try_iter().all(|e| e == FsEvent::ListFiles(vec![])));
    }
}
