use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use unifyfs_shm::{IndexBuffer, RawIndexEntry};

use crate::client_log::{ClientLog, ReadError};

type ClientId = (u32, u32);

struct ClientEntry {
    log: ClientLog,
    index: Mutex<IndexBuffer>,
}

/// The set of clients this delegator process currently hosts (spec.md
/// §6: "Spillover file descriptors: one per (app_id, client_id), opened
/// by the delegator at client connect, closed at disconnect"). Connection
/// setup itself (shared-memory segment attach, spillover file open) is
/// out of scope (spec.md §1); this registry is the attach point a daemon
/// wires those results into.
pub struct Registry {
    clients: RwLock<HashMap<ClientId, ClientEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self { clients: RwLock::new(HashMap::new()) }
    }

    pub fn connect(&self, app_id: u32, client_id: u32, log: ClientLog, index: IndexBuffer) {
        self.clients
            .write()
            .insert((app_id, client_id), ClientEntry { log, index: Mutex::new(index) });
    }

    pub fn disconnect(&self, app_id: u32, client_id: u32) {
        self.clients.write().remove(&(app_id, client_id));
    }

    /// Service one read (spec.md §4.6's "copying from the identified
    /// client's ... superblock, or by pread on the ... spillover file").
    pub fn read_at(&self, app_id: u32, client_id: u32, offset: u64, length: u64) -> Result<Vec<u8>, ReadError> {
        let clients = self.clients.read();
        let entry = clients
            .get(&(app_id, client_id))
            .ok_or(ReadError::UnknownClient { app_id, client_id })?;
        entry.log.read_at(offset, length)
    }

    /// Drain a client's index region (spec.md §4.7 step 1), returning
    /// `None` if the client isn't currently registered. The drain itself
    /// is synchronous and releases both the registry and the per-client
    /// lock before returning, so the caller is free to `await` on the
    /// result without holding either.
    pub fn drain_index(&self, app_id: u32, client_id: u32) -> Option<Vec<RawIndexEntry>> {
        let clients = self.clients.read();
        let entry = clients.get(&(app_id, client_id))?;
        Some(entry.index.lock().drain())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
