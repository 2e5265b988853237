//! Background Expiry Sweeper
//!
//! Lazy expiry on read leaves entries behind when nobody touches them again;
//! the sweeper is the other half of the contract. A dedicated thread wakes on
//! a fixed interval, scans every table's resident entries, and routes each
//! expired one through the same delete path a read would use, so the two
//! mechanisms converge on the same outcome.
//!
//! Shutdown is a channel disconnect: dropping the sender wakes the thread,
//! which finishes its current cycle and exits. `close` joins it.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

use super::entry::now_epoch;
use super::CacheState;

/// Handle to the running sweeper thread
pub(crate) struct Sweeper {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the sweeper over the given cache state
    pub(crate) fn start(state: Arc<Mutex<CacheState>>, interval: Duration) -> Result<Self> {
        let (shutdown, signal) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("stratakv-sweeper".to_string())
            .spawn(move || sweep_loop(state, signal, interval))?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to finish
    pub(crate) fn stop(mut self) {
        drop(self.shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("sweeper thread panicked");
            }
        }
    }
}

fn sweep_loop(state: Arc<Mutex<CacheState>>, signal: Receiver<()>, interval: Duration) {
    debug!(interval_ms = interval.as_millis() as u64, "expiry sweeper started");
    loop {
        match signal.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = now_epoch();
        let mut state = state.lock();

        let expired: Vec<(String, String)> = state
            .tables
            .iter()
            .flat_map(|(table, slot)| {
                slot.resident
                    .iter()
                    .filter(|(_, entry)| entry.is_expired(now))
                    .map(|(key, _)| (table.clone(), key.clone()))
            })
            .collect();

        for (table, key) in &expired {
            state.mark_deleted(table, key);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "swept expired entries");
        }
    }
    debug!("expiry sweeper stopped");
}
