//! Cooperative cancellation on termination signals.
//!
//! While a directory is unlocked, SIGINT, SIGTERM and SIGHUP only raise a
//! flag. The copy checks it between entries and unwinds with
//! `ErrorKind::Interrupted`, so the key is removed before the process exits.
//! A second signal while the flag is already raised exits immediately.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::SigId;

use crate::constants::exit_codes;

const SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

/// Shared "stop now" flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route termination signals to this flag until the guard drops.
    pub fn arm(&self) -> io::Result<Armed> {
        // Handlers registered before a failure are removed when `armed` drops.
        let mut armed = Armed {
            ids: Vec::with_capacity(SIGNALS.len() * 2),
        };
        for signal in SIGNALS {
            // Registered first so it sees the flag before this signal sets it.
            armed.ids.push(signal_hook::flag::register_conditional_shutdown(
                signal,
                exit_codes::INTERRUPTED,
                Arc::clone(&self.flag),
            )?);
            armed
                .ids
                .push(signal_hook::flag::register(signal, Arc::clone(&self.flag))?);
        }
        Ok(armed)
    }

    #[cfg(test)]
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Whether `err` was caused by a raised interrupt.
    pub fn caused(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            cause
                .downcast_ref::<io::Error>()
                .map_or(false, |e| e.kind() == io::ErrorKind::Interrupted)
        })
    }

    /// `ErrorKind::Interrupted` once a signal has arrived.
    pub fn check(&self) -> io::Result<()> {
        if self.is_set() {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "interrupted by signal",
            ));
        }
        Ok(())
    }
}

/// Signal handlers installed by [`Interrupt::arm`].
///
/// Dropping it restores the previous disposition.
#[derive(Debug)]
pub struct Armed {
    ids: Vec<SigId>,
}

impl Drop for Armed {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
