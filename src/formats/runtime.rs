//! Shared codec runtime for the compressed-format plugins
//!
//! The symphonia probe and codec tables are process-wide. Plugins hold an
//! `Arc<CodecRuntime>` and every open stream holds a [`RuntimeLease`], so the
//! runtime outlives the last stream that decodes through it and the number of
//! live decoders is observable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use symphonia::core::codecs::CodecRegistry;
use symphonia::core::probe::Probe;
use tracing::trace;

/// Handle on symphonia's default probe and codec registry
pub struct CodecRuntime {
    probe: &'static Probe,
    codecs: &'static CodecRegistry,
    live_streams: AtomicUsize,
}

impl CodecRuntime {
    pub fn init() -> Arc<Self> {
        Arc::new(Self {
            probe: symphonia::default::get_probe(),
            codecs: symphonia::default::get_codecs(),
            live_streams: AtomicUsize::new(0),
        })
    }

    pub fn probe(&self) -> &Probe {
        self.probe
    }

    pub fn codecs(&self) -> &CodecRegistry {
        self.codecs
    }

    /// Number of streams currently holding a lease
    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::Acquire)
    }

    /// Register one open stream; released when the lease drops
    pub fn lease(self: &Arc<Self>) -> RuntimeLease {
        let live = self.live_streams.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("Codec runtime lease taken ({} live)", live);
        RuntimeLease {
            runtime: Arc::clone(self),
        }
    }
}

impl std::fmt::Debug for CodecRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRuntime")
            .field("live_streams", &self.live_streams())
            .finish()
    }
}

/// Keeps the runtime alive for one open stream
pub struct RuntimeLease {
    runtime: Arc<CodecRuntime>,
}

impl RuntimeLease {
    pub fn runtime(&self) -> &CodecRuntime {
        &self.runtime
    }
}

impl Drop for RuntimeLease {
    fn drop(&mut self) {
        self.runtime.live_streams.fetch_sub(1, Ordering::AcqRel);
    }
}
