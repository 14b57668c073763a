//! Shared, lazily booted sandbox instance
//!
//! Booting is the expensive step, so callers that want reuse go through a
//! `SandboxContext`: the first `get_or_create` boots, later ones get the
//! cached handle until `reset`. Concurrent first callers all await one
//! shared boot instead of each booting their own.

use crate::local::LocalRuntime;
use crate::runtime::{InstanceId, SandboxHandle, SandboxRuntime};
use crate::{JsboxError, Result};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type BootFuture = Shared<BoxFuture<'static, Result<SandboxHandle>>>;

struct PendingBoot {
    seq: u64,
    future: BootFuture,
}

#[derive(Default)]
struct Slot {
    instance: Option<SandboxHandle>,
    pending: Option<PendingBoot>,
    /// Bumped by every reset; a boot started under an older generation
    /// never repopulates the cache
    generation: u64,
}

/// Counters describing the context's boot history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStats {
    pub cached: Option<InstanceId>,
    pub boot_attempts: u64,
    pub boots: u64,
}

/// Owner of at most one shared sandbox instance
pub struct SandboxContext {
    runtime: Arc<dyn SandboxRuntime>,
    slot: Mutex<Slot>,
    boot_attempts: AtomicU64,
    boots: AtomicU64,
}

impl SandboxContext {
    #[must_use]
    pub fn new(runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self {
            runtime,
            slot: Mutex::new(Slot::default()),
            boot_attempts: AtomicU64::new(0),
            boots: AtomicU64::new(0),
        }
    }

    /// The runtime this context boots from
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn SandboxRuntime> {
        &self.runtime
    }

    /// Return the cached instance, booting one first if none is cached.
    ///
    /// # Errors
    ///
    /// `JsboxError::Precondition` if the runtime lacks isolation support (no
    /// boot is attempted), or whatever the runtime's boot reports.
    pub async fn get_or_create(&self) -> Result<SandboxHandle> {
        let (generation, seq, boot) = {
            let mut slot = self.slot.lock();

            if let Some(instance) = &slot.instance {
                return Ok(Arc::clone(instance));
            }

            if let Some(pending) = &slot.pending {
                (slot.generation, pending.seq, pending.future.clone())
            } else {
                if !self.runtime.isolation_available() {
                    return Err(JsboxError::Precondition(
                        "sandbox instances require isolation support on this host".into(),
                    ));
                }

                let seq = self.boot_attempts.fetch_add(1, Ordering::Relaxed) + 1;
                let runtime = Arc::clone(&self.runtime);
                let future = async move { runtime.boot().await }.boxed().shared();
                slot.pending = Some(PendingBoot {
                    seq,
                    future: future.clone(),
                });

                tracing::info!(generation = slot.generation, boot = seq, "booting shared instance");
                (slot.generation, seq, future)
            }
        };

        let result = boot.await;

        let mut slot = self.slot.lock();
        let settles_here = slot.generation == generation
            && slot.pending.as_ref().is_some_and(|p| p.seq == seq);

        if settles_here {
            slot.pending = None;
            match &result {
                Ok(instance) => {
                    self.boots.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(instance = %instance.id(), "shared instance cached");
                    slot.instance = Some(Arc::clone(instance));
                }
                Err(e) => tracing::error!(error = %e, "shared instance boot failed"),
            }
        } else if slot.generation != generation {
            tracing::debug!(boot = seq, "boot settled after reset, not caching");
        }

        result
    }

    /// Forget the cached instance.
    ///
    /// The instance itself is not shut down; runs already holding it keep
    /// going, and it is released once the last handle drops.
    pub fn reset(&self) {
        let mut slot = self.slot.lock();
        if let Some(instance) = slot.instance.take() {
            tracing::info!(instance = %instance.id(), "shared instance reset");
        }
        slot.pending = None;
        slot.generation += 1;
    }

    /// The cached handle, without booting
    #[must_use]
    pub fn cached(&self) -> Option<SandboxHandle> {
        self.slot.lock().instance.clone()
    }

    #[must_use]
    pub fn stats(&self) -> ContextStats {
        ContextStats {
            cached: self.slot.lock().instance.as_ref().map(|i| i.id()),
            boot_attempts: self.boot_attempts.load(Ordering::Relaxed),
            boots: self.boots.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for SandboxContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxContext")
            .field("runtime", &self.runtime)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Process-wide context backed by the local runtime with default config
static GLOBAL: Lazy<SandboxContext> =
    Lazy::new(|| SandboxContext::new(Arc::new(LocalRuntime::default())));

/// `get_or_create` on the process-wide context.
///
/// # Errors
///
/// See [`SandboxContext::get_or_create`].
pub async fn get_or_create_instance() -> Result<SandboxHandle> {
    GLOBAL.get_or_create().await
}

/// `reset` on the process-wide context
pub fn reset_instance() {
    GLOBAL.reset();
}
