//! Lazily-initialized, process-wide collaborator handles.
//!
//! A `Capability` moves through `Uninitialized → Loading → Ready | Failed`
//! exactly once. The first caller to `acquire` starts the loader on its own
//! task; every caller, including that one, waits on the same load and then
//! sees its outcome. Dropping a waiting caller does not abandon the load, and
//! a loader that panics leaves the capability `Failed`. A failed load is final.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type LoadFuture<T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send>>;
type Loader<T> = Box<dyn FnOnce() -> LoadFuture<T> + Send>;

/// Observable lifecycle state of a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityState {
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

impl CapabilityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityState::Uninitialized => "uninitialized",
            CapabilityState::Loading => "loading",
            CapabilityState::Ready => "ready",
            CapabilityState::Failed => "failed",
        }
    }
}

impl fmt::Display for CapabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Slot<T> {
    Uninitialized,
    Loading,
    Ready(Arc<T>),
    Failed(Arc<str>),
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        match self {
            Slot::Uninitialized => Slot::Uninitialized,
            Slot::Loading => Slot::Loading,
            Slot::Ready(v) => Slot::Ready(Arc::clone(v)),
            Slot::Failed(r) => Slot::Failed(Arc::clone(r)),
        }
    }
}

/// Why a capability could not be acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// Never loaded and no loader was registered.
    NotLoaded,
    Failed(String),
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::NotLoaded => f.write_str("not loaded"),
            Unavailable::Failed(reason) => write!(f, "load failed: {reason}"),
        }
    }
}

pub struct Capability<T> {
    name: &'static str,
    slot: Arc<watch::Sender<Slot<T>>>,
    loader: Mutex<Option<Loader<T>>>,
}

impl<T: Send + Sync + 'static> Capability<T> {
    /// A capability that loads on first `acquire` (or explicit `warm_up`).
    pub fn lazy<F, Fut>(name: &'static str, loader: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        let loader: Loader<T> = Box::new(move || Box::pin(loader()));
        Self {
            name,
            slot: Arc::new(watch::Sender::new(Slot::Uninitialized)),
            loader: Mutex::new(Some(loader)),
        }
    }

    pub fn ready(name: &'static str, value: T) -> Self {
        Self {
            name,
            slot: Arc::new(watch::Sender::new(Slot::Ready(Arc::new(value)))),
            loader: Mutex::new(None),
        }
    }

    pub fn failed(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            slot: Arc::new(watch::Sender::new(Slot::Failed(Arc::from(reason.into())))),
            loader: Mutex::new(None),
        }
    }

    /// A capability with no loader; always reports `NotLoaded`.
    pub fn absent(name: &'static str) -> Self {
        Self {
            name,
            slot: Arc::new(watch::Sender::new(Slot::Uninitialized)),
            loader: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> CapabilityState {
        match &*self.slot.borrow() {
            Slot::Uninitialized => CapabilityState::Uninitialized,
            Slot::Loading => CapabilityState::Loading,
            Slot::Ready(_) => CapabilityState::Ready,
            Slot::Failed(_) => CapabilityState::Failed,
        }
    }

    /// Start loading if nobody has, then wait for the outcome.
    pub async fn acquire(&self) -> Result<Arc<T>, Unavailable> {
        if let Some(loader) = self.claim_loader() {
            self.spawn_loader(loader);
        }
        self.wait().await
    }

    /// Trigger loading without holding on to the value.
    pub async fn warm_up(&self) -> CapabilityState {
        let _ = self.acquire().await;
        self.state()
    }

    /// Wait for an in-flight load, without starting one.
    pub async fn wait(&self) -> Result<Arc<T>, Unavailable> {
        let mut rx = self.slot.subscribe();
        let slot = match rx.wait_for(|s| !matches!(s, Slot::Loading)).await {
            Ok(slot) => slot.clone(),
            // The sender lives in `self`, so it cannot be dropped while we borrow it.
            Err(_) => return Err(Unavailable::NotLoaded),
        };
        match slot {
            Slot::Ready(value) => Ok(value),
            Slot::Failed(reason) => Err(Unavailable::Failed(reason.to_string())),
            Slot::Uninitialized | Slot::Loading => Err(Unavailable::NotLoaded),
        }
    }

    /// Atomically move `Uninitialized → Loading` and take the loader.
    fn claim_loader(&self) -> Option<Loader<T>> {
        let mut claimed = None;
        self.slot.send_if_modified(|slot| {
            if !matches!(slot, Slot::Uninitialized) {
                return false;
            }
            let loader = match self.loader.lock() {
                Ok(mut guard) => guard.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            match loader {
                Some(loader) => {
                    claimed = Some(loader);
                    *slot = Slot::Loading;
                    true
                }
                None => false,
            }
        });
        claimed
    }

    /// Run the loader detached from the caller and publish its outcome.
    fn spawn_loader(&self, loader: Loader<T>) {
        let name = self.name;
        let slot = Arc::clone(&self.slot);
        tracing::info!(capability = name, "loading");
        let load = tokio::spawn(loader());
        tokio::spawn(async move {
            let next = match load.await {
                Ok(Ok(value)) => {
                    tracing::info!(capability = name, "ready");
                    Slot::Ready(Arc::new(value))
                }
                Ok(Err(e)) => {
                    tracing::warn!(capability = name, error = %e, "load failed; capability degraded");
                    Slot::Failed(Arc::from(e.to_string()))
                }
                Err(e) => {
                    tracing::error!(capability = name, error = %e, "loader aborted; capability degraded");
                    Slot::Failed(Arc::from(format!("loader aborted: {e}")))
                }
            };
            slot.send_replace(next);
        });
    }
}
