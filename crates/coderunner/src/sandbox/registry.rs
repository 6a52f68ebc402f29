//! Sandbox state tracking
//!
//! Each language owns one slot behind a `watch` channel. Every transition is a
//! single `send_if_modified` call, so checking and setting the state can never
//! interleave with another task, and waiters are woken on every change.
//!
//! Every transition out of `Idle` bumps the slot's lease counter. A [`Lease`]
//! or [`RecycleTicket`] only acts while its id is still current, which makes
//! late releases from a superseded holder harmless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

use crate::config::Config;
use crate::sandbox::SandboxError;
use crate::types::{SandboxInfo, SandboxState};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    state: SandboxState,
    lease: u64,
    handle: Option<String>,
}

#[derive(Debug)]
struct Entry {
    name: String,
    slot: Arc<watch::Sender<Slot>>,
}

/// Tracks the one sandbox each language owns
#[derive(Debug)]
pub struct SandboxRegistry {
    entries: HashMap<String, Entry>,
}

impl SandboxRegistry {
    /// Create a registry with an idle, not yet provisioned slot per language
    pub fn new(config: &Config) -> Self {
        let entries = config
            .languages
            .keys()
            .map(|id| {
                let (slot, _) = watch::channel(Slot {
                    state: SandboxState::Idle,
                    lease: 0,
                    handle: None,
                });
                let entry = Entry {
                    name: config.sandbox_name(id),
                    slot: Arc::new(slot),
                };
                (id.clone(), entry)
            })
            .collect();

        Self { entries }
    }

    fn entry(&self, language: &str) -> Result<&Entry, SandboxError> {
        self.entries
            .get(language)
            .ok_or_else(|| SandboxError::NotRegistered(language.to_string()))
    }

    /// Deterministic container name for a language
    pub fn name(&self, language: &str) -> Option<&str> {
        self.entries.get(language).map(|entry| entry.name.as_str())
    }

    pub fn state(&self, language: &str) -> Option<SandboxState> {
        self.entries
            .get(language)
            .map(|entry| entry.slot.borrow().state)
    }

    /// Engine handle of the current container, if one has been provisioned
    pub fn handle(&self, language: &str) -> Option<String> {
        self.entries
            .get(language)
            .and_then(|entry| entry.slot.borrow().handle.clone())
    }

    /// Take exclusive use of a language's sandbox.
    ///
    /// Waits while the sandbox is busy or recycling, for at most `wait`.
    pub async fn acquire(&self, language: &str, wait: Duration) -> Result<Lease, SandboxError> {
        let entry = self.entry(language)?;
        // Subscribe before the first attempt so no transition goes unseen
        let mut changes = entry.slot.subscribe();

        let attempt = timeout(wait, async {
            loop {
                if let Some(lease) = Lease::try_acquire(language, &entry.slot) {
                    return Some(lease);
                }
                if changes.changed().await.is_err() {
                    return None;
                }
            }
        })
        .await;

        match attempt {
            Ok(Some(lease)) => {
                debug!(language, lease = lease.id(), "sandbox acquired");
                Ok(lease)
            }
            Ok(None) | Err(_) => Err(SandboxError::Unavailable {
                language: language.to_string(),
                waited: wait,
            }),
        }
    }

    /// Start recycling on behalf of an external stop request.
    ///
    /// A busy sandbox is taken away from its current holder, whose lease is
    /// revoked. If recycling is already underway this returns
    /// [`RecycleStart::InProgress`] rather than starting a second one.
    pub fn begin_recycle(&self, language: &str) -> Result<RecycleStart, SandboxError> {
        let entry = self.entry(language)?;
        let mut ticket = None;
        entry.slot.send_if_modified(|slot| match slot.state {
            SandboxState::Recycling => false,
            SandboxState::Idle | SandboxState::Busy => {
                slot.state = SandboxState::Recycling;
                slot.lease += 1;
                ticket = Some(slot.lease);
                true
            }
        });

        Ok(match ticket {
            Some(id) => RecycleStart::Started(RecycleTicket::new(language, id, &entry.slot)),
            None => RecycleStart::InProgress,
        })
    }

    /// Wait until a language's sandbox is no longer recycling
    pub async fn wait_settled(&self, language: &str, wait: Duration) -> Result<(), SandboxError> {
        let entry = self.entry(language)?;
        let mut changes = entry.slot.subscribe();
        let settled = timeout(wait, async {
            changes
                .wait_for(|slot| slot.state != SandboxState::Recycling)
                .await
                .is_ok()
        })
        .await;

        match settled {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(SandboxError::Unavailable {
                language: language.to_string(),
                waited: wait,
            }),
        }
    }

    /// Record a container found already running in the engine.
    ///
    /// Only applies to an idle slot; returns whether the handle was recorded.
    pub fn adopt(&self, language: &str, handle: Option<String>) -> Result<bool, SandboxError> {
        let entry = self.entry(language)?;
        Ok(entry.slot.send_if_modified(|slot| {
            if slot.state == SandboxState::Idle && slot.handle != handle {
                slot.handle = handle;
                true
            } else {
                false
            }
        }))
    }

    /// Read-only view of every sandbox, ordered by language
    pub fn snapshot(&self) -> Vec<SandboxInfo> {
        let mut infos: Vec<SandboxInfo> = self
            .entries
            .iter()
            .map(|(language, entry)| {
                let slot = entry.slot.borrow();
                SandboxInfo {
                    language: language.clone(),
                    name: entry.name.clone(),
                    state: slot.state,
                    engine_handle: slot.handle.clone(),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.language.cmp(&b.language));
        infos
    }

    /// Registered language IDs, sorted
    pub fn languages(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// Outcome of asking to recycle a sandbox
#[derive(Debug)]
pub enum RecycleStart {
    /// The caller owns this recycle and must finish the ticket
    Started(RecycleTicket),
    /// Another task is already recycling
    InProgress,
    /// The lease was superseded; whoever superseded it owns recovery
    Stale,
}

/// Exclusive use of a busy sandbox
///
/// Dropping a lease without releasing or recycling it marks the sandbox idle
/// with no container, so the next holder provisions a fresh one.
#[derive(Debug)]
pub struct Lease {
    language: String,
    id: u64,
    slot: Arc<watch::Sender<Slot>>,
    settled: bool,
}

impl Lease {
    fn try_acquire(language: &str, slot: &Arc<watch::Sender<Slot>>) -> Option<Self> {
        let mut acquired = None;
        slot.send_if_modified(|slot| {
            if slot.state == SandboxState::Idle {
                slot.state = SandboxState::Busy;
                slot.lease += 1;
                acquired = Some(slot.lease);
                true
            } else {
                false
            }
        });

        acquired.map(|id| Self {
            language: language.to_string(),
            id,
            slot: Arc::clone(slot),
            settled: false,
        })
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Engine handle of the sandbox's container, if provisioned
    pub fn handle(&self) -> Option<String> {
        self.slot.borrow().handle.clone()
    }

    /// Whether this lease still owns the sandbox
    pub fn is_current(&self) -> bool {
        let slot = self.slot.borrow();
        slot.lease == self.id && slot.state == SandboxState::Busy
    }

    /// Resolves once the lease has been taken away by a stop request
    pub async fn revoked(&self) {
        let id = self.id;
        let mut changes = self.slot.subscribe();
        let result = changes.wait_for(|slot| slot.lease != id).await.map(|_| ());
        if result.is_err() {
            // Registry gone; nothing can revoke us any more
            std::future::pending::<()>().await;
        }
    }

    /// Record the container backing the sandbox. Ignored for a stale lease.
    pub fn attach(&self, handle: String) -> bool {
        let id = self.id;
        self.slot.send_if_modified(|slot| {
            if slot.lease == id && slot.state == SandboxState::Busy {
                slot.handle = Some(handle);
                true
            } else {
                false
            }
        })
    }

    /// Hand the sandbox back as clean. Returns `false` for a stale lease.
    pub fn release(mut self) -> bool {
        self.settled = true;
        let id = self.id;
        let released = self.slot.send_if_modified(|slot| {
            if slot.lease == id && slot.state == SandboxState::Busy {
                slot.state = SandboxState::Idle;
                true
            } else {
                false
            }
        });
        debug!(language = %self.language, lease = id, released, "sandbox released");
        released
    }

    /// Move the sandbox from busy to recycling
    pub fn recycle(mut self) -> RecycleStart {
        self.settled = true;
        let id = self.id;
        let mut ticket = None;
        self.slot.send_if_modified(|slot| {
            if slot.lease == id && slot.state == SandboxState::Busy {
                slot.state = SandboxState::Recycling;
                slot.lease += 1;
                ticket = Some(slot.lease);
                true
            } else {
                false
            }
        });

        match ticket {
            Some(ticket) => {
                RecycleStart::Started(RecycleTicket::new(&self.language, ticket, &self.slot))
            }
            None => RecycleStart::Stale,
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let id = self.id;
        let abandoned = self.slot.send_if_modified(|slot| {
            if slot.lease == id && slot.state == SandboxState::Busy {
                slot.state = SandboxState::Idle;
                slot.handle = None;
                true
            } else {
                false
            }
        });
        if abandoned {
            debug!(
                language = %self.language,
                lease = id,
                "lease abandoned, sandbox marked for rebuild"
            );
        }
    }
}

/// Ownership of an in-progress recycle
///
/// Dropping an unfinished ticket marks the sandbox idle with no container.
#[derive(Debug)]
pub struct RecycleTicket {
    language: String,
    id: u64,
    slot: Arc<watch::Sender<Slot>>,
    finished: bool,
}

impl RecycleTicket {
    fn new(language: &str, id: u64, slot: &Arc<watch::Sender<Slot>>) -> Self {
        Self {
            language: language.to_string(),
            id,
            slot: Arc::clone(slot),
            finished: false,
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// End the recycle, leaving the sandbox idle with the given container
    pub fn finish(mut self, handle: Option<String>) {
        self.finished = true;
        self.settle(handle);
    }

    fn settle(&self, handle: Option<String>) {
        let id = self.id;
        self.slot.send_if_modified(|slot| {
            if slot.lease == id && slot.state == SandboxState::Recycling {
                slot.state = SandboxState::Idle;
                slot.handle = handle;
                true
            } else {
                false
            }
        });
    }
}

impl Drop for RecycleTicket {
    fn drop(&mut self) {
        if !self.finished {
            self.settle(None);
        }
    }
}
