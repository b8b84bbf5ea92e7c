//! Single-flight credential refresh.
//!
//! When several requests are rejected at once, only the first one (the
//! leader) calls the refresh endpoint. Everyone else queues on the current
//! ticket and receives the leader's outcome, in the order they queued.
//!
//! Every settled episode bumps a generation counter and keeps its outcome.
//! A request stamps the generation before it is sent; if its rejection
//! arrives after a newer episode settled, it takes that outcome instead of
//! starting another refresh.
//!
//! The ticket state is behind a `std::sync::Mutex` that is never held across
//! an `.await`. Waiter slots are removed when a waiting future is dropped,
//! and a leader that is dropped mid-refresh settles the ticket as abandoned.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Why a refresh episode produced no new access token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("no refresh credential available")]
    NoRefreshCredential,

    #[error("refresh rejected by server: {0}")]
    Rejected(String),

    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("could not store refreshed credentials: {0}")]
    Storage(String),

    #[error("refresh was abandoned before completing")]
    Abandoned,
}

pub type RefreshOutcome = Result<String, RefreshFailure>;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<RefreshOutcome>,
}

#[derive(Default)]
struct Ticket {
    pending: bool,
    next_id: u64,
    waiters: VecDeque<Waiter>,
    generation: u64,
    last: Option<RefreshOutcome>,
}

enum Role {
    Leader,
    Follower(u64, oneshot::Receiver<RefreshOutcome>),
    Settled(RefreshOutcome),
}

#[derive(Default)]
pub struct RefreshCoordinator {
    ticket: Mutex<Ticket>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Ticket> {
        self.ticket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().pending
    }

    /// Number of episodes settled so far
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Number of requests waiting on the in-flight refresh
    pub fn queued(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Obtain a new access token for a request sent at generation `seen`.
    ///
    /// Joins the in-flight episode if there is one. Otherwise, if an episode
    /// settled after `seen`, returns its outcome without calling `refresh`.
    /// Only when neither holds does this call lead a new episode.
    pub async fn refresh<F, Fut>(&self, seen: u64, refresh: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        let role = {
            let mut ticket = self.lock();
            if ticket.pending {
                let id = ticket.next_id;
                ticket.next_id += 1;
                let (tx, rx) = oneshot::channel();
                ticket.waiters.push_back(Waiter { id, tx });
                debug!(waiter = id, queued = ticket.waiters.len(), "Refresh in flight, queued");
                Role::Follower(id, rx)
            } else if let Some(last) = ticket.last.clone().filter(|_| ticket.generation != seen) {
                debug!(seen, generation = ticket.generation, "Episode settled since request was sent");
                Role::Settled(last)
            } else {
                ticket.pending = true;
                Role::Leader
            }
        };

        match role {
            Role::Settled(outcome) => outcome,
            Role::Follower(id, rx) => {
                let _slot = WaiterSlot {
                    coordinator: self,
                    id,
                };
                rx.await.unwrap_or(Err(RefreshFailure::Abandoned))
            }
            Role::Leader => {
                info!("Starting credential refresh");
                let mut episode = Episode {
                    coordinator: self,
                    settled: false,
                };
                let outcome = refresh().await;
                episode.settle(&outcome);
                outcome
            }
        }
    }

    /// Close the ticket and hand `outcome` to every waiter in queue order.
    fn settle(&self, outcome: &RefreshOutcome) {
        let waiters = {
            let mut ticket = self.lock();
            ticket.pending = false;
            ticket.generation += 1;
            ticket.last = Some(outcome.clone());
            std::mem::take(&mut ticket.waiters)
        };

        match outcome {
            Ok(_) => info!(waiters = waiters.len(), "Credential refresh succeeded"),
            Err(e) => warn!(waiters = waiters.len(), error = %e, "Credential refresh failed"),
        }

        for waiter in waiters {
            // A waiter that gave up has dropped its receiver
            let _ = waiter.tx.send(outcome.clone());
        }
    }
}

/// Removes a follower's queue entry on every exit path.
struct WaiterSlot<'a> {
    coordinator: &'a RefreshCoordinator,
    id: u64,
}

impl Drop for WaiterSlot<'_> {
    fn drop(&mut self) {
        let mut ticket = self.coordinator.lock();
        ticket.waiters.retain(|w| w.id != self.id);
    }
}

/// Leader's obligation to settle the ticket, even if its future is dropped.
struct Episode<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl Episode<'_> {
    fn settle(&mut self, outcome: &RefreshOutcome) {
        self.settled = true;
        self.coordinator.settle(outcome);
    }
}

impl Drop for Episode<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.settle(&Err(RefreshFailure::Abandoned));
        }
    }
}
