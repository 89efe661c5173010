use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::{JoinError, JoinHandle};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunKind {
    Sync,
    Diagnostics,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunKind::Sync => "sync",
            RunKind::Diagnostics => "diagnostics",
        }
    }
}

/// At most one run of each kind per connection profile.
#[derive(Debug, Default)]
pub struct SingleFlight {
    in_flight: DashMap<(i32, RunKind), DateTime<Utc>>,
}

impl SingleFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails with `Busy` instead of waiting when a run is already in flight.
    pub fn try_acquire(self: &Arc<Self>, profile_id: i32, kind: RunKind) -> Result<FlightPermit, CoreError> {
        match self.in_flight.entry((profile_id, kind)) {
            Entry::Occupied(_) => Err(CoreError::Busy {
                profile_id,
                kind: kind.as_str(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(FlightPermit {
                    guard: Arc::clone(self),
                    key: (profile_id, kind),
                })
            }
        }
    }

    pub fn started_at(&self, profile_id: i32, kind: RunKind) -> Option<DateTime<Utc>> {
        self.in_flight.get(&(profile_id, kind)).map(|entry| *entry)
    }
}

/// Releases its slot when dropped, whatever path the run exits by.
#[derive(Debug)]
pub struct FlightPermit {
    guard: Arc<SingleFlight>,
    key: (i32, RunKind),
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.guard.in_flight.remove(&self.key);
    }
}

/// A spawned task that is aborted when the handle is dropped, so a caller
/// giving up on a run also tears down the run's router session.
pub struct AbortOnDrop<T>(JoinHandle<T>);

impl<T: Send + 'static> AbortOnDrop<T> {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
