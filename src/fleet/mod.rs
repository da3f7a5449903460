//! Concurrent fan-out of per-host work.
//!
//! [`Fleet::run`] spawns one task per host. Every task reports exactly once
//! through a shared channel drained by a single collector; a task that
//! panics is noticed through its join handle and reported as well, so the
//! returned [`FleetReport`] always holds one outcome per submitted host.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::hosts::HostName;

/// Why a host produced no successful value.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FleetFailure<E> {
    /// The host's work returned an error.
    #[error("{0}")]
    Failed(E),
    /// The host's work overran the per-host deadline.
    #[error("no result within {}s", .0.as_secs())]
    TimedOut(Duration),
    /// The host's task ended without reporting.
    #[error("task ended abnormally: {0}")]
    Panicked(String),
}

/// Final outcome for one host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostOutcome<T, E> {
    /// Host the outcome belongs to.
    pub host: HostName,
    /// Position of the host in the submitted list.
    pub ordinal: usize,
    /// Value or failure.
    pub result: Result<T, FleetFailure<E>>,
}

/// Outcomes of a fan-out, in the order they were received.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FleetReport<T, E> {
    outcomes: Vec<HostOutcome<T, E>>,
}

impl<T, E> FleetReport<T, E> {
    /// All outcomes in receipt order.
    #[must_use]
    pub fn outcomes(&self) -> &[HostOutcome<T, E>] {
        &self.outcomes
    }

    /// Consumes the report, returning outcomes in receipt order.
    #[must_use]
    pub fn into_outcomes(self) -> Vec<HostOutcome<T, E>> {
        self.outcomes
    }

    /// Successful outcomes in receipt order.
    pub fn successes(&self) -> impl Iterator<Item = (&HostOutcome<T, E>, &T)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok().map(|value| (outcome, value)))
    }

    /// Failed outcomes in receipt order.
    pub fn failures(&self) -> impl Iterator<Item = (&HostName, &FleetFailure<E>)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().err().map(|err| (&outcome.host, err)))
    }

    /// Number of failed hosts.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Results keyed by host.
    #[must_use]
    pub fn by_host(&self) -> BTreeMap<&HostName, &Result<T, FleetFailure<E>>> {
        self.outcomes
            .iter()
            .map(|outcome| (&outcome.host, &outcome.result))
            .collect()
    }

    /// Returns `true` when every host succeeded.
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    /// Number of outcomes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns `true` when no hosts were submitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Runs per-host work concurrently.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Fleet {
    host_timeout: Option<Duration>,
}

impl Fleet {
    /// Coordinator without a per-host deadline.
    #[must_use]
    pub const fn new() -> Self {
        Self { host_timeout: None }
    }

    /// Sets the per-host deadline.
    #[must_use]
    pub const fn with_host_timeout(self, timeout: Option<Duration>) -> Self {
        Self {
            host_timeout: timeout,
        }
    }

    /// Runs `task` once per host and waits for every outcome.
    pub async fn run<T, E, F, Fut>(&self, hosts: Vec<HostName>, mut task: F) -> FleetReport<T, E>
    where
        F: FnMut(HostName) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let jobs = hosts.into_iter().map(|host| (host, ())).collect();
        self.run_with(jobs, |host, ()| task(host)).await
    }

    /// Like [`Fleet::run`], handing each task a payload of its own.
    pub async fn run_with<J, T, E, F, Fut>(
        &self,
        jobs: Vec<(HostName, J)>,
        mut task: F,
    ) -> FleetReport<T, E>
    where
        F: FnMut(HostName, J) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (sender, mut receiver) = mpsc::channel(jobs.len().max(1));
        let mut handles = Vec::with_capacity(jobs.len());
        for (ordinal, (host, payload)) in jobs.into_iter().enumerate() {
            let work = task(host.clone(), payload);
            let reporter = sender.clone();
            let limit = self.host_timeout;
            let reported_host = host.clone();
            let handle = tokio::spawn(async move {
                let result = match limit {
                    Some(deadline) => match tokio::time::timeout(deadline, work).await {
                        Ok(result) => result.map_err(FleetFailure::Failed),
                        Err(_) => Err(FleetFailure::TimedOut(deadline)),
                    },
                    None => work.await.map_err(FleetFailure::Failed),
                };
                let outcome = HostOutcome {
                    host: reported_host,
                    ordinal,
                    result,
                };
                if reporter.send(outcome).await.is_err() {
                    debug!("collector closed before outcome was delivered");
                }
            });
            handles.push((ordinal, host, handle));
        }
        drop(sender);

        let mut outcomes = Vec::with_capacity(handles.len());
        while let Some(outcome) = receiver.recv().await {
            match &outcome.result {
                Ok(_) => debug!(host = %outcome.host, "host finished"),
                Err(FleetFailure::TimedOut(deadline)) => {
                    warn!(host = %outcome.host, seconds = deadline.as_secs(), "host timed out");
                }
                Err(_) => debug!(host = %outcome.host, "host failed"),
            }
            outcomes.push(outcome);
        }

        for (ordinal, host, handle) in handles {
            if let Err(err) = handle.await {
                let message = abnormal_exit(err);
                warn!(host = %host, error = %message, "host task ended without a result");
                outcomes.push(HostOutcome {
                    host,
                    ordinal,
                    result: Err(FleetFailure::Panicked(message)),
                });
            }
        }
        FleetReport { outcomes }
    }
}

fn abnormal_exit(err: JoinError) -> String {
    if !err.is_panic() {
        return String::from("task was cancelled");
    }
    panic_message(err.into_panic().as_ref())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_owned();
    }
    payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_else(|| String::from("panic with a non-string payload"))
}
