use geoenrich_common::types::ResolutionResult;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, Instrument};

use crate::resolver::AddressResolver;

/// Live worker count, readable while the pool runs.
#[derive(Debug, Clone, Default)]
pub struct ActiveWorkers(Arc<AtomicUsize>);

impl ActiveWorkers {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ActiveGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(self.0.clone())
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub results_produced: u64,
    pub panicked_workers: usize,
}

/// Fixed-size set of resolver workers between the task and result feeds.
#[derive(Clone)]
pub struct WorkerPool {
    resolver: AddressResolver,
    size: usize,
    active: ActiveWorkers,
}

impl WorkerPool {
    pub fn new(resolver: AddressResolver, size: usize) -> Self {
        Self {
            resolver,
            size: size.max(1),
            active: ActiveWorkers::default(),
        }
    }

    pub fn active_workers(&self) -> ActiveWorkers {
        self.active.clone()
    }

    /// Run until the task feed is closed and drained, or `cancel` fires.
    ///
    /// Returns only after every worker has exited, at which point the last
    /// result sender is dropped and the result feed closes.
    pub async fn run(
        self,
        tasks: Receiver<String>,
        results: Sender<ResolutionResult>,
        cancel: CancellationToken,
    ) -> PoolSummary {
        let tasks = Arc::new(Mutex::new(tasks));
        let mut workers = JoinSet::new();

        for id in 0..self.size {
            let guard = self.active.enter();
            let worker = Worker {
                id,
                resolver: self.resolver.clone(),
                tasks: tasks.clone(),
                results: results.clone(),
                cancel: cancel.clone(),
            };
            workers.spawn(
                async move {
                    let _guard = guard;
                    worker.run().await
                }
                .in_current_span(),
            );
        }
        drop(results);

        debug!(workers = self.size, "Worker pool started");

        let mut summary = PoolSummary::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(produced) => summary.results_produced += produced,
                Err(e) => {
                    error!(error = %e, "Worker task failed");
                    summary.panicked_workers += 1;
                },
            }
        }

        info!(
            results = summary.results_produced,
            panicked = summary.panicked_workers,
            "All workers exited"
        );
        summary
    }
}

struct Worker {
    id: usize,
    resolver: AddressResolver,
    tasks: Arc<Mutex<Receiver<String>>>,
    results: Sender<ResolutionResult>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) -> u64 {
        let mut produced = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                next = async { self.tasks.lock().await.recv().await } => next,
            };
            let Some(address) = next else { break };

            let result = self.resolver.resolve(&address, &self.cancel).await;
            if self.cancel.is_cancelled() {
                break;
            }

            trace!(worker = self.id, address = %address, resolved = result.is_resolved(), "Resolved");

            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                sent = self.results.send(result) => sent,
            };
            if sent.is_err() {
                debug!(worker = self.id, "Result feed closed, worker stopping");
                break;
            }
            produced += 1;
        }

        produced
    }
}
