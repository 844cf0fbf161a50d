//! Starts each worker as its own task and stops them cooperatively.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Supervisor {
    cancel: CancellationToken,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            workers: Vec::new(),
        }
    }

    /// Token for tasks that are not workers but should stop with them.
    pub fn token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Start a worker. It gets its own child token and should return once
    /// that token is cancelled.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, worker: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.cancel.child_token();
        let watch = token.clone();
        let task = worker(token);
        let handle = tokio::spawn(async move {
            task.await;
            if !watch.is_cancelled() {
                error!("Worker {name} exited unexpectedly");
            }
        });
        info!("Started worker {name}");
        self.workers.push((name, handle));
    }

    /// Cancel every worker and wait for them, aborting any that outlive
    /// `grace`.
    pub async fn shutdown(self, grace: Duration) {
        self.cancel.cancel();
        let deadline = Instant::now() + grace;

        for (name, mut handle) in self.workers {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!("Worker {name} stopped"),
                Ok(Err(e)) if e.is_panic() => error!("Worker {name} panicked"),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Worker {name} did not stop within {grace:?}, aborting");
                    handle.abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn workers_stop_on_shutdown() {
        let mut supervisor = Supervisor::new();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        supervisor.spawn("sleeper", move |cancel| async move {
            cancel.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });

        supervisor.shutdown(Duration::from_secs(1)).await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_worker_is_aborted_after_grace() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("stubborn", |_cancel| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let started = Instant::now();
        supervisor.shutdown(Duration::from_secs(2)).await;
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn side_tokens_follow_the_supervisor() {
        let supervisor = Supervisor::new();
        let token = supervisor.token();
        assert!(!token.is_cancelled());
        supervisor.shutdown(Duration::from_millis(10)).await;
        assert!(token.is_cancelled());
    }
}
