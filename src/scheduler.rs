//! Job dispatch and crash recovery
//!
//! With `workers.count > 0`, submitted ids go through an mpsc queue drained by
//! that many tokio tasks. With 0, every job gets its own OS thread running a
//! single-threaded runtime. Either way the submitting request returns at once.

use crate::db::{self, with_conn, Db};
use crate::error::ScrapeError;
use crate::job::{JobEvent, JobStatus};
use crate::orchestrator::{CancelToken, Orchestrator};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const INTERRUPTED_MESSAGE: &str = "interrupted before completion";

/// Cancel tokens of jobs that are queued or running
#[derive(Default)]
struct Registry {
    tokens: Mutex<HashMap<i64, CancelToken>>,
}

impl Registry {
    fn register(&self, job_id: i64) -> CancelToken {
        let token = CancelToken::new();
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(job_id, token.clone());
        }
        token
    }

    fn remove(&self, job_id: i64) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.remove(&job_id);
        }
    }

    fn cancel(&self, job_id: i64) -> bool {
        match self.tokens.lock() {
            Ok(tokens) => match tokens.get(&job_id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

enum Dispatch {
    Queue(mpsc::UnboundedSender<(i64, CancelToken)>),
    Detached,
}

pub struct JobQueue {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<Registry>,
    dispatch: Dispatch,
}

async fn run_job(orchestrator: &Orchestrator, registry: &Registry, job_id: i64, token: CancelToken) {
    match orchestrator.run(job_id, &token).await {
        Ok(job) => log::info!("Job {} finished as {}", job.id, job.status),
        Err(e) => log::error!("Job {} could not be run: {}", job_id, e),
    }
    registry.remove(job_id);
}

impl JobQueue {
    /// Start the dispatcher; must be called inside a tokio runtime when
    /// `workers > 0`
    pub fn start(orchestrator: Arc<Orchestrator>, workers: usize) -> Self {
        let registry = Arc::new(Registry::default());
        if workers == 0 {
            log::info!("Jobs run on detached threads");
            return Self {
                orchestrator,
                registry,
                dispatch: Dispatch::Detached,
            };
        }

        let (tx, rx) = mpsc::unbounded_channel::<(i64, CancelToken)>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker in 0..workers {
            let rx = rx.clone();
            let orchestrator = orchestrator.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some((job_id, token)) = next else { break };
                    log::debug!("Worker {} picked job {}", worker, job_id);
                    run_job(&orchestrator, &registry, job_id, token).await;
                }
                log::debug!("Worker {} stopped", worker);
            });
        }
        log::info!("Started {} scrape workers", workers);

        Self {
            orchestrator,
            registry,
            dispatch: Dispatch::Queue(tx),
        }
    }

    /// Hand a pending job to a worker
    pub fn submit(&self, job_id: i64) {
        let token = self.registry.register(job_id);
        match &self.dispatch {
            Dispatch::Queue(tx) => {
                if let Err(e) = tx.send((job_id, token)) {
                    log::error!("Job queue closed, job {} stays pending", e.0 .0);
                    self.registry.remove(job_id);
                }
            }
            Dispatch::Detached => {
                let orchestrator = self.orchestrator.clone();
                let registry = self.registry.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("scrape-job-{}", job_id))
                    .spawn(move || {
                        match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                            Ok(rt) => rt.block_on(run_job(&orchestrator, &registry, job_id, token)),
                            Err(e) => {
                                log::error!("No runtime for job {}: {}", job_id, e);
                                registry.remove(job_id);
                            }
                        }
                    });
                if let Err(e) = spawned {
                    log::error!("Could not spawn thread for job {}: {}", job_id, e);
                    self.registry.remove(job_id);
                }
            }
        }
    }

    /// Ask a queued or running job to stop; false when it is not in flight
    pub fn cancel(&self, job_id: i64) -> bool {
        self.registry.cancel(job_id)
    }
}

/// Startup sweep: fail jobs a crash left `running`, re-dispatch `pending` ones.
/// Returns `(failed, requeued)`.
pub fn recover(db: &Db, queue: &JobQueue) -> Result<(usize, usize), ScrapeError> {
    let running = with_conn(db, |c| db::jobs_with_status(c, JobStatus::Running))?;
    for mut job in running.iter().cloned() {
        job.apply(
            JobEvent::Fail {
                message: INTERRUPTED_MESSAGE.to_string(),
            },
            Utc::now().timestamp(),
        )?;
        with_conn(db, |c| db::save_job(c, &job))?;
        log::warn!("Job {} was interrupted, marked failed", job.id);
    }

    let pending = with_conn(db, |c| db::jobs_with_status(c, JobStatus::Pending))?;
    for job in &pending {
        queue.submit(job.id);
    }
    if !running.is_empty() || !pending.is_empty() {
        log::info!(
            "Recovery: {} interrupted jobs failed, {} pending jobs requeued",
            running.len(),
            pending.len()
        );
    }
    Ok((running.len(), pending.len()))
}
