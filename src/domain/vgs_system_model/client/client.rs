use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

use crate::domain::vgs_system_model::discovery::registry::GsRegistry;
use crate::domain::vgs_system_model::discovery::selector::Selector;
use crate::domain::vgs_system_model::model::job::Job;
use crate::domain::vgs_system_model::utils::id::{ClientId, GsId, RmId};
use crate::error::{Error, Result};

/// The endpoint a resource manager delivers finished jobs to.
#[async_trait]
pub trait JobResultHandler: Send + Sync {
    async fn accept_result(&self, job: Job) -> Result<()>;
}

/// Collects every delivered result so callers can wait for and inspect them.
#[derive(Debug, Default)]
pub struct ResultCollector {
    results: Mutex<Vec<Job>>,
    notify: Notify,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<Job> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until at least `count` results arrived. Returns `false` on timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait]
impl JobResultHandler for ResultCollector {
    async fn accept_result(&self, job: Job) -> Result<()> {
        log::info!("[Client] Received result of job {} from RM {:?}", job.job_id, job.current_resource_manager_id);
        self.results.lock().unwrap_or_else(PoisonError::into_inner).push(job);
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Submits jobs to a grid scheduler picked by weighted selection over their reported loads.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    gs_registry: GsRegistry,
    selector: Selector,
}

impl Client {
    pub fn new(id: ClientId, gs_registry: GsRegistry, selector: Selector) -> Self {
        Self { id, gs_registry, selector }
    }

    /// Hands the job to a GS, which places it on an RM. Returns both choices.
    pub async fn submit(&self, job: Job) -> Result<(GsId, RmId)> {
        let placed = self
            .gs_registry
            .select_and_invoke(
                |gs, gs_id| async move {
                    let rm_id = gs.off_load(job).await?;
                    Ok((gs_id, rm_id))
                },
                self.selector,
                &[],
            )
            .await;

        match placed {
            Some((gs_id, rm_id)) => {
                log::info!("[Client {}] Job {} accepted by GS {} and placed on RM {}", self.id, job.job_id, gs_id, rm_id);
                Ok((gs_id, rm_id))
            }
            None => {
                log::error!("[Client {}] No grid scheduler accepted job {}", self.id, job.job_id);
                Err(Error::NoCapacityAvailable(format!("no grid scheduler accepted job {}", job.job_id)))
            }
        }
    }
}
