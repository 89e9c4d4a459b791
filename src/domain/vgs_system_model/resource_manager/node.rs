use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::simulator::simulator::SharedSimulator;
use crate::domain::vgs_system_model::model::job::Job;
use crate::domain::vgs_system_model::resource_manager::rm_message::RmMessage;
use crate::domain::vgs_system_model::utils::id::{NodeId, RmId};

/// One execution slot of a resource manager. Never migrates to another RM.
#[derive(Debug)]
pub struct Node {
    pub node_id: NodeId,
    pub owner: RmId,
    current_job: Option<Job>,
    timer: Option<JoinHandle<()>>,
}

impl Node {
    pub fn new(node_id: NodeId, owner: RmId) -> Self {
        Node { node_id, owner, current_job: None, timer: None }
    }

    pub fn current_job(&self) -> Option<&Job> {
        self.current_job.as_ref()
    }

    /// Binds `job` to this node and starts its timer. When `job.duration` time units have passed
    /// the node reports back to its RM through `mailbox`, tagged with `generation`.
    pub(crate) fn handle(&mut self, job: Job, generation: u64, simulator: &SharedSimulator, mailbox: mpsc::WeakUnboundedSender<RmMessage>) {
        self.current_job = Some(job);

        let node_id = self.node_id;
        let delay = simulator.to_duration(job.duration);

        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // The RM is gone if the upgrade fails; nothing left to report to.
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(RmMessage::Finish { node_id, job, generation: Some(generation), reply_to: None });
            }
        }));
    }

    /// Clears the job and drops its timer.
    pub(crate) fn set_idle(&mut self) -> Option<Job> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.current_job.take()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id && self.owner == other.owner
    }
}

impl Eq for Node {}
