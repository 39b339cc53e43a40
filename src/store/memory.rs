// src/store/memory.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::PlaybookStore;
use crate::errors::{PlaybookError, Result};
use crate::model::{
    C2Job, ChainStep, Implant, JobRef, ModifierStatus, Playbook, ProxyJob, SocksServer, Status,
};

#[derive(Debug, Default)]
struct Inner {
    playbooks: HashMap<Uuid, Playbook>,
    steps: HashMap<Uuid, ChainStep>,
    c2_jobs: HashMap<Uuid, C2Job>,
    implants: HashMap<Uuid, Implant>,
    proxy_jobs: HashMap<Uuid, ProxyJob>,
    socks_servers: HashMap<Uuid, SocksServer>,
    outputs: HashMap<Uuid, String>,
    step_history: Vec<(Uuid, Status)>,
    run_history: Vec<(Uuid, Status, usize)>,
}

/// In-memory [`PlaybookStore`].
///
/// Cloning the store yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| PlaybookError::Store("memory store lock poisoned".to_string()))
    }

    pub fn insert_playbook(&self, playbook: Playbook) -> Result<()> {
        self.lock()?.playbooks.insert(playbook.id, playbook);
        Ok(())
    }

    pub fn insert_step(&self, step: ChainStep) -> Result<()> {
        self.lock()?.steps.insert(step.id, step);
        Ok(())
    }

    pub fn insert_c2_job(&self, job: C2Job) -> Result<()> {
        self.lock()?.c2_jobs.insert(job.id, job);
        Ok(())
    }

    pub fn insert_implant(&self, implant: Implant) -> Result<()> {
        self.lock()?.implants.insert(implant.id, implant);
        Ok(())
    }

    pub fn insert_proxy_job(&self, job: ProxyJob) -> Result<()> {
        self.lock()?.proxy_jobs.insert(job.id, job);
        Ok(())
    }

    pub fn insert_socks_server(&self, server: SocksServer) -> Result<()> {
        self.lock()?.socks_servers.insert(server.id, server);
        Ok(())
    }

    /// Ingest output for a task or job id, appending to what is there.
    pub fn append_output(&self, id: Uuid, text: &str) -> Result<()> {
        self.lock()?.outputs.entry(id).or_default().push_str(text);
        Ok(())
    }

    pub fn playbook(&self, run_id: Uuid) -> Option<Playbook> {
        self.lock().ok()?.playbooks.get(&run_id).cloned()
    }

    pub fn step_by_label(&self, run_id: Uuid, label: &str) -> Option<ChainStep> {
        self.lock()
            .ok()?
            .steps
            .values()
            .find(|s| s.playbook_id == run_id && s.label == label)
            .cloned()
    }

    pub fn c2_job(&self, job_id: Uuid) -> Option<C2Job> {
        self.lock().ok()?.c2_jobs.get(&job_id).cloned()
    }

    pub fn proxy_job(&self, job_id: Uuid) -> Option<ProxyJob> {
        self.lock().ok()?.proxy_jobs.get(&job_id).cloned()
    }

    /// Every status a step was moved to, oldest first.
    pub fn status_history(&self, step_id: Uuid) -> Vec<Status> {
        self.lock()
            .map(|inner| {
                inner
                    .step_history
                    .iter()
                    .filter(|(id, _)| *id == step_id)
                    .map(|(_, status)| *status)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every `(status, completed)` pair a run was moved to, oldest first.
    pub fn run_history(&self, run_id: Uuid) -> Vec<(Status, usize)> {
        self.lock()
            .map(|inner| {
                inner
                    .run_history
                    .iter()
                    .filter(|(id, _, _)| *id == run_id)
                    .map(|(_, status, completed)| (*status, *completed))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl PlaybookStore for MemoryStore {
    async fn get_playbook(&self, run_id: Uuid) -> Result<Option<Playbook>> {
        Ok(self.lock()?.playbooks.get(&run_id).cloned())
    }

    async fn get_steps(&self, run_id: Uuid) -> Result<Vec<ChainStep>> {
        let mut steps: Vec<ChainStep> = self
            .lock()?
            .steps
            .values()
            .filter(|s| s.playbook_id == run_id)
            .cloned()
            .collect();
        steps.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.label.cmp(&b.label)));
        Ok(steps)
    }

    async fn get_c2_job(&self, job_id: Uuid) -> Result<Option<C2Job>> {
        Ok(self.lock()?.c2_jobs.get(&job_id).cloned())
    }

    async fn get_implant(&self, implant_id: Uuid) -> Result<Option<Implant>> {
        Ok(self.lock()?.implants.get(&implant_id).cloned())
    }

    async fn get_proxy_job(&self, job_id: Uuid) -> Result<Option<ProxyJob>> {
        Ok(self.lock()?.proxy_jobs.get(&job_id).cloned())
    }

    async fn get_socks_server(&self, server_id: Uuid) -> Result<Option<SocksServer>> {
        Ok(self.lock()?.socks_servers.get(&server_id).cloned())
    }

    async fn update_c2_job(&self, job: &C2Job) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.c2_jobs.contains_key(&job.id) {
            return Err(PlaybookError::JobNotFound(job.id));
        }
        inner.c2_jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_proxy_job(&self, job: &ProxyJob) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.proxy_jobs.contains_key(&job.id) {
            return Err(PlaybookError::JobNotFound(job.id));
        }
        inner.proxy_jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn set_c2_task_id(&self, job_id: Uuid, task_id: Uuid) -> Result<()> {
        let mut inner = self.lock()?;
        let job = inner
            .c2_jobs
            .get_mut(&job_id)
            .ok_or(PlaybookError::JobNotFound(job_id))?;
        job.c2_task_id = Some(task_id);
        Ok(())
    }

    async fn get_output(&self, id: Uuid) -> Result<String> {
        Ok(self.lock()?.outputs.get(&id).cloned().unwrap_or_default())
    }

    async fn update_step_status(&self, step_id: Uuid, status: Status) -> Result<()> {
        let mut inner = self.lock()?;
        let step = inner
            .steps
            .get_mut(&step_id)
            .ok_or_else(|| PlaybookError::Store(format!("step {step_id} not found")))?;

        step.status = status;
        match status {
            Status::Starting => step.time_started = Some(Utc::now()),
            Status::Completed | Status::Error => step.time_completed = Some(Utc::now()),
            _ => {}
        }
        debug!(%step_id, %status, "step status updated");
        inner.step_history.push((step_id, status));
        Ok(())
    }

    async fn update_modifier_status(
        &self,
        modifier_id: Uuid,
        status: ModifierStatus,
        message: Option<String>,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        let modifier = inner
            .steps
            .values_mut()
            .flat_map(|s| s.modifiers.iter_mut())
            .find(|m| m.id == modifier_id)
            .ok_or_else(|| PlaybookError::Store(format!("modifier {modifier_id} not found")))?;
        modifier.status = status;
        modifier.status_message = message;
        Ok(())
    }

    async fn update_run_status(&self, run_id: Uuid, status: Status, completed: usize) -> Result<()> {
        let mut inner = self.lock()?;
        let playbook = inner
            .playbooks
            .get_mut(&run_id)
            .ok_or(PlaybookError::RunNotFound(run_id))?;
        playbook.status = status;
        playbook.completed = completed;
        playbook.time_updated = Some(Utc::now());
        inner.run_history.push((run_id, status, completed));
        Ok(())
    }

    async fn clone_run(&self, run_id: Uuid) -> Result<Uuid> {
        let mut inner = self.lock()?;
        let original = inner
            .playbooks
            .get(&run_id)
            .cloned()
            .ok_or(PlaybookError::RunNotFound(run_id))?;

        let playbook = Playbook::new(original.name.clone(), original.steps);
        let new_id = playbook.id;

        let steps: Vec<ChainStep> = inner
            .steps
            .values()
            .filter(|s| s.playbook_id == run_id)
            .cloned()
            .collect();

        for mut step in steps {
            step.id = Uuid::new_v4();
            step.playbook_id = new_id;
            step.status = Status::Created;
            step.time_started = None;
            step.time_completed = None;

            step.job = match step.job {
                JobRef::C2(job_id) => {
                    let mut job = inner
                        .c2_jobs
                        .get(&job_id)
                        .cloned()
                        .ok_or(PlaybookError::JobNotFound(job_id))?;
                    job.id = Uuid::new_v4();
                    job.c2_task_id = None;
                    job.status = Status::Created;
                    let id = job.id;
                    inner.c2_jobs.insert(id, job);
                    JobRef::C2(id)
                }
                JobRef::Proxy(job_id) => {
                    let mut job = inner
                        .proxy_jobs
                        .get(&job_id)
                        .cloned()
                        .ok_or(PlaybookError::JobNotFound(job_id))?;
                    job.id = Uuid::new_v4();
                    job.status = Status::Created;
                    let id = job.id;
                    inner.proxy_jobs.insert(id, job);
                    JobRef::Proxy(id)
                }
                JobRef::None => JobRef::None,
            };

            for modifier in step.modifiers.iter_mut() {
                modifier.id = Uuid::new_v4();
                modifier.status = ModifierStatus::Created;
                modifier.status_message = None;
            }

            inner.steps.insert(step.id, step);
        }

        inner.playbooks.insert(new_id, playbook);
        debug!(%run_id, clone = %new_id, "playbook cloned");
        Ok(new_id)
    }
}
