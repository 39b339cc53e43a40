// src/store/mod.rs

//! Persistence contract used by the scheduler.
//!
//! The scheduler only talks to a [`PlaybookStore`]. [`memory::MemoryStore`]
//! is the implementation used by the CLI and by tests; a database-backed
//! store implements the same trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::model::{
    C2Job, ChainStep, Implant, ModifierStatus, Playbook, ProxyJob, SocksServer, Status,
};

pub mod memory;

pub use memory::MemoryStore;

#[async_trait]
pub trait PlaybookStore: Send + Sync {
    async fn get_playbook(&self, run_id: Uuid) -> Result<Option<Playbook>>;

    /// Steps of a run in declaration order.
    async fn get_steps(&self, run_id: Uuid) -> Result<Vec<ChainStep>>;

    async fn get_c2_job(&self, job_id: Uuid) -> Result<Option<C2Job>>;

    async fn get_implant(&self, implant_id: Uuid) -> Result<Option<Implant>>;

    async fn get_proxy_job(&self, job_id: Uuid) -> Result<Option<ProxyJob>>;

    async fn get_socks_server(&self, server_id: Uuid) -> Result<Option<SocksServer>>;

    async fn update_c2_job(&self, job: &C2Job) -> Result<()>;

    async fn update_proxy_job(&self, job: &ProxyJob) -> Result<()>;

    /// Link a C2 job to the task its submission created.
    async fn set_c2_task_id(&self, job_id: Uuid, task_id: Uuid) -> Result<()>;

    /// Textual output ingested for a task/job id so far (may be empty).
    async fn get_output(&self, id: Uuid) -> Result<String>;

    async fn update_step_status(&self, step_id: Uuid, status: Status) -> Result<()>;

    async fn update_modifier_status(
        &self,
        modifier_id: Uuid,
        status: ModifierStatus,
        message: Option<String>,
    ) -> Result<()>;

    async fn update_run_status(&self, run_id: Uuid, status: Status, completed: usize) -> Result<()>;

    /// Copy a run (steps, jobs, modifiers) into a fresh `created` run.
    async fn clone_run(&self, run_id: Uuid) -> Result<Uuid>;
}
