// src/config/install.rs

//! Materialize a validated playbook file as a run in a [`MemoryStore`].

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::config::model::{JobDefinition, PlaybookFile};
use crate::errors::{PlaybookError, Result};
use crate::model::{
    C2Job, ChainStep, Implant, JobRef, Playbook, ProxyJob, SocksServer, StepModifier,
};
use crate::store::MemoryStore;

/// Insert the playbook, its targets, steps, jobs and modifiers. Returns the
/// id of the new run.
pub fn install(file: &PlaybookFile, store: &MemoryStore) -> Result<Uuid> {
    install_with_id(file, store, Uuid::new_v4())
}

/// Like [`install`], under a caller-chosen run id. Re-installing the same
/// file under the same id lets a journal recorded earlier resume the run.
pub fn install_with_id(file: &PlaybookFile, store: &MemoryStore, run_id: Uuid) -> Result<Uuid> {
    let mut playbook = Playbook::new(file.name.clone(), file.steps.len());
    playbook.id = run_id;
    store.insert_playbook(playbook)?;

    let mut c2_servers: HashMap<&str, Uuid> = HashMap::new();
    let mut implants: HashMap<&str, Uuid> = HashMap::new();
    for (name, implant) in &file.implants {
        let server_id = *c2_servers
            .entry(implant.c2_server.as_str())
            .or_insert_with(Uuid::new_v4);
        let implant = Implant {
            id: Uuid::new_v4(),
            c2_server_id: server_id,
            hostname: implant.hostname.clone().unwrap_or_else(|| name.clone()),
        };
        implants.insert(name.as_str(), implant.id);
        store.insert_implant(implant)?;
    }

    let mut servers: HashMap<&str, Uuid> = HashMap::new();
    for (name, server) in &file.socks_servers {
        let server = SocksServer {
            id: Uuid::new_v4(),
            hostname: server.hostname.clone().unwrap_or_else(|| name.clone()),
            operating_system: server.operating_system,
        };
        servers.insert(name.as_str(), server.id);
        store.insert_socks_server(server)?;
    }

    for (index, def) in file.steps.iter().enumerate() {
        let mut step = ChainStep::new(run_id, def.label.clone());
        step.number = index as u32 + 1;
        step.depends_on = def.depends_on.clone();
        step.delay = def.delay;
        step.execute_after = def.execute_after;

        step.job = match &def.job {
            JobDefinition::C2 {
                implant,
                command,
                arguments,
            } => {
                let implant_id = *implants.get(implant.as_str()).ok_or_else(|| {
                    PlaybookError::ConfigError(format!("unknown implant '{implant}'"))
                })?;
                let mut job = C2Job::new(command.clone(), implant_id);
                job.arguments = arguments.clone();
                let id = job.id;
                store.insert_c2_job(job)?;
                JobRef::C2(id)
            }
            JobDefinition::Proxy {
                server,
                command,
                arguments,
            } => {
                let server_id = match server {
                    Some(name) => Some(*servers.get(name.as_str()).ok_or_else(|| {
                        PlaybookError::ConfigError(format!("unknown socks server '{name}'"))
                    })?),
                    None => None,
                };
                let mut job = ProxyJob::new(command.clone(), server_id);
                job.arguments = arguments.clone();
                let id = job.id;
                store.insert_proxy_job(job)?;
                JobRef::Proxy(id)
            }
            JobDefinition::None => JobRef::None,
        };

        step.modifiers = def
            .modifiers
            .iter()
            .map(|m| {
                let modifier = StepModifier::new(m.input.clone(), m.output_path.clone());
                match &m.regex {
                    Some(regex) => modifier.with_regex(regex.clone()),
                    None => modifier,
                }
            })
            .collect();

        debug!(%run_id, label = %step.label, number = step.number, "step installed");
        store.insert_step(step)?;
    }

    Ok(run_id)
}
