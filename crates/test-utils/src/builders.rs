#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use harbinger::model::{
    C2Job, ChainStep, Implant, JobRef, OsFlavor, Playbook, ProxyJob, SocksServer, Status,
    StepModifier,
};
use harbinger::store::{MemoryStore, PlaybookStore};
use serde_json::Value;
use uuid::Uuid;

/// Which job a [`StepBuilder`] creates.
#[derive(Debug, Clone)]
enum JobKind {
    C2,
    Proxy(Option<OsFlavor>),
    None,
    /// The step points at a job that was never stored.
    Missing,
    /// A C2 job whose implant was never stored.
    OrphanC2,
}

/// Builder for one `ChainStep` and the job it wraps.
///
/// The job command defaults to the step label, which is what
/// [`crate::FakeDispatcher`] scripts are keyed by.
#[derive(Debug, Clone)]
pub struct StepBuilder {
    label: String,
    depends_on: String,
    delay: Option<Duration>,
    execute_after: Option<DateTime<Utc>>,
    kind: JobKind,
    command: Option<String>,
    arguments: Value,
    modifiers: Vec<StepModifier>,
}

impl StepBuilder {
    fn new(label: &str, kind: JobKind) -> Self {
        Self {
            label: label.to_string(),
            depends_on: String::new(),
            delay: None,
            execute_after: None,
            kind,
            command: None,
            arguments: Value::Object(Default::default()),
            modifiers: Vec::new(),
        }
    }

    /// Step backed by a C2 job on the fixture's implant.
    pub fn c2(label: &str) -> Self {
        Self::new(label, JobKind::C2)
    }

    /// Step backed by a proxy job without an explicit server.
    pub fn proxy(label: &str) -> Self {
        Self::new(label, JobKind::Proxy(None))
    }

    /// Step backed by a proxy job on a server of the given flavour.
    pub fn proxy_on(label: &str, os: OsFlavor) -> Self {
        Self::new(label, JobKind::Proxy(Some(os)))
    }

    /// Structural-only step.
    pub fn noop(label: &str) -> Self {
        Self::new(label, JobKind::None)
    }

    /// Step whose job reference does not resolve.
    pub fn missing_job(label: &str) -> Self {
        Self::new(label, JobKind::Missing)
    }

    /// C2 step whose implant does not resolve.
    pub fn missing_implant(label: &str) -> Self {
        Self::new(label, JobKind::OrphanC2)
    }

    pub fn depends_on(mut self, deps: &str) -> Self {
        self.depends_on = deps.to_string();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn execute_after(mut self, at: DateTime<Utc>) -> Self {
        self.execute_after = Some(at);
        self
    }

    pub fn command(mut self, command: &str) -> Self {
        self.command = Some(command.to_string());
        self
    }

    pub fn arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn modifier(mut self, input: &str, output_path: &str) -> Self {
        self.modifiers.push(StepModifier::new(input, output_path));
        self
    }

    pub fn modifier_regex(mut self, input: &str, output_path: &str, regex: &str) -> Self {
        self.modifiers
            .push(StepModifier::new(input, output_path).with_regex(regex));
        self
    }
}

/// Builder for a run stored in a fresh `MemoryStore`.
#[derive(Debug, Clone)]
pub struct PlaybookBuilder {
    name: String,
    steps: Vec<StepBuilder>,
}

impl PlaybookBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: StepBuilder) -> Self {
        self.steps.push(step);
        self
    }

    pub fn build(self) -> PlaybookFixture {
        let store = MemoryStore::new();
        let playbook = Playbook::new(self.name, self.steps.len());
        let run_id = playbook.id;
        store.insert_playbook(playbook).expect("insert playbook");

        let implant = Implant {
            id: Uuid::new_v4(),
            c2_server_id: Uuid::new_v4(),
            hostname: "implant".to_string(),
        };
        store.insert_implant(implant.clone()).expect("insert implant");

        let linux = SocksServer {
            id: Uuid::new_v4(),
            hostname: "socks-linux".to_string(),
            operating_system: OsFlavor::Linux,
        };
        let windows = SocksServer {
            id: Uuid::new_v4(),
            hostname: "socks-windows".to_string(),
            operating_system: OsFlavor::Windows,
        };
        store.insert_socks_server(linux.clone()).expect("insert server");
        store.insert_socks_server(windows.clone()).expect("insert server");

        for (index, builder) in self.steps.into_iter().enumerate() {
            let mut step = ChainStep::new(run_id, builder.label.clone());
            step.number = index as u32 + 1;
            step.depends_on = builder.depends_on;
            step.delay = builder.delay;
            step.execute_after = builder.execute_after;
            step.modifiers = builder.modifiers;

            let command = builder.command.unwrap_or_else(|| builder.label.clone());
            step.job = match builder.kind {
                JobKind::C2 | JobKind::OrphanC2 => {
                    let implant_id = match builder.kind {
                        JobKind::C2 => implant.id,
                        _ => Uuid::new_v4(),
                    };
                    let mut job = C2Job::new(command, implant_id);
                    job.arguments = builder.arguments;
                    let id = job.id;
                    store.insert_c2_job(job).expect("insert c2 job");
                    JobRef::C2(id)
                }
                JobKind::Proxy(os) => {
                    let server_id = os.map(|os| match os {
                        OsFlavor::Linux => linux.id,
                        OsFlavor::Windows => windows.id,
                    });
                    let mut job = ProxyJob::new(command, server_id);
                    job.arguments = builder.arguments;
                    let id = job.id;
                    store.insert_proxy_job(job).expect("insert proxy job");
                    JobRef::Proxy(id)
                }
                JobKind::None => JobRef::None,
                JobKind::Missing => JobRef::C2(Uuid::new_v4()),
            };

            store.insert_step(step).expect("insert step");
        }

        PlaybookFixture {
            store,
            run_id,
            implant,
        }
    }
}

/// A run installed in a `MemoryStore`, with lookups by label.
#[derive(Debug, Clone)]
pub struct PlaybookFixture {
    pub store: MemoryStore,
    pub run_id: Uuid,
    pub implant: Implant,
}

impl PlaybookFixture {
    pub fn shared_store(&self) -> Arc<dyn PlaybookStore> {
        Arc::new(self.store.clone())
    }

    pub fn playbook(&self) -> Playbook {
        self.store.playbook(self.run_id).expect("playbook exists")
    }

    pub fn step(&self, label: &str) -> ChainStep {
        self.store
            .step_by_label(self.run_id, label)
            .unwrap_or_else(|| panic!("no step labelled {label}"))
    }

    pub fn status(&self, label: &str) -> Status {
        self.step(label).status
    }

    pub fn status_history(&self, label: &str) -> Vec<Status> {
        self.store.status_history(self.step(label).id)
    }

    pub fn c2_job(&self, label: &str) -> C2Job {
        match self.step(label).job {
            JobRef::C2(id) => self.store.c2_job(id).expect("c2 job exists"),
            other => panic!("step {label} wraps {other:?}, not a c2 job"),
        }
    }

    pub fn proxy_job(&self, label: &str) -> ProxyJob {
        match self.step(label).job {
            JobRef::Proxy(id) => self.store.proxy_job(id).expect("proxy job exists"),
            other => panic!("step {label} wraps {other:?}, not a proxy job"),
        }
    }
}
