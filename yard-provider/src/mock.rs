//! In-memory driver for tests.
//!
//! Records every call, can fail the next call of a given kind, and can hold a
//! kind of call open until released so tests can observe work in flight.

use crate::{
    CloneSource, ContainerDriver, ContainerHandle, ContainerSpec, ProviderError, Result,
    TemplateDriver, TemplateHost,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use yard_core::render_dotenv;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Create,
    Start,
    Stop,
    Restart,
    Destroy,
    ReadEnv,
    WriteEnv,
    CloneSource,
    RunStep,
    ConfigureAgent,
    Convert,
    DestroyHost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub op: MockOp,
    pub target: String,
}

#[derive(Debug, Clone, Default)]
pub struct MockContainer {
    pub running: bool,
    pub env: String,
    pub ip: String,
}

#[derive(Debug, Clone, Default)]
pub struct MockHost {
    pub steps: Vec<String>,
    pub agent_configured: bool,
    pub converted: bool,
}

#[derive(Default)]
struct MockState {
    next_id: u32,
    containers: HashMap<String, MockContainer>,
    hosts: HashMap<u32, MockHost>,
    failures: HashMap<MockOp, VecDeque<String>>,
    panics: HashSet<MockOp>,
    holds: HashMap<MockOp, watch::Receiver<bool>>,
    releases: HashMap<MockOp, watch::Sender<bool>>,
    calls: Vec<MockCall>,
}

#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next call of `op` with `message`.
    pub fn fail_next(&self, op: MockOp, message: &str) {
        self.lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(message.to_string());
    }

    /// Panic inside the next call of `op`, the way a driver bug would.
    pub fn panic_next(&self, op: MockOp) {
        self.lock().panics.insert(op);
    }

    /// Block every call of `op` until [`MockDriver::release`] is called.
    pub fn hold(&self, op: MockOp) {
        let (tx, rx) = watch::channel(false);
        let mut state = self.lock();
        state.holds.insert(op, rx);
        state.releases.insert(op, tx);
    }

    pub fn release(&self, op: MockOp) {
        let mut state = self.lock();
        state.holds.remove(&op);
        if let Some(tx) = state.releases.remove(&op) {
            let _ = tx.send(true);
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn calls_of(&self, op: MockOp) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.target.clone())
            .collect()
    }

    pub fn container(&self, container_id: &str) -> Option<MockContainer> {
        self.lock().containers.get(container_id).cloned()
    }

    pub fn host(&self, vmid: u32) -> Option<MockHost> {
        self.lock().hosts.get(&vmid).cloned()
    }

    /// Simulate someone editing the `.env` inside the container.
    pub fn set_env(&self, container_id: &str, contents: &str) {
        if let Some(container) = self.lock().containers.get_mut(container_id) {
            container.env = contents.to_string();
        }
    }

    async fn enter(&self, op: MockOp, target: &str) -> Result<()> {
        let hold = {
            let mut state = self.lock();
            state.calls.push(MockCall {
                op,
                target: target.to_string(),
            });
            state.holds.get(&op).cloned()
        };

        if let Some(mut rx) = hold {
            let _ = rx.wait_for(|released| *released).await;
        }

        let (failure, panics) = {
            let mut state = self.lock();
            let failure = state.failures.get_mut(&op).and_then(|queue| queue.pop_front());
            (failure, state.panics.remove(&op))
        };
        if panics {
            panic!("mock {op:?} on {target} panicked");
        }
        match failure {
            Some(message) => Err(ProviderError::command(format!("{op:?}"), message)),
            None => Ok(()),
        }
    }

    fn with_container<T>(
        &self,
        container_id: &str,
        f: impl FnOnce(&mut MockContainer) -> T,
    ) -> Result<T> {
        let mut state = self.lock();
        state
            .containers
            .get_mut(container_id)
            .map(f)
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))
    }

    fn with_host<T>(&self, host: &TemplateHost, f: impl FnOnce(&mut MockHost) -> T) -> Result<T> {
        let mut state = self.lock();
        state
            .hosts
            .get_mut(&host.vmid)
            .map(f)
            .ok_or_else(|| ProviderError::NotFound(format!("vmid {}", host.vmid)))
    }
}

#[async_trait]
impl ContainerDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        self.enter(MockOp::Create, &spec.workspace_id).await?;
        let mut state = self.lock();
        state.next_id += 1;
        let n = state.next_id;
        let container_id = format!("ct-{n}");
        let ip = format!("10.0.0.{n}");
        state.containers.insert(
            container_id.clone(),
            MockContainer {
                running: true,
                env: render_dotenv(&spec.env),
                ip: ip.clone(),
            },
        );
        Ok(ContainerHandle {
            container_id,
            ip: Some(ip),
        })
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.enter(MockOp::Start, container_id).await?;
        self.with_container(container_id, |c| c.running = true)
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        self.enter(MockOp::Stop, container_id).await?;
        self.with_container(container_id, |c| c.running = false)
    }

    async fn restart(&self, container_id: &str) -> Result<()> {
        self.enter(MockOp::Restart, container_id).await?;
        self.with_container(container_id, |c| c.running = true)
    }

    async fn destroy(&self, container_id: &str) -> Result<()> {
        self.enter(MockOp::Destroy, container_id).await?;
        self.lock()
            .containers
            .remove(container_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))
    }

    async fn read_env(&self, container_id: &str) -> Result<String> {
        self.enter(MockOp::ReadEnv, container_id).await?;
        self.with_container(container_id, |c| c.env.clone())
    }

    async fn write_env(&self, container_id: &str, contents: &str) -> Result<()> {
        self.enter(MockOp::WriteEnv, container_id).await?;
        self.with_container(container_id, |c| c.env = contents.to_string())
    }
}

#[async_trait]
impl TemplateDriver for MockDriver {
    async fn clone_source(&self, template_id: &str, source: &CloneSource) -> Result<TemplateHost> {
        self.enter(MockOp::CloneSource, template_id).await?;
        let mut state = self.lock();
        if let CloneSource::Template(parent) = source {
            if !state.hosts.get(&parent.vmid).is_some_and(|h| h.converted) {
                return Err(ProviderError::NotFound(format!(
                    "template vmid {}",
                    parent.vmid
                )));
            }
        }
        state.next_id += 1;
        let vmid = 9000 + state.next_id;
        state.hosts.insert(vmid, MockHost::default());
        Ok(TemplateHost {
            vmid,
            node: "mock-node".to_string(),
        })
    }

    async fn run_step(&self, host: &TemplateHost, command: &str) -> Result<()> {
        self.enter(MockOp::RunStep, command).await?;
        self.with_host(host, |h| h.steps.push(command.to_string()))
    }

    async fn configure_agent(&self, host: &TemplateHost) -> Result<()> {
        self.enter(MockOp::ConfigureAgent, &host.vmid.to_string())
            .await?;
        self.with_host(host, |h| h.agent_configured = true)
    }

    async fn convert_to_template(&self, host: &TemplateHost) -> Result<()> {
        self.enter(MockOp::Convert, &host.vmid.to_string()).await?;
        self.with_host(host, |h| h.converted = true)
    }

    async fn destroy_host(&self, host: &TemplateHost) -> Result<()> {
        self.enter(MockOp::DestroyHost, &host.vmid.to_string())
            .await?;
        self.lock()
            .hosts
            .remove(&host.vmid)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(format!("vmid {}", host.vmid)))
    }
}
