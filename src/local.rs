//! In-process collaborators for running the brain from a terminal
//!
//! History lives in memory for the lifetime of the process, capabilities come
//! from the config file, and no skills are installed.

use bionic_brain::{BackendFactory, Brain, BrainDeps, OpenAiFactory};
use bionic_core::config::BrainConfig;
use bionic_core::{
    Capability, CapabilityResolver, DialogueMessage, Error, EventSink, JobScheduler,
    MemoryProvider, Result, ScheduleSpec, SkillRegistry, ThinkingResponse, ToolSchema,
};
use bionic_llm::CancellationToken;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const HISTORY_CAPACITY: usize = 64;

/// Resolves capabilities declared in the config, by name or title.
pub struct StaticCapabilities {
    capabilities: Vec<Capability>,
}

impl StaticCapabilities {
    pub fn new(capabilities: Vec<Capability>) -> Self {
        Self { capabilities }
    }
}

#[async_trait::async_trait]
impl CapabilityResolver for StaticCapabilities {
    async fn resolve(&self, keywords: &[String]) -> Result<Option<Capability>> {
        let found = keywords.iter().find_map(|k| {
            self.capabilities.iter().find(|c| {
                c.name.eq_ignore_ascii_case(k) || (!c.title.is_empty() && c.title.eq_ignore_ascii_case(k))
            })
        });
        Ok(found.cloned())
    }
}

/// Conversation rounds kept in memory, oldest dropped past `capacity`.
pub struct InMemoryHistory {
    rounds: Mutex<VecDeque<(String, String)>>,
    capacity: usize,
}

impl InMemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            rounds: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, question: &str, answer: &str) {
        let mut rounds = self.rounds.lock().await;
        rounds.push_back((question.to_string(), answer.to_string()));
        while rounds.len() > self.capacity {
            rounds.pop_front();
        }
    }

    pub async fn rounds(&self) -> usize {
        self.rounds.lock().await.len()
    }

    pub async fn clear(&self) {
        self.rounds.lock().await.clear();
    }
}

#[async_trait::async_trait]
impl MemoryProvider for InMemoryHistory {
    async fn references(&self, _question: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn history(&self, max_rounds: usize) -> Result<Vec<DialogueMessage>> {
        let rounds = self.rounds.lock().await;
        let skip = rounds.len().saturating_sub(max_rounds);
        Ok(rounds
            .iter()
            .skip(skip)
            .flat_map(|(q, a)| [DialogueMessage::user(q.as_str()), DialogueMessage::assistant(a.as_str())])
            .collect())
    }
}

/// Empty skill catalog.
pub struct NoSkills;

#[async_trait::async_trait]
impl SkillRegistry for NoSkills {
    async fn search_tools(&self, _keywords: &[String]) -> Result<Vec<ToolSchema>> {
        Ok(Vec::new())
    }

    async fn execute(&self, name: &str, _arguments: &Map<String, Value>) -> Result<String> {
        Err(Error::skill(name, "no skills are installed"))
    }
}

/// Keeps schedules for inspection. Nothing fires them.
#[derive(Default)]
pub struct InMemoryScheduler {
    jobs: Mutex<Vec<ScheduleSpec>>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn jobs(&self) -> Vec<ScheduleSpec> {
        self.jobs.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl JobScheduler for InMemoryScheduler {
    async fn add(&self, job: &ScheduleSpec) -> Result<String> {
        if job.name.is_empty() || job.cron.is_empty() {
            return Err(Error::collaborator("scheduler", "a schedule needs a name and a cron expression"));
        }
        let mut jobs = self.jobs.lock().await;
        jobs.retain(|j| j.name != job.name);
        jobs.push(job.clone());
        info!(name = %job.name, cron = %job.cron, "schedule stored");
        Ok(format!("local-{}", job.name))
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|j| j.name != name);
        Ok(jobs.len() != before)
    }
}

/// A brain wired to the in-process collaborators.
pub struct LocalBrain {
    brain: Brain,
    history: Arc<InMemoryHistory>,
    scheduler: Arc<InMemoryScheduler>,
}

impl LocalBrain {
    pub fn new(config: BrainConfig) -> Result<Self> {
        Self::with_factory(config, Arc::new(OpenAiFactory::new()))
    }

    pub fn with_factory(config: BrainConfig, factory: Arc<dyn BackendFactory>) -> Result<Self> {
        let history = Arc::new(InMemoryHistory::new(HISTORY_CAPACITY));
        let scheduler = Arc::new(InMemoryScheduler::new());
        let capabilities = Arc::new(StaticCapabilities::new(config.capabilities.clone()));

        let deps = BrainDeps::new(Arc::new(NoSkills), history.clone(), capabilities)
            .with_scheduler(scheduler.clone())
            .with_factory(factory);

        Ok(Self {
            brain: Brain::new(config, deps)?,
            history,
            scheduler,
        })
    }

    pub fn brain(&self) -> &Brain {
        &self.brain
    }

    pub fn history(&self) -> &InMemoryHistory {
        &self.history
    }

    pub fn scheduler(&self) -> &InMemoryScheduler {
        &self.scheduler
    }

    /// Answer and remember the exchange.
    pub async fn ask(
        &self,
        question: &str,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Result<ThinkingResponse> {
        let response = self.brain.post_cancellable(question, events, cancel).await?;
        self.history.record(question, &response.answer).await;
        debug!(rounds = self.history.rounds().await, "exchange recorded");
        Ok(response)
    }
}
