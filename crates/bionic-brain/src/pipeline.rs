//! Dispatch pipeline - the per-request state machine
//!
//! 1. capability prefix (`/name question`) jumps straight to escalation
//! 2. context preparation (fatal on failure)
//! 3. classify on the left brain (fatal on failure)
//! 4. schedule requests short-circuit
//! 5. tool search + orchestration on the right brain
//! 6. escalation decision
//! 7. consciousness escalation, by capability or dual brain
//! 8. fallback, which never answers empty
//!
//! Only context preparation, the first classify, timeout, and cancellation
//! surface as errors. Every later stage degrades.

use crate::consciousness::ConsciousnessManager;
use crate::context::ContextPreparer;
use crate::factory::{BackendFactory, OpenAiFactory};
use crate::fallback::{FallbackHandler, APOLOGY};
use crate::prompt;
use crate::response;
use crate::thinking::{ClassifyInput, Thinking, TurnContext};
use crate::tool_caller::ToolCaller;
use bionic_core::config::BrainConfig;
use bionic_core::{
    Capability, CapabilityResolver, Error, EventSink, JobScheduler, MemoryProvider,
    PreparedContext, Result, ScheduleAction, SkillRegistry, ThinkingEvent, ThinkingEventType,
    ThinkingResponse, ThinkingResult, TokenUsageRepository, ToolSchema,
};
use bionic_llm::{CancellationToken, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const TOOLS_FOUND_PROGRESS: f64 = 50.0;
const DUAL_TOOLS_FOUND_PROGRESS: f64 = 70.0;
const ESCALATION_PROGRESS: f64 = 60.0;

const NO_SCHEDULER_ANSWER: &str = "Sorry, scheduled tasks are not supported right now.";

/// External collaborators the brain dispatches to.
pub struct BrainDeps {
    pub skills: Arc<dyn SkillRegistry>,
    pub memory: Arc<dyn MemoryProvider>,
    pub capabilities: Arc<dyn CapabilityResolver>,
    pub scheduler: Option<Arc<dyn JobScheduler>>,
    pub usage_repo: Option<Arc<dyn TokenUsageRepository>>,
    pub factory: Arc<dyn BackendFactory>,
}

impl BrainDeps {
    pub fn new(
        skills: Arc<dyn SkillRegistry>,
        memory: Arc<dyn MemoryProvider>,
        capabilities: Arc<dyn CapabilityResolver>,
    ) -> Self {
        Self {
            skills,
            memory,
            capabilities,
            scheduler: None,
            usage_repo: None,
            factory: Arc::new(OpenAiFactory::new()),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn JobScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_usage_repository(mut self, repo: Arc<dyn TokenUsageRepository>) -> Self {
        self.usage_repo = Some(repo);
        self
    }

    pub fn with_factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = factory;
        self
    }
}

pub struct Brain {
    config: Arc<BrainConfig>,
    left: Arc<Thinking>,
    right: Arc<Thinking>,
    skills: Arc<dyn SkillRegistry>,
    capabilities: Arc<dyn CapabilityResolver>,
    scheduler: Option<Arc<dyn JobScheduler>>,
    preparer: ContextPreparer,
    tool_caller: Arc<ToolCaller>,
    consciousness: ConsciousnessManager,
    fallback: FallbackHandler,
}

impl Brain {
    pub fn new(config: BrainConfig, deps: BrainDeps) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let left_model = config.slot_model(&config.brain.subconscious_left);
        let right_model = config.slot_model(&config.brain.subconscious_right);
        let retry = RetryPolicy::from(&config.retry);

        let left = Arc::new(
            Thinking::new(
                "left",
                left_model.clone(),
                prompt::classifier_prompt(),
                deps.factory.client_for(&left_model)?,
                config.token_budget.clone(),
            )
            .with_retry(retry.clone())
            .with_usage_repository(deps.usage_repo.clone()),
        );
        let right = Arc::new(
            Thinking::new(
                "right",
                right_model.clone(),
                String::new(),
                deps.factory.client_for(&right_model)?,
                config.token_budget.clone(),
            )
            .with_retry(retry)
            .with_usage_repository(deps.usage_repo.clone()),
        );

        let tool_caller = Arc::new(ToolCaller::new(
            deps.skills.clone(),
            config.dispatch.max_tool_calls,
        ));
        let consciousness =
            ConsciousnessManager::new(config.clone(), deps.factory.clone(), deps.usage_repo);
        let fallback = FallbackHandler::new(right.clone(), tool_caller.clone());

        info!(
            left = %left_model.name,
            right = %right_model.name,
            persona = %config.persona.name,
            "brain initialised"
        );

        Ok(Self {
            left,
            right,
            skills: deps.skills,
            capabilities: deps.capabilities,
            scheduler: deps.scheduler,
            preparer: ContextPreparer::new(deps.memory),
            tool_caller,
            consciousness,
            fallback,
            config,
        })
    }

    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    pub fn left(&self) -> &Thinking {
        &self.left
    }

    pub fn right(&self) -> &Thinking {
        &self.right
    }

    pub fn consciousness(&self) -> &ConsciousnessManager {
        &self.consciousness
    }

    /// Answer one question. Never cancelled except by the request deadline.
    pub async fn post(&self, question: &str, events: EventSink) -> Result<ThinkingResponse> {
        self.post_cancellable(question, events, CancellationToken::new())
            .await
    }

    /// Answer one question, aborting in-flight backend calls when `cancel`
    /// fires or the request deadline passes.
    pub async fn post_cancellable(
        &self,
        question: &str,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Result<ThinkingResponse> {
        let timeout_secs = self.config.dispatch.request_timeout_secs;
        let request_cancel = cancel.child_token();
        let turn = TurnContext::new(events, request_cancel.clone());

        info!(session = %turn.session_id, "processing question: {}", question);

        let outcome =
            tokio::time::timeout(Duration::from_secs(timeout_secs), self.process(question, &turn))
                .await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                request_cancel.cancel();
                warn!("request exceeded its {}s deadline", timeout_secs);
                Err(Error::Timeout(timeout_secs))
            }
        };

        match result {
            Ok(mut resp) => {
                if resp.answer.trim().is_empty() {
                    resp.answer = APOLOGY.to_string();
                }
                turn.events.complete(resp.answer.clone());
                info!(tools = resp.tools.len(), "request answered");
                Ok(resp)
            }
            Err(e) => {
                turn.events.error(e.to_string());
                Err(e)
            }
        }
    }

    async fn process(&self, question: &str, turn: &TurnContext) -> Result<ThinkingResponse> {
        if let Some((capability, rest)) = parse_capability_prefix(question) {
            info!(capability, "capability prefix detected");
            return self.handle_with_capability(capability, rest, turn).await;
        }

        let prepared = self
            .preparer
            .prepare(question, self.left.max_history_rounds())
            .await?;
        let skill_keywords = self.skill_keywords().await;

        let result = self
            .left
            .classify(
                ClassifyInput::new(question)
                    .with_history(&prepared.history)
                    .with_references(&prepared.references)
                    .with_skill_keywords(&skill_keywords),
                turn,
            )
            .await?;

        if let Some(action) = result.schedule_action() {
            return Ok(self.handle_schedule(action, &result).await);
        }

        let mut searched_tools = Vec::new();
        if !result.useless || result.has_valid_intent() {
            let (answer, tools) = self
                .try_tools(
                    &self.right,
                    question,
                    &result,
                    &prepared.history,
                    TOOLS_FOUND_PROGRESS,
                    turn,
                )
                .await?;
            if !answer.trim().is_empty() {
                return Ok(response::from_tools(answer, &tools, result.send_to.clone()));
            }
            debug!("right brain produced no answer");
            searched_tools = tools;
        } else {
            debug!("useless input without intent, skipping tool search");
        }

        if !result.can_answer || !searched_tools.is_empty() {
            if !searched_tools.is_empty() {
                info!(
                    searched_tools = searched_tools.len(),
                    "tools were found but gave no answer, escalating"
                );
            }
            return self
                .escalate(question, &result, &prepared, &searched_tools, turn)
                .await;
        }

        if result.answer.trim().is_empty() {
            return self
                .fallback
                .handle(question, Some(&result), &prepared.history, &[], turn)
                .await;
        }
        Ok(response::from_thinking(&result))
    }

    async fn skill_keywords(&self) -> Vec<String> {
        match self.skills.keywords().await {
            Ok(keywords) => keywords,
            Err(e) => {
                warn!("failed to load skill keywords: {}", e);
                Vec::new()
            }
        }
    }

    async fn handle_schedule(
        &self,
        action: ScheduleAction,
        result: &ThinkingResult,
    ) -> ThinkingResponse {
        let send_to = result.send_to.clone();
        let Some(scheduler) = &self.scheduler else {
            warn!("schedule requested but no scheduler is configured");
            return response::scheduled(NO_SCHEDULER_ANSWER, None, send_to);
        };

        match action {
            ScheduleAction::Create(spec) => {
                info!(name = %spec.name, cron = %spec.cron, "creating scheduled task");
                match scheduler.add(&spec).await {
                    Ok(id) => {
                        info!(id = %id, "scheduled task created");
                        let answer = format!(
                            "OK, I've created the scheduled task \"{}\", which runs at {}.",
                            spec.name, spec.cron
                        );
                        response::scheduled(answer, Some(spec), send_to)
                    }
                    Err(e) => {
                        warn!("failed to create scheduled task: {}", e);
                        let answer = format!("Sorry, creating the scheduled task failed: {}", e);
                        response::scheduled(answer, None, send_to)
                    }
                }
            }
            ScheduleAction::Cancel(name) => {
                info!(name = %name, "cancelling scheduled task");
                let answer = match scheduler.remove(&name).await {
                    Ok(true) => format!("OK, I've cancelled the scheduled task \"{}\".", name),
                    Ok(false) => format!("There is no scheduled task named \"{}\".", name),
                    Err(e) => {
                        warn!("failed to cancel scheduled task: {}", e);
                        format!("Sorry, cancelling the scheduled task failed: {}", e)
                    }
                };
                response::scheduled(answer, None, send_to)
            }
        }
    }

    /// Search tools for the classified question and run them on `brain`.
    /// Returns the answer (empty when none) and the tools that were found.
    async fn try_tools(
        &self,
        brain: &Thinking,
        question: &str,
        result: &ThinkingResult,
        history: &[bionic_core::DialogueMessage],
        progress: f64,
        turn: &TurnContext,
    ) -> Result<(String, Vec<ToolSchema>)> {
        let mut search = vec![question.to_string()];
        if !result.intent.is_empty() {
            search.push(result.intent.clone());
        }
        search.extend(result.keywords.iter().cloned());

        let tools = match self.skills.search_tools(&search).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!("[{}] tool search failed: {}", brain.label(), e);
                return Ok((String::new(), Vec::new()));
            }
        };
        if tools.is_empty() {
            debug!("[{}] no matching tools", brain.label());
            return Ok((String::new(), tools));
        }

        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        info!(intent = %result.intent, tools = ?names, "[{}] matched tools", brain.label());
        turn.events.emit(
            ThinkingEvent::new(
                ThinkingEventType::Progress,
                format!("found {} tools", tools.len()),
            )
            .with_progress(progress)
            .with_metadata("tools", serde_json::json!(names)),
        );

        match self
            .tool_caller
            .run(brain, question, history, &tools, None, turn)
            .await
        {
            Ok(answer) => Ok((answer, tools)),
            Err(e) => {
                degrade(e, brain.label())?;
                Ok((String::new(), tools))
            }
        }
    }

    async fn escalate(
        &self,
        question: &str,
        result: &ThinkingResult,
        prepared: &PreparedContext,
        searched_tools: &[ToolSchema],
        turn: &TurnContext,
    ) -> Result<ThinkingResponse> {
        turn.events
            .progress("activating consciousness", ESCALATION_PROGRESS);

        let capability = if result.intent.is_empty() {
            None
        } else {
            match self.capabilities.resolve(&[result.intent.clone()]).await {
                Ok(Some(cap)) if cap.enabled => Some(cap),
                Ok(Some(cap)) => {
                    debug!(capability = %cap.name, "matched capability is disabled");
                    None
                }
                Ok(None) => None,
                Err(e) => {
                    warn!("capability lookup failed: {}", e);
                    None
                }
            }
        };

        match capability {
            Some(cap) => {
                info!(capability = %cap.name, "escalating to capability");
                self.run_capability(&cap, question, Some(result), prepared, searched_tools, turn)
                    .await
            }
            None => {
                info!(intent = %result.intent, "no capability matched, using dual brain");
                self.escalate_dual(question, result, prepared, searched_tools, turn)
                    .await
            }
        }
    }

    /// Escalate to a capability's consciousness, with its allow-listed tools
    /// plus whatever the right brain already found.
    async fn run_capability(
        &self,
        capability: &Capability,
        question: &str,
        classified: Option<&ThinkingResult>,
        prepared: &PreparedContext,
        searched_tools: &[ToolSchema],
        turn: &TurnContext,
    ) -> Result<ThinkingResponse> {
        let send_to = classified.and_then(|r| r.send_to.clone());

        let engine = match self.consciousness.ensure_created(capability) {
            Ok(engine) => engine,
            Err(e) => {
                degrade(e, "consciousness creation")?;
                return self
                    .fallback_for(question, classified, prepared, searched_tools, turn)
                    .await;
            }
        };

        let tools = merge_tools(self.capability_tools(capability).await, searched_tools);

        if !tools.is_empty() {
            info!(tools = tools.len(), "[{}] escalating with tools", engine.label());
            match self
                .tool_caller
                .run(
                    &engine,
                    question,
                    &prepared.history,
                    &tools,
                    Some(capability.system_prompt.as_str()),
                    turn,
                )
                .await
            {
                Ok(answer) if !answer.trim().is_empty() => {
                    return Ok(response::from_tools(answer, &tools, send_to));
                }
                Ok(_) => warn!("[{}] tool pass produced no answer", engine.label()),
                Err(e) => degrade(e, engine.label())?,
            }
            return self.fallback_for(question, classified, prepared, searched_tools, turn).await;
        }

        match self
            .consciousness
            .think(&capability.name, question, &prepared.history, &prepared.references, turn)
            .await
        {
            Ok(r) if !r.answer.trim().is_empty() => {
                Ok(response::from_tools(r.answer, &[], send_to))
            }
            Ok(_) => {
                warn!("[{}] produced no answer", engine.label());
                self.fallback_for(question, classified, prepared, searched_tools, turn).await
            }
            Err(e) => {
                degrade(e, engine.label())?;
                self.fallback_for(question, classified, prepared, searched_tools, turn).await
            }
        }
    }

    async fn escalate_dual(
        &self,
        question: &str,
        result: &ThinkingResult,
        prepared: &PreparedContext,
        searched_tools: &[ToolSchema],
        turn: &TurnContext,
    ) -> Result<ThinkingResponse> {
        let dual = match self.consciousness.ensure_dual_brain_created().await {
            Ok(dual) => dual,
            Err(e) => {
                degrade(e, "dual brain creation")?;
                return self
                    .fallback_for(question, Some(result), prepared, searched_tools, turn)
                    .await;
            }
        };

        let skill_keywords = self.skill_keywords().await;
        let deep = match dual
            .left
            .classify(
                ClassifyInput::new(question)
                    .with_history(&prepared.history)
                    .with_references(&prepared.references)
                    .with_skill_keywords(&skill_keywords),
                turn,
            )
            .await
        {
            Ok(deep) => deep,
            Err(e) => {
                degrade(e, dual.left.label())?;
                return self
                    .fallback_for(question, Some(result), prepared, searched_tools, turn)
                    .await;
            }
        };

        if !deep.answer.trim().is_empty() {
            return Ok(response::from_thinking(&deep));
        }
        if deep.useless || !deep.has_valid_intent() {
            debug!("dual brain gave no answer and no usable intent");
            return self.fallback_for(question, Some(result), prepared, searched_tools, turn).await;
        }

        let (answer, tools) = self
            .try_tools(
                &dual.right,
                question,
                &deep,
                &prepared.history,
                DUAL_TOOLS_FOUND_PROGRESS,
                turn,
            )
            .await?;
        if !answer.trim().is_empty() {
            return Ok(response::from_tools(answer, &tools, deep.send_to.clone()));
        }
        self.fallback_for(question, Some(result), prepared, searched_tools, turn).await
    }

    /// State 1: `/name question` escalates straight to the named capability.
    async fn handle_with_capability(
        &self,
        name: &str,
        question: &str,
        turn: &TurnContext,
    ) -> Result<ThinkingResponse> {
        let prepared = self
            .preparer
            .prepare(question, self.left.max_history_rounds())
            .await?;

        let capability = match self.capabilities.resolve(&[name.to_string()]).await {
            Ok(Some(cap)) => cap,
            Ok(None) => {
                warn!(capability = name, "requested capability does not exist");
                return Ok(response::plain(format!(
                    "Sorry, capability '{}' does not exist.",
                    name
                )));
            }
            Err(e) => {
                warn!(capability = name, "failed to load capability: {}", e);
                return Ok(response::plain(format!(
                    "Sorry, something went wrong loading capability '{}'.",
                    name
                )));
            }
        };
        if !capability.enabled {
            warn!(capability = name, "requested capability is disabled");
            return Ok(response::plain(format!(
                "Sorry, capability '{}' is disabled.",
                name
            )));
        }

        info!(capability = %capability.name, "using requested capability");
        self.run_capability(&capability, question, None, &prepared, &[], turn)
            .await
    }

    async fn capability_tools(&self, capability: &Capability) -> Vec<ToolSchema> {
        if capability.tools.is_empty() {
            return Vec::new();
        }
        match self.skills.search_tools(&capability.tools).await {
            Ok(tools) => {
                debug!(
                    capability = %capability.name,
                    tools = tools.len(),
                    "loaded capability tools"
                );
                tools
            }
            Err(e) => {
                warn!(capability = %capability.name, "failed to load capability tools: {}", e);
                Vec::new()
            }
        }
    }

    async fn fallback_for(
        &self,
        question: &str,
        classified: Option<&ThinkingResult>,
        prepared: &PreparedContext,
        searched_tools: &[ToolSchema],
        turn: &TurnContext,
    ) -> Result<ThinkingResponse> {
        self.fallback
            .handle(question, classified, &prepared.history, searched_tools, turn)
            .await
    }
}

/// Pass timeout and cancellation through; log anything else so the caller
/// can degrade.
fn degrade(e: Error, stage: &str) -> Result<()> {
    if e.is_interrupt() {
        return Err(e);
    }
    warn!("[{}] failed, degrading: {}", stage, e);
    Ok(())
}

/// `/name rest` splits at the first space; a bare `/name` asks an empty question.
pub fn parse_capability_prefix(question: &str) -> Option<(&str, &str)> {
    let rest = question.strip_prefix('/')?;
    let (name, question) = rest.split_once(' ').unwrap_or((rest, ""));
    if name.is_empty() {
        return None;
    }
    Some((name, question))
}

/// Union by name, keeping the first definition seen.
pub fn merge_tools(primary: Vec<ToolSchema>, extra: &[ToolSchema]) -> Vec<ToolSchema> {
    let mut merged = primary;
    for tool in extra {
        if !merged.iter().any(|t| t.name == tool.name) {
            merged.push(tool.clone());
        }
    }
    merged
}
