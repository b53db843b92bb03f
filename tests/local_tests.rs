//! Integration tests: in-process collaborators and the local brain wiring.

use bionic::local::*;
use bionic_brain::BackendFactory;
use bionic_core::config::{BrainConfig, ModelConfig};
use bionic_core::{
    Capability, CapabilityResolver, EventSink, JobScheduler, MemoryProvider, Role, ScheduleSpec,
    SkillRegistry, TokenUsage,
};
use bionic_llm::{
    CancellationToken, ChatRequest, ChatResponse, GenerationClient, LlmResult, LlmStream,
    StreamDelta,
};
use serde_json::{json, Map};
use std::sync::{Arc, Mutex};

fn capability(name: &str, title: &str) -> Capability {
    Capability {
        name: name.to_string(),
        title: title.to_string(),
        description: String::new(),
        model: "local".into(),
        system_prompt: String::new(),
        tools: Vec::new(),
        enabled: true,
    }
}

// ===========================================================================
// StaticCapabilities
// ===========================================================================

#[tokio::test]
async fn static_capabilities_match_name_or_title() {
    let resolver = StaticCapabilities::new(vec![
        capability("coder", "Programming"),
        capability("poet", ""),
    ]);

    let by_name = resolver.resolve(&["CODER".into()]).await.unwrap();
    assert_eq!(by_name.map(|c| c.name), Some("coder".to_string()));

    let by_title = resolver.resolve(&["programming".into()]).await.unwrap();
    assert_eq!(by_title.map(|c| c.name), Some("coder".to_string()));

    let missing = resolver.resolve(&["chef".into()]).await.unwrap();
    assert!(missing.is_none());

    let empty_title = resolver.resolve(&[String::new()]).await.unwrap();
    assert!(empty_title.is_none());
}

// ===========================================================================
// InMemoryHistory
// ===========================================================================

#[tokio::test]
async fn history_returns_most_recent_rounds() {
    let history = InMemoryHistory::new(3);
    for i in 0..5 {
        history.record(&format!("q{}", i), &format!("a{}", i)).await;
    }
    assert_eq!(history.rounds().await, 3);

    let messages = history.history(2).await.unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "q3");
    assert_eq!(messages[3].role, Role::Assistant);
    assert_eq!(messages[3].content, "a4");

    assert!(history.history(0).await.unwrap().is_empty());
    assert_eq!(history.references("anything").await.unwrap(), "");

    history.clear().await;
    assert_eq!(history.rounds().await, 0);
}

// ===========================================================================
// NoSkills / InMemoryScheduler
// ===========================================================================

#[tokio::test]
async fn no_skills_has_no_tools() {
    assert!(NoSkills.search_tools(&["weather".into()]).await.unwrap().is_empty());
    assert!(NoSkills.execute("weather", &Map::new()).await.is_err());
}

#[tokio::test]
async fn scheduler_replaces_and_removes_by_name() {
    let scheduler = InMemoryScheduler::new();
    let job = ScheduleSpec {
        name: "standup".into(),
        cron: "0 9 * * 1-5".into(),
        message: "standup".into(),
    };

    let id = scheduler.add(&job).await.unwrap();
    assert_eq!(id, "local-standup");
    scheduler
        .add(&ScheduleSpec {
            cron: "30 9 * * 1-5".into(),
            ..job.clone()
        })
        .await
        .unwrap();

    let jobs = scheduler.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].cron, "30 9 * * 1-5");

    assert!(scheduler.remove("standup").await.unwrap());
    assert!(!scheduler.remove("standup").await.unwrap());
}

#[tokio::test]
async fn scheduler_rejects_incomplete_jobs() {
    let scheduler = InMemoryScheduler::new();
    let err = scheduler.add(&ScheduleSpec::default()).await;
    assert!(err.is_err());
    assert!(scheduler.jobs().await.is_empty());
}

// ===========================================================================
// LocalBrain
// ===========================================================================

/// Always answers the classify pass with a fixed greeting and records the
/// message count of every request.
struct GreetingClient {
    seen: Mutex<Vec<usize>>,
}

#[async_trait::async_trait]
impl GenerationClient for GreetingClient {
    fn name(&self) -> &str {
        "greeting"
    }

    async fn complete_stream(
        &self,
        request: ChatRequest,
        _cancel: CancellationToken,
    ) -> LlmResult<LlmStream> {
        self.seen.lock().unwrap().push(request.messages.len());
        let body = json!({"answer": "Hello there!", "useless": true, "can_answer": true});
        Ok(Box::pin(futures::stream::iter(vec![
            Ok(StreamDelta::Text(body.to_string())),
            Ok(StreamDelta::Usage(TokenUsage::default())),
            Ok(StreamDelta::Done { finish_reason: None }),
        ])))
    }

    async fn complete(
        &self,
        _request: ChatRequest,
        _cancel: CancellationToken,
    ) -> LlmResult<ChatResponse> {
        Ok(ChatResponse::default())
    }
}

struct SingleClient(Arc<GreetingClient>);

impl BackendFactory for SingleClient {
    fn client_for(&self, _model: &ModelConfig) -> bionic_core::Result<Arc<dyn GenerationClient>> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn local_brain_remembers_exchanges() {
    let client = Arc::new(GreetingClient {
        seen: Mutex::new(Vec::new()),
    });
    let local =
        LocalBrain::with_factory(BrainConfig::default(), Arc::new(SingleClient(client.clone())))
            .unwrap();

    let first = local
        .ask("hi", EventSink::disabled(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.answer, "Hello there!");

    local
        .ask("hi again", EventSink::disabled(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(local.history().rounds().await, 2);
    // system + question, then system + one remembered round + question
    assert_eq!(*client.seen.lock().unwrap(), vec![2, 4]);
}
