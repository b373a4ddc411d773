//! The conversation loop: stream a completion, run requested tools, feed
//! results back, repeat until the model answers in plain text.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use tandem_provider::{
    CompletionOptions, Provider, StreamEvent, ToolDefinition, ToolResultBlock, ToolUse,
    ToolUseAccumulator,
};
use tandem_tools::{ToolContext, ToolExecutor, ToolOutcome, ToolRegistry};
use tokio::sync::mpsc;

use crate::conversation::{Conversation, ConversationStore};
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EngineStatus, EventKind};

/// Ceiling on tool rounds within one prompt, so a model stuck in a tool
/// loop cannot spin forever.
pub const MAX_TOOL_ITERATIONS: usize = 10;

/// Cap on tool-result content carried in outward events. The full result
/// still goes into the conversation.
const TOOL_RESULT_EVENT_LIMIT: usize = 1000;

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    store: Arc<ConversationStore>,
    context: ToolContext,
    model: String,
    system_prompt: Option<String>,
    max_tool_iterations: usize,
    /// Iterations left for turns suspended on a permission decision, so
    /// resuming continues under the same budget.
    suspended_budget: parking_lot::Mutex<std::collections::HashMap<String, usize>>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        executor: Arc<ToolExecutor>,
        store: Arc<ConversationStore>,
        context: ToolContext,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            registry,
            executor,
            store,
            context,
            model: model.into(),
            system_prompt: None,
            max_tool_iterations: MAX_TOOL_ITERATIONS,
            suspended_budget: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tool_iterations(mut self, limit: usize) -> Self {
        self.max_tool_iterations = limit;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Handle one user prompt, emitting events until the turn completes
    /// or suspends waiting for a permission decision.
    ///
    /// The conversation lock is held for the whole run, so two runs for
    /// the same session never interleave.
    pub async fn process_prompt(
        &self,
        session_id: &str,
        prompt: &str,
        events: &mpsc::Sender<EngineEvent>,
    ) -> EngineResult<()> {
        let handle = self.store.get_or_create(session_id, || {
            let mut conversation = Conversation::new(session_id, &self.model, self.provider.name());
            conversation.system_prompt = self.system_prompt.clone();
            conversation
        });
        let mut conversation = handle.lock_owned().await;
        conversation.add_user_message(prompt);
        self.emit(
            events,
            session_id,
            EventKind::Message,
            json!({"role": "user", "content": prompt}),
        )
        .await;
        self.run_loop(session_id, &mut conversation, events, self.max_tool_iterations)
            .await
    }

    /// Resume a turn suspended on a permission request.
    ///
    /// On approval the pending tool uses are executed and the loop
    /// continues. On denial the gated call gets an error result so the
    /// model can react to the refusal.
    pub async fn continue_after_permission(
        &self,
        session_id: &str,
        request_id: &str,
        approved: bool,
        always: bool,
        events: &mpsc::Sender<EngineEvent>,
    ) -> EngineResult<()> {
        let handle = self
            .store
            .get(session_id)
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;
        let mut conversation = handle.lock_owned().await;
        let pending_uses = conversation.pending_tool_uses();
        let budget = self
            .suspended_budget
            .lock()
            .remove(session_id)
            .unwrap_or(self.max_tool_iterations);

        if !approved {
            let denied = self
                .executor
                .deny(request_id)
                .ok_or_else(|| EngineError::UnknownPermissionRequest(request_id.to_string()))?;
            if pending_uses.is_empty() {
                self.emit_status(events, session_id, EngineStatus::PermissionDenied)
                    .await;
                return Ok(());
            }
            let results: Vec<ToolOutcome> = pending_uses
                .iter()
                .map(|use_| {
                    if use_.name == denied.tool_name && use_.arguments == denied.arguments {
                        ToolOutcome::err("Permission denied by user")
                    } else {
                        ToolOutcome::err("Skipped: permission denied for the batch")
                    }
                })
                .collect();
            self.record_results(session_id, &mut conversation, &pending_uses, results, events)
                .await;
            self.emit_status(events, session_id, EngineStatus::PermissionDenied)
                .await;
            return Ok(());
        }

        self.executor
            .approve(request_id, always)
            .ok_or_else(|| EngineError::UnknownPermissionRequest(request_id.to_string()))?;
        if pending_uses.is_empty() {
            return Ok(());
        }
        self.emit_status(events, session_id, EngineStatus::ExecutingTools)
            .await;
        let calls: Vec<(String, Value)> = pending_uses
            .iter()
            .map(|u| (u.name.clone(), u.arguments.clone()))
            .collect();
        let outcomes = self
            .executor
            .execute_tools(session_id, &calls, &self.context)
            .await;

        if self.suspend_if_pending(session_id, budget, events).await {
            return Ok(());
        }
        self.record_results(session_id, &mut conversation, &pending_uses, outcomes, events)
            .await;
        self.run_loop(session_id, &mut conversation, events, budget)
            .await
    }

    async fn run_loop(
        &self,
        session_id: &str,
        conversation: &mut Conversation,
        events: &mpsc::Sender<EngineEvent>,
        budget: usize,
    ) -> EngineResult<()> {
        for iteration in 0..budget {
            tracing::debug!(session = session_id, iteration, "conversation turn");
            self.emit_status(events, session_id, EngineStatus::Thinking)
                .await;

            let messages = conversation.provider_messages();
            let model = conversation.model.clone();
            let system = conversation.system_prompt.clone();
            let tools = self.tool_definitions();
            let options = CompletionOptions {
                system,
                ..Default::default()
            };

            let mut stream = match self
                .provider
                .stream_complete(&model, &messages, Some(&tools), &options)
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(session = session_id, "completion failed: {e}");
                    self.emit(events, session_id, EventKind::Error, json!({"message": e.to_string()}))
                        .await;
                    return Ok(());
                }
            };

            let mut text = String::new();
            let mut accumulator = ToolUseAccumulator::new();
            let mut usage = None;
            let mut failure = None;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(StreamEvent::TextDelta { text: chunk }) => {
                        self.emit(
                            events,
                            session_id,
                            EventKind::StreamChunk,
                            json!({"text": chunk}),
                        )
                        .await;
                        text.push_str(&chunk);
                    }
                    Ok(event @ StreamEvent::ToolUseStart { .. }) => {
                        if let StreamEvent::ToolUseStart { id, name } = &event {
                            self.emit(
                                events,
                                session_id,
                                EventKind::ToolCall,
                                json!({"id": id, "tool_name": name, "status": "started"}),
                            )
                            .await;
                        }
                        accumulator.handle(&event);
                    }
                    Ok(event @ StreamEvent::ToolUseDelta { .. }) => accumulator.handle(&event),
                    Ok(event @ StreamEvent::ToolUseEnd { .. }) => {
                        if let StreamEvent::ToolUseEnd { id, .. } = &event {
                            self.emit(
                                events,
                                session_id,
                                EventKind::ToolCall,
                                json!({"id": id, "status": "complete"}),
                            )
                            .await;
                        }
                        accumulator.handle(&event);
                    }
                    Ok(StreamEvent::MessageDelta { usage: u, .. }) => {
                        if u.is_some() {
                            usage = u;
                        }
                    }
                    Ok(StreamEvent::Error { message }) => {
                        failure = Some(message);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        failure = Some(e.to_string());
                        break;
                    }
                }
            }
            if let Some(message) = failure {
                tracing::error!(session = session_id, "stream failed: {message}");
                self.emit(events, session_id, EventKind::Error, json!({"message": message}))
                    .await;
                return Ok(());
            }

            let tool_uses = accumulator.finish();
            conversation.add_assistant_message(text.clone(), tool_uses.clone(), usage);

            if tool_uses.is_empty() {
                self.emit(
                    events,
                    session_id,
                    EventKind::Message,
                    json!({"role": "assistant", "content": text}),
                )
                .await;
                self.emit_complete(events, session_id, conversation).await;
                return Ok(());
            }

            self.emit_status(events, session_id, EngineStatus::ExecutingTools)
                .await;

            let calls: Vec<(String, Value)> = tool_uses
                .iter()
                .map(|u| (u.name.clone(), u.arguments.clone()))
                .collect();
            let outcomes = self
                .executor
                .execute_tools(session_id, &calls, &self.context)
                .await;

            if self
                .suspend_if_pending(session_id, budget - iteration - 1, events)
                .await
            {
                return Ok(());
            }
            self.record_results(session_id, conversation, &tool_uses, outcomes, events)
                .await;
        }

        tracing::warn!(session = session_id, "tool iteration ceiling hit");
        let final_text = conversation
            .last_assistant()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.emit(
            events,
            session_id,
            EventKind::Message,
            json!({"role": "assistant", "content": final_text}),
        )
        .await;
        self.emit(
            events,
            session_id,
            EventKind::Error,
            json!({"message": "Maximum tool iterations reached"}),
        )
        .await;
        self.emit_complete(events, session_id, conversation).await;
        Ok(())
    }

    /// Completion event carrying the session's cumulative token counts.
    async fn emit_complete(
        &self,
        events: &mpsc::Sender<EngineEvent>,
        session_id: &str,
        conversation: &Conversation,
    ) {
        self.emit(
            events,
            session_id,
            EventKind::Complete,
            json!({
                "total_input_tokens": conversation.total_input_tokens,
                "total_output_tokens": conversation.total_output_tokens,
            }),
        )
        .await;
    }

    /// When any executed call parked itself behind the permission gate,
    /// surface the requests and suspend without recording results. The
    /// unanswered tool uses stay pending on the conversation.
    async fn suspend_if_pending(
        &self,
        session_id: &str,
        remaining_budget: usize,
        events: &mpsc::Sender<EngineEvent>,
    ) -> bool {
        let pending = self.executor.pending_for_session(session_id);
        if pending.is_empty() {
            return false;
        }
        self.suspended_budget
            .lock()
            .insert(session_id.to_string(), remaining_budget);
        for request in &pending {
            self.emit(
                events,
                session_id,
                EventKind::PermissionRequest,
                json!({
                    "request_id": request.id,
                    "tool_name": request.tool_name,
                    "arguments": request.arguments,
                    "description": request.description,
                }),
            )
            .await;
        }
        self.emit_status(events, session_id, EngineStatus::WaitingPermission)
            .await;
        true
    }

    /// Emit tool-result events and append the results to the conversation.
    async fn record_results(
        &self,
        session_id: &str,
        conversation: &mut Conversation,
        tool_uses: &[ToolUse],
        outcomes: Vec<ToolOutcome>,
        events: &mpsc::Sender<EngineEvent>,
    ) {
        let mut results = Vec::with_capacity(outcomes.len());
        for (use_, outcome) in tool_uses.iter().zip(outcomes) {
            self.emit(
                events,
                session_id,
                EventKind::ToolResult,
                json!({
                    "tool_use_id": use_.id,
                    "tool_name": use_.name,
                    "content": truncate_for_event(outcome.content()),
                    "is_error": !outcome.success,
                }),
            )
            .await;
            results.push(ToolResultBlock {
                tool_use_id: use_.id.clone(),
                content: outcome.content().to_string(),
                is_error: !outcome.success,
            });
        }
        conversation.add_tool_results(results);
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registry
            .specs()
            .into_iter()
            .map(|spec| ToolDefinition {
                name: spec.name,
                description: spec.description,
                input_schema: spec.input_schema,
            })
            .collect()
    }

    async fn emit(
        &self,
        events: &mpsc::Sender<EngineEvent>,
        session_id: &str,
        kind: EventKind,
        data: Value,
    ) {
        let event = EngineEvent::new(kind, session_id, data);
        if events.send(event).await.is_err() {
            tracing::warn!(session = session_id, "event receiver dropped");
        }
    }

    async fn emit_status(
        &self,
        events: &mpsc::Sender<EngineEvent>,
        session_id: &str,
        status: EngineStatus,
    ) {
        let event = EngineEvent::status(session_id, status);
        if events.send(event).await.is_err() {
            tracing::warn!(session = session_id, "event receiver dropped");
        }
    }
}

fn truncate_for_event(content: &str) -> String {
    if content.chars().count() <= TOOL_RESULT_EVENT_LIMIT {
        return content.to_string();
    }
    let head: String = content.chars().take(TOOL_RESULT_EVENT_LIMIT).collect();
    format!("{head}... (truncated)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tandem_provider::{
        CompletionResponse, EventStream, Message, ModelInfo, ProviderError, ProviderResult, Role,
        Usage,
    };
    use tempfile::TempDir;

    struct ScriptedProvider {
        turns: StdMutex<VecDeque<Vec<ProviderResult<StreamEvent>>>>,
        delay: Option<std::time::Duration>,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<Vec<ProviderResult<StreamEvent>>>) -> Self {
            Self {
                turns: StdMutex::new(turns.into_iter().collect()),
                delay: None,
            }
        }

        fn with_delay(mut self, delay: std::time::Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _model: &str,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _options: &CompletionOptions,
        ) -> ProviderResult<CompletionResponse> {
            Err(ProviderError::Parse("scripted provider only streams".into()))
        }

        async fn stream_complete(
            &self,
            _model: &str,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _options: &CompletionOptions,
        ) -> ProviderResult<EventStream> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let turn = self
                .turns
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProviderError::Stream("script exhausted".into()))?;
            Ok(Box::pin(futures::stream::iter(turn)))
        }

        fn models(&self) -> Vec<ModelInfo> {
            Vec::new()
        }
    }

    fn text_turn(text: &str) -> Vec<ProviderResult<StreamEvent>> {
        vec![
            Ok(StreamEvent::MessageStart),
            Ok(StreamEvent::TextDelta { text: text.into() }),
            Ok(StreamEvent::MessageDelta {
                usage: Some(Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                }),
                stop_reason: Some("end_turn".into()),
            }),
            Ok(StreamEvent::MessageEnd),
        ]
    }

    fn tool_turn(tool: &str, arguments: &str) -> Vec<ProviderResult<StreamEvent>> {
        vec![
            Ok(StreamEvent::MessageStart),
            Ok(StreamEvent::ToolUseStart {
                id: "tu_1".into(),
                name: tool.into(),
            }),
            Ok(StreamEvent::ToolUseDelta {
                id: "tu_1".into(),
                partial_json: arguments.into(),
            }),
            Ok(StreamEvent::ToolUseEnd {
                id: "tu_1".into(),
                arguments: None,
            }),
            Ok(StreamEvent::MessageDelta {
                usage: None,
                stop_reason: Some("tool_use".into()),
            }),
            Ok(StreamEvent::MessageEnd),
        ]
    }

    fn harness_with(workspace: &TempDir, provider: ScriptedProvider) -> Orchestrator {
        let registry = Arc::new(ToolRegistry::with_builtins());
        let executor = Arc::new(ToolExecutor::new(registry.clone()));
        let context = ToolContext::new(workspace.path()).unwrap();
        Orchestrator::new(
            Arc::new(provider),
            registry,
            executor,
            Arc::new(ConversationStore::new()),
            context,
            "test-model",
        )
    }

    fn harness(
        workspace: &TempDir,
        turns: Vec<Vec<ProviderResult<StreamEvent>>>,
    ) -> Orchestrator {
        harness_with(workspace, ScriptedProvider::new(turns))
    }

    async fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut collected = Vec::new();
        while let Ok(event) = rx.try_recv() {
            collected.push(event);
        }
        collected
    }

    fn kinds(events: &[EngineEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[tokio::test]
    async fn plain_text_reply() {
        let dir = TempDir::new().unwrap();
        let orchestrator = harness(&dir, vec![text_turn("Hello there")]);
        let (tx, mut rx) = mpsc::channel(256);

        orchestrator.process_prompt("s1", "hi", &tx).await.unwrap();
        let events = drain(&mut rx).await;
        assert_eq!(
            kinds(&events),
            vec![
                EventKind::Message,
                EventKind::Status,
                EventKind::StreamChunk,
                EventKind::Message,
                EventKind::Complete,
            ]
        );
        assert_eq!(events[0].data["role"], "user");
        assert_eq!(events[0].data["content"], "hi");
        assert_eq!(events[3].data["role"], "assistant");
        assert_eq!(events[3].data["content"], "Hello there");
        assert_eq!(events[4].data["total_input_tokens"], 10);
        assert_eq!(events[4].data["total_output_tokens"], 5);

        let conversation = orchestrator.store().get("s1").unwrap();
        let conv = conversation.lock().await;
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.total_output_tokens, 5);
    }

    #[tokio::test]
    async fn tool_round_trip() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi from disk\n").unwrap();
        let orchestrator = harness(
            &dir,
            vec![
                tool_turn("read_file", r#"{"file_path": "a.txt"}"#),
                text_turn("The file greets you"),
            ],
        );
        let (tx, mut rx) = mpsc::channel(256);

        orchestrator
            .process_prompt("s1", "read a.txt", &tx)
            .await
            .unwrap();
        let events = drain(&mut rx).await;

        // The prompt itself comes back as a user-role message event.
        assert_eq!(events[0].kind, EventKind::Message);
        assert_eq!(events[0].data["role"], "user");

        let tool_calls: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::ToolCall)
            .collect();
        assert_eq!(tool_calls.len(), 2);
        assert_eq!(tool_calls[0].data["status"], "started");
        assert_eq!(tool_calls[0].data["tool_name"], "read_file");
        assert_eq!(tool_calls[1].data["status"], "complete");
        assert_eq!(tool_calls[0].data["id"], tool_calls[1].data["id"]);

        let tool_result = events
            .iter()
            .find(|e| e.kind == EventKind::ToolResult)
            .unwrap();
        assert_eq!(tool_result.data["is_error"], false);
        assert!(tool_result.data["content"]
            .as_str()
            .unwrap()
            .contains("hi from disk"));

        assert_eq!(events.last().unwrap().kind, EventKind::Complete);

        let conversation = orchestrator.store().get("s1").unwrap();
        let conv = conversation.lock().await;
        // user, assistant(tool use), user(tool result), assistant
        assert_eq!(conv.messages.len(), 4);
        assert!(conv.pending_tool_uses().is_empty());
    }

    #[tokio::test]
    async fn permission_suspends_then_approval_resumes() {
        let dir = TempDir::new().unwrap();
        let orchestrator = harness(
            &dir,
            vec![
                tool_turn("bash", r#"{"command": "echo approved"}"#),
                text_turn("Done"),
            ],
        );
        let (tx, mut rx) = mpsc::channel(256);

        orchestrator.process_prompt("s1", "run it", &tx).await.unwrap();
        let events = drain(&mut rx).await;

        let request = events
            .iter()
            .find(|e| e.kind == EventKind::PermissionRequest)
            .unwrap();
        let request_id = request.data["request_id"].as_str().unwrap().to_string();
        assert_eq!(request.data["tool_name"], "bash");
        assert_eq!(
            events.last().unwrap().data["status"],
            "waiting_permission"
        );
        assert!(!events.iter().any(|e| e.kind == EventKind::Complete));

        orchestrator
            .continue_after_permission("s1", &request_id, true, false, &tx)
            .await
            .unwrap();
        let events = drain(&mut rx).await;

        let tool_result = events
            .iter()
            .find(|e| e.kind == EventKind::ToolResult)
            .unwrap();
        assert_eq!(tool_result.data["is_error"], false);
        assert!(tool_result.data["content"]
            .as_str()
            .unwrap()
            .contains("approved"));
        assert_eq!(events.last().unwrap().kind, EventKind::Complete);
    }

    #[tokio::test]
    async fn denial_records_an_error_result_and_stops() {
        let dir = TempDir::new().unwrap();
        let orchestrator = harness(
            &dir,
            vec![tool_turn("bash", r#"{"command": "echo nope"}"#)],
        );
        let (tx, mut rx) = mpsc::channel(256);

        orchestrator.process_prompt("s1", "run it", &tx).await.unwrap();
        let events = drain(&mut rx).await;
        let request_id = events
            .iter()
            .find(|e| e.kind == EventKind::PermissionRequest)
            .unwrap()
            .data["request_id"]
            .as_str()
            .unwrap()
            .to_string();

        orchestrator
            .continue_after_permission("s1", &request_id, false, false, &tx)
            .await
            .unwrap();
        let events = drain(&mut rx).await;

        let tool_result = events
            .iter()
            .find(|e| e.kind == EventKind::ToolResult)
            .unwrap();
        assert_eq!(tool_result.data["is_error"], true);
        assert_eq!(tool_result.data["content"], "Permission denied by user");

        // Denial ends the run without another provider round.
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::Status);
        assert_eq!(last.data["status"], "permission_denied");
        assert!(!events.iter().any(|e| e.kind == EventKind::Complete));

        let conversation = orchestrator.store().get("s1").unwrap();
        let conv = conversation.lock().await;
        assert!(conv.pending_tool_uses().is_empty());
    }

    #[tokio::test]
    async fn stream_error_aborts_the_turn() {
        let dir = TempDir::new().unwrap();
        let orchestrator = harness(
            &dir,
            vec![vec![
                Ok(StreamEvent::MessageStart),
                Ok(StreamEvent::TextDelta { text: "par".into() }),
                Ok(StreamEvent::Error {
                    message: "overloaded".into(),
                }),
            ]],
        );
        let (tx, mut rx) = mpsc::channel(256);

        orchestrator.process_prompt("s1", "hi", &tx).await.unwrap();
        let events = drain(&mut rx).await;

        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::Error);
        assert_eq!(last.data["message"], "overloaded");
        assert!(!events.iter().any(|e| e.kind == EventKind::Complete));
    }

    #[tokio::test]
    async fn provider_failure_becomes_an_error_event() {
        let dir = TempDir::new().unwrap();
        // Empty script: the first stream_complete call fails.
        let orchestrator = harness(&dir, Vec::new());
        let (tx, mut rx) = mpsc::channel(256);

        orchestrator.process_prompt("s1", "hi", &tx).await.unwrap();
        let events = drain(&mut rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::Error);
        assert!(last.data["message"]
            .as_str()
            .unwrap()
            .contains("script exhausted"));
    }

    #[tokio::test]
    async fn iteration_ceiling_stops_a_tool_loop() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x\n").unwrap();
        let turns = vec![
            tool_turn("read_file", r#"{"file_path": "a.txt"}"#),
            tool_turn("read_file", r#"{"file_path": "a.txt"}"#),
            tool_turn("read_file", r#"{"file_path": "a.txt"}"#),
        ];
        let orchestrator = harness(&dir, turns).with_max_tool_iterations(2);
        let (tx, mut rx) = mpsc::channel(256);

        orchestrator.process_prompt("s1", "loop", &tx).await.unwrap();
        let events = drain(&mut rx).await;

        // Exhaustion still reports the last assistant message before the
        // error and completion events.
        let message = &events[events.len() - 3];
        assert_eq!(message.kind, EventKind::Message);
        assert_eq!(message.data["role"], "assistant");
        let error = &events[events.len() - 2];
        assert_eq!(error.kind, EventKind::Error);
        assert_eq!(error.data["message"], "Maximum tool iterations reached");
        assert_eq!(events.last().unwrap().kind, EventKind::Complete);
    }

    #[tokio::test]
    async fn concurrent_prompts_for_one_session_are_serialized() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::new(vec![text_turn("one"), text_turn("two")])
            .with_delay(std::time::Duration::from_millis(20));
        let orchestrator = harness_with(&dir, provider);
        let (tx, _rx) = mpsc::channel(512);

        let (a, b) = tokio::join!(
            orchestrator.process_prompt("s1", "first", &tx),
            orchestrator.process_prompt("s1", "second", &tx),
        );
        a.unwrap();
        b.unwrap();

        let conversation = orchestrator.store().get("s1").unwrap();
        let conv = conversation.lock().await;
        let roles: Vec<Role> = conv.messages.iter().map(|m| m.role).collect();
        // Whole runs are serialized: no interleaved appends.
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[test]
    fn long_tool_results_are_truncated_for_events() {
        let long = "x".repeat(2000);
        let truncated = truncate_for_event(&long);
        assert!(truncated.starts_with(&"x".repeat(1000)));
        assert!(truncated.ends_with("... (truncated)"));
        assert_eq!(truncate_for_event("short"), "short");
    }
}
