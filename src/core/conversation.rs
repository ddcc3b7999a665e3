//! Conversation engine: the turn state machine that alternates completion
//! requests with tool rounds until the model answers in plain text.

use crate::api::client::CompletionBackend;
use crate::api::{ChatMessage, ChatRequest, FunctionSchema};
use crate::core::config::data::LlmConfig;
use crate::core::invocation::{
    self, error_payload, parse_arguments, serialize_result, ApprovalDecision, SKIPPED_BY_USER,
};
use crate::core::prompter::Prompter;
use crate::mcp::enablement::ServerEnablement;
use crate::mcp::pool::SessionPool;
use crate::transcript::Transcript;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Everything a single turn borrows from the surrounding application.
pub struct TurnContext<'a> {
    pub pool: &'a mut SessionPool,
    pub enablement: &'a ServerEnablement,
    pub backend: &'a dyn CompletionBackend,
    pub prompter: &'a mut dyn Prompter,
    pub transcript: &'a mut Transcript,
}

pub struct ConversationEngine {
    system_prompt: String,
    history: Vec<ChatMessage>,
    /// Sticky session-wide approval, set by the "a" choice.
    auto_approve: bool,
    batch_mode: bool,
    verbose: bool,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    top_p: Option<f64>,
}

impl ConversationEngine {
    pub fn new(
        system_prompt: impl Into<String>,
        config: &LlmConfig,
        transcript: &mut Transcript,
    ) -> Self {
        let system_prompt = system_prompt.into();
        let system = ChatMessage::system(system_prompt.clone());
        transcript.record(&system);
        Self {
            history: vec![system],
            system_prompt,
            auto_approve: false,
            batch_mode: false,
            verbose: false,
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
            top_p: config.top_p(),
        }
    }

    /// Batch runs approve every call and ignore the enablement filter.
    pub fn with_batch_mode(mut self, on: bool) -> Self {
        self.batch_mode = on;
        self
    }

    pub fn with_verbose(mut self, on: bool) -> Self {
        self.verbose = on;
        self
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Truncates the history back to the system prompt and drops the sticky
    /// approval. Server enablement is left alone. The log gets the reset
    /// marker followed by the re-seeded system message, so a replayed log
    /// still reconstructs the model's context.
    pub fn reset(&mut self, transcript: &mut Transcript) {
        let system = ChatMessage::system(self.system_prompt.clone());
        self.history.truncate(0);
        self.history.push(system.clone());
        self.auto_approve = false;
        transcript.record_reset();
        transcript.record(&system);
    }

    /// Rejects a forced directive before the turn starts, so a typo never
    /// costs a completion request.
    pub fn validate_directive(
        tool: &str,
        pool: &SessionPool,
        enablement: &ServerEnablement,
    ) -> Result<(), String> {
        let Some(server) = pool.tool_server(tool) else {
            return Err(format!("No such tool: {}", tool));
        };
        if !enablement.is_allowed(tool, pool) {
            return Err(format!("Tool '{}' is disabled on server '{}'", tool, server));
        }
        Ok(())
    }

    /// Runs one full turn: user message in, tool rounds as the model asks
    /// for them, final assistant text out.
    pub async fn run_turn(
        &mut self,
        user_message: &str,
        forced_tool: Option<String>,
        ctx: &mut TurnContext<'_>,
    ) -> String {
        self.push(ChatMessage::user(user_message), ctx.transcript);
        let mut forced = forced_tool;

        loop {
            // The forced directive binds only the first request of the turn;
            // follow-up requests fall back to the model's own choice.
            let forced_round = forced.is_some();
            let request = self.build_request(forced.take(), ctx);

            let reply = match ctx.backend.complete(&request).await {
                Ok(reply) => reply,
                Err(err) => {
                    let content = format!("[error] Chat completion failed: {}", err);
                    warn!(error = %err, "Completion request failed");
                    self.push(ChatMessage::assistant(content.clone()), ctx.transcript);
                    return content;
                }
            };

            let Some(call) = reply.function_call else {
                let content = reply.content.unwrap_or_default();
                self.push(ChatMessage::assistant(content.clone()), ctx.transcript);
                return content;
            };

            let payload = self.tool_round(&call.name, call.arguments.as_deref(), forced_round, ctx)
                .await;
            self.push(ChatMessage::function(&call.name, payload), ctx.transcript);
        }
    }

    async fn tool_round(
        &mut self,
        name: &str,
        raw_arguments: Option<&str>,
        forced_round: bool,
        ctx: &mut TurnContext<'_>,
    ) -> String {
        let arguments = parse_arguments(raw_arguments);
        debug!(tool = %name, "Model requested a tool call");

        let approved = if self.auto_approve || self.batch_mode || forced_round {
            true
        } else {
            match invocation::request_approval(ctx.prompter, name, &arguments).await {
                ApprovalDecision::Approved => true,
                ApprovalDecision::ApprovedAlways => {
                    self.auto_approve = true;
                    true
                }
                ApprovalDecision::Denied => false,
            }
        };

        if !approved {
            return error_payload(SKIPPED_BY_USER);
        }

        if self.verbose {
            let rendered = serde_json::to_string(&Value::Object(arguments.clone()))
                .unwrap_or_else(|_| "{}".to_string());
            ctx.prompter.notify(&format!("Calling {name} with {rendered}"));
        }

        let arguments = if arguments.is_empty() {
            None
        } else {
            Some(arguments)
        };
        let payload = match ctx.pool.dispatch(name, arguments).await {
            Ok(value) => serialize_result(value),
            Err(err) => {
                warn!(tool = %name, error = %err, "Tool call failed");
                error_payload(&err)
            }
        };
        if self.verbose {
            ctx.prompter.notify(&format!("Result: {payload}"));
        }
        payload
    }

    fn build_request(&self, forced: Option<String>, ctx: &TurnContext<'_>) -> ChatRequest {
        let defs = ctx.pool.function_defs();
        let offered: Vec<FunctionSchema> = if self.batch_mode {
            defs.iter().map(schema_for).collect()
        } else {
            ctx.enablement
                .filter_tools(defs)
                .into_iter()
                .map(|def| schema_for(def))
                .collect()
        };

        let (functions, function_call) = if offered.is_empty() {
            (None, None)
        } else {
            let call = match forced {
                Some(name) => json!({"type": "function", "name": name}),
                None => json!("auto"),
            };
            (Some(offered), Some(call))
        };

        ChatRequest {
            messages: self.history.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            functions,
            function_call,
        }
    }

    fn push(&mut self, message: ChatMessage, transcript: &mut Transcript) {
        transcript.record(&message);
        self.history.push(message);
    }
}

fn schema_for(def: &crate::mcp::pool::ToolDefinition) -> FunctionSchema {
    FunctionSchema {
        name: def.name.clone(),
        description: def.description.clone(),
        parameters: def.parameters.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AssistantReply, FunctionCall};
    use crate::core::prompter::ScriptedPrompter;
    use crate::mcp::pool::tests::{tool, FakeTransport};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct RequestSnapshot {
        functions: Vec<String>,
        function_call: Option<Value>,
    }

    struct ScriptedBackend {
        replies: Mutex<VecDeque<AssistantReply>>,
        requests: Mutex<Vec<RequestSnapshot>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<AssistantReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn snapshots(&self) -> Vec<RequestSnapshot> {
            std::mem::take(&mut self.requests.lock().unwrap())
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, request: &ChatRequest) -> Result<AssistantReply, String> {
            self.requests.lock().unwrap().push(RequestSnapshot {
                functions: request
                    .functions
                    .iter()
                    .flatten()
                    .map(|schema| schema.name.clone())
                    .collect(),
                function_call: request.function_call.clone(),
            });
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| "script exhausted".to_string())
        }
    }

    fn text_reply(content: &str) -> AssistantReply {
        AssistantReply {
            content: Some(content.to_string()),
            function_call: None,
        }
    }

    fn call_reply(name: &str, arguments: &str) -> AssistantReply {
        AssistantReply {
            content: None,
            function_call: Some(FunctionCall {
                name: name.to_string(),
                arguments: Some(arguments.to_string()),
            }),
        }
    }

    fn llm_config() -> LlmConfig {
        serde_json::from_value(serde_json::json!({
            "endpoint": "https://example.test",
            "api_key": "k",
            "api_version": "2024-02-01",
            "deployment": "gpt"
        }))
        .unwrap()
    }

    async fn pool_with_lookup(result: Value) -> SessionPool {
        let mut pool = SessionPool::default();
        pool.install(
            "alpha".to_string(),
            Box::new(FakeTransport::new(vec![tool("lookup")], result)),
        )
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn tool_round_feeds_result_back_into_history() {
        let mut pool = pool_with_lookup(json!({"output": "y found"})).await;
        let enablement = ServerEnablement::default();
        let backend = ScriptedBackend::new(vec![
            call_reply("lookup", "{\"q\":\"x\"}"),
            text_reply("It was y."),
        ]);
        let mut prompter = ScriptedPrompter::new(["y"]);
        let mut transcript = Transcript::disabled();
        let mut engine = ConversationEngine::new("You are helpful.", &llm_config(), &mut transcript);

        let mut ctx = TurnContext {
            pool: &mut pool,
            enablement: &enablement,
            backend: &backend,
            prompter: &mut prompter,
            transcript: &mut transcript,
        };
        let answer = engine.run_turn("look up x", None, &mut ctx).await;
        assert_eq!(answer, "It was y.");

        let roles: Vec<&str> = engine.history().iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "function", "assistant"]);
        let function = &engine.history()[2];
        assert_eq!(function.name.as_deref(), Some("lookup"));
        assert_eq!(function.content, "y found");

        // Both requests offered the tool; neither forced it.
        let snapshots = backend.snapshots();
        assert_eq!(snapshots.len(), 2);
        for snapshot in &snapshots {
            assert_eq!(snapshot.functions, vec!["lookup"]);
            assert_eq!(snapshot.function_call, Some(json!("auto")));
        }
    }

    #[tokio::test]
    async fn forced_directive_binds_only_the_first_request() {
        let mut pool = pool_with_lookup(json!("found")).await;
        let enablement = ServerEnablement::default();
        let backend = ScriptedBackend::new(vec![
            call_reply("lookup", "{}"),
            text_reply("Done."),
        ]);
        // No approval inputs: the forced round must not prompt.
        let mut prompter = ScriptedPrompter::new([]);
        let mut transcript = Transcript::disabled();
        let mut engine = ConversationEngine::new("You are helpful.", &llm_config(), &mut transcript);

        let mut ctx = TurnContext {
            pool: &mut pool,
            enablement: &enablement,
            backend: &backend,
            prompter: &mut prompter,
            transcript: &mut transcript,
        };
        let answer = engine
            .run_turn("find it", Some("lookup".to_string()), &mut ctx)
            .await;
        assert_eq!(answer, "Done.");

        let snapshots = backend.snapshots();
        assert_eq!(
            snapshots[0].function_call,
            Some(json!({"type": "function", "name": "lookup"}))
        );
        assert_eq!(snapshots[1].function_call, Some(json!("auto")));
    }

    #[tokio::test]
    async fn denial_reports_a_skip_to_the_model() {
        let mut pool = pool_with_lookup(json!("never called")).await;
        let enablement = ServerEnablement::default();
        let backend = ScriptedBackend::new(vec![
            call_reply("lookup", "{}"),
            text_reply("Understood."),
        ]);
        let mut prompter = ScriptedPrompter::new(["n"]);
        let mut transcript = Transcript::disabled();
        let mut engine = ConversationEngine::new("You are helpful.", &llm_config(), &mut transcript);

        let mut ctx = TurnContext {
            pool: &mut pool,
            enablement: &enablement,
            backend: &backend,
            prompter: &mut prompter,
            transcript: &mut transcript,
        };
        engine.run_turn("try it", None, &mut ctx).await;

        let function = &engine.history()[2];
        assert_eq!(
            function.content,
            "{\"error\":\"Tool execution skipped by user\"}"
        );
    }

    #[tokio::test]
    async fn always_approval_sticks_until_reset() {
        let mut pool = pool_with_lookup(json!("ok")).await;
        let enablement = ServerEnablement::default();
        let backend = ScriptedBackend::new(vec![
            call_reply("lookup", "{}"),
            call_reply("lookup", "{}"),
            text_reply("Both ran."),
        ]);
        // A single "a" covers both calls.
        let mut prompter = ScriptedPrompter::new(["a"]);
        let mut transcript = Transcript::disabled();
        let mut engine = ConversationEngine::new("You are helpful.", &llm_config(), &mut transcript);

        let mut ctx = TurnContext {
            pool: &mut pool,
            enablement: &enablement,
            backend: &backend,
            prompter: &mut prompter,
            transcript: &mut transcript,
        };
        let answer = engine.run_turn("go", None, &mut ctx).await;
        assert_eq!(answer, "Both ran.");

        engine.reset(&mut transcript);
        assert!(!engine.auto_approve);
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.history()[0].role, "system");
    }

    #[tokio::test]
    async fn completion_failure_ends_the_turn_in_conversation() {
        let mut pool = SessionPool::default();
        let enablement = ServerEnablement::default();
        let backend = ScriptedBackend::new(vec![]);
        let mut prompter = ScriptedPrompter::new([]);
        let mut transcript = Transcript::disabled();
        let mut engine = ConversationEngine::new("You are helpful.", &llm_config(), &mut transcript);

        let mut ctx = TurnContext {
            pool: &mut pool,
            enablement: &enablement,
            backend: &backend,
            prompter: &mut prompter,
            transcript: &mut transcript,
        };
        let answer = engine.run_turn("hello", None, &mut ctx).await;
        assert_eq!(answer, "[error] Chat completion failed: script exhausted");
        assert_eq!(engine.history().last().unwrap().role, "assistant");
    }

    #[tokio::test]
    async fn batch_mode_offers_every_tool_despite_disablement() {
        let mut pool = pool_with_lookup(json!("ok")).await;
        let mut enablement = ServerEnablement::default();
        enablement.disable("alpha", &pool).unwrap();
        let backend = ScriptedBackend::new(vec![text_reply("done")]);
        let mut prompter = ScriptedPrompter::new([]);
        let mut transcript = Transcript::disabled();
        let mut engine =
            ConversationEngine::new("You are helpful.", &llm_config(), &mut transcript).with_batch_mode(true);

        let mut ctx = TurnContext {
            pool: &mut pool,
            enablement: &enablement,
            backend: &backend,
            prompter: &mut prompter,
            transcript: &mut transcript,
        };
        engine.run_turn("go", None, &mut ctx).await;
        assert_eq!(backend.snapshots()[0].functions, vec!["lookup"]);
    }

    #[tokio::test]
    async fn no_tools_means_no_function_fields() {
        let mut pool = SessionPool::default();
        let enablement = ServerEnablement::default();
        let backend = ScriptedBackend::new(vec![text_reply("hi")]);
        let mut prompter = ScriptedPrompter::new([]);
        let mut transcript = Transcript::disabled();
        let mut engine = ConversationEngine::new("You are helpful.", &llm_config(), &mut transcript);

        let mut ctx = TurnContext {
            pool: &mut pool,
            enablement: &enablement,
            backend: &backend,
            prompter: &mut prompter,
            transcript: &mut transcript,
        };
        engine.run_turn("hello", None, &mut ctx).await;
        let snapshot = &backend.snapshots()[0];
        assert!(snapshot.functions.is_empty());
        assert!(snapshot.function_call.is_none());
    }

    #[tokio::test]
    async fn directive_validation_catches_unknown_and_disabled_tools() {
        let pool = pool_with_lookup(json!("ok")).await;
        let mut enablement = ServerEnablement::default();

        assert!(ConversationEngine::validate_directive("lookup", &pool, &enablement).is_ok());
        let err =
            ConversationEngine::validate_directive("ghost", &pool, &enablement).unwrap_err();
        assert!(err.contains("No such tool"));

        enablement.disable("alpha", &pool).unwrap();
        let err =
            ConversationEngine::validate_directive("lookup", &pool, &enablement).unwrap_err();
        assert!(err.contains("disabled"));
    }

    #[tokio::test]
    async fn log_replays_system_context_across_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.jsonl");
        let mut transcript = Transcript::new(Some(path.to_string_lossy().into_owned()));
        let mut engine = ConversationEngine::new("You are helpful.", &llm_config(), &mut transcript);

        engine.reset(&mut transcript);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        // Seeded system message, reset marker, re-seeded system message.
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["role"], "system");
        assert_eq!(lines[0]["content"], "You are helpful.");
        assert_eq!(lines[1]["content"], "History reset");
        assert_eq!(lines[2]["role"], "system");
        assert_eq!(lines[2]["content"], "You are helpful.");
    }

    #[tokio::test]
    async fn reset_leaves_disablement_untouched() {
        let pool = pool_with_lookup(json!("ok")).await;
        let mut enablement = ServerEnablement::default();
        enablement.disable("alpha", &pool).unwrap();
        let mut transcript = Transcript::disabled();
        let mut engine = ConversationEngine::new("You are helpful.", &llm_config(), &mut transcript);

        engine.reset(&mut transcript);
        assert!(enablement.is_disabled("alpha"));
        assert_eq!(engine.history().len(), 1);
    }
}
