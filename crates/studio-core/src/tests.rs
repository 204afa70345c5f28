#[cfg(test)]
mod tests {
    use crate::context::AppContext;
    use crate::event_bus::EventBus;
    use crate::ports::*;
    use crate::processor::{NextAction, Processor, IMAGE_GENERATED, MODEL_GENERATED};
    use crate::retry::call_with_retry;
    use crate::runtime::{corrective_prompt, Agent, AgentState, FAILURE_MARKER};
    use crate::session_manager::SessionManager;
    use studio_types::config::{AgentConfig, RetryPolicy};
    use studio_types::directive::{DirectiveErrorKind, DirectiveState};
    use studio_types::event::{AgentEvent, ArtifactKind};
    use studio_types::message::*;
    use studio_types::session::*;
    use studio_types::{AgentError, Result};

    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const BASE: &str = "BASE PROMPT";
    const IMAGE_TEMPLATE: &str = "DESCRIBE THIS IMAGE";

    // ─── Mocks ───────────────────────────────────────────────

    /// Replies and observations shared between a factory and its clients
    #[derive(Default)]
    struct LlmScript {
        replies: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
        content_calls: Mutex<Vec<Vec<String>>>,
        description: Mutex<Option<Result<String>>>,
        /// Calls after this many prompts hang until cancelled
        stall_after: Mutex<Option<usize>>,
        seeded_with: Mutex<Vec<Vec<Message>>>,
    }

    impl LlmScript {
        fn with_replies(replies: &[&str]) -> Arc<Self> {
            let script = Self::default();
            *script.replies.lock().unwrap() =
                replies.iter().map(|r| Ok(r.to_string())).collect();
            Arc::new(script)
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    struct ScriptedLlm {
        script: Arc<LlmScript>,
        history: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn prompt(&self, text: &str) -> Result<String> {
            let seen = self.script.prompts.lock().unwrap().len();
            let stall_after = *self.script.stall_after.lock().unwrap();
            if stall_after.is_some_and(|n| seen >= n) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.script.prompts.lock().unwrap().push(text.to_string());
            let reply = self
                .script
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(r#"{"state": 0, "summary": "out of script"}"#.to_string()))?;
            let mut history = self.history.lock().unwrap();
            history.push(Message::user(text));
            history.push(Message::model(&reply));
            Ok(reply)
        }

        async fn generate_content(&self, parts: &[String]) -> Result<String> {
            self.script.content_calls.lock().unwrap().push(parts.to_vec());
            self.script
                .description
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Ok("a detailed description".to_string()))
        }

        fn history(&self) -> Vec<Message> {
            self.history.lock().unwrap().clone()
        }
    }

    struct ScriptedFactory {
        script: Arc<LlmScript>,
    }

    impl LlmFactory for ScriptedFactory {
        fn create(&self, _base_model: &str, history: Vec<Message>) -> Result<Box<dyn LlmClient>> {
            self.script.seeded_with.lock().unwrap().push(history.clone());
            Ok(Box::new(ScriptedLlm {
                script: self.script.clone(),
                history: Mutex::new(history),
            }))
        }
    }

    #[derive(Default)]
    struct MockStore {
        description: Mutex<Option<String>>,
        histories: Mutex<HashMap<String, Vec<Message>>>,
        saved: Mutex<Vec<StoredSession>>,
        history_saves: Mutex<Vec<String>>,
        history_reads: AtomicUsize,
        fail_save: bool,
        fail_history: bool,
        fail_ping: bool,
    }

    #[async_trait]
    impl SessionStore for MockStore {
        async fn get_image_description(&self, _intent: &str) -> Result<String> {
            self.description
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| AgentError::Storage("no images stored".to_string()))
        }

        async fn get_conversation_history(&self, session_id: &str) -> Result<Vec<Message>> {
            self.history_reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_history {
                return Err(AgentError::Storage("connection reset".to_string()));
            }
            Ok(self.histories.lock().unwrap().get(session_id).cloned().unwrap_or_default())
        }

        async fn save_session(&self, record: StoredSession) -> Result<()> {
            if self.fail_save {
                return Err(AgentError::Storage("disk full".to_string()));
            }
            self.saved.lock().unwrap().push(record);
            Ok(())
        }

        async fn save_history(&self, session_id: &str, _history: Vec<Message>) -> Result<()> {
            self.history_saves.lock().unwrap().push(session_id.to_string());
            Ok(())
        }

        async fn ping(&self) -> Result<()> {
            if self.fail_ping {
                return Err(AgentError::Network("connection refused".to_string()));
            }
            Ok(())
        }

        fn backend_name(&self) -> &str {
            "mock"
        }
    }

    #[derive(Default)]
    struct MockGenerator {
        fail_image: bool,
        fail_render: bool,
        render_inputs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for MockGenerator {
        async fn generate_image(&self, _description: &str) -> Result<Vec<u8>> {
            if self.fail_image {
                return Err(AgentError::Generator("image backend down".to_string()));
            }
            Ok(b"png-bytes".to_vec())
        }

        async fn generate_3drender(&self, image_base64: &str) -> Result<Vec<u8>> {
            self.render_inputs.lock().unwrap().push(image_base64.to_string());
            if self.fail_render {
                return Err(AgentError::Generator("render backend down".to_string()));
            }
            Ok(b"glb-bytes".to_vec())
        }
    }

    struct MockPrompts(HashMap<String, String>);

    impl MockPrompts {
        fn standard() -> Self {
            let mut map = HashMap::new();
            map.insert(BASE_PROMPT.to_string(), BASE.to_string());
            map.insert(IMAGE_PROMPT.to_string(), IMAGE_TEMPLATE.to_string());
            Self(map)
        }
    }

    impl PromptManager for MockPrompts {
        fn get(&self, key: &str) -> Result<String> {
            self.0
                .get(key)
                .cloned()
                .ok_or_else(|| AgentError::PromptNotFound(key.to_string()))
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            call_timeout_ms: 500,
        }
    }

    fn test_config() -> AgentConfig {
        AgentConfig {
            retry: fast_retry(),
            ..AgentConfig::default()
        }
    }

    async fn context(
        store: Arc<MockStore>,
        generator: Arc<MockGenerator>,
        script: Arc<LlmScript>,
        config: AgentConfig,
    ) -> Arc<AppContext> {
        Arc::new(
            AppContext::builder(config)
                .store(store)
                .generator(generator)
                .prompts(Arc::new(MockPrompts::standard()))
                .llm_factory(Arc::new(ScriptedFactory { script }))
                .build()
                .await
                .unwrap(),
        )
    }

    async fn default_context(script: Arc<LlmScript>) -> (Arc<AppContext>, Arc<MockStore>) {
        let store = Arc::new(MockStore::default());
        let ctx = context(store.clone(), Arc::new(MockGenerator::default()), script, test_config()).await;
        (ctx, store)
    }

    fn manager(store: Arc<MockStore>, capacity: usize) -> SessionManager {
        SessionManager::new(store, Arc::new(MockPrompts::standard()), fast_retry(), capacity)
    }

    // ─── EventBus Tests ──────────────────────────────────────

    #[test]
    fn test_event_bus_new_is_empty() {
        let bus = EventBus::new();
        assert!(!bus.has_pending());
        assert!(bus.drain().is_empty());
    }

    #[test]
    fn test_event_bus_emit_and_drain() {
        let bus = EventBus::new();
        bus.emit(AgentEvent::TurnStart { session_id: "s1".to_string() });
        bus.emit(AgentEvent::LlmComplete { text: "hello".to_string() });

        assert!(bus.has_pending());
        assert_eq!(bus.drain().len(), 2);
        assert!(!bus.has_pending());
    }

    #[test]
    fn test_event_bus_clone_shares_state() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();

        bus1.emit(AgentEvent::TurnEnd { session_id: "s1".to_string() });
        assert!(bus2.has_pending());
        assert_eq!(bus2.drain().len(), 1);
        assert!(!bus1.has_pending());
    }

    // ─── Retry Tests ─────────────────────────────────────────

    #[tokio::test]
    async fn test_retry_recovers_after_failure() {
        let calls = AtomicUsize::new(0);
        let result = call_with_retry(&fast_retry(), "flaky", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AgentError::Network("blip".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_with_last_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = call_with_retry(&fast_retry(), "broken", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(AgentError::Network(format!("attempt {}", n))) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result {
            Err(AgentError::Network(msg)) => assert_eq!(msg, "attempt 1"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_times_out_slow_calls() {
        let policy = RetryPolicy {
            max_attempts: 1,
            base_delay_ms: 1,
            max_delay_ms: 1,
            call_timeout_ms: 20,
        };
        let result = call_with_retry(&policy, "slow", || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AgentError::Timeout(20))));
    }

    // ─── SessionManager Tests ────────────────────────────────

    #[tokio::test]
    async fn test_add_session_fresh_is_seeded_with_base_prompt() {
        let sessions = manager(Arc::new(MockStore::default()), 16);
        let a = sessions.add_session("").await.unwrap();
        let b = sessions.add_session("").await.unwrap();
        assert_ne!(a, b);

        let history = sessions.get_session_history(&a).await.unwrap();
        assert_eq!(history, vec![Message::user(BASE)]);
    }

    #[tokio::test]
    async fn test_session_history_round_trip() {
        let sessions = manager(Arc::new(MockStore::default()), 16);
        let id = sessions.add_session("").await.unwrap();
        let history = vec![Message::user(BASE), Message::user("hi"), Message::model("hello")];
        sessions.set_session_history(&id, history.clone()).await;
        assert_eq!(sessions.get_session_history(&id).await.unwrap(), history);
    }

    #[tokio::test]
    async fn test_add_session_hydrates_from_store_once() {
        let store = Arc::new(MockStore::default());
        let stored = vec![Message::user(BASE), Message::model("earlier reply")];
        store.histories.lock().unwrap().insert("old".to_string(), stored.clone());
        let sessions = manager(store.clone(), 16);

        assert_eq!(sessions.add_session("old").await.unwrap(), "old");
        assert_eq!(sessions.add_session("old").await.unwrap(), "old");
        assert_eq!(store.history_reads.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.get_session_history("old").await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_add_session_unknown_id_is_seeded() {
        let sessions = manager(Arc::new(MockStore::default()), 16);
        let id = sessions.add_session("never-seen").await.unwrap();
        assert_eq!(id, "never-seen");
        assert_eq!(
            sessions.get_session_history(&id).await.unwrap(),
            vec![Message::user(BASE)]
        );
    }

    #[tokio::test]
    async fn test_get_session_history_falls_back_to_store() {
        let store = Arc::new(MockStore::default());
        store
            .histories
            .lock()
            .unwrap()
            .insert("cold".to_string(), vec![Message::user(BASE)]);
        let sessions = manager(store.clone(), 16);

        let history = sessions.get_session_history("cold").await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!sessions.contains("cold"));
    }

    #[tokio::test]
    async fn test_cache_evicts_least_recently_used() {
        let store = Arc::new(MockStore::default());
        let sessions = manager(store.clone(), 2);

        let a = sessions.add_session("").await.unwrap();
        let b = sessions.add_session("").await.unwrap();
        // Touch `a` so `b` becomes the oldest.
        sessions.get_session_history(&a).await.unwrap();
        let c = sessions.add_session("").await.unwrap();

        assert_eq!(sessions.len(), 2);
        assert!(sessions.contains(&a));
        assert!(!sessions.contains(&b));
        assert!(sessions.contains(&c));
        assert_eq!(*store.history_saves.lock().unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn test_full_cache_replacing_history_evicts_nothing() {
        let store = Arc::new(MockStore::default());
        let sessions = manager(store.clone(), 2);

        let a = sessions.add_session("").await.unwrap();
        let b = sessions.add_session("").await.unwrap();
        let history = vec![Message::user(BASE), Message::user("more")];
        sessions.set_session_history(&a, history.clone()).await;
        sessions.set_session_history(&b, history.clone()).await;

        assert_eq!(sessions.len(), 2);
        assert!(sessions.contains(&a));
        assert!(sessions.contains(&b));
        assert_eq!(sessions.get_session_history(&a).await.unwrap(), history);
        assert!(store.history_saves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_session_forwards_cached_history() {
        let store = Arc::new(MockStore::default());
        let sessions = manager(store.clone(), 16);
        let id = sessions.add_session("").await.unwrap();
        let history = vec![Message::user(BASE), Message::user("draw"), Message::model("ok")];
        sessions.set_session_history(&id, history.clone()).await;

        sessions.save_session(&id, "alice", "a red bicycle", "bikes").await.unwrap();

        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].session_id, id);
        assert_eq!(saved[0].username, "alice");
        assert_eq!(saved[0].image_description, "a red bicycle");
        assert_eq!(saved[0].summary, "bikes");
        assert_eq!(saved[0].history, history);
    }

    #[tokio::test]
    async fn test_save_session_failure_is_persistence_error() {
        let store = Arc::new(MockStore { fail_save: true, ..MockStore::default() });
        let sessions = manager(store, 16);
        let id = sessions.add_session("").await.unwrap();
        let err = sessions.save_session(&id, "alice", "desc", "").await.unwrap_err();
        assert!(matches!(err, AgentError::Persistence(_)));
    }

    #[test]
    fn test_session_lock_is_shared_per_id() {
        let sessions = manager(Arc::new(MockStore::default()), 16);
        let a1 = sessions.session_lock("a");
        let a2 = sessions.session_lock("a");
        let b = sessions.session_lock("b");
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }

    // ─── Processor Tests ─────────────────────────────────────

    async fn process_one(
        ctx: &AppContext,
        sd: &mut SessionData,
        script: Arc<LlmScript>,
        raw: &str,
    ) -> (NextAction, Vec<AgentEvent>) {
        let llm = ScriptedLlm { script, history: Mutex::new(Vec::new()) };
        let bus = EventBus::new();
        let action = Processor::new(sd, ctx, &llm, &bus).process(raw).await;
        (action, bus.drain())
    }

    #[tokio::test]
    async fn test_processor_query_terminates() {
        let script = LlmScript::with_replies(&[]);
        let (ctx, _) = default_context(script.clone()).await;
        let mut sd = SessionData::new("s1", "alice");

        let (action, events) =
            process_one(&ctx, &mut sd, script, r#"{"state": 4, "query": "hello"}"#).await;
        assert_eq!(action, NextAction::Terminate);
        assert_eq!(sd.message, "hello");
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::DirectiveDispatched { state: DirectiveState::Query })));
    }

    #[tokio::test]
    async fn test_processor_exit_sets_summary() {
        let script = LlmScript::with_replies(&[]);
        let (ctx, _) = default_context(script.clone()).await;
        let mut sd = SessionData::new("s1", "alice");

        let (action, _) =
            process_one(&ctx, &mut sd, script, "```json\n{\"state\": 0, \"summary\": \"done\"}\n```").await;
        assert_eq!(action, NextAction::Terminate);
        assert_eq!(sd.summary, "done");
    }

    #[tokio::test]
    async fn test_processor_mem_recall_continues_with_description() {
        let script = LlmScript::with_replies(&[]);
        let (ctx, store) = default_context(script.clone()).await;
        *store.description.lock().unwrap() = Some("a red bicycle".to_string());
        let mut sd = SessionData::new("s1", "alice");

        let (action, _) = process_one(
            &ctx,
            &mut sd,
            script,
            r#"{"state": 1, "data": {"intent": "red bike"}}"#,
        )
        .await;
        assert_eq!(action, NextAction::Continue("a red bicycle".to_string()));
        assert_eq!(sd.image_description, "a red bicycle");
    }

    #[tokio::test]
    async fn test_processor_image_generates_description_and_image() {
        let script = LlmScript::with_replies(&[]);
        *script.description.lock().unwrap() = Some(Ok("a neon dragon over a city".to_string()));
        let (ctx, _) = default_context(script.clone()).await;
        let mut sd = SessionData::new("s1", "alice");

        let (action, events) =
            process_one(&ctx, &mut sd, script.clone(), r#"{"state": 2, "image": "dragon"}"#).await;
        assert_eq!(action, NextAction::Continue(IMAGE_GENERATED.to_string()));
        assert_eq!(sd.image_description, "a neon dragon over a city");
        assert_eq!(sd.image, BASE64.encode(b"png-bytes"));

        let calls = script.content_calls.lock().unwrap();
        assert_eq!(*calls, vec![vec![IMAGE_TEMPLATE.to_string(), "dragon".to_string()]]);
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::ArtifactGenerated { kind: ArtifactKind::Image })));
    }

    #[tokio::test]
    async fn test_processor_model_renders_current_image() {
        let script = LlmScript::with_replies(&[]);
        let generator = Arc::new(MockGenerator::default());
        let ctx = context(
            Arc::new(MockStore::default()),
            generator.clone(),
            script.clone(),
            test_config(),
        )
        .await;
        let mut sd = SessionData::new("s1", "alice");
        sd.set(SessionUpdate::default().image("aW1n"));

        let (action, _) = process_one(&ctx, &mut sd, script, r#"{"state": 3}"#).await;
        assert_eq!(action, NextAction::Continue(MODEL_GENERATED.to_string()));
        assert_eq!(sd.object, BASE64.encode(b"glb-bytes"));
        assert_eq!(*generator.render_inputs.lock().unwrap(), vec!["aW1n".to_string()]);
    }

    #[tokio::test]
    async fn test_processor_image_failure_keeps_partial_progress() {
        let script = LlmScript::with_replies(&[]);
        *script.description.lock().unwrap() = Some(Ok("a quiet lake".to_string()));
        let generator = Arc::new(MockGenerator { fail_image: true, ..MockGenerator::default() });
        let ctx = context(Arc::new(MockStore::default()), generator, script.clone(), test_config()).await;
        let mut sd = SessionData::new("s1", "alice");

        let (action, _) =
            process_one(&ctx, &mut sd, script, r#"{"state": 2, "image": "lake"}"#).await;
        assert_eq!(action, NextAction::Error(DirectiveErrorKind::ExternalCallFailure));
        assert_eq!(sd.image_description, "a quiet lake");
        assert!(sd.image.is_empty());
    }

    #[tokio::test]
    async fn test_processor_recall_failure_is_external_call_failure() {
        let script = LlmScript::with_replies(&[]);
        let (ctx, _) = default_context(script.clone()).await;
        let mut sd = SessionData::new("s1", "alice");

        let (action, _) = process_one(
            &ctx,
            &mut sd,
            script,
            r#"{"state": 1, "data": {"intent": "anything"}}"#,
        )
        .await;
        assert_eq!(action, NextAction::Error(DirectiveErrorKind::ExternalCallFailure));
    }

    #[tokio::test]
    async fn test_processor_rejects_bad_directives() {
        let script = LlmScript::with_replies(&[]);
        let (ctx, _) = default_context(script.clone()).await;
        let mut sd = SessionData::new("s1", "alice");

        let cases = [
            ("not json at all", DirectiveErrorKind::ParseError),
            (r#"{"state": 99}"#, DirectiveErrorKind::UnknownState),
            (r#"{"state": 4}"#, DirectiveErrorKind::SchemaViolation),
            (r#"{"image": "x"}"#, DirectiveErrorKind::SchemaViolation),
        ];
        for (raw, kind) in cases {
            let (action, _) = process_one(&ctx, &mut sd, script.clone(), raw).await;
            assert_eq!(action, NextAction::Error(kind), "input: {}", raw);
        }
        assert_eq!(sd, SessionData::new("s1", "alice"));
    }

    // ─── Agent Tests ─────────────────────────────────────────

    #[tokio::test]
    async fn test_agent_start_new_session_seeds_llm() {
        let script = LlmScript::with_replies(&[]);
        let (ctx, _) = default_context(script.clone()).await;

        let agent = Agent::start(ctx.clone(), "gemini", "alice", "").await.unwrap();
        assert!(!agent.session_id().is_empty());
        assert_eq!(agent.state, AgentState::Idle);
        assert!(ctx.sessions.contains(agent.session_id()));
        assert_eq!(*script.seeded_with.lock().unwrap(), vec![vec![Message::user(BASE)]]);
    }

    #[tokio::test]
    async fn test_agent_query_run() {
        let script = LlmScript::with_replies(&[r#"{"state": 4, "query": "Paris"}"#]);
        let (ctx, store) = default_context(script.clone()).await;

        let mut agent = Agent::start(ctx.clone(), "gemini", "alice", "").await.unwrap();
        let out = agent.run("capital of France?").await.unwrap();

        assert_eq!(out.message, "Paris");
        assert!(out.image.is_empty());
        assert_eq!(out.session_id, agent.session_id());
        assert_eq!(agent.state, AgentState::Idle);

        // base + user + model, written back to the cache
        let history = ctx.sessions.get_session_history(agent.session_id()).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1], Message::user("capital of France?"));
        // Text-only turns never reach the durable store.
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_agent_full_image_and_model_flow() {
        let script = LlmScript::with_replies(&[
            "```json\n{\"state\": 2, \"image\": \"a dragon\"}\n```",
            r#"{"state": 3}"#,
            r#"{"state": 0, "summary": "made a dragon"}"#,
        ]);
        *script.description.lock().unwrap() = Some(Ok("a green dragon".to_string()));
        let (ctx, store) = default_context(script.clone()).await;

        let mut agent = Agent::start(ctx, "gemini", "alice", "").await.unwrap();
        let out = agent.run("draw me a dragon and make it 3D").await.unwrap();

        assert_eq!(out.image, BASE64.encode(b"png-bytes"));
        assert_eq!(out.object, BASE64.encode(b"glb-bytes"));
        assert_eq!(
            script.prompts(),
            vec![
                "draw me a dragon and make it 3D".to_string(),
                IMAGE_GENERATED.to_string(),
                MODEL_GENERATED.to_string(),
            ]
        );

        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].image_description, "a green dragon");
        assert_eq!(saved[0].summary, "made a dragon");
        assert_eq!(saved[0].username, "alice");
        assert_eq!(saved[0].history.len(), 7);
    }

    #[tokio::test]
    async fn test_agent_mem_recall_feeds_description_back() {
        let script = LlmScript::with_replies(&[
            r#"{"state": 1, "data": {"intent": "red bike"}}"#,
            r#"{"state": 4, "query": "Found it"}"#,
        ]);
        let (ctx, store) = default_context(script.clone()).await;
        *store.description.lock().unwrap() = Some("a red bicycle".to_string());

        let mut agent = Agent::start(ctx, "gemini", "alice", "").await.unwrap();
        let out = agent.run("remember the red bike?").await.unwrap();

        assert_eq!(out.message, "Found it");
        assert_eq!(script.prompts()[1], "a red bicycle");
        assert_eq!(store.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_agent_corrects_unknown_state() {
        let script = LlmScript::with_replies(&[
            r#"{"state": 99}"#,
            r#"{"state": 4, "query": "fixed"}"#,
        ]);
        let (ctx, _) = default_context(script.clone()).await;

        let mut agent = Agent::start(ctx, "gemini", "alice", "").await.unwrap();
        let out = agent.run("hi").await.unwrap();

        assert_eq!(out.message, "fixed");
        assert_eq!(
            script.prompts()[1],
            corrective_prompt(DirectiveErrorKind::UnknownState)
        );
        let events = agent.event_bus().drain();
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::CorrectiveRetry { attempt: 1, kind: DirectiveErrorKind::UnknownState }
        )));
    }

    #[tokio::test]
    async fn test_agent_gives_up_after_corrective_retries() {
        let script = LlmScript::with_replies(&["garbage", "still garbage", "more garbage", "unused"]);
        let (ctx, _) = default_context(script.clone()).await;

        let mut agent = Agent::start(ctx, "gemini", "alice", "").await.unwrap();
        let out = agent.run("hi").await.unwrap();

        assert_eq!(out.message, format!("{}: ParseError", FAILURE_MARKER));
        // First try plus two corrective prompts
        assert_eq!(script.prompts().len(), 3);
        assert!(matches!(agent.state, AgentState::Error(_)));
    }

    #[tokio::test]
    async fn test_agent_llm_failure_ends_conversation() {
        let script = LlmScript::with_replies(&[]);
        let failures: VecDeque<Result<String>> = VecDeque::from(vec![
            Err(AgentError::Network("down".to_string())),
            Err(AgentError::Network("still down".to_string())),
        ]);
        *script.replies.lock().unwrap() = failures;
        let (ctx, _) = default_context(script.clone()).await;

        let mut agent = Agent::start(ctx, "gemini", "alice", "").await.unwrap();
        let out = agent.run("hi").await.unwrap();
        assert_eq!(out.message, format!("{}: ExternalCallFailure", FAILURE_MARKER));
    }

    #[tokio::test]
    async fn test_agent_stops_at_max_iterations() {
        let replies = vec![r#"{"state": 3}"#; 10];
        let script = LlmScript::with_replies(&replies);
        let store = Arc::new(MockStore::default());
        let config = AgentConfig { max_iterations: 3, ..test_config() };
        let ctx = context(store, Arc::new(MockGenerator::default()), script.clone(), config).await;

        let mut agent = Agent::start(ctx, "gemini", "alice", "").await.unwrap();
        let out = agent.run("spin").await.unwrap();
        assert!(out.message.starts_with(FAILURE_MARKER));
        assert_eq!(script.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_agent_persistence_failure_still_returns_output() {
        let script = LlmScript::with_replies(&[
            r#"{"state": 2, "image": "cat"}"#,
            r#"{"state": 4, "query": "here is your cat"}"#,
        ]);
        let store = Arc::new(MockStore { fail_save: true, ..MockStore::default() });
        let ctx = context(store, Arc::new(MockGenerator::default()), script, test_config()).await;

        let mut agent = Agent::start(ctx, "gemini", "alice", "").await.unwrap();
        let out = agent.run("a cat please").await.unwrap();
        assert_eq!(out.message, "here is your cat");
        assert!(!out.image.is_empty());
    }

    #[tokio::test]
    async fn test_agent_resumes_stored_session() {
        let script = LlmScript::with_replies(&[r#"{"state": 4, "query": "welcome back"}"#]);
        let store = Arc::new(MockStore::default());
        let stored = vec![Message::user(BASE), Message::user("hi"), Message::model("{}")];
        store.histories.lock().unwrap().insert("old".to_string(), stored.clone());
        let ctx = context(store, Arc::new(MockGenerator::default()), script.clone(), test_config()).await;

        let mut agent = Agent::start(ctx, "gemini", "alice", "old").await.unwrap();
        assert_eq!(agent.session_id(), "old");
        assert_eq!(*script.seeded_with.lock().unwrap(), vec![stored]);

        let out = agent.run("again").await.unwrap();
        assert_eq!(out.session_id, "old");
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_deadline_cancels_run() {
        let script = LlmScript::with_replies(&[r#"{"state": 4, "query": "never reached"}"#]);
        *script.stall_after.lock().unwrap() = Some(0);
        let config = AgentConfig {
            retry: RetryPolicy { call_timeout_ms: 60_000, ..fast_retry() },
            ..test_config()
        };
        let store = Arc::new(MockStore::default());
        let ctx = context(store.clone(), Arc::new(MockGenerator::default()), script, config).await;

        let mut agent = Agent::start(ctx, "gemini", "alice", "").await.unwrap();
        let err = agent
            .run_with_deadline("hello", Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Timeout(50)));
        assert_eq!(agent.state, AgentState::Cancelled);
        assert!(agent.session_data().message.is_empty());
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_cancel_keeps_partial_session_data() {
        let script = LlmScript::with_replies(&[r#"{"state": 2, "image": "boat"}"#]);
        *script.description.lock().unwrap() = Some(Ok("a small boat".to_string()));
        // The LLM hangs on its second turn, after the image exists.
        *script.stall_after.lock().unwrap() = Some(1);
        let config = AgentConfig {
            retry: RetryPolicy { call_timeout_ms: 60_000, ..fast_retry() },
            ..test_config()
        };
        let store = Arc::new(MockStore::default());
        let ctx = context(store.clone(), Arc::new(MockGenerator::default()), script, config).await;

        let mut agent = Agent::start(ctx.clone(), "gemini", "alice", "").await.unwrap();
        let err = agent
            .run_until("draw a boat", tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(agent.state, AgentState::Cancelled);
        assert_eq!(agent.session_data().image_description, "a small boat");
        assert_eq!(agent.session_data().image, BASE64.encode(b"png-bytes"));
        assert!(store.saved.lock().unwrap().is_empty());

        // History up to the cancellation is kept in the cache.
        let history = ctx.sessions.get_session_history(agent.session_id()).await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_agents_on_same_session_are_serialized() {
        let script = LlmScript::with_replies(&[]);
        let (ctx, _) = default_context(script).await;

        let first = Agent::start(ctx.clone(), "gemini", "alice", "shared").await.unwrap();
        let waiting = tokio::spawn({
            let ctx = ctx.clone();
            async move {
                Agent::start(ctx, "gemini", "bob", "shared")
                    .await
                    .map(|a| a.session_id().to_string())
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        drop(first);
        let id = waiting.await.unwrap().unwrap();
        assert_eq!(id, "shared");
    }

    #[tokio::test]
    async fn test_agent_start_failure_releases_session_lock() {
        let script = LlmScript::with_replies(&[]);
        let store = Arc::new(MockStore { fail_history: true, ..MockStore::default() });
        let ctx = context(store, Arc::new(MockGenerator::default()), script, test_config()).await;

        for _ in 0..3 {
            let started = Agent::start(ctx.clone(), "gemini", "alice", "ghost").await;
            assert!(matches!(started, Err(AgentError::Storage(_))));
        }
        assert_eq!(ctx.sessions.lock_count(), 0);
        assert!(!ctx.sessions.contains("ghost"));
    }

    // ─── AppContext Tests ────────────────────────────────────

    #[tokio::test]
    async fn test_context_requires_all_collaborators() {
        let result = AppContext::builder(test_config())
            .store(Arc::new(MockStore::default()))
            .build()
            .await;
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[tokio::test]
    async fn test_context_fails_fast_on_unreachable_store() {
        let store = Arc::new(MockStore { fail_ping: true, ..MockStore::default() });
        let result = AppContext::builder(test_config())
            .store(store)
            .generator(Arc::new(MockGenerator::default()))
            .prompts(Arc::new(MockPrompts::standard()))
            .llm_factory(Arc::new(ScriptedFactory { script: LlmScript::with_replies(&[]) }))
            .build()
            .await;
        assert!(matches!(result, Err(AgentError::Storage(_))));
    }

    #[tokio::test]
    async fn test_context_requires_prompt_templates() {
        let result = AppContext::builder(test_config())
            .store(Arc::new(MockStore::default()))
            .generator(Arc::new(MockGenerator::default()))
            .prompts(Arc::new(MockPrompts(HashMap::new())))
            .llm_factory(Arc::new(ScriptedFactory { script: LlmScript::with_replies(&[]) }))
            .build()
            .await;
        assert!(matches!(result, Err(AgentError::PromptNotFound(_))));
    }
}
