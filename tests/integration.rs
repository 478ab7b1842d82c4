#![cfg(test)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use mockall::mock;
use relay_bot::{
    base::{
        config::{Config, ConfigInner},
        error::BackendError,
        prompts,
        types::{ChatRequest, ConversationHistory, Res, Void},
    },
    interaction::inbound::{Command, InboundContext, InboundEvent, InboundOutcome, handle_inbound_event},
    relay::{EnqueueError, RelayQueue, WorkerState},
    runtime::Runtime,
    service::{
        chat::{ChatClient, GenericChatClient},
        llm::{GenericLlmClient, LlmClient, Provider},
    },
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// Mocks.

// Mock chat client for testing.

mock! {
    pub Chat {}

    #[async_trait]
    impl GenericChatClient for Chat {
        fn bot_user_id(&self) -> &str;
        async fn start(&self) -> Void;
        async fn send_message(&self, channel_id: &str, mention_prefix: &str, text: &str) -> Void;
        async fn purge_messages(&self, channel_id: &str, limit: u32) -> Res<usize>;
        async fn shutdown(&self) -> Void;
    }
}

#[derive(Debug, Clone)]
struct Delivery {
    channel_id: String,
    mention: String,
    text: String,
    at: Instant,
}

/// Everything the mock chat client observed.
#[derive(Clone, Default)]
struct ChatProbe {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    purges: Arc<Mutex<Vec<(String, u32)>>>,
    shutdowns: Arc<AtomicUsize>,
}

impl ChatProbe {
    fn texts(&self) -> Vec<String> {
        self.deliveries.lock().unwrap().iter().map(|d| d.text.clone()).collect()
    }
}

/// Mock chat client that records every call; sends to channel `gone` fail.
fn get_mock_chat(probe: &ChatProbe) -> MockChat {
    let mut mock = MockChat::new();

    mock.expect_bot_user_id().return_const("42".to_string());
    mock.expect_start().returning(|| Ok(()));

    let deliveries = probe.deliveries.clone();
    mock.expect_send_message().returning(move |channel_id, mention, text| {
        deliveries.lock().unwrap().push(Delivery {
            channel_id: channel_id.to_string(),
            mention: mention.to_string(),
            text: text.to_string(),
            at: Instant::now(),
        });

        if channel_id == "gone" { Err(anyhow::anyhow!("Unknown Channel")) } else { Ok(()) }
    });

    let purges = probe.purges.clone();
    mock.expect_purge_messages().returning(move |channel_id, limit| {
        purges.lock().unwrap().push((channel_id.to_string(), limit));
        Ok(limit as usize)
    });

    let shutdowns = probe.shutdowns.clone();
    mock.expect_shutdown().returning(move || {
        shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    mock
}

/// Everything the scripted backend observed.
#[derive(Clone, Default)]
struct LlmProbe {
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
}

/// Backend that echoes after a fixed latency, or always fails.
struct ScriptedLlm {
    probe: LlmProbe,
    latency: Duration,
    outage: bool,
    history: ConversationHistory,
}

impl ScriptedLlm {
    fn echo(probe: &LlmProbe, latency: Duration) -> Self {
        Self {
            probe: probe.clone(),
            latency,
            outage: false,
            history: ConversationHistory::new(),
        }
    }

    fn outage(probe: &LlmProbe) -> Self {
        Self {
            outage: true,
            ..Self::echo(probe, Duration::ZERO)
        }
    }
}

#[async_trait]
impl GenericLlmClient for ScriptedLlm {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn send(&mut self, text: &str) -> Result<String, BackendError> {
        self.probe.calls.lock().unwrap().push(text.to_string());

        let in_flight = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        tokio::time::sleep(self.latency).await;

        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.outage {
            return Err(BackendError::Upstream {
                provider: "gemini".into(),
                message: "503 Service Unavailable".into(),
                status: Some(503),
            });
        }

        let reply = format!("echo: {text}");
        self.history.append_exchange(text, reply.as_str());
        Ok(reply)
    }

    fn rotate_credential(&mut self) {}

    fn active_credential(&self) -> usize {
        0
    }

    fn history(&self) -> &ConversationHistory {
        &self.history
    }

    async fn cleanup(&mut self) {
        self.probe.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

// Helpers.

fn create_test_config(pacing: Option<Duration>) -> Config {
    Config {
        inner: Arc::new(ConfigInner {
            retry_tiers: 1,
            retry_attempts_per_tier: 3,
            retry_attempt_delay: Duration::from_secs(2),
            backend_timeout: Duration::from_secs(60),
            pacing_enabled: pacing.is_some(),
            pacing_delay: pacing.unwrap_or_default(),
            ..Default::default()
        }),
    }
}

fn setup_runtime(config: Config, llm: ScriptedLlm, chat: &ChatProbe) -> Runtime {
    let (queue, receiver) = RelayQueue::new();

    Runtime::from_parts(
        config,
        LlmClient::new(Box::new(llm)),
        ChatClient::new(Arc::new(get_mock_chat(chat))),
        queue,
        receiver,
        CancellationToken::new(),
    )
}

fn request(channel_id: &str, text: &str) -> ChatRequest {
    ChatRequest::new(channel_id, "7", "<@7>", text)
}

fn event(sender_id: &str, text: &str, addressed: bool) -> InboundEvent {
    InboundEvent {
        sender_id: sender_id.to_string(),
        sender_mention: format!("<@{sender_id}>"),
        channel_id: "100".to_string(),
        raw_text: text.to_string(),
        is_self: false,
        addressed,
    }
}

/// Let spawned command tasks run to completion.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// Relay worker and lifecycle.

#[tokio::test(start_paused = true)]
async fn test_requests_are_answered_in_order_with_pacing() {
    let llm_probe = LlmProbe::default();
    let chat_probe = ChatProbe::default();
    let runtime = setup_runtime(
        create_test_config(Some(Duration::from_secs(1))),
        ScriptedLlm::echo(&llm_probe, Duration::from_millis(100)),
        &chat_probe,
    );

    for text in ["1", "2", "3", "4", "5"] {
        runtime.queue().enqueue(request("100", text)).unwrap();
    }

    runtime.start().await.unwrap();
    runtime.shutdown().await.unwrap();

    assert_eq!(*llm_probe.calls.lock().unwrap(), vec!["1", "2", "3", "4", "5"]);
    assert_eq!(llm_probe.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(chat_probe.texts(), vec!["echo: 1", "echo: 2", "echo: 3", "echo: 4", "echo: 5"]);

    let deliveries = chat_probe.deliveries.lock().unwrap().clone();
    assert!(deliveries.iter().all(|d| d.mention == "<@7>" && d.channel_id == "100"));
    for pair in deliveries.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_secs(1));
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_every_queued_request() {
    let llm_probe = LlmProbe::default();
    let chat_probe = ChatProbe::default();
    let runtime = setup_runtime(create_test_config(None), ScriptedLlm::echo(&llm_probe, Duration::from_secs(5)), &chat_probe);

    runtime.start().await.unwrap();

    for text in ["a", "b", "c", "d"] {
        runtime.queue().enqueue(request("100", text)).unwrap();
    }

    runtime.shutdown().await.unwrap();

    assert_eq!(chat_probe.texts(), vec!["echo: a", "echo: b", "echo: c", "echo: d"]);
    assert_eq!(runtime.worker_state(), WorkerState::Stopped);
    assert_eq!(runtime.queue().enqueue(request("100", "late")), Err(EnqueueError::IntakeClosed));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_before_start_still_drains() {
    let llm_probe = LlmProbe::default();
    let chat_probe = ChatProbe::default();
    let runtime = setup_runtime(create_test_config(None), ScriptedLlm::echo(&llm_probe, Duration::ZERO), &chat_probe);

    runtime.queue().enqueue(request("100", "queued early")).unwrap();
    runtime.shutdown().await.unwrap();

    assert_eq!(chat_probe.texts(), vec!["echo: queued early"]);
    assert_eq!(llm_probe.cleanups.load(Ordering::SeqCst), 1);
    assert!(runtime.start().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_double_shutdown_is_a_no_op() {
    let llm_probe = LlmProbe::default();
    let chat_probe = ChatProbe::default();
    let runtime = setup_runtime(create_test_config(None), ScriptedLlm::echo(&llm_probe, Duration::ZERO), &chat_probe);

    runtime.start().await.unwrap();

    runtime.shutdown().await.unwrap();
    runtime.shutdown().await.unwrap();

    assert_eq!(llm_probe.cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(chat_probe.shutdowns.load(Ordering::SeqCst), 1);
    assert!(runtime.shutdown_token().is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_double_start_is_rejected() {
    let chat_probe = ChatProbe::default();
    let runtime = setup_runtime(create_test_config(None), ScriptedLlm::echo(&LlmProbe::default(), Duration::ZERO), &chat_probe);

    runtime.start().await.unwrap();
    assert!(runtime.start().await.is_err());

    runtime.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_worker_reports_state_transitions() {
    let llm_probe = LlmProbe::default();
    let chat_probe = ChatProbe::default();
    let runtime = setup_runtime(create_test_config(None), ScriptedLlm::echo(&llm_probe, Duration::from_secs(10)), &chat_probe);

    assert_eq!(runtime.worker_state(), WorkerState::Idle);

    runtime.start().await.unwrap();
    runtime.queue().enqueue(request("100", "slow")).unwrap();

    let mut state = runtime.subscribe_worker_state();
    state.wait_for(|s| *s == WorkerState::Processing).await.unwrap();

    runtime.shutdown().await.unwrap();
    assert_eq!(runtime.worker_state(), WorkerState::Stopped);
    assert_eq!(chat_probe.texts(), vec!["echo: slow"]);
}

#[tokio::test(start_paused = true)]
async fn test_delivery_failure_does_not_stop_the_worker() {
    let llm_probe = LlmProbe::default();
    let chat_probe = ChatProbe::default();
    let runtime = setup_runtime(create_test_config(None), ScriptedLlm::echo(&llm_probe, Duration::ZERO), &chat_probe);

    runtime.queue().enqueue(request("gone", "first")).unwrap();
    runtime.queue().enqueue(request("100", "second")).unwrap();

    runtime.start().await.unwrap();
    runtime.shutdown().await.unwrap();

    let deliveries = chat_probe.deliveries.lock().unwrap().clone();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[1].channel_id, "100");
    assert_eq!(deliveries[1].text, "echo: second");
}

#[tokio::test(start_paused = true)]
async fn test_permanent_outage_sends_fallback_after_budget() {
    let llm_probe = LlmProbe::default();
    let chat_probe = ChatProbe::default();
    let runtime = setup_runtime(create_test_config(None), ScriptedLlm::outage(&llm_probe), &chat_probe);

    runtime.queue().enqueue(request("100", "hello")).unwrap();

    let start = Instant::now();
    runtime.start().await.unwrap();
    runtime.shutdown().await.unwrap();

    assert_eq!(llm_probe.calls.lock().unwrap().len(), 3);
    assert_eq!(chat_probe.texts(), vec![prompts::FALLBACK_REPLY]);
    assert!(start.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_run_shuts_down_when_listener_ends() {
    let llm_probe = LlmProbe::default();
    let chat_probe = ChatProbe::default();
    let runtime = setup_runtime(create_test_config(None), ScriptedLlm::echo(&llm_probe, Duration::ZERO), &chat_probe);

    runtime.queue().enqueue(request("100", "before exit")).unwrap();

    // The mock listener returns at once, which ends the run.
    runtime.run().await.unwrap();

    assert_eq!(chat_probe.texts(), vec!["echo: before exit"]);
    assert_eq!(llm_probe.cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(chat_probe.shutdowns.load(Ordering::SeqCst), 1);
}

// Inbound routing.

fn inbound_context(chat_probe: &ChatProbe) -> (InboundContext, relay_bot::relay::RelayReceiver) {
    let (queue, receiver) = RelayQueue::new();

    let ctx = InboundContext {
        queue,
        chat: ChatClient::new(Arc::new(get_mock_chat(chat_probe))),
        owner_id: Some("1".to_string()),
        purge_limit: 50,
        shutdown: CancellationToken::new(),
    };

    (ctx, receiver)
}

#[tokio::test(start_paused = true)]
async fn test_inbound_relays_mentions_and_ignores_the_rest() {
    let chat_probe = ChatProbe::default();
    let (ctx, mut receiver) = inbound_context(&chat_probe);

    let own = InboundEvent {
        is_self: true,
        ..event("42", "<@42> talking to myself", true)
    };
    assert_eq!(handle_inbound_event(own, &ctx), InboundOutcome::Ignored);
    assert_eq!(handle_inbound_event(event("7", "just chatting", false), &ctx), InboundOutcome::NotAddressed);
    assert_eq!(handle_inbound_event(event("7", "<@42> what is rust?", true), &ctx), InboundOutcome::Enqueued(0));
    assert_eq!(handle_inbound_event(event("7", "<@!42>", true), &ctx), InboundOutcome::Enqueued(1));

    let first = receiver.recv().await.unwrap();
    assert_eq!(first.request.text, "what is rust?");
    assert_eq!(first.request.sender_mention, "<@7>");
    assert_eq!(first.request.channel_id, "100");

    // A bare mention is queued with empty text; the relay answers it with the empty-input reply.
    assert_eq!(receiver.recv().await.unwrap().request.text, "");
    assert!(receiver.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_exit_from_owner_requests_shutdown() {
    let chat_probe = ChatProbe::default();
    let (ctx, _receiver) = inbound_context(&chat_probe);

    // Anyone else saying exit is just talking to the bot.
    assert_eq!(handle_inbound_event(event("7", "<@42> exit", true), &ctx), InboundOutcome::Enqueued(0));
    assert!(!ctx.shutdown.is_cancelled());

    assert_eq!(handle_inbound_event(event("1", "<@42> Exit", true), &ctx), InboundOutcome::Command(Command::Exit));
    assert!(ctx.queue.is_closed());

    settle().await;

    assert!(ctx.shutdown.is_cancelled());
    assert_eq!(chat_probe.texts(), vec![prompts::FAREWELL_REPLY]);

    // Intake is closed: the sender is told the bot is going away.
    assert_eq!(handle_inbound_event(event("7", "<@42> hello?", true), &ctx), InboundOutcome::Rejected);

    settle().await;

    assert_eq!(chat_probe.texts(), vec![prompts::FAREWELL_REPLY, prompts::SHUTTING_DOWN_REPLY]);
}

#[tokio::test(start_paused = true)]
async fn test_clear_keyword_purges_instead_of_relaying() {
    let chat_probe = ChatProbe::default();
    let (ctx, receiver) = inbound_context(&chat_probe);

    assert_eq!(
        handle_inbound_event(event("7", "<@42> clear", true), &ctx),
        InboundOutcome::Command(Command::Purge { limit: 50 })
    );

    settle().await;

    assert!(receiver.is_empty());
    assert_eq!(*chat_probe.purges.lock().unwrap(), vec![("100".to_string(), 50)]);
    assert_eq!(chat_probe.texts(), vec![prompts::PURGE_DONE_REPLY]);
}

#[tokio::test(start_paused = true)]
async fn test_prefix_commands_respect_the_owner() {
    let chat_probe = ChatProbe::default();
    let (ctx, receiver) = inbound_context(&chat_probe);

    assert_eq!(handle_inbound_event(event("7", "!hello", false), &ctx), InboundOutcome::Command(Command::Greet));
    assert_eq!(handle_inbound_event(event("7", "!clear 5", false), &ctx), InboundOutcome::Command(Command::Denied));
    assert_eq!(handle_inbound_event(event("7", "!exit", false), &ctx), InboundOutcome::Command(Command::Denied));

    settle().await;

    assert!(!ctx.shutdown.is_cancelled());
    assert!(chat_probe.purges.lock().unwrap().is_empty());

    let mut texts = chat_probe.texts();
    texts.sort();
    let mut expected = vec![prompts::GREETING_REPLY.to_string(), prompts::OWNER_ONLY_REPLY.to_string(), prompts::OWNER_ONLY_REPLY.to_string()];
    expected.sort();
    assert_eq!(texts, expected);

    assert_eq!(handle_inbound_event(event("1", "!clear 5", false), &ctx), InboundOutcome::Command(Command::Purge { limit: 5 }));

    settle().await;

    assert_eq!(*chat_probe.purges.lock().unwrap(), vec![("100".to_string(), 5)]);
    assert!(receiver.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bare_mention_gets_the_empty_input_reply() {
    let llm_probe = LlmProbe::default();
    let chat_probe = ChatProbe::default();
    let runtime = setup_runtime(create_test_config(None), ScriptedLlm::echo(&llm_probe, Duration::ZERO), &chat_probe);

    let ctx = InboundContext {
        queue: runtime.queue().clone(),
        chat: runtime.chat.clone(),
        owner_id: None,
        purge_limit: 100,
        shutdown: runtime.shutdown_token().clone(),
    };

    assert_eq!(handle_inbound_event(event("7", "<@42>   ", true), &ctx), InboundOutcome::Enqueued(0));

    runtime.start().await.unwrap();
    runtime.shutdown().await.unwrap();

    assert!(llm_probe.calls.lock().unwrap().is_empty());
    assert_eq!(chat_probe.texts(), vec![prompts::EMPTY_INPUT_REPLY]);
}
