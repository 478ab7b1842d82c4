//! The relay worker: sole consumer of the relay queue.

use std::time::Duration;

use chrono::Utc;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, instrument, warn};

use crate::{
    base::config::Config,
    service::{chat::ChatClient, llm::LlmClient},
};

use super::{
    queue::{RelayQueueEntry, RelayReceiver},
    retry::RetryPolicy,
};

/// Observable state of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for the next request.
    Idle,
    /// Exactly one request in flight.
    Processing,
    /// Shutdown requested; finishing whatever is queued.
    Draining,
    /// Terminal.
    Stopped,
}

/// Pulls one request at a time, relays it through the retry policy, and delivers the reply.
pub struct RelayWorker {
    receiver: RelayReceiver,
    llm: LlmClient,
    chat: ChatClient,
    policy: RetryPolicy,
    pacing: Option<Duration>,
    shutdown: CancellationToken,
    state: watch::Sender<WorkerState>,
}

impl RelayWorker {
    pub fn new(receiver: RelayReceiver, llm: LlmClient, chat: ChatClient, policy: RetryPolicy, pacing: Option<Duration>, shutdown: CancellationToken) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);

        Self {
            receiver,
            llm,
            chat,
            policy,
            pacing,
            shutdown,
            state,
        }
    }

    /// Build a worker with the retry budget and pacing from the configuration.
    pub fn from_config(config: &Config, receiver: RelayReceiver, llm: LlmClient, chat: ChatClient, shutdown: CancellationToken) -> Self {
        let pacing = config.pacing_enabled.then_some(config.pacing_delay);

        Self::new(receiver, llm, chat, RetryPolicy::from_config(config), pacing, shutdown)
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Run the worker as a background task. The task hands the backend adapter back when it stops.
    pub fn spawn(self) -> JoinHandle<LlmClient> {
        tokio::spawn(self.run().in_current_span())
    }

    /// Process requests until shutdown is requested and the queue is empty.
    #[instrument(name = "RelayWorker::run", skip_all)]
    pub async fn run(mut self) -> LlmClient {
        info!("Relay worker started.");

        let mut draining = false;

        loop {
            let next = if draining {
                self.receiver.recv().await
            } else {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {
                        self.begin_draining();
                        draining = true;
                        continue;
                    }
                    next = self.receiver.recv() => next,
                }
            };

            let Some(entry) = next else {
                break;
            };

            if !draining {
                self.state.send_replace(WorkerState::Processing);
            }

            self.process(entry).await;

            if !draining {
                self.state.send_replace(WorkerState::Idle);
            }
        }

        self.state.send_replace(WorkerState::Stopped);
        info!("Relay worker stopped.");

        self.llm
    }

    fn begin_draining(&mut self) {
        // Nothing new can arrive at the channel level; what is queued is still received.
        self.receiver.close();
        self.state.send_replace(WorkerState::Draining);

        info!("Relay worker draining {} queued request(s).", self.receiver.len());
    }

    #[instrument(name = "RelayWorker::process", skip_all, fields(sequence = entry.sequence, channel = %entry.request.channel_id))]
    async fn process(&mut self, entry: RelayQueueEntry) {
        let request = entry.request;
        let waited = Utc::now().signed_duration_since(request.enqueued_at);

        info!("Processing request #{} from {} after {} ms in queue.", entry.sequence, request.sender_id, waited.num_milliseconds());

        let reply = match self.policy.invoke(&mut *self.llm, &request.text).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!("Relay failed, sending fallback: {err}");
                err.user_message().to_string()
            }
        };

        // Delivery failures only cost this request.
        if let Err(err) = self.chat.send_message(&request.channel_id, &request.sender_mention, &reply).await {
            error!("Failed to deliver reply for request #{}: {err}", entry.sequence);
        } else {
            info!("Delivered reply for request #{}.", entry.sequence);
        }

        if let Some(pacing) = self.pacing {
            tokio::time::sleep(pacing).await;
        }
    }
}
