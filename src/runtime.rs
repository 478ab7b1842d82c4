//! Runtime services and lifecycle for the relay-bot.

use std::sync::Arc;

use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{Res, Void},
    },
    relay::{RelayQueue, RelayReceiver, RelayWorker, WorkerState},
    service::{chat::ChatClient, llm::LlmClient},
};

/// Where the relay worker is in its life.
enum Stage {
    /// Built but not spawned.
    Ready(RelayWorker),
    /// Spawned; the handle yields the backend adapter when the worker stops.
    Running(JoinHandle<LlmClient>),
    /// Shut down.
    Stopped,
}

/// Runtime service context that can be shared across the application.
///
/// This struct holds the configuration, the chat client, and the relay pipeline.
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The chat client instance.
    pub chat: ChatClient,
    queue: RelayQueue,
    shutdown: CancellationToken,
    worker_state: watch::Receiver<WorkerState>,
    stage: Arc<Mutex<Stage>>,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        let shutdown = CancellationToken::new();
        let (queue, receiver) = RelayQueue::new();

        // Initialize the LLM client.
        let llm = LlmClient::from_config(&config)?;

        // Initialize the discord client.
        let chat = ChatClient::discord(&config, queue.clone(), shutdown.clone()).await?;

        Ok(Self::from_parts(config, llm, chat, queue, receiver, shutdown))
    }

    /// Assemble a runtime from already-built services.
    pub fn from_parts(config: Config, llm: LlmClient, chat: ChatClient, queue: RelayQueue, receiver: RelayReceiver, shutdown: CancellationToken) -> Self {
        let worker = RelayWorker::from_config(&config, receiver, llm, chat.clone(), shutdown.clone());
        let worker_state = worker.state();

        Self {
            config,
            chat,
            queue,
            shutdown,
            worker_state,
            stage: Arc::new(Mutex::new(Stage::Ready(worker))),
        }
    }

    /// The producer side of the relay queue.
    pub fn queue(&self) -> &RelayQueue {
        &self.queue
    }

    /// The token that requests shutdown when cancelled.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// The worker's current state.
    pub fn worker_state(&self) -> WorkerState {
        *self.worker_state.borrow()
    }

    /// Follow the worker's state transitions.
    pub fn subscribe_worker_state(&self) -> watch::Receiver<WorkerState> {
        self.worker_state.clone()
    }

    /// Spawn the relay worker. Fails if it was already started or the runtime was shut down.
    #[instrument(skip_all)]
    pub async fn start(&self) -> Void {
        let mut stage = self.stage.lock().await;

        match std::mem::replace(&mut *stage, Stage::Stopped) {
            Stage::Ready(worker) => {
                *stage = Stage::Running(worker.spawn());
                info!("Relay worker spawned.");
                Ok(())
            }
            Stage::Running(handle) => {
                *stage = Stage::Running(handle);
                Err(anyhow::anyhow!("Relay worker is already running."))
            }
            Stage::Stopped => Err(anyhow::anyhow!("Runtime has been shut down.")),
        }
    }

    /// Start the worker and the chat listener, and shut down when either a shutdown is
    /// requested, Ctrl-C arrives, or the listener ends.
    pub async fn run(&self) -> Void {
        self.start().await?;

        let result = tokio::select! {
            result = self.chat.start() => {
                warn!("Chat listener stopped.");
                result
            }
            _ = self.shutdown.cancelled() => {
                info!("Shutdown requested.");
                Ok(())
            }
            result = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C.");
                result.map_err(Into::into)
            }
        };

        let shutdown = self.shutdown().await;

        result.and(shutdown)
    }

    /// Stop intake, drain the queue, and release the backend and the chat transport.
    ///
    /// Every step runs even if an earlier one fails. Calling this again is a no-op.
    #[instrument(skip_all)]
    pub async fn shutdown(&self) -> Void {
        // Concurrent callers wait here until the first shutdown has finished.
        let mut stage = self.stage.lock().await;

        let previous = std::mem::replace(&mut *stage, Stage::Stopped);
        if matches!(previous, Stage::Stopped) {
            debug!("Runtime already shut down.");
            return Ok(());
        }

        info!("Shutting down ...");

        let mut errors = Vec::new();

        // Close intake, then let the worker drain what is queued.
        self.queue.close();
        self.shutdown.cancel();

        let llm = match previous {
            // Never spawned: drain in place so nothing queued is dropped.
            Stage::Ready(worker) => Some(worker.run().await),
            Stage::Running(handle) => match handle.await {
                Ok(llm) => Some(llm),
                Err(err) => {
                    errors.push(anyhow::anyhow!("Relay worker failed: {err}"));
                    None
                }
            },
            Stage::Stopped => None,
        };

        if let Some(mut llm) = llm {
            llm.cleanup().await;
        }

        if let Err(err) = self.chat.shutdown().await {
            errors.push(err);
        }

        if errors.is_empty() {
            info!("Shutdown complete.");
            return Ok(());
        }

        for err in &errors {
            error!("Shutdown error: {err}");
        }

        Err(anyhow::anyhow!(
            "Shutdown finished with {} error(s): {}",
            errors.len(),
            errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
        ))
    }
}
