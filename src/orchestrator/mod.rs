//! Delivery orchestrator: fan-out by domain,
//! coordination policies, retry with backoff, and backpressure.

pub mod coordination;
pub mod peer_client;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::sync::mpsc;

use crate::agent_registry::{AgentRegistry, DeliveryMode};
use crate::discovery::DiscoveryCache;
use crate::domain_types::{GlobalConcurrency, PerPeerConcurrency};
use crate::message::{CoordinationConfig, DeliveryRecord, DeliveryStatus, Message};
use crate::metrics::{DeliveryAttemptMetric, MetricsProvider};
use crate::store::MessageStore;
use crate::time_provider::SharedTimeProvider;

pub use coordination::evaluate_conditional;
pub use peer_client::{DeliveryAttemptOutcome, DeliveryFailureKind, PeerClient};
pub use retry::RetryPolicy;

/// Errors raised by the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("global in-flight capacity reached")]
    GlobalBackpressure,

    #[error("delivery cancelled")]
    Cancelled,

    #[error("internal orchestrator error: {0}")]
    Internal(String),
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub per_peer_concurrency: PerPeerConcurrency,
    pub global_concurrency: GlobalConcurrency,
    pub retry_policy: RetryPolicy,
    pub local_domain: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            per_peer_concurrency: PerPeerConcurrency::default(),
            global_concurrency: GlobalConcurrency::default(),
            retry_policy: RetryPolicy::default(),
            local_domain: "localhost".to_string(),
        }
    }
}

struct WorkItem {
    message: Arc<Message>,
}

/// Drives recipients of accepted messages to a terminal delivery status.
pub struct DeliveryOrchestrator {
    config: OrchestratorConfig,
    discovery: Arc<DiscoveryCache>,
    agent_registry: Arc<AgentRegistry>,
    peer_client: Arc<dyn PeerClient>,
    store: Arc<dyn MessageStore>,
    metrics: Arc<dyn MetricsProvider>,
    time: SharedTimeProvider,
    global_semaphore: Arc<Semaphore>,
    per_peer_semaphores: DashMap<String, Arc<Semaphore>>,
    queue: mpsc::Sender<WorkItem>,
}

impl DeliveryOrchestrator {
    /// Builds an orchestrator and spawns its worker pool, draining the
    /// internal message-passing queue between accept and deliver.
    #[must_use]
    pub fn spawn(
        config: OrchestratorConfig,
        discovery: Arc<DiscoveryCache>,
        agent_registry: Arc<AgentRegistry>,
        peer_client: Arc<dyn PeerClient>,
        store: Arc<dyn MessageStore>,
        metrics: Arc<dyn MetricsProvider>,
        time: SharedTimeProvider,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let global_semaphore = Arc::new(Semaphore::new(config.global_concurrency.as_usize()));
        let orchestrator = Arc::new(Self {
            config,
            discovery,
            agent_registry,
            peer_client,
            store,
            metrics,
            time,
            global_semaphore,
            per_peer_semaphores: DashMap::new(),
            queue: tx,
        });
        orchestrator.clone().run_workers(rx, worker_count);
        orchestrator
    }

    fn run_workers(self: Arc<Self>, rx: mpsc::Receiver<WorkItem>, worker_count: usize) {
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for _ in 0..worker_count.max(1) {
            let orchestrator = self.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let item = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    match item {
                        Some(work) => orchestrator.deliver(work.message).await,
                        None => break,
                    }
                }
            });
        }
    }

    /// Whether the global in-flight bound currently has room. Checked by
    /// the message manager before accepting a new send so that global
    /// exhaustion rejects the request itself rather than
    /// failing recipients that already queued.
    #[must_use]
    pub fn has_global_capacity(&self) -> bool {
        self.global_semaphore.available_permits() > 0
    }

    /// Enqueues a validated, idempotency-committed message for delivery.
    /// Returns immediately once the work item is accepted onto the queue.
    pub async fn accept(&self, message: Arc<Message>) -> Result<(), OrchestratorError> {
        for recipient in &message.recipients {
            let record = DeliveryRecord {
                address: recipient.clone(),
                status: DeliveryStatus::Queued,
                attempts: 0,
                last_error: None,
                updated_at: Utc::now(),
            };
            let _ = self.store.put_delivery_record(&message.message_id, record).await;
        }
        self.queue
            .send(WorkItem { message })
            .await
            .map_err(|_| OrchestratorError::Internal("queue closed".to_string()))
    }

    fn per_peer_semaphore(&self, domain: &str) -> Arc<Semaphore> {
        self.per_peer_semaphores
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_peer_concurrency.as_usize())))
            .clone()
    }

    async fn deliver(&self, message: Arc<Message>) {
        match message.coordination.clone() {
            Some(CoordinationConfig::Sequential { sequence, timeout, .. }) => {
                self.deliver_sequential(&message, &sequence, timeout.as_duration()).await;
            }
            Some(CoordinationConfig::Conditional { conditions, timeout, .. }) => {
                self.deliver_conditional(&message, &conditions, timeout.as_duration()).await;
            }
            Some(CoordinationConfig::Parallel { timeout, .. }) => {
                self.deliver_parallel(&message, &message.recipients.clone(), timeout.as_duration())
                    .await;
            }
            None => {
                self.deliver_parallel(&message, &message.recipients.clone(), Duration::from_secs(300))
                    .await;
            }
        }
    }

    async fn deliver_parallel(
        &self,
        message: &Arc<Message>,
        recipients: &[crate::domain_types::EmailAddress],
        timeout: Duration,
    ) {
        let tasks: Vec<_> = recipients
            .iter()
            .map(|recipient| {
                let message = message.clone();
                let recipient = recipient.clone();
                async move { self.deliver_one(&message, recipient.as_ref()).await }
            })
            .collect();

        let result = tokio::time::timeout(timeout, futures::future::join_all(tasks)).await;
        if result.is_err() {
            for recipient in recipients {
                self.mark_timed_out(message, recipient.as_ref(), "coordination_timeout").await;
            }
        }
    }

    async fn deliver_sequential(
        &self,
        message: &Arc<Message>,
        sequence: &[crate::domain_types::EmailAddress],
        timeout: Duration,
    ) {
        let deadline = self.time.instant() + timeout;
        for (index, recipient) in sequence.iter().enumerate() {
            if self.time.instant() >= deadline {
                self.mark_timed_out(message, recipient.as_ref(), "coordination_timeout").await;
                continue;
            }
            let status = self.deliver_one(message, recipient.as_ref()).await;
            if status != DeliveryStatus::Delivered {
                for remaining in &sequence[index + 1..] {
                    self.mark_failed(message, remaining.as_ref(), "sequential_predecessor_failed")
                        .await;
                }
                return;
            }
        }
    }

    async fn deliver_conditional(
        &self,
        message: &Arc<Message>,
        conditions: &[crate::message::ConditionalRule],
        timeout: Duration,
    ) {
        let mut delivered: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut failed: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut active: Vec<crate::domain_types::EmailAddress> = Vec::new();

        for rule in conditions {
            let branch = if evaluate_conditional(&rule.condition, &delivered, &failed) {
                &rule.then_recipients
            } else {
                rule.else_recipients.as_ref().unwrap_or(&rule.then_recipients)
            };
            for recipient in branch {
                if !active.iter().any(|a| a == recipient) {
                    active.push(recipient.clone());
                }
            }
        }

        let tasks: Vec<_> = active
            .iter()
            .map(|recipient| {
                let message = message.clone();
                let recipient = recipient.clone();
                async move {
                    let status = self.deliver_one(&message, recipient.as_ref()).await;
                    (recipient, status)
                }
            })
            .collect();

        let result = tokio::time::timeout(timeout, futures::future::join_all(tasks)).await;
        match result {
            Ok(outcomes) => {
                for (recipient, status) in outcomes {
                    if status == DeliveryStatus::Delivered {
                        delivered.insert(recipient.to_string());
                    } else {
                        failed.insert(recipient.to_string());
                    }
                }
            }
            Err(_) => {
                for recipient in &active {
                    self.mark_timed_out(message, recipient.as_ref(), "coordination_timeout").await;
                }
            }
        }
    }

    async fn mark_timed_out(&self, message: &Message, recipient: &str, reason: &str) {
        self.mark_failed(message, recipient, reason).await;
        self.metrics.record_backpressure_rejection(None).await;
    }

    async fn mark_failed(&self, message: &Message, recipient: &str, reason: &str) {
        let mut record = DeliveryRecord::pending(
            crate::domain_types::EmailAddress::try_new(recipient).expect("already validated"),
            Utc::now(),
        );
        record.transition(DeliveryStatus::Failed, Utc::now());
        record.record_failure(reason, Utc::now());
        let _ = self.store.put_delivery_record(&message.message_id, record).await;
    }

    /// Drives a single recipient through attempts until a terminal status.
    async fn deliver_one(&self, message: &Message, recipient: &str) -> DeliveryStatus {
        let domain = recipient.rsplit('@').next().unwrap_or_default().to_string();
        let is_local = domain == self.config.local_domain;

        // The request-level check lives in the message manager, ahead of
        // `accept`; this is a backstop for the narrow race between that
        // check and a permit actually being free.
        let global_permit = match self.global_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.metrics.record_backpressure_rejection(None).await;
                self.mark_failed(message, recipient, "global_backpressure").await;
                return DeliveryStatus::Failed;
            }
        };
        let peer_semaphore = self.per_peer_semaphore(&domain);
        let _peer_permit = peer_semaphore.acquire_owned().await;

        let mut attempt = 1u32;
        loop {
            let started = self.time.instant();
            let outcome = if is_local {
                self.deliver_local(message, recipient).await
            } else {
                self.deliver_remote(message, recipient, &domain).await
            };
            let duration = self.time.instant().duration_since(started);

            let status_label = match &outcome {
                DeliveryAttemptOutcome::Delivered => "delivered",
                DeliveryAttemptOutcome::Transient(_) => "transient_error",
                DeliveryAttemptOutcome::Permanent(_) => "permanent_error",
            };
            self.metrics
                .record_delivery_attempt(DeliveryAttemptMetric {
                    domain: domain.clone(),
                    attempt,
                    duration,
                    status: status_label,
                })
                .await;

            match outcome {
                DeliveryAttemptOutcome::Delivered => {
                    let mut record = DeliveryRecord::pending(
                        crate::domain_types::EmailAddress::try_new(recipient).expect("validated"),
                        Utc::now(),
                    );
                    record.attempts = attempt;
                    record.transition(DeliveryStatus::Delivered, Utc::now());
                    let _ = self.store.put_delivery_record(&message.message_id, record).await;
                    drop(global_permit);
                    return DeliveryStatus::Delivered;
                }
                DeliveryAttemptOutcome::Permanent(reason) => {
                    self.mark_failed(message, recipient, &reason).await;
                    drop(global_permit);
                    return DeliveryStatus::Failed;
                }
                DeliveryAttemptOutcome::Transient(reason) => {
                    if attempt >= self.config.retry_policy.max_attempts {
                        self.mark_failed(message, recipient, &reason).await;
                        drop(global_permit);
                        return DeliveryStatus::Failed;
                    }
                    let mut record = DeliveryRecord::pending(
                        crate::domain_types::EmailAddress::try_new(recipient).expect("validated"),
                        Utc::now(),
                    );
                    record.attempts = attempt;
                    record.transition(DeliveryStatus::Retrying, Utc::now());
                    record.last_error = Some(reason);
                    let _ = self.store.put_delivery_record(&message.message_id, record).await;

                    let backoff = self.config.retry_policy.backoff_for(attempt);
                    self.time.sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn deliver_local(&self, message: &Message, recipient: &str) -> DeliveryAttemptOutcome {
        let Ok(agent) = self.agent_registry.get_agent(recipient) else {
            return DeliveryAttemptOutcome::Permanent("unknown local agent".to_string());
        };
        match agent.delivery_mode {
            DeliveryMode::Pull => {
                match self.store.enqueue_inbox(recipient, message.message_id).await {
                    Ok(()) => DeliveryAttemptOutcome::Delivered,
                    Err(err) => DeliveryAttemptOutcome::Transient(err.to_string()),
                }
            }
            DeliveryMode::Push => {
                let Some(target) = agent.push_target.clone() else {
                    return DeliveryAttemptOutcome::Permanent("push agent missing target".to_string());
                };
                self.peer_client
                    .push_local(&target, message, message.idempotency_key)
                    .await
            }
        }
    }

    async fn deliver_remote(
        &self,
        message: &Message,
        recipient: &str,
        domain: &str,
    ) -> DeliveryAttemptOutcome {
        let capability = match self.discovery.resolve(domain).await {
            Ok(capability) => capability,
            Err(err) => return DeliveryAttemptOutcome::Transient(err.to_string()),
        };
        self.peer_client
            .deliver_remote(&capability, message, recipient, message.idempotency_key)
            .await
    }
}
