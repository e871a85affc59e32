use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{Destination, Message, MessageDraft, TaskId},
    protocol::ServerEvent,
};
use storage::{StoreError, Storage};
use tracing::{debug, error, info, warn};

use crate::{
    hub::{Broadcaster, Target},
    presence::PresenceRegistry,
};

/// A send waiting for its deadline. Tasks live only in memory: there is no
/// cancellation and a restart loses every task that has not fired yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub deadline: DateTime<Utc>,
    pub draft: MessageDraft,
}

struct SchedulerInner {
    storage: Storage,
    presence: PresenceRegistry,
    broadcaster: Arc<dyn Broadcaster>,
    pending: Mutex<BTreeMap<TaskId, ScheduledTask>>,
    next_task_id: AtomicI64,
}

/// Decides when a message ships, then persists it and fans it out.
#[derive(Clone)]
pub struct DeliveryScheduler {
    inner: Arc<SchedulerInner>,
}

impl DeliveryScheduler {
    pub fn new(
        storage: Storage,
        presence: PresenceRegistry,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                storage,
                presence,
                broadcaster,
                pending: Mutex::new(BTreeMap::new()),
                next_task_id: AtomicI64::new(1),
            }),
        }
    }

    /// Immediate sends (no deadline, or a deadline at or before `now`) are
    /// delivered before this returns. Later deadlines become a
    /// [`ScheduledTask`] that fires once on its own. Outcomes are only
    /// visible through published events and the store.
    pub async fn submit(&self, mut draft: MessageDraft, now: DateTime<Utc>) {
        if let Err(error) = draft.validate() {
            warn!(sender = %draft.sender, %error, "rejecting invalid message draft");
            return;
        }

        let scheduled_for = draft.scheduled_for;
        match scheduled_for {
            Some(deadline) if deadline > now => {
                self.defer(draft, deadline, now);
            }
            _ => {
                // a deadline already in the past is stored like a plain send
                draft.scheduled_for = None;
                self.deliver(draft, now).await;
            }
        }
    }

    /// Not-yet-fired tasks, earliest deadline first.
    pub fn pending(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self.lock_pending().values().cloned().collect();
        tasks.sort_by_key(|task| (task.deadline, task.id));
        tasks
    }

    fn defer(&self, draft: MessageDraft, deadline: DateTime<Utc>, now: DateTime<Utc>) -> TaskId {
        let id = TaskId(self.inner.next_task_id.fetch_add(1, Ordering::Relaxed));
        let delay = (deadline - now).to_std().unwrap_or_default();
        self.lock_pending().insert(
            id,
            ScheduledTask {
                id,
                deadline,
                draft,
            },
        );
        info!(task_id = %id, %deadline, delay_ms = delay.as_millis() as u64, "send deferred");

        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let task = scheduler.lock_pending().remove(&id);
            let Some(task) = task else {
                return;
            };
            debug!(task_id = %task.id, "deferred send firing");
            scheduler.deliver(task.draft, task.deadline).await;
        });
        id
    }

    async fn deliver(&self, draft: MessageDraft, created_at: DateTime<Utc>) {
        let message = match self.inner.storage.persist(&draft, created_at).await {
            Ok(message) => message,
            Err(StoreError::Validation(error)) => {
                warn!(sender = %draft.sender, %error, "message failed validation; dropped");
                return;
            }
            Err(error) => {
                error!(sender = %draft.sender, %error, "failed to persist message; dropped without retry");
                return;
            }
        };
        self.fan_out(message).await;
    }

    async fn fan_out(&self, message: Message) {
        let broadcaster = &self.inner.broadcaster;
        match &message.destination {
            Destination::Room { room } => {
                debug!(message_id = %message.id, room, "publishing to room");
                broadcaster
                    .publish(
                        Target::Room(room.clone()),
                        ServerEvent::ReceiveMessage(message.clone()),
                    )
                    .await;
            }
            Destination::Direct { receiver } => {
                let presence = &self.inner.presence;
                let receiver_connection = presence.resolve(receiver).await;
                let sender_connection = presence.resolve(&message.sender).await;

                match receiver_connection {
                    Some(connection) => {
                        broadcaster
                            .publish(
                                Target::Connection(connection),
                                ServerEvent::ReceiveMessage(message.clone()),
                            )
                            .await;
                    }
                    None => {
                        debug!(message_id = %message.id, receiver, "receiver offline; kept for history")
                    }
                }

                match sender_connection {
                    Some(connection) if Some(connection) != receiver_connection => {
                        broadcaster
                            .publish(
                                Target::Connection(connection),
                                ServerEvent::ReceiveMessage(message.clone()),
                            )
                            .await;
                    }
                    _ => {}
                }
            }
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, BTreeMap<TaskId, ScheduledTask>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
