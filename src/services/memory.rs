//! In-process implementations of the collaborator traits.
//!
//! Lets the whole pipeline run in one process without Redis, RabbitMQ or S3.
//! Each double supports simple fault injection.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::job::{JobDescriptor, StatusRecord};
use crate::services::queue::{
    Acknowledger, DeliveryStream, JobConsumer, JobPublisher, QueueDelivery, QueueError,
};
use crate::services::status_store::{StatusStore, StatusStoreError};
use crate::services::storage::{ObjectStorage, StorageError};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Status store
// ---------------------------------------------------------------------------

/// Status store with per-record expiry driven by the tokio clock.
pub struct MemoryStatusStore {
    ttl: Duration,
    records: Mutex<HashMap<Uuid, (StatusRecord, Instant)>>,
    history: Mutex<HashMap<Uuid, Vec<StatusRecord>>>,
    fail_writes: AtomicBool,
}

impl MemoryStatusStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every record written for `job_id`, oldest first.
    pub fn history(&self, job_id: Uuid) -> Vec<StatusRecord> {
        locked(&self.history)
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Jobs that have had at least one record written.
    pub fn job_ids(&self) -> Vec<Uuid> {
        locked(&self.history).keys().copied().collect()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn put(&self, job_id: Uuid, record: &StatusRecord) -> Result<(), StatusStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StatusStoreError::Unavailable("injected write failure".into()));
        }
        let expires_at = Instant::now() + self.ttl;
        locked(&self.records).insert(job_id, (record.clone(), expires_at));
        locked(&self.history)
            .entry(job_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<StatusRecord>, StatusStoreError> {
        let mut records = locked(&self.records);
        match records.get(&job_id) {
            Some((_, expires_at)) if Instant::now() >= *expires_at => {
                records.remove(&job_id);
                Ok(None)
            }
            Some((record, _)) => Ok(Some(record.clone())),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<(), StatusStoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Object storage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
    /// Number of times the key has been written.
    pub writes: u32,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        locked(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.object(bucket, key).is_some()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = locked(&self.objects)
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected put failure".into()));
        }
        let mut objects = locked(&self.objects);
        let writes = objects
            .get(&(bucket.to_string(), key.to_string()))
            .map_or(1, |o| o.writes + 1);
        objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.to_vec(),
                content_type: content_type.to_string(),
                writes,
            },
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected get failure".into()));
        }
        self.object(bucket, key)
            .map(|o| o.data)
            .ok_or_else(|| StorageError::NotFound(format!("{bucket}/{key}")))
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl_secs: u32,
    ) -> Result<String, StorageError> {
        Ok(format!("memory://{bucket}/{key}?expires_in={ttl_secs}"))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        locked(&self.objects).remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Job queue
// ---------------------------------------------------------------------------

/// How a delivery was settled by its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Nack { requeue: bool },
}

#[derive(Debug, Clone)]
struct Message {
    tag: u64,
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    unacked: HashMap<u64, Message>,
    settlements: Vec<(Vec<u8>, Settlement)>,
    next_tag: u64,
    closed: bool,
}

/// At-least-once queue with manual acknowledgment.
///
/// Unsettled deliveries can be pushed back with [`MemoryJobQueue::redeliver_unacked`]
/// to mimic a consumer connection dropping. After [`MemoryJobQueue::close`] the
/// delivery stream ends once nothing is ready or awaiting settlement.
#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    fail_publishes: Arc<AtomicBool>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Enqueue raw bytes, bypassing descriptor serialization.
    pub fn push_raw(&self, payload: Vec<u8>) {
        let mut state = locked(&self.state);
        let tag = state.next_tag;
        state.next_tag += 1;
        state.ready.push_back(Message {
            tag,
            payload,
            redelivered: false,
        });
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn close(&self) {
        locked(&self.state).closed = true;
        self.notify.notify_waiters();
    }

    pub fn redeliver_unacked(&self) {
        let mut state = locked(&self.state);
        let mut pending: Vec<Message> = state.unacked.drain().map(|(_, m)| m).collect();
        pending.sort_by_key(|m| m.tag);
        for mut message in pending {
            message.redelivered = true;
            state.ready.push_back(message);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn ready_count(&self) -> usize {
        locked(&self.state).ready.len()
    }

    pub fn unacked_count(&self) -> usize {
        locked(&self.state).unacked.len()
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        locked(&self.state)
            .settlements
            .iter()
            .map(|(_, s)| *s)
            .collect()
    }

    /// Settlements of deliveries whose payload is a descriptor for `job_id`.
    pub fn settlements_for(&self, job_id: Uuid) -> Vec<Settlement> {
        locked(&self.state)
            .settlements
            .iter()
            .filter(|(payload, _)| {
                JobDescriptor::from_bytes(payload).is_ok_and(|d| d.job_id == job_id)
            })
            .map(|(_, s)| *s)
            .collect()
    }

    fn next_delivery(&self) -> Option<Option<QueueDelivery>> {
        let mut state = locked(&self.state);
        if let Some(message) = state.ready.pop_front() {
            state.unacked.insert(message.tag, message.clone());
            return Some(Some(QueueDelivery {
                payload: message.payload,
                redelivered: message.redelivered,
                acker: Box::new(MemoryAcker {
                    tag: message.tag,
                    queue: self.clone(),
                }),
            }));
        }
        if state.closed && state.unacked.is_empty() {
            return None;
        }
        Some(None)
    }

    fn settle(&self, tag: u64, settlement: Settlement) -> Result<(), QueueError> {
        let mut state = locked(&self.state);
        let mut message = state
            .unacked
            .remove(&tag)
            .ok_or_else(|| QueueError::Rejected(format!("unknown delivery tag {tag}")))?;
        state
            .settlements
            .push((message.payload.clone(), settlement));
        if settlement == (Settlement::Nack { requeue: true }) {
            message.redelivered = true;
            state.ready.push_back(message);
        }
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl JobPublisher for MemoryJobQueue {
    async fn publish(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(QueueError::Disconnected);
        }
        self.push_raw(job.to_bytes()?);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(QueueError::Disconnected);
        }
        Ok(())
    }
}

#[async_trait]
impl JobConsumer for MemoryJobQueue {
    async fn consume(&self) -> Result<DeliveryStream, QueueError> {
        let queue = self.clone();
        let deliveries = stream::unfold(queue, |queue| async move {
            let notify = queue.notify.clone();
            loop {
                let notified = notify.notified();
                match queue.next_delivery() {
                    Some(Some(delivery)) => return Some((Ok(delivery), queue)),
                    Some(None) => notified.await,
                    None => return None,
                }
            }
        });
        Ok(deliveries.boxed())
    }
}

struct MemoryAcker {
    tag: u64,
    queue: MemoryJobQueue,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.queue.settle(self.tag, Settlement::Ack)
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        self.queue.settle(self.tag, Settlement::Nack { requeue })
    }
}
