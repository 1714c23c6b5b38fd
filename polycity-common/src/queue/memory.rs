//! In-process stage queues

use super::{encode, Delivery, StageQueue};
use crate::models::{Stage, WorkItem};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    stage: Stage,
    payload: String,
    attempts: u32,
    leased_until: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    // Ordered by id, which is also enqueue order
    entries: BTreeMap<i64, Entry>,
}

#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Internal("memory queue mutex poisoned".to_string()))
    }
}

#[async_trait]
impl StageQueue for MemoryQueue {
    async fn push(&self, stage: Stage, item: &WorkItem) -> Result<i64> {
        let payload = encode(item)?;
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.entries.insert(
            id,
            Entry {
                stage,
                payload,
                attempts: 0,
                leased_until: None,
            },
        );
        Ok(id)
    }

    async fn pull(&self, stage: Stage, lease: Duration) -> Result<Option<Delivery>> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        let visible = inner.entries.iter_mut().find(|(_, entry)| {
            entry.stage == stage && entry.leased_until.map_or(true, |until| until <= now)
        });

        Ok(visible.map(|(id, entry)| {
            entry.attempts += 1;
            entry.leased_until = Some(now + lease);
            Delivery {
                id: *id,
                attempts: entry.attempts,
                payload: entry.payload.clone(),
            }
        }))
    }

    async fn ack(&self, delivery_id: i64) -> Result<()> {
        self.lock()?.entries.remove(&delivery_id);
        Ok(())
    }

    async fn release(&self, delivery_id: i64) -> Result<()> {
        if let Some(entry) = self.lock()?.entries.get_mut(&delivery_id) {
            entry.leased_until = None;
        }
        Ok(())
    }

    async fn len(&self, stage: Stage) -> Result<u64> {
        Ok(self
            .lock()?
            .entries
            .values()
            .filter(|entry| entry.stage == stage)
            .count() as u64)
    }

    async fn recover_abandoned(&self) -> Result<u64> {
        let mut inner = self.lock()?;
        let mut recovered = 0;
        for entry in inner.entries.values_mut() {
            if entry.leased_until.take().is_some() {
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}
