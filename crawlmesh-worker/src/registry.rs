//! Task registry
//!
//! Holds the loaded task types of every synchronized client, keyed
//! `{client_id}_{task_name}`. Each entry bounds its concurrent executions
//! to the task's `max_threads` and pools initialized instances between
//! executions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::task::{CrawlTask, TaskError, TaskFactory};

/// One task type of a bundle, ready to be installed
pub struct TaskEntry {
    pub task_name: String,
    pub max_threads: usize,
    pub factory: Arc<dyn TaskFactory>,
}

struct TaskSlot {
    key: String,
    client_id: String,
    factory: Arc<dyn TaskFactory>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn CrawlTask>>>,
    retired: AtomicBool,
}

impl TaskSlot {
    fn checkin(&self, mut task: Box<dyn CrawlTask>) {
        if self.retired.load(Ordering::Acquire) {
            task.stop();
            return;
        }
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    /// Refuse new checkouts and stop every pooled instance
    fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.permits.close();

        let idle: Vec<_> = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for mut task in idle {
            task.stop();
        }
    }
}

/// Exclusive use of one task instance
///
/// Dropping the lease returns the instance to its pool, or stops it if the
/// task was unloaded meanwhile. Instances run blocking code, so a lease
/// should be prepared, used and dropped on a blocking thread.
pub struct TaskLease {
    slot: Arc<TaskSlot>,
    task: Option<Box<dyn CrawlTask>>,
    _permit: OwnedSemaphorePermit,
}

impl TaskLease {
    /// The leased instance, created and initialized if the pool was empty
    pub fn prepare(&mut self) -> Result<&mut dyn CrawlTask, TaskError> {
        if self.task.is_none() {
            let mut task = self
                .slot
                .factory
                .create()
                .map_err(|e| TaskError::Init(format!("{:#}", e)))?;
            task.init()?;
            tracing::debug!("Created new instance of {}", self.slot.key);
            self.task = Some(task);
        }

        match self.task.as_deref_mut() {
            Some(task) => Ok(task),
            None => Err(TaskError::Init(format!(
                "no instance of {} available",
                self.slot.key
            ))),
        }
    }
}

impl Drop for TaskLease {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.slot.checkin(task);
        }
    }
}

/// Registry of loaded task types
#[derive(Default)]
pub struct TaskRegistry {
    slots: RwLock<HashMap<String, Arc<TaskSlot>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every task of `client_id` with `entries`
    ///
    /// One instance of each task is created and initialized up front. If any
    /// of them fails, nothing is replaced. Blocking.
    pub fn install(&self, client_id: &str, entries: Vec<TaskEntry>) -> anyhow::Result<()> {
        let mut prepared: Vec<Arc<TaskSlot>> = Vec::with_capacity(entries.len());

        for entry in entries {
            let key = format!("{}_{}", client_id, entry.task_name);
            let instance = entry.factory.create().and_then(|mut task| {
                task.init()?;
                Ok(task)
            });

            match instance {
                Ok(task) => prepared.push(Arc::new(TaskSlot {
                    key,
                    client_id: client_id.to_string(),
                    factory: entry.factory,
                    permits: Arc::new(Semaphore::new(entry.max_threads.max(1))),
                    idle: Mutex::new(vec![task]),
                    retired: AtomicBool::new(false),
                })),
                Err(e) => {
                    for slot in &prepared {
                        slot.retire();
                    }
                    return Err(e.context(format!("Failed to initialize {}", key)));
                }
            }
        }

        let replaced = {
            let mut slots = self.write();
            let replaced = take_client(&mut slots, client_id);
            for slot in prepared {
                tracing::debug!("Registered task {}", slot.key);
                slots.insert(slot.key.clone(), slot);
            }
            replaced
        };

        for slot in replaced {
            slot.retire();
        }

        Ok(())
    }

    /// Unload every task of `client_id`, returning how many were dropped
    ///
    /// Executions in progress finish normally; their instances are stopped
    /// when released. Blocking.
    pub fn remove_client(&self, client_id: &str) -> usize {
        let removed = take_client(&mut self.write(), client_id);
        let count = removed.len();
        for slot in removed {
            slot.retire();
        }
        count
    }

    /// Wait for a free execution slot of `task_key`
    pub async fn checkout(&self, task_key: &str) -> Result<TaskLease, TaskError> {
        let slot = self
            .read()
            .get(task_key)
            .cloned()
            .ok_or_else(|| TaskError::Missing(format!("{} is not loaded", task_key)))?;

        let permit = slot
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TaskError::Missing(format!("{} was unloaded", task_key)))?;

        let task = slot
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        Ok(TaskLease {
            slot,
            task,
            _permit: permit,
        })
    }

    pub fn contains(&self, task_key: &str) -> bool {
        self.read().contains_key(task_key)
    }

    /// Keys of every loaded task, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Unload everything, calling each pooled instance's `stop` hook. Blocking.
    pub fn shutdown(&self) {
        let slots: Vec<_> = self.write().drain().map(|(_, slot)| slot).collect();
        tracing::info!("Stopping {} task type(s)", slots.len());
        for slot in slots {
            slot.retire();
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<TaskSlot>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<TaskSlot>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn take_client(slots: &mut HashMap<String, Arc<TaskSlot>>, client_id: &str) -> Vec<Arc<TaskSlot>> {
    let keys: Vec<String> = slots
        .iter()
        .filter(|(_, slot)| slot.client_id == client_id)
        .map(|(key, _)| key.clone())
        .collect();

    keys.iter().filter_map(|key| slots.remove(key)).collect()
}
