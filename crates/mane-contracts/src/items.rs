//! Per-label work-item state and the observable store that owns it.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use serde::Serialize;

use crate::payload::ImagePayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Done,
    Error,
}

/// State of one style label within the active run.
///
/// `image` holds the latest successful result. It survives resets and later
/// failures so callers can keep displaying the previous image next to an
/// error message.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub label: String,
    pub status: ItemStatus,
    pub image: Option<ImagePayload>,
    pub error: Option<String>,
}

impl WorkItem {
    pub fn pending(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status: ItemStatus::Pending,
            image: None,
            error: None,
        }
    }
}

/// Observable label -> [`WorkItem`] map.
///
/// Every mutation replaces the whole entry and notifies subscribers with a
/// clone of the new item. The store is the only shared mutable state in the
/// system; all mutations go through one mutex, so the `Pending` guard in
/// [`ItemStore::mark_pending`] is a single atomic check-and-set.
#[derive(Debug, Clone)]
pub struct ItemStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    items: Mutex<IndexMap<String, WorkItem>>,
    subscribers: Mutex<Vec<Sender<WorkItem>>>,
}

impl Default for ItemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                items: Mutex::new(IndexMap::new()),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Discards the previous run's items and seeds fresh `Pending` entries.
    pub fn replace_all(&self, labels: &[&str]) {
        let fresh: Vec<WorkItem> = labels
            .iter()
            .map(|label| WorkItem::pending(*label))
            .collect();
        {
            let mut items = lock(&self.inner.items);
            items.clear();
            for item in &fresh {
                items.insert(item.label.clone(), item.clone());
            }
        }
        for item in fresh {
            self.notify(item);
        }
    }

    pub fn get(&self, label: &str) -> Option<WorkItem> {
        lock(&self.inner.items).get(label).cloned()
    }

    /// All items in catalog order.
    pub fn snapshot(&self) -> Vec<WorkItem> {
        lock(&self.inner.items).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.items).is_empty()
    }

    /// Atomic `Pending` guard: flips a settled item back to `Pending` and
    /// returns `true`, or returns `false` when the item is unknown or already
    /// `Pending` (work for it is still in flight).
    pub fn mark_pending(&self, label: &str) -> bool {
        let replaced = {
            let mut items = lock(&self.inner.items);
            let Some(current) = items.get(label) else {
                return false;
            };
            if current.status == ItemStatus::Pending {
                return false;
            }
            let next = WorkItem {
                label: current.label.clone(),
                status: ItemStatus::Pending,
                image: current.image.clone(),
                error: None,
            };
            items.insert(label.to_string(), next.clone());
            next
        };
        self.notify(replaced);
        true
    }

    /// Remix variant of the guard: additionally requires a prior successful
    /// image, which is returned as the remix source.
    pub fn mark_pending_for_remix(&self, label: &str) -> Option<ImagePayload> {
        let (replaced, source) = {
            let mut items = lock(&self.inner.items);
            let current = items.get(label)?;
            if current.status == ItemStatus::Pending {
                return None;
            }
            let source = current.image.clone()?;
            let next = WorkItem {
                label: current.label.clone(),
                status: ItemStatus::Pending,
                image: Some(source.clone()),
                error: None,
            };
            items.insert(label.to_string(), next.clone());
            (next, source)
        };
        self.notify(replaced);
        Some(source)
    }

    pub fn complete(&self, label: &str, image: ImagePayload) {
        self.settle(label, ItemStatus::Done, Some(image), None);
    }

    /// Marks the item failed. The previous image, if any, stays on the item.
    pub fn fail(&self, label: &str, message: impl Into<String>) {
        self.settle(label, ItemStatus::Error, None, Some(message.into()));
    }

    fn settle(
        &self,
        label: &str,
        status: ItemStatus,
        image: Option<ImagePayload>,
        error: Option<String>,
    ) {
        let replaced = {
            let mut items = lock(&self.inner.items);
            let Some(current) = items.get(label) else {
                return;
            };
            let next = WorkItem {
                label: current.label.clone(),
                status,
                image: image.or_else(|| current.image.clone()),
                error,
            };
            items.insert(label.to_string(), next.clone());
            next
        };
        self.notify(replaced);
    }

    /// The complete label -> image mapping, available once every item is
    /// `Done`. This is the album assembler's input shape.
    pub fn completed_images(&self) -> Option<IndexMap<String, ImagePayload>> {
        let items = lock(&self.inner.items);
        if items.is_empty() {
            return None;
        }
        let mut images = IndexMap::new();
        for item in items.values() {
            if item.status != ItemStatus::Done {
                return None;
            }
            images.insert(item.label.clone(), item.image.clone()?);
        }
        Some(images)
    }

    /// Registers a subscriber notified with a clone of every replaced item.
    pub fn subscribe(&self) -> Receiver<WorkItem> {
        let (tx, rx) = mpsc::channel();
        lock(&self.inner.subscribers).push(tx);
        rx
    }

    fn notify(&self, item: WorkItem) {
        let mut subscribers = lock(&self.inner.subscribers);
        subscribers.retain(|subscriber| subscriber.send(item.clone()).is_ok());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
