//! Worker-pool orchestration of one generation run, plus targeted
//! retry/remix that never disturbs sibling items.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use mane_contracts::catalog::{self, StyleCategory};
use mane_contracts::items::ItemStore;
use mane_contracts::payload::ImagePayload;

use crate::generate::GenerationClient;
use crate::remix::RemixClient;
use crate::transport::{ModelTransport, RetryPolicy};

pub const DEFAULT_WORKERS: usize = 2;

/// Joins the initial run's worker threads; the run has settled once every
/// worker has exited (the shared queue is drained).
pub struct RunHandle {
    workers: Vec<JoinHandle<()>>,
}

impl RunHandle {
    pub fn wait(self) {
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

#[derive(Clone)]
struct ActiveRun {
    category: StyleCategory,
    source: ImagePayload,
}

/// Owns the work-item set. All mutations flow through the item store, one
/// full-item replacement at a time; callers outside only observe and invoke.
pub struct Orchestrator {
    store: ItemStore,
    generator: Arc<GenerationClient>,
    remixer: Arc<RemixClient>,
    workers: usize,
    run: Mutex<Option<ActiveRun>>,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn ModelTransport>, policy: RetryPolicy, workers: usize) -> Self {
        Self {
            store: ItemStore::new(),
            generator: Arc::new(GenerationClient::new(Arc::clone(&transport), policy)),
            remixer: Arc::new(RemixClient::new(transport, policy)),
            workers: workers.max(1),
            run: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    /// Replaces the active run: seeds `Pending` items for every label in the
    /// category, then starts the worker pool over a shared queue. At most
    /// `workers` generation calls from the pool are in flight at once.
    pub fn start_run(&self, category: StyleCategory, source: ImagePayload) -> Result<RunHandle> {
        let labels = category.labels();
        self.store.replace_all(&labels);
        *lock(&self.run) = Some(ActiveRun {
            category,
            source: source.clone(),
        });

        let queue: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(
            labels.iter().map(|label| label.to_string()).collect(),
        ));

        let mut workers = Vec::with_capacity(self.workers);
        for index in 0..self.workers {
            let queue = Arc::clone(&queue);
            let store = self.store.clone();
            let generator = Arc::clone(&self.generator);
            let source = source.clone();
            let worker = thread::Builder::new()
                .name(format!("mane-worker-{index}"))
                .spawn(move || loop {
                    let label = lock(&queue).pop_front();
                    let Some(label) = label else {
                        break;
                    };
                    generate_into_store(&generator, &store, category, &source, &label);
                })
                .context("generation worker spawn failed")?;
            workers.push(worker);
        }

        Ok(RunHandle { workers })
    }

    /// Re-generates one settled item off-pool. No-op (returns `None`) while
    /// the item is `Pending`, unknown, or no run is active. The `Pending`
    /// flip happens synchronously before the thread starts, so a second call
    /// for the same label sees `Pending` and backs off.
    pub fn retry_item(&self, label: &str) -> Option<JoinHandle<()>> {
        let run = lock(&self.run).clone()?;
        if !self.store.mark_pending(label) {
            return None;
        }

        let generator = Arc::clone(&self.generator);
        let store = self.store.clone();
        let label = label.to_string();
        let thread_label = label.clone();
        let spawned = thread::Builder::new()
            .name("mane-retry".to_string())
            .spawn(move || {
                generate_into_store(&generator, &store, run.category, &run.source, &thread_label);
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                self.store.fail(label.as_str(), format!("retry spawn failed: {err}"));
                None
            }
        }
    }

    /// Applies a free-form instruction to one item's existing result image,
    /// off-pool. No-op without a prior successful image or while `Pending`.
    /// On failure the previous image stays on the item for display.
    pub fn remix_item(&self, label: &str, instruction: &str) -> Option<JoinHandle<()>> {
        let prior = self.store.mark_pending_for_remix(label)?;

        let remixer = Arc::clone(&self.remixer);
        let store = self.store.clone();
        let label = label.to_string();
        let instruction = instruction.to_string();
        let thread_label = label.clone();
        let spawned = thread::Builder::new()
            .name("mane-remix".to_string())
            .spawn(move || match remixer.remix(&prior, &instruction) {
                Ok(image) => store.complete(&thread_label, image),
                Err(err) => store.fail(&thread_label, err.to_string()),
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                self.store.fail(label.as_str(), format!("remix spawn failed: {err}"));
                None
            }
        }
    }
}

/// Item boundary: every failure becomes an `Error` item; nothing escapes a
/// worker thread.
fn generate_into_store(
    generator: &GenerationClient,
    store: &ItemStore,
    category: StyleCategory,
    source: &ImagePayload,
    label: &str,
) {
    let instruction = catalog::instruction_for(category, label);
    match generator.generate(source, &instruction, label, category.name()) {
        Ok(image) => store.complete(label, image),
        Err(err) => store.fail(label, err.to_string()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use mane_contracts::catalog::StyleCategory;
    use mane_contracts::items::ItemStatus;
    use mane_contracts::payload::ImagePayload;

    use super::{Orchestrator, DEFAULT_WORKERS};
    use crate::error::EngineError;
    use crate::transport::tests::source_image;
    use crate::transport::{ModelResponse, ModelTransport, RetryPolicy};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn image_for(instruction: &str) -> ImagePayload {
        // Any non-empty base64-ish marker derived from the instruction.
        ImagePayload::new("image/png", format!("aW1n-{}", instruction.len()))
            .expect("valid payload")
    }

    /// Counts calls and in-flight concurrency; fails instructions matching
    /// `fail_contains` while `failing` is set.
    struct CountingTransport {
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        failing: AtomicBool,
        fail_contains: Option<String>,
        delay: Duration,
    }

    impl CountingTransport {
        fn new(fail_contains: Option<&str>, delay: Duration) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                failing: AtomicBool::new(true),
                fail_contains: fail_contains.map(str::to_string),
                delay,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("lock").clone()
        }

        fn stop_failing(&self) {
            self.failing.store(false, Ordering::SeqCst);
        }
    }

    impl ModelTransport for CountingTransport {
        fn send(
            &self,
            _source: &ImagePayload,
            instruction: &str,
        ) -> Result<ModelResponse, EngineError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            self.calls
                .lock()
                .expect("lock")
                .push(instruction.to_string());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let should_fail = self.failing.load(Ordering::SeqCst)
                && self
                    .fail_contains
                    .as_deref()
                    .is_some_and(|marker| instruction.contains(marker));
            if should_fail {
                return Err(EngineError::Request("synthetic failure".to_string()));
            }
            Ok(ModelResponse {
                images: vec![image_for(instruction)],
                texts: Vec::new(),
            })
        }
    }

    fn orchestrator(transport: Arc<CountingTransport>, workers: usize) -> Orchestrator {
        Orchestrator::new(transport, fast_policy(), workers)
    }

    #[test]
    fn run_settles_every_label_exactly_once() -> anyhow::Result<()> {
        let transport = Arc::new(CountingTransport::new(None, Duration::ZERO));
        let orch = orchestrator(Arc::clone(&transport), DEFAULT_WORKERS);

        let handle = orch.start_run(StyleCategory::Classic, source_image())?;
        handle.wait();

        let snapshot = orch.store().snapshot();
        assert_eq!(snapshot.len(), StyleCategory::Classic.labels().len());
        for item in &snapshot {
            assert_eq!(item.status, ItemStatus::Done, "{}", item.label);
            assert!(item.image.is_some());
        }
        // One transport call per label: each label attempted exactly once.
        assert_eq!(transport.calls().len(), snapshot.len());
        Ok(())
    }

    #[test]
    fn pool_concurrency_stays_within_the_worker_count() -> anyhow::Result<()> {
        let transport = Arc::new(CountingTransport::new(None, Duration::from_millis(10)));
        let orch = orchestrator(Arc::clone(&transport), 2);

        let handle = orch.start_run(StyleCategory::Bold, source_image())?;
        handle.wait();

        assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 2);
        Ok(())
    }

    #[test]
    fn failures_become_error_items_without_aborting_siblings() -> anyhow::Result<()> {
        let transport = Arc::new(CountingTransport::new(Some("mohawk"), Duration::ZERO));
        let orch = orchestrator(Arc::clone(&transport), 2);

        let handle = orch.start_run(StyleCategory::Bold, source_image())?;
        handle.wait();

        for item in orch.store().snapshot() {
            if item.label == "Mohawk" {
                assert_eq!(item.status, ItemStatus::Error);
                let message = item.error.as_deref().unwrap_or_default();
                assert!(message.contains("synthetic failure"), "{message}");
            } else {
                assert_eq!(item.status, ItemStatus::Done, "{}", item.label);
            }
        }
        Ok(())
    }

    #[test]
    fn retry_item_resolves_one_label_independently() -> anyhow::Result<()> {
        let transport = Arc::new(CountingTransport::new(Some("mohawk"), Duration::ZERO));
        let orch = orchestrator(Arc::clone(&transport), 2);

        let handle = orch.start_run(StyleCategory::Bold, source_image())?;
        handle.wait();
        let before: Vec<_> = orch.store().snapshot();

        transport.stop_failing();
        let retry = orch.retry_item("Mohawk").expect("retry starts");
        let _ = retry.join();

        let after = orch.store().snapshot();
        for (old, new) in before.iter().zip(&after) {
            if new.label == "Mohawk" {
                assert_eq!(new.status, ItemStatus::Done);
                assert!(new.image.is_some());
            } else {
                assert_eq!(old, new, "sibling {} changed", new.label);
            }
        }
        Ok(())
    }

    #[test]
    fn retry_is_refused_while_the_item_is_pending() -> anyhow::Result<()> {
        let transport = Arc::new(CountingTransport::new(None, Duration::from_millis(30)));
        let orch = orchestrator(Arc::clone(&transport), 1);

        let handle = orch.start_run(StyleCategory::Classic, source_image())?;
        handle.wait();

        let first = orch.retry_item("Bob").expect("retry starts");
        // The flip to Pending happened synchronously, so the second call
        // must see it even though the first is still in flight.
        assert!(orch.retry_item("Bob").is_none());
        let _ = first.join();

        assert_eq!(
            orch.store().get("Bob").map(|item| item.status),
            Some(ItemStatus::Done)
        );
        Ok(())
    }

    #[test]
    fn retry_of_unknown_label_is_a_no_op() -> anyhow::Result<()> {
        let transport = Arc::new(CountingTransport::new(None, Duration::ZERO));
        let orch = orchestrator(Arc::clone(&transport), 1);
        assert!(orch.retry_item("Mohawk").is_none(), "no active run");

        let handle = orch.start_run(StyleCategory::Classic, source_image())?;
        handle.wait();
        assert!(orch.retry_item("Mohawk").is_none(), "label not in category");
        Ok(())
    }

    #[test]
    fn remix_updates_one_done_item_and_keeps_the_rest() -> anyhow::Result<()> {
        let transport = Arc::new(CountingTransport::new(None, Duration::ZERO));
        let orch = orchestrator(Arc::clone(&transport), 2);

        let handle = orch.start_run(StyleCategory::Classic, source_image())?;
        handle.wait();
        let before = orch.store().snapshot();

        let remix = orch
            .remix_item("Bob", "add a red tint")
            .expect("remix starts");
        let _ = remix.join();

        let calls = transport.calls();
        assert!(calls.iter().any(|call| call == "add a red tint"));

        for (old, new) in before.iter().zip(orch.store().snapshot().iter()) {
            if new.label == "Bob" {
                assert_eq!(new.status, ItemStatus::Done);
            } else {
                assert_eq!(old, new, "sibling {} changed", new.label);
            }
        }
        Ok(())
    }

    #[test]
    fn remix_without_prior_success_is_a_no_op() -> anyhow::Result<()> {
        let transport = Arc::new(CountingTransport::new(Some("mohawk"), Duration::ZERO));
        let orch = orchestrator(Arc::clone(&transport), 2);

        let handle = orch.start_run(StyleCategory::Bold, source_image())?;
        handle.wait();

        assert!(orch.remix_item("Mohawk", "make it taller").is_none());
        assert_eq!(
            orch.store().get("Mohawk").map(|item| item.status),
            Some(ItemStatus::Error)
        );
        Ok(())
    }

    #[test]
    fn failed_remix_keeps_the_previous_image() -> anyhow::Result<()> {
        let transport = Arc::new(CountingTransport::new(Some("make it worse"), Duration::ZERO));
        let orch = orchestrator(Arc::clone(&transport), 2);

        let handle = orch.start_run(StyleCategory::Classic, source_image())?;
        handle.wait();
        let original = orch
            .store()
            .get("Bob")
            .and_then(|item| item.image)
            .expect("generated image");

        let remix = orch
            .remix_item("Bob", "make it worse please")
            .expect("remix starts");
        let _ = remix.join();

        let item = orch.store().get("Bob").expect("item exists");
        assert_eq!(item.status, ItemStatus::Error);
        assert_eq!(item.image, Some(original));
        assert!(item
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("remix failed"));
        Ok(())
    }
}
