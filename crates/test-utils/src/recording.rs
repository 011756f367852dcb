#![allow(dead_code)]

//! Task items that record what the scheduler did with them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use futures::future::{BoxFuture, FutureExt};
use taskgraph::dag::{InvocationContext, Produced, TaskItem, Wiring};
use taskgraph::errors::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Finished(String),
    Failed(String),
    Settled { key: String, faulted: bool },
    /// `key` read the result of `dep` while running.
    Observed {
        key: String,
        dep: String,
        value: Option<String>,
    },
}

/// Shared, ordered log of [`Event`]s plus a gauge of concurrently running
/// recording tasks.
#[derive(Clone, Default)]
pub struct Journal {
    inner: Arc<JournalInner>,
}

#[derive(Default)]
struct JournalInner {
    events: Mutex<Vec<Event>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.inner.events.lock().unwrap().push(event);
    }

    /// Keys in the order they started.
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Started(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn finished(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Finished(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn failed(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Failed(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    /// `(key, faulted)` for every after-settlement call.
    pub fn settled(&self) -> Vec<(String, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Settled { key, faulted } => Some((key, faulted)),
                _ => None,
            })
            .collect()
    }

    pub fn observed(&self, key: &str, dep: &str) -> Option<Option<String>> {
        self.events().into_iter().find_map(|e| match e {
            Event::Observed {
                key: k,
                dep: d,
                value,
            } if k == key && d == dep => Some(value),
            _ => None,
        })
    }

    pub fn start_count(&self, key: &str) -> usize {
        self.started().iter().filter(|k| k.as_str() == key).count()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Whether `first` finished (successfully or not) before `then` started.
    pub fn settled_before_start(&self, first: &str, then: &str) -> bool {
        let events = self.events();
        let end = events.iter().position(|e| {
            matches!(e, Event::Finished(k) | Event::Failed(k) if k == first)
        });
        let start = events
            .iter()
            .position(|e| matches!(e, Event::Started(k) if k == then));
        match (end, start) {
            (Some(end), Some(start)) => end < start,
            _ => false,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Configurable task item writing to a [`Journal`].
///
/// Produces `"<key>-out"` (or the configured output) as a `String`.
pub struct RecordingTask {
    key: String,
    journal: Journal,
    delay: Duration,
    failure: Option<String>,
    reads: Vec<String>,
    output: Option<String>,
    fail_after_settlement: bool,
    late_dependency: Option<Arc<dyn TaskItem>>,
}

impl RecordingTask {
    pub fn new(key: &str, journal: &Journal) -> Self {
        Self {
            key: key.to_string(),
            journal: journal.clone(),
            delay: Duration::ZERO,
            failure: None,
            reads: Vec::new(),
            output: None,
            fail_after_settlement: false,
            late_dependency: None,
        }
    }

    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Record the result of each of `keys` when invoked.
    pub fn reads(mut self, keys: &[&str]) -> Self {
        self.reads = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn output(mut self, value: &str) -> Self {
        self.output = Some(value.to_string());
        self
    }

    pub fn failing_after_settlement(mut self) -> Self {
        self.fail_after_settlement = true;
        self
    }

    /// Add `item` as a dependency of this task from `before_invoke`.
    pub fn late_dependency(mut self, item: Arc<dyn TaskItem>) -> Self {
        self.late_dependency = Some(item);
        self
    }

    pub fn shared(self) -> Arc<dyn TaskItem> {
        Arc::new(self)
    }
}

impl TaskItem for RecordingTask {
    fn key(&self) -> &str {
        &self.key
    }

    fn before_invoke(&self, wiring: &mut Wiring<'_>) -> Result<()> {
        if let Some(item) = &self.late_dependency {
            wiring.add_dependency(Arc::clone(item))?;
        }
        Ok(())
    }

    fn invoke<'a>(&'a self, ctx: &'a InvocationContext) -> BoxFuture<'a, anyhow::Result<Produced>> {
        async move {
            self.journal.push(Event::Started(self.key.clone()));
            self.journal.enter();

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            for dep in self.reads.iter() {
                let value = ctx
                    .result(dep)
                    .and_then(|v| v.downcast::<String>())
                    .map(|v| v.as_ref().clone());
                self.journal.push(Event::Observed {
                    key: self.key.clone(),
                    dep: dep.clone(),
                    value,
                });
            }

            self.journal.leave();

            if let Some(message) = &self.failure {
                self.journal.push(Event::Failed(self.key.clone()));
                return Err(anyhow!("{message}"));
            }

            self.journal.push(Event::Finished(self.key.clone()));
            let output = self
                .output
                .clone()
                .unwrap_or_else(|| format!("{}-out", self.key));
            Ok(Produced::new(output))
        }
        .boxed()
    }

    fn after_settlement(&self, faulted: bool) -> BoxFuture<'_, anyhow::Result<()>> {
        async move {
            self.journal.push(Event::Settled {
                key: self.key.clone(),
                faulted,
            });
            if self.fail_after_settlement {
                return Err(anyhow!("after-settlement hook of '{}' failed", self.key));
            }
            Ok(())
        }
        .boxed()
    }
}
