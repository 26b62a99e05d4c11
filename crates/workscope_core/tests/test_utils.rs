//! Shared test double: a persistence context that records every call.

#![allow(dead_code, reason = "each integration test uses a subset of the probe API")]

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use workscope_core::context::{ContextTransaction, IsolationLevel, PersistenceContext};
use workscope_core::error::ContextError;
use workscope_core::factory::ScopeFactory;
use workscope_core::registry::ContextRegistry;

/// Everything a probe context can observe happening to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    Constructed { read_only: bool },
    TransactionOpened(IsolationLevel),
    Saved(usize),
    PendingRolledBack,
    TransactionCommitted,
    TransactionRolledBack,
    Disposed,
}

/// Shared recorder all probe contexts of one test write to.
#[derive(Clone, Default)]
pub struct ProbeLog {
    events: Arc<Mutex<Vec<ProbeEvent>>>,
}

impl ProbeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: ProbeEvent) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&ProbeEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| matches(event)).count()
    }

    pub fn saves(&self) -> usize {
        self.count(|event| matches!(event, ProbeEvent::Saved(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|event| matches!(event, ProbeEvent::PendingRolledBack))
    }
}

/// Recording persistence context with a configurable pending-change count.
pub struct ProbeContext {
    log: ProbeLog,
    read_only: bool,
    pending: AtomicUsize,
    fail_next_save: AtomicBool,
}

impl ProbeContext {
    pub fn new(log: ProbeLog, read_only: bool) -> Self {
        log.record(ProbeEvent::Constructed { read_only });
        Self {
            log,
            read_only,
            pending: AtomicUsize::new(0),
            fail_next_save: AtomicBool::new(false),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Stages `count` pending changes to be reported by the next save.
    pub fn stage(&self, count: usize) {
        self.pending.fetch_add(count, Ordering::SeqCst);
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Makes the next save fail.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }
}

impl PersistenceContext for ProbeContext {
    fn begin_transaction(
        &self,
        level: IsolationLevel,
    ) -> Result<Box<dyn ContextTransaction>, ContextError> {
        self.log.record(ProbeEvent::TransactionOpened(level));
        Ok(Box::new(ProbeTransaction {
            log: self.log.clone(),
            level,
            finished: false,
        }))
    }

    fn save_changes(&self) -> Result<usize, ContextError> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(ContextError::new("save failed on request"));
        }
        let written = self.pending.swap(0, Ordering::SeqCst);
        self.log.record(ProbeEvent::Saved(written));
        Ok(written)
    }

    fn rollback_pending(&self) -> Result<(), ContextError> {
        self.pending.store(0, Ordering::SeqCst);
        self.log.record(ProbeEvent::PendingRolledBack);
        Ok(())
    }

    fn dispose(&self) -> Result<(), ContextError> {
        self.log.record(ProbeEvent::Disposed);
        Ok(())
    }
}

struct ProbeTransaction {
    log: ProbeLog,
    level: IsolationLevel,
    finished: bool,
}

impl ContextTransaction for ProbeTransaction {
    fn isolation_level(&self) -> IsolationLevel {
        self.level
    }

    fn commit(mut self: Box<Self>) -> Result<(), ContextError> {
        self.finished = true;
        self.log.record(ProbeEvent::TransactionCommitted);
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), ContextError> {
        self.finished = true;
        self.log.record(ProbeEvent::TransactionRolledBack);
        Ok(())
    }
}

impl Drop for ProbeTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.log.record(ProbeEvent::TransactionRolledBack);
        }
    }
}

/// A second context type, for multi-context collections.
pub struct SecondProbe {
    inner: ProbeContext,
}

impl SecondProbe {
    pub fn new(log: ProbeLog, read_only: bool) -> Self {
        Self {
            inner: ProbeContext::new(log, read_only),
        }
    }

    pub fn stage(&self, count: usize) {
        self.inner.stage(count);
    }
}

impl PersistenceContext for SecondProbe {
    fn begin_transaction(
        &self,
        level: IsolationLevel,
    ) -> Result<Box<dyn ContextTransaction>, ContextError> {
        self.inner.begin_transaction(level)
    }

    fn save_changes(&self) -> Result<usize, ContextError> {
        self.inner.save_changes()
    }

    fn rollback_pending(&self) -> Result<(), ContextError> {
        self.inner.rollback_pending()
    }

    fn dispose(&self) -> Result<(), ContextError> {
        self.inner.dispose()
    }
}

/// Registry with both probe types wired to the given log.
pub fn probe_registry(log: &ProbeLog) -> ContextRegistry {
    let probe_log = log.clone();
    let second_log = log.clone();
    ContextRegistry::new()
        .register::<ProbeContext, _>(move |read_only| {
            Ok(ProbeContext::new(probe_log.clone(), read_only))
        })
        .register::<SecondProbe, _>(move |read_only| {
            Ok(SecondProbe::new(second_log.clone(), read_only))
        })
}

/// Factory over a probe registry.
pub fn probe_factory(log: &ProbeLog) -> ScopeFactory {
    ScopeFactory::new(probe_registry(log))
}
