use crate::task::TaskKind;
use dashmap::DashMap;
use std::sync::Arc;

/// Dispatch decisions taken by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    FastPath,
    Enqueue,
    Reject,
    Drain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    FastPath { kind: TaskKind, resume: bool },
    Enqueue { kind: TaskKind, resume: bool },
    Reject { kind: TaskKind },
    Drain { executed: usize },
}

impl Call {
    pub(crate) fn method(&self) -> Method {
        match self {
            Call::FastPath { .. } => Method::FastPath,
            Call::Enqueue { .. } => Method::Enqueue,
            Call::Reject { .. } => Method::Reject,
            Call::Drain { .. } => Method::Drain,
        }
    }
}

/// Records every dispatch decision of a *real* scheduler so tests can assert
/// which path a task took without mocking the scheduler itself.
#[derive(Debug, Clone)]
pub(crate) struct Tracker {
    calls: Arc<DashMap<Method, Vec<Call>>>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        let map = DashMap::new();
        map.insert(Method::FastPath, Vec::new());
        map.insert(Method::Enqueue, Vec::new());
        map.insert(Method::Reject, Vec::new());
        map.insert(Method::Drain, Vec::new());

        Self {
            calls: Arc::new(map),
        }
    }

    pub(crate) fn record(&self, call: Call) {
        // Empty drains happen on every tick, they only add noise.
        if matches!(call, Call::Drain { executed: 0 }) {
            return;
        }

        self.calls
            .get_mut(&call.method())
            .expect("method not found")
            .push(call)
    }

    pub(crate) fn get_calls(&self, method: &Method) -> Vec<Call> {
        self.calls
            .get(method)
            .expect("method not found")
            .value()
            .clone()
    }

    pub(crate) fn num_calls(&self, method: &Method) -> usize {
        self.calls.get(method).map_or(0, |calls| calls.len())
    }

    /// Number of tasks executed across all recorded drains.
    pub(crate) fn num_drained(&self) -> usize {
        self.get_calls(&Method::Drain)
            .iter()
            .map(|call| match call {
                Call::Drain { executed } => *executed,
                _ => 0,
            })
            .sum()
    }
}
