use crate::task::Id;
use std::any::Any;

/// Why a task did not produce its value.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The room scheduler was closed before the task could run, or before a
    /// suspended task could resume.
    #[error("room scheduler unavailable, task was not executed")]
    Unavailable,

    /// The task panicked inside its execution slice. The panic was contained
    /// to the task, the room kept running.
    #[error("task {id} panicked: {message}")]
    Panicked { id: Id, message: String },

    /// The task observed its cancellation token at a suspension point.
    #[error("task {id} was cancelled")]
    Cancelled { id: Id },
}

impl TaskError {
    pub(crate) fn panic(id: Id, payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = panic_payload_as_str(&payload)
            .unwrap_or("unknown panic payload")
            .to_string();

        TaskError::Panicked { id, message }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, TaskError::Unavailable)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled { .. })
    }

    /// The task the error belongs to, if it ever started.
    pub fn id(&self) -> Option<Id> {
        match self {
            TaskError::Unavailable => None,
            TaskError::Panicked { id, .. } | TaskError::Cancelled { id } => Some(*id),
        }
    }
}

pub(crate) fn panic_payload_as_str(payload: &Box<dyn Any + Send>) -> Option<&str> {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return Some(s);
    }

    if let Some(s) = payload.downcast_ref::<String>() {
        return Some(s);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn test_panic_message_is_captured() {
        let id = Id::next();
        let payload = panic::catch_unwind(|| -> () { panic!("exploded at {}", 42) }).unwrap_err();
        let err = TaskError::panic(id, payload);

        assert!(err.is_panic());
        assert_eq!(err.id(), Some(id));
        assert_eq!(err.to_string(), format!("task {id} panicked: exploded at 42"));
    }

    #[test]
    fn test_static_str_payload() {
        let payload = panic::catch_unwind(|| -> () { panic!("static") }).unwrap_err();
        assert_eq!(panic_payload_as_str(&payload), Some("static"));
    }

    #[test]
    fn test_unavailable_has_no_id() {
        assert!(TaskError::Unavailable.is_unavailable());
        assert_eq!(TaskError::Unavailable.id(), None);
    }
}
