use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::models::exam_attempt::ExamAttempt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptEventKind {
    Started,
    Submitted,
    Completed,
    Canceled,
}

impl AttemptEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptEventKind::Started => "attempt_started",
            AttemptEventKind::Submitted => "attempt_submitted",
            AttemptEventKind::Completed => "attempt_completed",
            AttemptEventKind::Canceled => "attempt_canceled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptEvent {
    pub kind: AttemptEventKind,
    pub exam_id: i64,
    pub learner_id: i64,
    pub attempt_id: String,
    pub imported: bool,
    pub occurred_at: DateTime<Utc>,
}

impl AttemptEvent {
    pub fn new(kind: AttemptEventKind, attempt: &ExamAttempt, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            exam_id: attempt.exam_id,
            learner_id: attempt.learner_id,
            attempt_id: attempt.id.clone(),
            imported: attempt.imported,
            occurred_at,
        }
    }
}

pub trait AttemptObserver: Send + Sync {
    fn on_event(&self, event: &AttemptEvent);
}

/// Fans lifecycle events out to a fixed set of observers, in registration order.
#[derive(Clone, Default)]
pub struct EventBus {
    observers: Vec<Arc<dyn AttemptObserver>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn publish(&self, event: AttemptEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }
}

pub struct LoggingObserver;

impl AttemptObserver for LoggingObserver {
    fn on_event(&self, event: &AttemptEvent) {
        info!(
            event = event.kind.as_str(),
            exam_id = event.exam_id,
            learner_id = event.learner_id,
            attempt_id = %event.attempt_id,
            imported = event.imported,
            "attempt lifecycle event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam_attempt::NewAttempt;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<AttemptEventKind>>);

    impl AttemptObserver for Collect {
        fn on_event(&self, event: &AttemptEvent) {
            self.0.lock().unwrap().push(event.kind);
        }
    }

    #[test]
    fn every_observer_sees_every_event_in_order() {
        let first = Arc::new(Collect::default());
        let second = Arc::new(Collect::default());
        let bus = EventBus::new()
            .with_observer(first.clone())
            .with_observer(Arc::new(LoggingObserver))
            .with_observer(second.clone());

        let attempt = ExamAttempt::new(
            NewAttempt {
                exam_id: 1,
                learner_id: 2,
                content_revision_ref: "r".into(),
                credential_set: "main".into(),
                participant_ref: None,
            },
            Utc::now(),
        );
        bus.publish(AttemptEvent::new(AttemptEventKind::Started, &attempt, Utc::now()));
        bus.publish(AttemptEvent::new(AttemptEventKind::Submitted, &attempt, Utc::now()));

        let expected = vec![AttemptEventKind::Started, AttemptEventKind::Submitted];
        assert_eq!(*first.0.lock().unwrap(), expected);
        assert_eq!(*second.0.lock().unwrap(), expected);
    }
}
