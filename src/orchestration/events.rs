use crate::orchestration::state::ProgressEntry;
use crate::shared::SessionId;
use std::sync::Mutex;

/// Live sink for progress entries, notified as each entry is produced rather
/// than when the tick completes.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, session_id: &SessionId, entry: &ProgressEntry);
}

#[derive(Debug, Default)]
struct EventBuffer {
    progress: Vec<ProgressEntry>,
    errors: Vec<String>,
}

/// Synchronized collector shared by a step and all of its fan-out units.
/// Drained once by the engine after the step returns.
pub struct StepEvents<'a> {
    session_id: &'a SessionId,
    observer: Option<&'a dyn ProgressObserver>,
    buffer: Mutex<EventBuffer>,
}

impl<'a> StepEvents<'a> {
    pub fn new(session_id: &'a SessionId, observer: Option<&'a dyn ProgressObserver>) -> Self {
        Self {
            session_id,
            observer,
            buffer: Mutex::new(EventBuffer::default()),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.session_id
    }

    pub fn system(&self, text: impl Into<String>) {
        let entry = ProgressEntry::system(text);
        tracing::info!(session_id = %self.session_id, "{}", entry.text);
        self.push(entry, None);
    }

    pub fn assistant(&self, text: impl Into<String>) {
        self.push(ProgressEntry::assistant(text), None);
    }

    /// Progress-only notice for degraded but non-failing conditions.
    pub fn warn(&self, text: impl Into<String>) {
        let entry = ProgressEntry::system(text);
        tracing::warn!(session_id = %self.session_id, "{}", entry.text);
        self.push(entry, None);
    }

    /// Records a failure in the error log and mirrors it into progress.
    pub fn error(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::warn!(session_id = %self.session_id, error = %text, "step error");
        self.push(ProgressEntry::system(text.clone()), Some(text));
    }

    /// The observer is notified under the buffer lock so it sees entries in
    /// the same order as the persisted progress log.
    fn push(&self, entry: ProgressEntry, error: Option<String>) {
        let mut buffer = self
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(observer) = self.observer {
            observer.on_progress(self.session_id, &entry);
        }
        buffer.progress.push(entry);
        if let Some(error) = error {
            buffer.errors.push(error);
        }
    }

    pub fn into_parts(self) -> (Vec<ProgressEntry>, Vec<String>) {
        let buffer = self
            .buffer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (buffer.progress, buffer.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::state::Actor;
    use std::thread;

    struct Recorder(Mutex<Vec<String>>);

    impl ProgressObserver for Recorder {
        fn on_progress(&self, _session_id: &SessionId, entry: &ProgressEntry) {
            self.0
                .lock()
                .expect("recorder lock")
                .push(entry.text.clone());
        }
    }

    #[test]
    fn errors_are_mirrored_into_progress() {
        let session = SessionId::parse("events").expect("session");
        let events = StepEvents::new(&session, None);
        events.system("starting");
        events.error("scan failed on vm-1: timeout");
        events.assistant("summary");
        let (progress, errors) = events.into_parts();
        assert_eq!(progress.len(), 3);
        assert_eq!(progress[2].actor, Actor::Assistant);
        assert_eq!(errors, vec!["scan failed on vm-1: timeout"]);
    }

    #[test]
    fn concurrent_units_deliver_every_entry_to_observer() {
        let session = SessionId::parse("events").expect("session");
        let recorder = Recorder(Mutex::new(Vec::new()));
        let events = StepEvents::new(&session, Some(&recorder));
        thread::scope(|scope| {
            for idx in 0..8 {
                let events = &events;
                scope.spawn(move || events.system(format!("unit {idx}")));
            }
        });
        let (progress, _) = events.into_parts();
        assert_eq!(progress.len(), 8);
        assert_eq!(recorder.0.lock().expect("recorder lock").len(), 8);
    }

    #[test]
    fn observer_order_matches_progress_log_under_contention() {
        let session = SessionId::parse("events").expect("session");
        let recorder = Recorder(Mutex::new(Vec::new()));
        let events = StepEvents::new(&session, Some(&recorder));
        thread::scope(|scope| {
            for unit in 0..6 {
                let events = &events;
                scope.spawn(move || {
                    for step in 0..50 {
                        if step % 7 == 0 {
                            events.error(format!("unit {unit} failed step {step}"));
                        } else {
                            events.system(format!("unit {unit} step {step}"));
                        }
                    }
                });
            }
        });
        let (progress, _) = events.into_parts();
        let logged: Vec<String> = progress.into_iter().map(|entry| entry.text).collect();
        let observed = recorder.0.into_inner().expect("recorder lock");
        assert_eq!(logged.len(), 300);
        assert_eq!(observed, logged);
    }
}
