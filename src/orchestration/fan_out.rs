use crate::collaborators::{CollaboratorError, ResourceStatus};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitResult<R> {
    Completed(R),
    Panicked(String),
}

/// Effective worker count for `total` units under an optional ceiling.
pub fn worker_count(total: usize, max_concurrency: Option<usize>) -> usize {
    if total == 0 {
        return 0;
    }
    max_concurrency.unwrap_or(total).clamp(1, total)
}

/// Runs `work` once per item on at most `max_concurrency` worker threads and
/// waits for all of them. Results come back in input order; a panicking unit
/// is reported as `Panicked` without disturbing its siblings.
pub fn fan_out<T, R, F>(items: Vec<T>, max_concurrency: Option<usize>, work: F) -> Vec<UnitResult<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let total = items.len();
    let workers = worker_count(total, max_concurrency);
    if workers == 0 {
        return Vec::new();
    }

    let queue = Mutex::new(items.into_iter().enumerate());
    let (tx, rx) = mpsc::channel::<(usize, UnitResult<R>)>();
    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            let work = &work;
            scope.spawn(move || loop {
                let next = queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .next();
                let Some((index, item)) = next else {
                    break;
                };
                let result = match panic::catch_unwind(AssertUnwindSafe(|| work(item))) {
                    Ok(value) => UnitResult::Completed(value),
                    Err(payload) => UnitResult::Panicked(panic_message(payload.as_ref())),
                };
                if tx.send((index, result)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<UnitResult<R>>> = (0..total).map(|_| None).collect();
    for (index, result) in rx.try_iter() {
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(result);
        }
    }
    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| UnitResult::Panicked("worker exited without a result".into()))
        })
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "unknown panic".to_string()
}

/// Polls `check` until it reports ready, fails, or `budget` elapses.
pub fn poll_until_ready<P>(
    operation: &str,
    budget: Duration,
    interval: Duration,
    mut check: P,
) -> Result<(), CollaboratorError>
where
    P: FnMut() -> Result<ResourceStatus, CollaboratorError>,
{
    let started = Instant::now();
    let interval = interval.max(MIN_POLL_INTERVAL);
    loop {
        match check()? {
            ResourceStatus::Ready => return Ok(()),
            ResourceStatus::Failed(reason) => {
                return Err(CollaboratorError::Failed {
                    service: operation.to_string(),
                    reason,
                })
            }
            ResourceStatus::Pending => {}
        }
        if started.elapsed() + interval > budget {
            return Err(CollaboratorError::Timeout {
                operation: operation.to_string(),
                timeout_secs: budget.as_secs(),
            });
        }
        thread::sleep(interval);
    }
}
