//! Progress reporting for long runs, and a worker-thread wrapper to run them
//! off the caller's thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Progress information for a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskProgress {
    pub current: usize,
    pub total: usize,
    pub current_item: Option<String>,
    pub message: Option<String>,
}

impl TaskProgress {
    pub fn new(current: usize, total: usize) -> Self {
        Self {
            current,
            total,
            current_item: None,
            message: None,
        }
    }

    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.current_item = Some(item.into());
        self
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Progress percentage (0-100).
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            0
        } else {
            ((self.current as f64 / self.total as f64) * 100.0).min(100.0) as u8
        }
    }
}

/// Update messages sent from a running task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    /// Task has started with total items to process.
    Started { total: usize },
    Progress(TaskProgress),
    Completed { message: String },
    /// Stopped between items at the caller's request.
    Cancelled,
    Failed { error: String },
}

/// Send an update if anyone is listening. A closed channel is not an error.
pub(crate) fn notify(tx: Option<&mpsc::Sender<TaskUpdate>>, update: TaskUpdate) {
    if let Some(tx) = tx {
        let _ = tx.send(update);
    }
}

/// A task running on its own thread.
pub struct BackgroundTask<T> {
    pub cancel_flag: Arc<AtomicBool>,
    pub receiver: mpsc::Receiver<TaskUpdate>,
    started_at: Instant,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    /// Run `work` on a new thread, handing it the update sender and stop flag.
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce(mpsc::Sender<TaskUpdate>, Arc<AtomicBool>) -> T + Send + 'static,
    {
        let (tx, receiver) = mpsc::channel();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel_flag);
        let handle = std::thread::spawn(move || work(tx, flag));

        Self {
            cancel_flag,
            receiver,
            started_at: Instant::now(),
            handle,
        }
    }

    /// Ask the task to stop before its next item.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Wait for the task and return its result. A panicked task yields `None`.
    pub fn join(self) -> Option<T> {
        self.handle.join().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(TaskProgress::new(0, 0).percent(), 0);
        assert_eq!(TaskProgress::new(1, 4).percent(), 25);
        assert_eq!(TaskProgress::new(9, 4).percent(), 100);

        let progress = TaskProgress::new(1, 2).with_item("a.jpg").with_message("analyzing");
        assert_eq!(progress.current_item.as_deref(), Some("a.jpg"));
        assert_eq!(progress.message.as_deref(), Some("analyzing"));
    }

    #[test]
    fn test_background_task_reports_and_returns() {
        let task = BackgroundTask::spawn(|tx, _cancel| {
            let _ = tx.send(TaskUpdate::Started { total: 1 });
            let _ = tx.send(TaskUpdate::Completed {
                message: "done".to_string(),
            });
            42
        });

        let updates: Vec<TaskUpdate> = task.receiver.iter().collect();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0], TaskUpdate::Started { total: 1 });
        assert_eq!(task.join(), Some(42));
    }

    #[test]
    fn test_cancel_sets_shared_flag() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let task = BackgroundTask::spawn(move |_tx, cancel| {
            release_rx.recv().unwrap();
            cancel.load(Ordering::SeqCst)
        });

        task.cancel();
        release_tx.send(()).unwrap();
        assert_eq!(task.join(), Some(true));
    }

    #[test]
    fn test_notify_without_listener() {
        notify(None, TaskUpdate::Cancelled);
        let (tx, rx) = mpsc::channel();
        drop(rx);
        notify(Some(&tx), TaskUpdate::Cancelled);
    }
}
