use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::Result;
use crate::run_loop::RunLoop;
use crate::source::{Readiness, Source, SourceLink};

/// Returned by idle tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleStatus {
    /// Run again on a later idle pass.
    Keep,
    Done,
}

pub type IdleTask = Box<dyn FnMut() -> IdleStatus + Send>;

/// FIFO of tasks run when a pass found nothing else to do.
pub struct IdleSource {
    name: String,
    tasks: Mutex<VecDeque<IdleTask>>,
    batch: usize,
    link: SourceLink,
}

impl IdleSource {
    /// `batch` bounds the tasks run per idle pass.
    pub fn new(name: &str, batch: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            tasks: Mutex::new(VecDeque::new()),
            batch: batch.max(1),
            link: SourceLink::new(),
        })
    }

    pub fn push(&self, task: IdleTask) {
        self.tasks.lock().push_back(task);
        self.link.wake();
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl Source for IdleSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&self, run_loop: &Arc<RunLoop>) {
        self.link.attach(run_loop);
    }

    fn detach(&self) {
        self.link.detach();
    }

    fn wake_up(&self) {
        self.link.wake();
    }

    fn prepare(&self, _now: Instant) -> Readiness {
        if self.is_empty() {
            Readiness::Pending(None)
        } else {
            Readiness::Idle
        }
    }

    fn dispatch(&self, _run_loop: &RunLoop) -> Result<()> {
        let batch: Vec<IdleTask> = {
            let mut tasks = self.tasks.lock();
            let count = tasks.len().min(self.batch);
            tasks.drain(..count).collect()
        };
        let mut kept = Vec::new();
        for mut task in batch {
            if task() == IdleStatus::Keep {
                kept.push(task);
            }
        }
        if !kept.is_empty() {
            self.tasks.lock().extend(kept);
        }
        Ok(())
    }
}
