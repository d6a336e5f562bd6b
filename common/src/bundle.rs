use std::future::Future;

use async_std::channel;
use async_std::task::{self, JoinHandle};

use crate::errors::*;

/// Runs a set of named background futures concurrently and aggregates
/// whichever of them return an error.
///
/// Used for top-level supervisory loops (e.g. "run the replication
/// dispatcher and the safe-time ticker together") where any one of the
/// sub-tasks failing should be surfaced as soon as it happens, without
/// blocking on the other tasks first — the other tasks are typically
/// infinite loops that only stop on shutdown.
pub struct TaskResultBundle {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    num_done: usize,
    sender: channel::Sender<(usize, Result<()>)>,
    receiver: channel::Receiver<(usize, Result<()>)>,
}

impl TaskResultBundle {
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            tasks: vec![],
            num_done: 0,
            sender,
            receiver,
        }
    }

    /// Spawns `fut` onto the executor immediately; it runs concurrently
    /// with every other task already added to this bundle.
    pub fn add<F: Future<Output = Result<()>> + Send + 'static>(
        &mut self,
        name: &'static str,
        fut: F,
    ) {
        let task_i = self.tasks.len();
        let sender = self.sender.clone();

        let handle = task::spawn(async move {
            let _ = sender.send((task_i, fut.await)).await;
        });

        self.tasks.push((name, handle));
    }

    /// Waits for either every task to finish successfully or for one of
    /// them to fail. Returns as soon as the first failure is observed; any
    /// task still running at that point keeps running detached rather than
    /// being awaited or cancelled. If more than one task fails, only the
    /// first (in completion order) is returned — the rest are logged and
    /// suppressed.
    pub async fn join(self) -> Result<()> {
        let total = self.tasks.len();
        let mut num_done = self.num_done;

        while num_done < total {
            let (task_i, result) = match self.receiver.recv().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            num_done += 1;

            if let Err(e) = result {
                eprintln!("Task {} failed: {:?}", self.tasks[task_i].0, e);
                return Err(e);
            }
        }

        Ok(())
    }
}

impl Default for TaskResultBundle {
    fn default() -> Self {
        Self::new()
    }
}
