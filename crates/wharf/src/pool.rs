use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc, Mutex,
    },
    thread::{Builder, JoinHandle},
};

use anyhow::{Context as _, Error};
use tracing::{event, instrument, Level};

type Job = Box<dyn FnOnce() + Send>;

/// Fixed set of worker threads for blocking or long running work.
///
/// Jobs must never touch sessions directly, they hand results back through a `Notifier`.
pub struct TaskPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskPool {
    #[instrument("TaskPool::new", skip_all)]
    pub fn new(threads: usize) -> Result<Self, Error> {
        let (sender, receiver) = channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            let worker = Builder::new()
                .name(format!("wharf-task-{}", index))
                .spawn(move || run_worker(receiver))
                .context("failed to spawn task worker")?;
            workers.push(worker);
        }

        event!(Level::DEBUG, threads = workers.len(), "task pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    /// Queue `job` to run on a worker thread.
    pub fn spawn<F>(&self, job: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = match self.sender.lock() {
            Ok(sender) => sender,
            Err(poisoned) => poisoned.into_inner(),
        };

        sender
            .as_ref()
            .context("task pool is shut down")?
            .send(Box::new(job))
            .ok()
            .context("task workers are gone")?;

        Ok(())
    }

    /// Stop taking jobs and wait for the queued ones to finish.
    pub fn shutdown(&self) {
        let sender = match self.sender.lock() {
            Ok(mut sender) => sender.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        for worker in workers {
            if worker.join().is_err() {
                event!(Level::WARN, "task worker panicked");
            }
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        // Workers exit once the channel closes, joining here could block on a running job
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

fn run_worker(receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let receiver = match receiver.lock() {
                Ok(receiver) => receiver,
                Err(poisoned) => poisoned.into_inner(),
            };
            receiver.recv()
        };

        let Ok(job) = job else {
            break;
        };

        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            event!(Level::ERROR, "task panicked");
        }
    }
}
