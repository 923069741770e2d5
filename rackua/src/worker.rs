use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::config::VmConfig;
use crate::error::{CallError, LoadError};
use crate::types::{RequestEnvironment, ResponseOwned};
use crate::Bridge;

/// Everything the dedicated VM thread needs to boot.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub vm: VmConfig,
    /// Entry file of the guest application.
    pub app_path: PathBuf,
    /// Guest expression resolving to the application callable.
    pub app_name: String,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker thread could not be spawned: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error("worker is no longer running")]
    Closed,
}

struct Job {
    request: RequestEnvironment,
    reply: oneshot::Sender<Result<ResponseOwned, CallError>>,
}

/// One dedicated OS thread owning the interpreter, serving queued requests
/// strictly one at a time.
///
/// This is the supported way to drive the bridge from a multi-threaded
/// embedding: the VM never sees two calls at once, and callers only touch
/// owned, sendable data. Dropping the worker hangs up the queue and joins
/// the thread.
#[derive(Debug)]
pub struct Worker {
    queue: Option<mpsc::Sender<Job>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    /// Spawn the VM thread and load the application on it. Blocks until the
    /// load finished; a load failure aborts startup.
    pub fn spawn(config: WorkerConfig) -> Result<Worker, WorkerError> {
        let (queue, jobs) = mpsc::channel::<Job>();
        let (ready, loaded) = mpsc::channel::<Result<(), LoadError>>();

        let thread = thread::Builder::new()
            .name("rackua-vm".into())
            .spawn(move || run(config, jobs, ready))?;

        match loaded.recv() {
            Ok(Ok(())) => Ok(Worker {
                queue: Some(queue),
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                // The thread exits right after reporting the failure.
                let _ = thread.join();
                Err(WorkerError::Load(err))
            }
            Err(_) => Err(WorkerError::Closed),
        }
    }

    /// Queue one request and wait for the owned response.
    pub async fn call(&self, request: RequestEnvironment) -> Result<ResponseOwned, WorkerError> {
        let reply = self.submit(request)?;
        match reply.await {
            Ok(result) => result.map_err(WorkerError::from),
            Err(_) => Err(WorkerError::Closed),
        }
    }

    /// Blocking flavor of [`call`](Worker::call) for synchronous callers.
    pub fn call_blocking(&self, request: RequestEnvironment) -> Result<ResponseOwned, WorkerError> {
        let reply = self.submit(request)?;
        match reply.blocking_recv() {
            Ok(result) => result.map_err(WorkerError::from),
            Err(_) => Err(WorkerError::Closed),
        }
    }

    fn submit(
        &self,
        request: RequestEnvironment,
    ) -> Result<oneshot::Receiver<Result<ResponseOwned, CallError>>, WorkerError> {
        let (reply, receiver) = oneshot::channel();
        let queue = self.queue.as_ref().ok_or(WorkerError::Closed)?;
        queue
            .send(Job { request, reply })
            .map_err(|_| WorkerError::Closed)?;
        Ok(receiver)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Hang up the queue first so the thread's recv loop ends.
        self.queue.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(
    config: WorkerConfig,
    jobs: mpsc::Receiver<Job>,
    ready: mpsc::Sender<Result<(), LoadError>>,
) {
    // The interpreter lives and dies on this thread; nothing guest-side
    // ever crosses the channel.
    let bridge = Bridge::initialize(config.vm);

    if let Err(err) = bridge.load_application(&config.app_path) {
        error!("application failed to load: {err}");
        let _ = ready.send(Err(err));
        return;
    }
    let _ = ready.send(Ok(()));
    info!(app_name = %config.app_name, "application loaded, worker ready");

    while let Ok(job) = jobs.recv() {
        let result = bridge
            .call_application(&config.app_name, &job.request)
            .map(ResponseOwned::from);
        if job.reply.send(result).is_err() {
            debug!("caller went away before the response was ready");
        }
    }
}
