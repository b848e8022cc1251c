//! Cooperative scheduler glue.
//!
//! Guest threads only suspend at HLE call boundaries, so parking a thread
//! amounts to remembering which [`AsyncResult`] its pending call waits on.
//! When that result settles, its value becomes the call's return value and
//! the thread is runnable again.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use parking_lot::Mutex;
use pspemu_async::{AsyncError, AsyncOutcome, AsyncResult, SettleQueue};
use pspemu_cpu::CpuState;
use thiserror::Error;

use crate::context::HleContext;
use crate::errors::SceKernelError;
use crate::registry::{HleRegistry, RegistryError};
use crate::waiting::{AcceptCallbacks, HleOutcome};

pub type ThreadId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadStatus {
    Runnable,
    Waiting {
        name: &'static str,
        resource_id: i32,
        accept_callbacks: AcceptCallbacks,
    },
    /// A host backend failed in a way guest code must not observe.
    Faulted(String),
}

#[derive(Debug)]
pub struct GuestThread {
    id: ThreadId,
    name: String,
    pub state: CpuState,
    status: ThreadStatus,
}

impl GuestThread {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> &ThreadStatus {
        &self.status
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self.status, ThreadStatus::Waiting { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("no guest thread with id {0}")]
    UnknownThread(ThreadId),
    #[error("guest thread {0} is already parked")]
    AlreadyWaiting(ThreadId),
    #[error("guest thread {thread} hit a backend defect: {message}")]
    BackendDefect { thread: ThreadId, message: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

type Settled = Arc<Mutex<Vec<(ThreadId, AsyncOutcome<i32>)>>>;

pub struct Scheduler {
    threads: BTreeMap<ThreadId, GuestThread>,
    next_id: ThreadId,
    pool: LocalPool,
    spawner: LocalSpawner,
    queue: SettleQueue,
    settled: Settled,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            threads: BTreeMap::new(),
            next_id: 1,
            pool,
            spawner,
            queue: SettleQueue::new(),
            settled: Arc::default(),
        }
    }

    /// The queue continuations registered by this scheduler run on.
    pub fn queue(&self) -> &SettleQueue {
        &self.queue
    }

    pub fn spawn_thread(&mut self, name: impl Into<String>, state: CpuState) -> ThreadId {
        let id = self.next_id;
        self.next_id += 1;
        let name = name.into();
        tracing::debug!(id, %name, "guest thread created");
        self.threads.insert(
            id,
            GuestThread {
                id,
                name,
                state,
                status: ThreadStatus::Runnable,
            },
        );
        id
    }

    pub fn thread(&self, id: ThreadId) -> Option<&GuestThread> {
        self.threads.get(&id)
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> Option<&mut GuestThread> {
        self.threads.get_mut(&id)
    }

    pub fn runnable_threads(&self) -> Vec<ThreadId> {
        self.threads
            .values()
            .filter(|thread| thread.status == ThreadStatus::Runnable)
            .map(GuestThread::id)
            .collect()
    }

    /// Parked threads that guest callbacks may run on.
    pub fn threads_accepting_callbacks(&self) -> Vec<ThreadId> {
        self.threads
            .values()
            .filter(|thread| {
                matches!(
                    thread.status,
                    ThreadStatus::Waiting {
                        accept_callbacks: AcceptCallbacks::Yes,
                        ..
                    }
                )
            })
            .map(GuestThread::id)
            .collect()
    }

    /// Dispatches the syscall `nid` on behalf of thread `tid` and applies
    /// its outcome.
    pub fn dispatch(
        &mut self,
        tid: ThreadId,
        nid: u32,
        registry: &HleRegistry,
        ctx: &mut HleContext,
    ) -> Result<(), SchedulerError> {
        let thread = self
            .threads
            .get(&tid)
            .ok_or(SchedulerError::UnknownThread(tid))?;
        if thread.is_waiting() {
            return Err(SchedulerError::AlreadyWaiting(tid));
        }
        let outcome = registry.dispatch(nid, ctx, &thread.state)?;
        self.complete_call(tid, outcome)
    }

    /// Applies the outcome of an HLE call made by thread `tid`.
    ///
    /// An immediate value lands in `v0`. A waiting descriptor parks the
    /// thread until [`Scheduler::poll`] observes its result settled.
    pub fn complete_call(&mut self, tid: ThreadId, outcome: HleOutcome) -> Result<(), SchedulerError> {
        let thread = self
            .threads
            .get_mut(&tid)
            .ok_or(SchedulerError::UnknownThread(tid))?;
        if thread.is_waiting() {
            return Err(SchedulerError::AlreadyWaiting(tid));
        }

        match outcome {
            HleOutcome::Immediate(value) => {
                thread.state.set_return_value(value);
            }
            HleOutcome::Wait(descriptor) => {
                tracing::debug!(
                    tid,
                    name = descriptor.name,
                    resource_id = descriptor.resource_id,
                    "parking guest thread"
                );
                thread.status = ThreadStatus::Waiting {
                    name: descriptor.name,
                    resource_id: descriptor.resource_id,
                    accept_callbacks: descriptor.accept_callbacks,
                };
                let settled = self.settled.clone();
                descriptor.result.on_settle(&self.queue, move |outcome| {
                    settled.lock().push((tid, outcome));
                });
            }
        }
        Ok(())
    }

    /// Runs `future` on the scheduler's local pool and exposes its output as
    /// an [`AsyncResult`].
    ///
    /// If the pool refuses the task the result settles as cancelled.
    pub fn spawn_result<T, F>(&self, future: F) -> AsyncResult<T>
    where
        T: Clone + Send + 'static,
        F: Future<Output = AsyncOutcome<T>> + 'static,
    {
        let (result, resolver) = AsyncResult::pending();
        let task = async move { resolver.settle(future.await) };
        if let Err(err) = self.spawner.spawn_local(task) {
            tracing::error!(error = %err, "unable to spawn host task");
        }
        result
    }

    /// Drives host work and resumes every thread whose wait has settled.
    ///
    /// Returns the number of threads resumed. Every settled thread is
    /// processed even when one of them hit a backend defect; the first
    /// defect is then reported.
    pub fn poll(&mut self) -> Result<usize, SchedulerError> {
        loop {
            self.pool.run_until_stalled();
            if self.queue.run_pending() == 0 {
                break;
            }
        }

        let settled = std::mem::take(&mut *self.settled.lock());
        let mut resumed = 0;
        let mut defect = None;
        for (tid, outcome) in settled {
            let Some(thread) = self.threads.get_mut(&tid) else {
                tracing::debug!(tid, "dropping wake-up for an exited thread");
                continue;
            };
            let value = match outcome {
                Ok(value) => value,
                Err(AsyncError::Cancelled) => SceKernelError::WaitCancel.code(),
                Err(AsyncError::Failed { code, .. }) => code,
                Err(AsyncError::Defect(message)) => {
                    tracing::error!(tid, %message, "backend defect while a guest thread waited");
                    thread.status = ThreadStatus::Faulted(message.clone());
                    defect.get_or_insert(SchedulerError::BackendDefect {
                        thread: tid,
                        message,
                    });
                    continue;
                }
            };
            thread.state.set_return_value(value);
            thread.status = ThreadStatus::Runnable;
            resumed += 1;
        }

        match defect {
            Some(err) => Err(err),
            None => Ok(resumed),
        }
    }

    /// Removes a thread. A wait it left pending is dropped when it settles.
    pub fn exit_thread(&mut self, tid: ThreadId) -> Option<GuestThread> {
        self.threads.remove(&tid)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("threads", &self.threads)
            .field("queue", &self.queue)
            .finish()
    }
}
