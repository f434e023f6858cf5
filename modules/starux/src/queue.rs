//! Call-serialization queue.
//!
//! [`serialize`] wraps a function so overlapping calls run one at a time, in
//! the order they were made. Each caller still gets its own result.
//!
//! A call on an idle queue starts right away: the function is invoked and
//! polled once before [`SerialQueue::call`] returns, so its synchronous
//! prefix has already run. Calls made while another is in flight wait in a
//! FIFO. Whoever is driving the running call starts the next one when it
//! finishes, so dropping the returned future does not withdraw a call.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::noop_waker_ref;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::QueueError;

type Runner<A, R> = Arc<dyn Fn(A) -> BoxFuture<'static, R> + Send + Sync>;

struct Job<A, R> {
    args: A,
    reply: oneshot::Sender<Result<R, QueueError>>,
}

struct State<A, R> {
    busy: bool,
    waiting: VecDeque<Job<A, R>>,
}

struct Shared<A, R> {
    run: Runner<A, R>,
    state: Mutex<State<A, R>>,
    pending: AtomicUsize,
}

impl<A, R> Shared<A, R> {
    fn lock(&self) -> MutexGuard<'_, State<A, R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next waiting call, or `None` after marking the queue idle.
    fn next(&self) -> Option<Job<A, R>> {
        let mut state = self.lock();
        let job = state.waiting.pop_front();
        if job.is_none() {
            state.busy = false;
        }
        job
    }
}

/// Handle to a serialized function. Clones share the same queue.
pub struct SerialQueue<A, R> {
    shared: Arc<Shared<A, R>>,
}

impl<A, R> Clone for SerialQueue<A, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Wrap an async function so its invocations never overlap.
///
/// A call that suspends is finished on the current Tokio runtime. Outside a
/// runtime the caller that started it has to drive it by awaiting its result.
pub fn serialize<A, R, F, Fut>(f: F) -> SerialQueue<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    SerialQueue {
        shared: Arc::new(Shared {
            run: Arc::new(move |args: A| f(args).boxed()),
            state: Mutex::new(State {
                busy: false,
                waiting: VecDeque::new(),
            }),
            pending: AtomicUsize::new(0),
        }),
    }
}

/// [`serialize`] for a plain function.
pub fn serialize_sync<A, R, F>(f: F) -> SerialQueue<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    serialize(move |args: A| std::future::ready(f(args)))
}

impl<A: Send + 'static, R: Send + 'static> SerialQueue<A, R> {
    /// Queue a call. On an idle queue it starts before this returns;
    /// otherwise it starts once every earlier call has finished. The returned
    /// future resolves with its result.
    pub fn call(&self, args: A) -> impl Future<Output = Result<R, QueueError>> + Send + 'static {
        let (reply, result) = oneshot::channel();
        let job = Job { args, reply };
        self.shared.pending.fetch_add(1, Ordering::SeqCst);

        let idle = {
            let mut state = self.shared.lock();
            if state.busy {
                state.waiting.push_back(job);
                None
            } else {
                state.busy = true;
                Some(job)
            }
        };
        let unspawned = idle.and_then(|job| self.start(job));

        async move {
            if let Some(driver) = unspawned {
                driver.await;
            }
            result.await.unwrap_or(Err(QueueError::Closed))
        }
    }

    /// Calls admitted but not yet finished, including the running one.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    // Runs `job` up to its first suspension. What is left is spawned, or
    // handed back when there is no runtime to spawn on.
    fn start(&self, job: Job<A, R>) -> Option<BoxFuture<'static, ()>> {
        let mut driver = drain(Arc::clone(&self.shared), job).boxed();
        let mut cx = Context::from_waker(noop_waker_ref());
        if let Poll::Ready(()) = driver.as_mut().poll(&mut cx) {
            return None;
        }

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(driver);
                None
            }
            Err(_) => {
                debug!("No Tokio runtime, serialized call is driven by its caller");
                Some(driver)
            }
        }
    }
}

/// Run `job`, then every call that queued up behind it, until the queue is idle.
async fn drain<A, R>(shared: Arc<Shared<A, R>>, mut job: Job<A, R>) {
    loop {
        let Job { args, reply } = job;
        let outcome = invoke(&shared.run, args).await;

        shared.pending.fetch_sub(1, Ordering::SeqCst);
        if reply.send(outcome).is_err() {
            debug!("Serialized call finished after its caller stopped waiting");
        }

        match shared.next() {
            Some(next) => job = next,
            None => break,
        }
    }
}

async fn invoke<A, R>(run: &Runner<A, R>, args: A) -> Result<R, QueueError> {
    let started = catch_unwind(AssertUnwindSafe(|| run(args)));
    let finished = match started {
        Ok(call) => AssertUnwindSafe(call).catch_unwind().await,
        Err(panic) => Err(panic),
    };
    finished.map_err(|_| {
        error!("Serialized call panicked, moving on to the next one");
        QueueError::Panicked
    })
}

impl<A, R> fmt::Debug for SerialQueue<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("pending", &self.shared.pending.load(Ordering::SeqCst))
            .finish()
    }
}
