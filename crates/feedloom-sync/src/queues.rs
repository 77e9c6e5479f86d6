//! Named concurrency lanes. Each lane admits at most `limit` tasks at once and
//! starts waiting tasks in submission order.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Fetch,
    Hook,
    Download,
    Summarize,
    BitTorrent,
    Notify,
    FileRemoval,
}

impl Lane {
    pub const ALL: [Lane; 7] = [
        Lane::Fetch,
        Lane::Hook,
        Lane::Download,
        Lane::Summarize,
        Lane::BitTorrent,
        Lane::Notify,
        Lane::FileRemoval,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Lane::Fetch => "fetch",
            Lane::Hook => "hook",
            Lane::Download => "download",
            Lane::Summarize => "summarize",
            Lane::BitTorrent => "bittorrent",
            Lane::Notify => "notify",
            Lane::FileRemoval => "file_removal",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneLimits {
    pub fetch: usize,
    pub hook: usize,
    pub download: usize,
    pub summarize: usize,
    pub bittorrent: usize,
    pub notify: usize,
    pub file_removal: usize,
}

impl Default for LaneLimits {
    fn default() -> Self {
        Self {
            fetch: 8,
            hook: 4,
            download: 2,
            summarize: 2,
            bittorrent: 2,
            notify: 4,
            file_removal: 1,
        }
    }
}

impl LaneLimits {
    /// Configured limit for `lane`, never below one.
    pub fn limit(&self, lane: Lane) -> usize {
        let raw = match lane {
            Lane::Fetch => self.fetch,
            Lane::Hook => self.hook,
            Lane::Download => self.download,
            Lane::Summarize => self.summarize,
            Lane::BitTorrent => self.bittorrent,
            Lane::Notify => self.notify,
            Lane::FileRemoval => self.file_removal,
        };
        raw.max(1)
    }
}

#[derive(Debug)]
struct LaneState {
    limit: usize,
    permits: Arc<Semaphore>,
    waiting: AtomicUsize,
}

impl LaneState {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            permits: Arc::new(Semaphore::new(limit)),
            waiting: AtomicUsize::new(0),
        }
    }
}

/// Decrements the waiting count even if the submitting future is dropped mid-wait.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct TaskQueues {
    lanes: [LaneState; 7],
}

impl Default for TaskQueues {
    fn default() -> Self {
        Self::new(LaneLimits::default())
    }
}

impl TaskQueues {
    pub fn new(limits: LaneLimits) -> Self {
        Self {
            lanes: Lane::ALL.map(|lane| LaneState::new(limits.limit(lane))),
        }
    }

    fn lane(&self, lane: Lane) -> &LaneState {
        &self.lanes[lane.index()]
    }

    /// Run `task` once the lane has a free slot and return its output to the caller.
    ///
    /// The slot is released when the task completes, fails or panics.
    pub async fn submit<F>(&self, lane: Lane, task: F) -> F::Output
    where
        F: Future,
    {
        let state = self.lane(lane);
        let _permit = {
            let _waiting = WaitingGuard::enter(&state.waiting);
            state
                .permits
                .acquire()
                .await
                .expect("lane semaphore is never closed")
        };
        task.await
    }

    /// Fire-and-forget variant of [`TaskQueues::submit`].
    pub fn spawn<F>(self: &Arc<Self>, lane: Lane, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let queues = Arc::clone(self);
        tokio::spawn(async move { queues.submit(lane, task).await })
    }

    pub fn limit(&self, lane: Lane) -> usize {
        self.lane(lane).limit
    }

    pub fn in_flight(&self, lane: Lane) -> usize {
        let state = self.lane(lane);
        state.limit - state.permits.available_permits()
    }

    pub fn waiting(&self, lane: Lane) -> usize {
        self.lane(lane).waiting.load(Ordering::SeqCst)
    }
}
