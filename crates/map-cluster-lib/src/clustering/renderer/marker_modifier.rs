//! Prioritised, batched marker work executed on the control thread
//!
//! A render pass queues tasks from its background thread and then blocks in
//! [`MarkerModifier::wait_until_free`]. The control thread runs at most
//! `batch_size` tasks per tick and re-posts itself until the queues are empty.
//! A task counts as in flight until its [`TaskGuard`] is dropped, which lets
//! an animation keep the modifier busy until the surface reports that it
//! finished.

use crate::LatLng;
use crate::clustering::Cluster;
use crate::control::ControlHandle;
use crate::map::MarkerId;

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// A marker together with the position it was last placed at
///
/// Identity is the marker id alone.
#[derive(Debug, Clone, Copy)]
pub struct MarkerWithPosition {
    pub marker: MarkerId,
    pub position: LatLng,
}

impl PartialEq for MarkerWithPosition {
    fn eq(&self, other: &Self) -> bool {
        self.marker == other.marker
    }
}

impl Eq for MarkerWithPosition {}

impl std::hash::Hash for MarkerWithPosition {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.marker.hash(state);
    }
}

/// One unit of marker work
#[derive(Debug, Clone)]
pub enum MarkerTask<T> {
    /// Show a cluster, optionally sliding in from `animate_from`
    Create {
        cluster: Arc<Cluster<T>>,
        animate_from: Option<LatLng>,
    },
    Remove(MarkerId),
    /// Slide a marker into `to`, removing it once the animation ends
    AnimateThenRemove {
        marker: MarkerWithPosition,
        from: LatLng,
        to: LatLng,
    },
}

/// Executes tasks on the control thread
///
/// The task stays in flight until `guard` is dropped; runners finishing
/// asynchronously move it into their completion callback.
pub trait TaskRunner<T: Send + Sync + 'static>: Send + Sync {
    fn run(&self, task: MarkerTask<T>, guard: TaskGuard<T>);
}

/// Marks one task as in flight until dropped
#[must_use]
pub struct TaskGuard<T: Send + Sync + 'static> {
    modifier: Arc<MarkerModifier<T>>,
}

impl<T: Send + Sync + 'static> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        self.modifier.queues.lock().in_flight -= 1;
        self.modifier.idle.notify_all();
    }
}

struct Queues<T> {
    on_screen_removes: VecDeque<MarkerTask<T>>,
    animations: VecDeque<MarkerTask<T>>,
    on_screen_creates: VecDeque<MarkerTask<T>>,
    creates: VecDeque<MarkerTask<T>>,
    removes: VecDeque<MarkerTask<T>>,
    in_flight: usize,
    process_scheduled: bool,
}

impl<T> Queues<T> {
    fn new() -> Self {
        Self {
            on_screen_removes: VecDeque::new(),
            animations: VecDeque::new(),
            on_screen_creates: VecDeque::new(),
            creates: VecDeque::new(),
            removes: VecDeque::new(),
            in_flight: 0,
            process_scheduled: false,
        }
    }

    fn queued(&self) -> usize {
        self.on_screen_removes.len()
            + self.animations.len()
            + self.on_screen_creates.len()
            + self.creates.len()
            + self.removes.len()
    }

    fn is_busy(&self) -> bool {
        self.in_flight > 0 || self.queued() > 0
    }

    /// On-screen removals first, then animations, on-screen creations,
    /// off-screen creations and off-screen removals
    fn next_task(&mut self) -> Option<MarkerTask<T>> {
        self.on_screen_removes
            .pop_front()
            .or_else(|| self.animations.pop_front())
            .or_else(|| self.on_screen_creates.pop_front())
            .or_else(|| self.creates.pop_front())
            .or_else(|| self.removes.pop_front())
    }

    fn clear(&mut self) {
        self.on_screen_removes.clear();
        self.animations.clear();
        self.on_screen_creates.clear();
        self.creates.clear();
        self.removes.clear();
    }
}

pub struct MarkerModifier<T: Send + Sync + 'static> {
    queues: Mutex<Queues<T>>,
    idle: Condvar,
    control: ControlHandle,
    runner: Arc<dyn TaskRunner<T>>,
    batch_size: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<T: Send + Sync + 'static> MarkerModifier<T> {
    pub fn new(control: ControlHandle, runner: Arc<dyn TaskRunner<T>>, batch_size: usize) -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(Queues::new()),
            idle: Condvar::new(),
            control,
            runner,
            batch_size: batch_size.max(1),
        })
    }

    pub fn add(&self, on_screen: bool, cluster: Arc<Cluster<T>>, animate_from: Option<LatLng>) {
        let task = MarkerTask::Create {
            cluster,
            animate_from,
        };
        let mut queues = self.queues.lock();
        if on_screen {
            queues.on_screen_creates.push_back(task);
        } else {
            queues.creates.push_back(task);
        }
    }

    pub fn remove(&self, on_screen: bool, marker: MarkerId) {
        let mut queues = self.queues.lock();
        if on_screen {
            queues.on_screen_removes.push_back(MarkerTask::Remove(marker));
        } else {
            queues.removes.push_back(MarkerTask::Remove(marker));
        }
    }

    pub fn animate_then_remove(&self, marker: MarkerWithPosition, from: LatLng, to: LatLng) {
        self.queues
            .lock()
            .animations
            .push_back(MarkerTask::AnimateThenRemove { marker, from, to });
    }

    pub fn is_busy(&self) -> bool {
        self.queues.lock().is_busy()
    }

    /// Block until every queued task has run on the control thread and
    /// every in-flight task has completed
    ///
    /// Must not be called from the control thread itself.
    pub fn wait_until_free(self: &Arc<Self>) {
        let mut queues = self.queues.lock();
        while queues.is_busy() {
            if !queues.process_scheduled && queues.queued() > 0 {
                queues.process_scheduled = true;
                let this = self.clone();
                if !self.control.post(move || this.process()) {
                    tracing::warn!(
                        dropped = queues.queued(),
                        "control loop closed, dropping marker tasks"
                    );
                    queues.clear();
                    queues.process_scheduled = false;
                    break;
                }
            }
            self.idle.wait_for(&mut queues, Duration::from_millis(10));
        }
    }

    /// One control-thread tick
    fn process(self: Arc<Self>) {
        for _ in 0..self.batch_size {
            let task = {
                let mut queues = self.queues.lock();
                match queues.next_task() {
                    Some(task) => {
                        queues.in_flight += 1;
                        task
                    }
                    None => break,
                }
            };
            let guard = TaskGuard {
                modifier: self.clone(),
            };
            self.runner.run(task, guard);
        }

        let mut queues = self.queues.lock();
        if queues.queued() > 0 {
            let this = self.clone();
            if self.control.post(move || this.process()) {
                return;
            }
            queues.clear();
        }
        queues.process_scheduled = false;
        self.idle.notify_all();
    }
}
