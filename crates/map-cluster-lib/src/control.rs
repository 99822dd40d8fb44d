//! The control thread: a single job queue standing in for the UI thread
//!
//! Everything that touches markers is posted here. Tests drive the queue by
//! hand with [`ControlLoop::run_pending`] or [`ControlLoop::run_until`];
//! applications usually [`ControlLoop::spawn`] it on its own thread.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

/// Cloneable sender side of the control queue
#[derive(Clone)]
pub struct ControlHandle {
    sender: Sender<Message>,
}

impl ControlHandle {
    /// Queue `job` to run on the control thread
    ///
    /// Returns `false` once the loop has been dropped.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.sender.send(Message::Run(Box::new(job))).is_ok()
    }
}

impl std::fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlHandle")
            .field("queued", &self.sender.len())
            .finish()
    }
}

/// Owning side of the control queue
pub struct ControlLoop {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
}

impl Default for ControlLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlLoop {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            sender: self.sender.clone(),
        }
    }

    /// Run queued jobs until the queue is empty, including jobs posted by
    /// the jobs themselves. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(message) = self.receiver.try_recv() {
            if let Message::Run(job) = message {
                job();
                ran += 1;
            }
        }
        ran
    }

    /// Keep running jobs as they arrive until `done` holds or `timeout`
    /// elapses. Returns the final value of `done`.
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = (deadline - now).min(Duration::from_millis(5));
            match self.receiver.recv_timeout(wait) {
                Ok(Message::Run(job)) => job(),
                Ok(Message::Shutdown) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return done(),
            }
        }
    }

    /// Move the loop onto a dedicated thread
    pub fn spawn(self) -> std::io::Result<ControlThread> {
        let sender = self.sender.clone();
        let receiver = self.receiver;
        let join = std::thread::Builder::new()
            .name("control".into())
            .spawn(move || {
                tracing::debug!("control thread started");
                for message in receiver.iter() {
                    match message {
                        Message::Run(job) => job(),
                        Message::Shutdown => break,
                    }
                }
                tracing::debug!("control thread stopped");
            })?;
        Ok(ControlThread {
            sender,
            join: Some(join),
        })
    }
}

/// A control loop running on its own thread; stops when shut down or dropped
pub struct ControlThread {
    sender: Sender<Message>,
    join: Option<JoinHandle<()>>,
}

impl ControlThread {
    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            sender: self.sender.clone(),
        }
    }

    /// Run the jobs already queued, then stop the thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.sender.send(Message::Shutdown);
            if join.join().is_err() {
                tracing::error!("control thread panicked");
            }
        }
    }
}

impl Drop for ControlThread {
    fn drop(&mut self) {
        self.stop();
    }
}
