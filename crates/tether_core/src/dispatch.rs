//! Call dispatcher
//!
//! Every native-runtime operation must run on the single event-loop thread.
//! Other threads reach it by handing a closure to [`Dispatcher::run`], which
//! arms the native idle hook and waits for the loop to execute the closure.
//!
//! # Locking
//!
//! [`Dispatcher::lock`] is reentrant. While the lock count is above zero the
//! idle hook keeps waiting for marshalled calls instead of returning to the
//! native loop, so the loop makes no other progress until the last unlock.

use crate::error::{fatal, BridgeError, BridgeResult};
use crate::native::NativeRuntime;
use crossbeam::channel::{bounded, Receiver, RecvError, Sender};
use crossbeam::select;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tether_metrics::BridgeStats;

type Job = Box<dyn FnOnce() + Send>;

pub struct Dispatcher {
    work_tx: Sender<Job>,
    work_rx: Receiver<Job>,
    /// Dropped once the event loop has exited; disconnects `closed_rx`.
    closed_tx: Mutex<Option<Sender<()>>>,
    closed_rx: Receiver<()>,
    /// Marshalled calls submitted but not yet completed.
    hook_waiting: AtomicI32,
    lock_count: Arc<AtomicUsize>,
    loop_thread: OnceCell<ThreadId>,
    paint_thread: Mutex<Option<ThreadId>>,
    stats: Arc<BridgeStats>,
}

impl Dispatcher {
    pub fn new(stats: Arc<BridgeStats>) -> Self {
        let (work_tx, work_rx) = bounded(0);
        let (closed_tx, closed_rx) = bounded(0);
        Self {
            work_tx,
            work_rx,
            closed_tx: Mutex::new(Some(closed_tx)),
            closed_rx,
            hook_waiting: AtomicI32::new(0),
            lock_count: Arc::new(AtomicUsize::new(0)),
            loop_thread: OnceCell::new(),
            paint_thread: Mutex::new(None),
            stats,
        }
    }

    /// Declare the calling thread to be the event-loop thread.
    pub fn bind_loop_thread(&self) -> BridgeResult<()> {
        self.loop_thread
            .set(thread::current().id())
            .map_err(|_| BridgeError::LoopAlreadyBound)
    }

    pub fn is_loop_thread(&self) -> bool {
        self.loop_thread.get() == Some(&thread::current().id())
    }

    pub fn on_paint_thread(&self) -> bool {
        *self.paint_thread.lock() == Some(thread::current().id())
    }

    /// Record that the event loop has exited. Pending and later marshalled
    /// calls fail with [`BridgeError::LoopGone`].
    pub fn shutdown(&self) {
        if self.closed_tx.lock().take().is_some() {
            tracing::debug!("dispatcher shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed_tx.lock().is_none()
    }

    fn runs_inline(&self) -> bool {
        self.is_loop_thread() || self.on_paint_thread()
    }

    /// Run `f` on the event-loop thread and return its result.
    ///
    /// Runs inline on the event-loop thread and on the thread currently
    /// painting. A panic inside `f` is re-raised on the calling thread.
    pub fn run<F, R>(&self, runtime: &dyn NativeRuntime, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.runs_inline() {
            return f();
        }

        let (reply_tx, reply_rx) = bounded(1);
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = reply_tx.send(outcome);
        });

        if self.is_shut_down() {
            fatal(BridgeError::LoopGone);
        }
        if self.hook_waiting.fetch_add(1, Ordering::SeqCst) == 0 {
            runtime.arm_idle_hook();
        }
        self.stats.call_marshalled();
        tracing::trace!("marshalled call submitted");

        select! {
            send(self.work_tx, job) -> sent => {
                if sent.is_err() {
                    fatal(BridgeError::LoopGone);
                }
            }
            recv(self.closed_rx) -> _ => fatal(BridgeError::LoopGone),
        }
        let outcome = select! {
            recv(reply_rx) -> reply => reply,
            // A job the loop finished before exiting still has its reply queued.
            recv(self.closed_rx) -> _ => reply_rx.try_recv().map_err(|_| RecvError),
        };
        match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => fatal(BridgeError::LoopGone),
        }
    }

    /// Idle-hook body. Runs on the event-loop thread.
    ///
    /// Returns whether marshalled calls are still waiting, in which case the
    /// hook must stay armed.
    pub fn idle(&self) -> bool {
        loop {
            let job = if self.lock_count.load(Ordering::SeqCst) > 0 {
                match self.work_rx.recv() {
                    Ok(job) => job,
                    Err(_) => return false,
                }
            } else {
                match self.work_rx.try_recv() {
                    Ok(job) => job,
                    Err(_) => break,
                }
            };
            job();
            self.hook_waiting.fetch_sub(1, Ordering::SeqCst);
        }
        self.hook_waiting.load(Ordering::SeqCst) > 0
    }

    /// Freeze the event loop. Reentrant.
    pub fn lock(&self, runtime: &dyn NativeRuntime) {
        let count = Arc::clone(&self.lock_count);
        let depth = self.run(runtime, move || count.fetch_add(1, Ordering::SeqCst) + 1);
        tracing::debug!(depth, "event loop locked");
    }

    pub fn unlock(&self, runtime: &dyn NativeRuntime) -> BridgeResult<()> {
        let count = Arc::clone(&self.lock_count);
        let depth = self.run(runtime, move || {
            count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .map(|previous| previous - 1)
        });
        match depth {
            Ok(depth) => {
                tracing::debug!(depth, "event loop unlocked");
                Ok(())
            }
            Err(_) => Err(BridgeError::UnbalancedUnlock),
        }
    }

    pub fn lock_depth(&self) -> usize {
        self.lock_count.load(Ordering::SeqCst)
    }

    /// Mark the calling thread as painting until the guard drops.
    pub(crate) fn begin_paint(&self) -> BridgeResult<PaintGuard<'_>> {
        let mut slot = self.paint_thread.lock();
        if slot.is_some() {
            return Err(BridgeError::NestedPaint);
        }
        *slot = Some(thread::current().id());
        Ok(PaintGuard { dispatcher: self })
    }
}

pub(crate) struct PaintGuard<'a> {
    dispatcher: &'a Dispatcher,
}

impl Drop for PaintGuard<'_> {
    fn drop(&mut self) {
        *self.dispatcher.paint_thread.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRuntime;
    use std::thread::JoinHandle;

    fn dispatcher() -> Arc<Dispatcher> {
        let d = Arc::new(Dispatcher::new(Arc::new(BridgeStats::new())));
        d.bind_loop_thread().unwrap();
        d
    }

    /// Drive the idle hook on the current thread until `worker` finishes.
    fn drive<T>(d: &Dispatcher, worker: JoinHandle<T>, returns: &AtomicUsize) -> thread::Result<T> {
        while !worker.is_finished() {
            d.idle();
            returns.fetch_add(1, Ordering::SeqCst);
            thread::yield_now();
        }
        worker.join()
    }

    #[test]
    fn loop_thread_runs_inline() {
        let rt = MockRuntime::new();
        let d = dispatcher();
        assert_eq!(d.run(&rt, || 7), 7);
        assert_eq!(rt.idle_arms(), 0);
        assert!(matches!(d.bind_loop_thread(), Err(BridgeError::LoopAlreadyBound)));
    }

    #[test]
    fn other_threads_are_marshalled() {
        let rt = Arc::new(MockRuntime::new());
        let d = dispatcher();
        let loop_id = thread::current().id();

        let worker = {
            let (d, rt) = (Arc::clone(&d), Arc::clone(&rt));
            thread::spawn(move || d.run(&*rt, || thread::current().id()))
        };
        let ran_on = drive(&d, worker, &AtomicUsize::new(0)).unwrap();
        assert_eq!(ran_on, loop_id);
        assert!(rt.idle_arms() >= 1);
        assert!(!d.idle());
    }

    #[test]
    fn panic_resurfaces_on_caller() {
        let rt = Arc::new(MockRuntime::new());
        let d = dispatcher();
        let worker = {
            let (d, rt) = (Arc::clone(&d), Arc::clone(&rt));
            thread::spawn(move || d.run(&*rt, || -> i32 { panic!("boom") }))
        };
        let payload = drive(&d, worker, &AtomicUsize::new(0)).unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
    }

    #[test]
    fn lock_keeps_idle_hook_draining() {
        let rt = Arc::new(MockRuntime::new());
        let d = dispatcher();
        let returns = Arc::new(AtomicUsize::new(0));

        let worker = {
            let (d, rt, returns) = (Arc::clone(&d), Arc::clone(&rt), Arc::clone(&returns));
            thread::spawn(move || {
                d.lock(&*rt);
                d.lock(&*rt);
                d.unlock(&*rt).unwrap();
                assert_eq!(d.lock_depth(), 1);

                let before = returns.load(Ordering::SeqCst);
                for i in 0..3 {
                    assert_eq!(d.run(&*rt, move || i * 2), i * 2);
                }
                assert_eq!(returns.load(Ordering::SeqCst), before);

                d.unlock(&*rt).unwrap();
                d.unlock(&*rt)
            })
        };
        let third = drive(&d, worker, &returns).unwrap();
        assert!(matches!(third, Err(BridgeError::UnbalancedUnlock)));
        assert_eq!(d.lock_depth(), 0);
    }

    #[test]
    fn calls_after_shutdown_are_fatal() {
        let rt = Arc::new(MockRuntime::new());
        let d = dispatcher();
        d.shutdown();
        d.shutdown();
        assert!(d.is_shut_down());

        let worker = {
            let (d, rt) = (Arc::clone(&d), Arc::clone(&rt));
            thread::spawn(move || d.run(&*rt, || 1))
        };
        let payload = worker.join().unwrap_err();
        assert_eq!(
            payload.downcast_ref::<String>().map(String::as_str),
            Some("event loop is gone")
        );
        assert_eq!(rt.idle_arms(), 0);
    }

    #[test]
    fn shutdown_releases_a_blocked_caller() {
        let rt = Arc::new(MockRuntime::new());
        let d = dispatcher();
        let worker = {
            let (d, rt) = (Arc::clone(&d), Arc::clone(&rt));
            thread::spawn(move || d.run(&*rt, || 1))
        };
        while rt.idle_arms() == 0 {
            thread::yield_now();
        }
        // The loop exits without ever draining the submitted call.
        d.shutdown();
        assert!(worker.join().is_err());
    }

    #[test]
    fn paint_thread_runs_inline_and_rejects_nesting() {
        let rt = MockRuntime::new();
        let d = Dispatcher::new(Arc::new(BridgeStats::new()));
        {
            let _guard = d.begin_paint().unwrap();
            assert!(d.on_paint_thread());
            assert_eq!(d.run(&rt, || "inline"), "inline");
            assert!(matches!(d.begin_paint(), Err(BridgeError::NestedPaint)));
        }
        assert!(!d.on_paint_thread());
        assert!(d.begin_paint().is_ok());
    }
}
