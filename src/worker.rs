//! A worker thread that processes one message at a time and drops messages while it is busy.
//!
//! This is how frames reach the detector: the capture thread [`offer`]s every frame, and the frame
//! is only accepted if the previous one has been fully processed. Nothing is ever queued behind a
//! message in flight, so slow processing increases the drop rate rather than latency.
//!
//! [`offer`]: Worker::offer

use std::{
    io,
    panic::resume_unwind,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam::channel::{self, Sender};

use crate::drop::defer;

/// Processes messages on a [`Worker`] thread.
pub trait Handler<I>: Send + 'static {
    fn handle(&mut self, msg: I);
}

impl<I, F: FnMut(I) + Send + 'static> Handler<I> for F {
    fn handle(&mut self, msg: I) {
        self(msg)
    }
}

/// A builder object that can be used to configure and spawn a [`Worker`].
#[derive(Clone, Default)]
pub struct WorkerBuilder {
    name: Option<String>,
}

impl WorkerBuilder {
    /// Sets the name of the [`Worker`] thread.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Spawns a [`Worker`] thread that uses `handler` to process incoming messages.
    pub fn spawn<I, H>(self, mut handler: H) -> io::Result<Worker<I, H>>
    where
        I: Send + 'static,
        H: Handler<I>,
    {
        // The busy flag already limits this to one message; capacity 1 makes `offer` non-blocking.
        let (sender, recv) = channel::bounded::<I>(1);
        let busy = Arc::new(AtomicBool::new(false));
        let mut builder = thread::Builder::new();
        if let Some(name) = self.name.clone() {
            builder = builder.name(name);
        }
        let handle = builder.spawn({
            let busy = busy.clone();
            move || {
                let _guard;
                if let Some(name) = self.name {
                    log::trace!("worker '{name}' starting");
                    _guard = defer(move || log::trace!("worker '{name}' exiting"));
                }
                for msg in recv {
                    let _idle = defer(|| busy.store(false, Ordering::Release));
                    handler.handle(msg);
                }
                handler
            }
        })?;

        Ok(Worker {
            sender: Some(sender),
            busy,
            handle: Some(handle),
        })
    }
}

/// Returned by [`Worker::offer`] when the worker was busy. Holds the rejected message.
#[derive(Debug)]
pub struct Busy<I>(pub I);

/// A handle to a worker thread that processes messages of type `I` with a handler `H`.
///
/// When dropped, the channel to the thread will be dropped and the thread will be joined. If the
/// thread has panicked, the panic will be forwarded to the thread dropping the `Worker`.
pub struct Worker<I: Send + 'static, H: Handler<I>> {
    sender: Option<Sender<I>>,
    busy: Arc<AtomicBool>,
    handle: Option<JoinHandle<H>>,
}

impl Worker<(), fn(())> {
    /// Returns a builder that can be used to configure and spawn a [`Worker`].
    #[inline]
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::default()
    }
}

impl<I: Send + 'static, H: Handler<I>> Worker<I, H> {
    /// Hands `msg` to the worker if it is idle.
    ///
    /// If the worker is still processing an earlier message, `msg` is handed back in [`Busy`]
    /// instead. This never blocks.
    ///
    /// If the worker has panicked, this will propagate the panic to the calling thread.
    pub fn offer(&mut self, msg: I) -> Result<(), Busy<I>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(Busy(msg));
        }

        let Some(sender) = &self.sender else {
            return Err(Busy(msg));
        };
        match sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(channel::TrySendError::Full(msg)) => {
                // Can't happen while the busy flag is honored, but don't wedge the flag if it does.
                self.busy.store(false, Ordering::Release);
                Err(Busy(msg))
            }
            Err(channel::TrySendError::Disconnected(msg)) => {
                self.wait_for_exit();
                Err(Busy(msg))
            }
        }
    }

    /// Returns whether a message is currently being processed.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Stops the worker after it finishes its current message and returns the handler.
    ///
    /// If the worker has panicked, this will propagate the panic to the calling thread.
    pub fn shutdown(mut self) -> H {
        drop(self.sender.take());
        match self.join() {
            Some(handler) => handler,
            // The worker panicked while this thread is already unwinding.
            None => panic!("worker thread panicked"),
        }
    }

    fn join(&mut self) -> Option<H> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(handler) => Some(handler),
            Err(payload) => {
                if !thread::panicking() {
                    resume_unwind(payload);
                }
                None
            }
        }
    }

    fn wait_for_exit(&mut self) {
        self.join();
    }
}

impl<I: Send + 'static, H: Handler<I>> Drop for Worker<I, H> {
    fn drop(&mut self) {
        // Close the channel to signal the thread to exit.
        drop(self.sender.take());

        self.wait_for_exit();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        time::{Duration, Instant},
    };

    use super::*;

    fn silent_panic(payload: String) {
        resume_unwind(Box::new(payload));
    }

    fn wait_idle<I: Send + 'static, H: Handler<I>>(worker: &Worker<I, H>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.is_busy() {
            assert!(Instant::now() < deadline, "worker stuck");
            thread::yield_now();
        }
    }

    #[test]
    fn drops_while_busy() {
        let (entered_tx, entered_rx) = channel::unbounded();
        let (release_tx, release_rx) = channel::unbounded::<()>();
        let mut worker = Worker::builder()
            .name("test worker")
            .spawn(move |n: u32| {
                entered_tx.send(n).unwrap();
                release_rx.recv().unwrap();
            })
            .unwrap();

        worker.offer(1).unwrap();
        assert_eq!(entered_rx.recv().unwrap(), 1);
        assert!(worker.is_busy());
        match worker.offer(2) {
            Err(Busy(2)) => {}
            other => panic!("expected message to be rejected, got {:?}", other),
        }

        release_tx.send(()).unwrap();
        wait_idle(&worker);
        worker.offer(3).unwrap();
        assert_eq!(entered_rx.recv().unwrap(), 3);
        release_tx.send(()).unwrap();
        drop(worker);
        assert!(entered_rx.try_recv().is_err());
    }

    #[test]
    fn shutdown_returns_handler() {
        struct Count(u32);
        impl Handler<()> for Count {
            fn handle(&mut self, (): ()) {
                self.0 += 1;
            }
        }

        let mut worker = Worker::builder().spawn(Count(0)).unwrap();
        worker.offer(()).unwrap();
        wait_idle(&worker);
        worker.offer(()).unwrap();
        assert_eq!(worker.shutdown().0, 2);
    }

    #[test]
    fn worker_propagates_panic_on_drop() {
        let mut worker = Worker::builder()
            .spawn(|_: ()| silent_panic("worker panic".into()))
            .unwrap();
        worker.offer(()).unwrap();
        catch_unwind(AssertUnwindSafe(|| drop(worker))).unwrap_err();
    }

    #[test]
    fn busy_flag_cleared_after_panic() {
        let mut worker = Worker::builder()
            .spawn(|_: ()| silent_panic("worker panic".into()))
            .unwrap();
        worker.offer(()).unwrap();
        wait_idle(&worker);
        catch_unwind(AssertUnwindSafe(|| {
            let _ = worker.offer(());
            drop(worker);
        }))
        .unwrap_err();
    }
}
