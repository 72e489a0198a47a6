//! The capture thread and frame delivery worker backing a [`FrameSource`][super::FrameSource].

use std::{
    panic::resume_unwind,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel;

use crate::{
    error::{CaptureError, SetupError},
    frame::Frame,
    worker::{Busy, Handler, Worker},
};

use super::{CaptureConfiguration, CaptureControl, CaptureInput, ErrorSink, FrameConsumer};

/// How long [`CaptureSession::resume`] waits for the capture thread to discard stale frames.
const RESUME_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs on the frame delivery worker.
struct Delivery {
    control: CaptureControl,
    consumer: FrameConsumer,
}

impl Handler<Frame> for Delivery {
    fn handle(&mut self, frame: Frame) {
        // Capture may have been stopped by the previous frame's consumer.
        if !self.control.is_running() {
            log::trace!("capture stopped, discarding frame {}", frame.sequence());
            return;
        }
        self.control.count_delivered();
        (self.consumer)(frame);
    }
}

/// Owns the capture thread. The thread parks while capture is stopped.
pub(super) struct CaptureSession {
    configuration: CaptureConfiguration,
    shutdown: Arc<AtomicBool>,
    resumed: channel::Receiver<u64>,
    reader: Option<JoinHandle<FrameConsumer>>,
}

impl CaptureSession {
    /// Spawns the capture thread and the frame delivery worker, and waits for the input to start
    /// streaming.
    ///
    /// On failure, the consumer is handed back if it could be recovered.
    pub(super) fn spawn(
        configuration: CaptureConfiguration,
        mut input: Box<dyn CaptureInput>,
        consumer: FrameConsumer,
        control: CaptureControl,
        errors: Option<ErrorSink>,
    ) -> Result<Self, (SetupError, Option<FrameConsumer>)> {
        let label = configuration.queue_label().to_string();
        let worker = Worker::builder()
            .name(label.clone())
            .spawn(Delivery {
                control: control.clone(),
                consumer,
            })
            .map_err(|e| {
                (
                    SetupError::new(format!("could not spawn frame delivery thread: {e}")),
                    None,
                )
            })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = channel::bounded(1);
        let (resumed_tx, resumed) = channel::unbounded();
        let reader = thread::Builder::new()
            .name(format!("{label} capture"))
            .spawn({
                let shutdown = shutdown.clone();
                move || {
                    let reader = match input.open() {
                        Ok(reader) => {
                            ready_tx.send(Ok(())).ok();
                            reader
                        }
                        Err(e) => {
                            ready_tx.send(Err(e)).ok();
                            return worker.shutdown().consumer;
                        }
                    };
                    CaptureLoop {
                        reader,
                        worker,
                        resumes: control.resumes(),
                        control,
                        shutdown,
                        resumed: resumed_tx,
                        errors,
                        epoch: Instant::now(),
                        sequence: 0,
                    }
                    .run()
                }
            })
            .map_err(|e| {
                (
                    SetupError::new(format!("could not spawn capture thread: {e}")),
                    None,
                )
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                configuration,
                shutdown,
                resumed,
                reader: Some(reader),
            }),
            Ok(Err(e)) => {
                let consumer = join(reader);
                Err((
                    SetupError::new(format!("could not start video data output: {e}")),
                    consumer,
                ))
            }
            // The capture thread died before reporting, which means it panicked.
            Err(channel::RecvError) => {
                let consumer = join(reader);
                Err((
                    SetupError::new("capture thread exited unexpectedly"),
                    consumer,
                ))
            }
        }
    }

    pub(super) fn configuration(&self) -> &CaptureConfiguration {
        &self.configuration
    }

    /// Wakes the capture thread after capture has been resumed, and waits until it has dropped
    /// the frames the camera produced while stopped.
    ///
    /// `resumes` is the value of [`CaptureControl::resumes`] after resuming.
    pub(super) fn resume(&self, resumes: u64) {
        let Some(reader) = &self.reader else {
            return;
        };
        reader.thread().unpark();

        let deadline = Instant::now() + RESUME_TIMEOUT;
        loop {
            match self.resumed.recv_deadline(deadline) {
                Ok(seen) if seen >= resumes => return,
                Ok(_) => {}
                Err(channel::RecvTimeoutError::Timeout) => {
                    log::warn!("capture thread did not acknowledge resume in {RESUME_TIMEOUT:?}");
                    return;
                }
                Err(channel::RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Stops both threads and returns the frame consumer.
    ///
    /// Waits for the frame currently being processed, if any.
    pub(super) fn shutdown(mut self) -> Option<FrameConsumer> {
        self.stop_threads()
    }

    fn stop_threads(&mut self) -> Option<FrameConsumer> {
        self.shutdown.store(true, Ordering::Release);
        let reader = self.reader.take()?;
        reader.thread().unpark();
        join(reader)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

/// Joins the capture thread, propagating its panic unless this thread is already panicking.
fn join(reader: JoinHandle<FrameConsumer>) -> Option<FrameConsumer> {
    match reader.join() {
        Ok(consumer) => Some(consumer),
        Err(payload) => {
            if !thread::panicking() {
                resume_unwind(payload);
            }
            None
        }
    }
}

struct CaptureLoop {
    reader: Box<dyn super::FrameReader>,
    worker: Worker<Frame, Delivery>,
    control: CaptureControl,
    shutdown: Arc<AtomicBool>,
    /// Last resume count this thread has caught up with.
    resumes: u64,
    resumed: channel::Sender<u64>,
    errors: Option<ErrorSink>,
    epoch: Instant,
    sequence: u64,
}

impl CaptureLoop {
    fn run(mut self) -> FrameConsumer {
        log::trace!("capture thread starting");
        while !self.shutdown.load(Ordering::Acquire) {
            let resumes = self.control.resumes();
            if resumes != self.resumes {
                self.resumes = resumes;
                if let Err(e) = self.reader.discard_pending() {
                    self.fail(e);
                }
                self.resumed.send(resumes).ok();
            }

            if !self.control.is_running() {
                thread::park();
                continue;
            }

            let image = match self.reader.read() {
                Ok(Some(image)) => image,
                Ok(None) => continue,
                Err(e) => {
                    self.fail(e);
                    continue;
                }
            };

            let frame = Frame::new(image, self.epoch.elapsed(), self.sequence);
            self.sequence += 1;

            // Capture was stopped, or stopped and resumed, while reading.
            if !self.control.is_running() || self.control.resumes() != resumes {
                continue;
            }
            match self.worker.offer(frame) {
                Ok(()) => {}
                Err(Busy(frame)) => {
                    self.control.count_dropped();
                    log::trace!("consumer busy, dropping frame {}", frame.sequence());
                }
            }
        }
        log::trace!("capture thread exiting");
        self.worker.shutdown().consumer
    }

    fn fail(&self, e: anyhow::Error) {
        if self.control.stop() {
            log::error!("camera read failed: {e:#}");
            if let Some(errors) = &self.errors {
                (**errors)(CaptureError::new(e));
            }
        }
    }
}
