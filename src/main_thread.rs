//! Hand-off from the frame delivery thread to the main (rendering) thread.
//!
//! The main thread owns a [`MainQueue`], which cannot be sent to other threads. Everything that
//! touches the overlay or presents errors happens in response to a [`MainMsg`] received from it, so
//! that state never needs a lock.

use std::{marker::PhantomData, time::Duration};

use crossbeam::channel::{self, RecvTimeoutError, TryRecvError};

use crate::{
    error::{CaptureError, VisionError},
    landmark::CapturePoint,
};

/// A message processed on the main thread.
#[derive(Debug)]
pub enum MainMsg {
    /// Landmarks found in a frame, in capture space. An empty list clears the overlay.
    Points {
        sequence: u64,
        points: Vec<CapturePoint>,
    },
    /// The detector failed. Capture has already been stopped.
    DetectorFailed(VisionError),
    /// The camera failed. Capture has already been stopped.
    CaptureFailed(CaptureError),
}

/// Creates a connected [`MainHandle`] and [`MainQueue`].
pub fn channel() -> (MainHandle, MainQueue) {
    let (sender, recv) = channel::unbounded();
    (
        MainHandle { sender },
        MainQueue {
            recv,
            _lock: PhantomData,
        },
    )
}

/// Sending side of the main thread queue. Can be cloned and sent to any thread.
#[derive(Clone)]
pub struct MainHandle {
    sender: channel::Sender<MainMsg>,
}

impl MainHandle {
    /// Enqueues `msg` for the main thread.
    ///
    /// Returns once the message is enqueued, without waiting for the main thread to process it.
    /// Messages sent from one thread are processed in the order they were sent.
    ///
    /// If the [`MainQueue`] is gone, the message is dropped and `false` is returned.
    pub fn send(&self, msg: MainMsg) -> bool {
        match self.sender.send(msg) {
            Ok(()) => true,
            Err(channel::SendError(msg)) => {
                log::debug!("main queue closed, dropping {:?}", msg);
                false
            }
        }
    }
}

/// Receiving side of the main thread queue.
pub struct MainQueue {
    recv: channel::Receiver<MainMsg>,
    /// Restricts the queue to the thread that created it.
    _lock: PhantomData<*const ()>,
}

impl MainQueue {
    /// Returns the next message if one is already queued.
    pub fn try_recv(&self) -> Option<MainMsg> {
        match self.recv.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits up to `timeout` for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<MainMsg> {
        match self.recv.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Returns the number of messages waiting to be processed.
    pub fn len(&self) -> usize {
        self.recv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recv.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn preserves_order_across_threads() {
        let (handle, queue) = channel();
        thread::spawn(move || {
            for sequence in 0..10 {
                assert!(handle.send(MainMsg::Points {
                    sequence,
                    points: Vec::new(),
                }));
            }
        })
        .join()
        .unwrap();

        for expected in 0..10 {
            match queue.try_recv() {
                Some(MainMsg::Points { sequence, .. }) => assert_eq!(sequence, expected),
                other => panic!("unexpected message {:?}", other),
            }
        }
        assert!(queue.try_recv().is_none());
    }

    #[test]
    fn send_after_queue_dropped() {
        let (handle, queue) = channel();
        drop(queue);
        assert!(!handle.send(MainMsg::Points {
            sequence: 0,
            points: Vec::new(),
        }));
    }
}
