use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::SendError;

use super::EncodedImage;

/// Activation state shared between the sender and its frame handles.
#[derive(Debug)]
pub(crate) struct Activation {
    sending: AtomicBool,
    active: Vec<AtomicBool>,
    /// Bumped every time sending is disabled.
    generation: AtomicU64,
}

impl Activation {
    pub fn new(streams: usize) -> Self {
        Activation {
            sending: AtomicBool::new(false),
            active: (0..streams).map(|_| AtomicBool::new(true)).collect(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn set_sending(&self, sending: bool) {
        self.sending.store(sending, Ordering::Release);
        if !sending {
            // After the store, a handle reading the new generation also reads sending false.
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    pub fn set_active(&self, index: usize, active: bool) {
        if let Some(a) = self.active.get(index) {
            a.store(active, Ordering::Release);
        }
    }

    /// Whether a frame for `simulcast_index` would be accepted.
    pub fn check(&self, simulcast_index: usize) -> Result<(), SendError> {
        if !self.is_sending() {
            return Err(SendError::NotSending);
        }

        let active = self
            .active
            .get(simulcast_index)
            .ok_or(SendError::UnknownStream(simulcast_index))?;

        if !active.load(Ordering::Acquire) {
            return Err(SendError::InactiveLayer(simulcast_index));
        }

        Ok(())
    }
}

/// Hands encoded frames to a [`RtpVideoSender`][crate::RtpVideoSender] from another thread.
///
/// Frames are checked against the sender's state right away, so a frame for a disabled layer
/// is rejected on the calling thread. Accepted frames are packetized the next time the owner
/// of the sender calls `handle_timeout`.
///
/// ```
/// # use std::time::Instant;
/// use rtpflow::{EncodedImage, FrameType, RtpVideoSender, SendError, SenderConfig};
///
/// # struct Sink;
/// # impl rtpflow::Transport for Sink {
/// #     fn send_rtp(&mut self, _: &[u8], _: &rtpflow::PacketOptions) -> bool { true }
/// # }
/// let config = SenderConfig::new()
///     .set_ssrcs(vec![1.into()])
///     .set_payload_types(vec![96.into()]);
/// let mut sender = RtpVideoSender::new(config, Default::default(), Sink).unwrap();
/// let handle = sender.frame_handle();
///
/// let frame = EncodedImage::new(vec![1, 2, 3], FrameType::Key, 0, Instant::now());
///
/// // Not sending yet.
/// assert_eq!(handle.send(frame.clone()), Err(SendError::NotSending));
///
/// sender.set_sending(true, Instant::now());
/// std::thread::spawn(move || handle.send(frame)).join().unwrap().unwrap();
///
/// sender.handle_timeout(Instant::now());
/// ```
#[derive(Debug)]
pub struct FrameHandle {
    activation: Arc<Activation>,
    // Mutex for Sync on older compilers.
    tx: Mutex<Sender<Posted>>,
}

/// A frame posted through a handle, with the generation it was checked in.
///
/// A frame checked before sending was disabled must not be sent after it is enabled again.
#[derive(Debug)]
pub(crate) struct Posted {
    pub generation: u64,
    pub frame: EncodedImage,
}

impl FrameHandle {
    pub(crate) fn new(activation: Arc<Activation>, tx: Sender<Posted>) -> Self {
        FrameHandle {
            activation,
            tx: Mutex::new(tx),
        }
    }

    /// Post a frame to the sender.
    pub fn send(&self, frame: EncodedImage) -> Result<(), SendError> {
        // Read before the check, a disable in between makes the frame stale.
        let generation = self.activation.generation();
        self.activation.check(frame.simulcast_index)?;
        self.post(generation, frame)
    }

    pub(crate) fn post(&self, generation: u64, frame: EncodedImage) -> Result<(), SendError> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        tx.send(Posted { generation, frame })
            .map_err(|_| SendError::Disconnected)
    }
}

impl Clone for FrameHandle {
    fn clone(&self) -> Self {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        FrameHandle::new(self.activation.clone(), tx.clone())
    }
}

/// A frame handle and the receiving end kept by the sender.
pub(crate) fn channel(activation: Arc<Activation>) -> (FrameHandle, Receiver<Posted>) {
    let (tx, rx) = mpsc::channel();
    (FrameHandle::new(activation, tx), rx)
}
