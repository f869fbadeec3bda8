//! Event dispatch for both MICP roles.
//!
//! Each role has one event enum and one observer trait with a single dispatch
//! method. Controller events carry the [`MicpHandle`] of the remote instance
//! they originate from, so one observer can serve every connection.

use std::sync::Arc;

use crossbeam::{atomic::AtomicCell, queue::SegQueue};
use tokio::sync::Notify;

use crate::{error::GattError, micp::controller::MicpHandle, micp::protocol::MuteState};

/// Events raised by the local mic device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicDevEvent {
   /// The mute state changed, locally or through a remote write.
   MuteChanged(MuteState),
   /// The mute state was read with `mute_get`.
   MuteRead(MuteState),
}

/// Which write a [`ControllerEvent::WriteCompleted`] resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum WriteOp {
   #[strum(serialize = "mute")]
   Mute,
   #[strum(serialize = "unmute")]
   Unmute,
}

impl WriteOp {
   pub const fn target(self) -> MuteState {
      match self {
         Self::Mute => MuteState::Muted,
         Self::Unmute => MuteState::Unmuted,
      }
   }
}

/// Events raised by the controller for a remote instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
   /// Discovery finished; carries the number of included AICS instances.
   DiscoverCompleted(Result<u8, GattError>),
   /// Unsolicited mute notification from the peer.
   MuteChanged(MuteState),
   /// Answer to `mute_get`.
   ReadCompleted(Result<MuteState, GattError>),
   /// Answer to `mute` / `unmute`.
   WriteCompleted {
      op: WriteOp,
      result: Result<(), GattError>,
   },
}

impl ControllerEvent {
   /// Integer error value of the event; zero on success and for notifications.
   pub fn code(&self) -> i32 {
      let err = match self {
         Self::DiscoverCompleted(Err(e))
         | Self::ReadCompleted(Err(e))
         | Self::WriteCompleted { result: Err(e), .. } => e,
         _ => return 0,
      };
      err.code()
   }
}

/// Observer of the mic device.
pub trait MicDevCallbacks: Send + Sync {
   fn on_event(&self, event: MicDevEvent);
}

/// Observer shared by every remote instance of a controller.
pub trait ControllerCallbacks: Send + Sync {
   fn on_event(&self, micp: MicpHandle, event: ControllerEvent);
}

pub type MicDevCallbackRef = Arc<dyn MicDevCallbacks>;
pub type ControllerCallbackRef = Arc<dyn ControllerCallbacks>;

/// Queue of events for async consumers.
///
/// Producers are [`EventSender`]s, which implement the callback traits.
/// [`recv`](Self::recv) yields `None` once the queue is drained and every
/// sender has been dropped.
pub struct EventQueue<T> {
   queue: SegQueue<T>,
   notifier: Notify,
   senders: AtomicCell<usize>,
}

impl<T> EventQueue<T> {
   pub fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
         senders: AtomicCell::new(0),
      })
   }

   pub fn sender(self: &Arc<Self>) -> EventSender<T> {
      self.senders.fetch_add(1);
      EventSender {
         queue: self.clone(),
      }
   }

   pub fn try_recv(&self) -> Option<T> {
      self.queue.pop()
   }

   pub fn len(&self) -> usize {
      self.queue.len()
   }

   pub fn is_empty(&self) -> bool {
      self.queue.is_empty()
   }

   pub async fn recv(&self) -> Option<T> {
      loop {
         let notified = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if self.senders.load() == 0 {
            return None;
         }
         notified.await;
      }
   }

   fn push(&self, item: T) {
      self.queue.push(item);
      self.notifier.notify_waiters();
   }
}

/// Producer side of an [`EventQueue`].
pub struct EventSender<T> {
   queue: Arc<EventQueue<T>>,
}

impl<T> EventSender<T> {
   pub fn send(&self, item: T) {
      self.queue.push(item);
   }
}

impl<T> Clone for EventSender<T> {
   fn clone(&self) -> Self {
      self.queue.sender()
   }
}

impl<T> Drop for EventSender<T> {
   fn drop(&mut self) {
      if self.queue.senders.fetch_sub(1) == 1 {
         self.queue.notifier.notify_waiters();
      }
   }
}

impl MicDevCallbacks for EventSender<MicDevEvent> {
   fn on_event(&self, event: MicDevEvent) {
      self.send(event);
   }
}

impl ControllerCallbacks for EventSender<(MicpHandle, ControllerEvent)> {
   fn on_event(&self, micp: MicpHandle, event: ControllerEvent) {
      self.send((micp, event));
   }
}
