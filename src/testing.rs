//! In-crate mocks of the GATT transport and the AICS subsystem.

use std::{
   collections::HashMap,
   sync::{
      Arc,
      atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering},
   },
   time::Duration,
};

use crossbeam::channel;
use futures::future::BoxFuture;
use parking_lot::{Mutex, MutexGuard};
use tokio::{sync::oneshot, time};
use uuid::Uuid;

use crate::{
   error::GattError,
   gatt::{
      aics::{AicsRef, AicsRegisterParam, AicsService},
      transport::{
         CharacteristicHandles, Connection, GattClient, GattServer, IncludedService, Packet,
         Properties, ServiceDefinition, ServiceRange,
      },
   },
   micp::protocol::{AICS_UUID, AttError, MICS_UUID, MUTE_UUID},
};

pub const MUTE_HANDLE: u16 = 0x0003;
pub const CCC_HANDLE: u16 = 0x0004;
pub const MICS_RANGE: ServiceRange = ServiceRange::new(0x0001, 0x0010);

static CONTROLLER_SERIAL: Mutex<()> = parking_lot::const_mutex(());

pub fn init_logger() {
   let _ = env_logger::builder().is_test(true).try_init();
}

/// Serializes tests that own the process-wide controller context.
pub fn controller_serial() -> MutexGuard<'static, ()> {
   CONTROLLER_SERIAL.lock()
}

/// Scripted GATT database and behaviour of one peer.
#[derive(Debug, Clone)]
pub struct Peer {
   pub mics: Option<ServiceRange>,
   pub mute: Option<CharacteristicHandles>,
   pub included: Vec<IncludedService>,
   /// Value served by reads; updated by successful writes.
   pub value: Packet,
   pub write_error: Option<AttError>,
   pub subscribe_error: Option<GattError>,
}

impl Peer {
   pub fn with_mics() -> Self {
      Self {
         mics: Some(MICS_RANGE),
         mute: Some(CharacteristicHandles {
            value_handle: MUTE_HANDLE,
            properties: Properties::from_bits(
               Properties::READ | Properties::WRITE | Properties::NOTIFY,
            ),
            ccc_handle: Some(CCC_HANDLE),
         }),
         included: Vec::new(),
         value: Packet::from_slice(&[0]),
         write_error: None,
         subscribe_error: None,
      }
   }

   pub fn without_mics() -> Self {
      Self {
         mics: None,
         mute: None,
         ..Self::with_mics()
      }
   }

   pub fn with_aics(mut self, count: u16) -> Self {
      for i in 0..count {
         let start = 0x20 + i * 0x10;
         self.included.push(IncludedService {
            uuid: AICS_UUID,
            range: ServiceRange::new(start, start + 0x0f),
         });
      }
      self
   }
}

#[derive(Default)]
struct ClientState {
   peers: HashMap<Connection, Peer>,
   hold_discovery: bool,
   hold_requests: bool,
   held: Vec<oneshot::Sender<()>>,
   writes: Vec<(Connection, u16, Vec<u8>)>,
   subscriptions: Vec<(Connection, u16, u16)>,
   included_calls: usize,
}

/// Client transport answering from scripted [`Peer`]s.
///
/// Discovery steps and read/write requests can be parked until
/// [`release`](Self::release) is called. A connection with no peer behaves as
/// if the link were gone.
#[derive(Default)]
pub struct MockGattClient {
   state: Mutex<ClientState>,
}

impl MockGattClient {
   pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
   }

   pub fn set_peer(&self, conn: Connection, peer: Peer) {
      self.state.lock().peers.insert(conn, peer);
   }

   pub fn update_peer(&self, conn: Connection, f: impl FnOnce(&mut Peer)) {
      if let Some(peer) = self.state.lock().peers.get_mut(&conn) {
         f(peer);
      }
   }

   pub fn hold_discovery(&self, hold: bool) {
      self.state.lock().hold_discovery = hold;
   }

   pub fn hold_requests(&self, hold: bool) {
      self.state.lock().hold_requests = hold;
   }

   /// Lets every parked operation continue; returns how many there were.
   pub fn release(&self) -> usize {
      let held = std::mem::take(&mut self.state.lock().held);
      let count = held.len();
      for tx in held {
         let _ = tx.send(());
      }
      count
   }

   pub fn held(&self) -> usize {
      self.state.lock().held.len()
   }

   /// Waits until at least `count` operations are parked.
   pub async fn wait_held(&self, count: usize) {
      while self.held() < count {
         time::sleep(Duration::from_millis(1)).await;
      }
   }

   pub fn writes(&self) -> Vec<(Connection, u16, Vec<u8>)> {
      self.state.lock().writes.clone()
   }

   pub fn subscriptions(&self) -> Vec<(Connection, u16, u16)> {
      self.state.lock().subscriptions.clone()
   }

   pub fn included_calls(&self) -> usize {
      self.state.lock().included_calls
   }

   fn gate(&self, discovery: bool) -> Option<oneshot::Receiver<()>> {
      let mut state = self.state.lock();
      let hold = if discovery {
         state.hold_discovery
      } else {
         state.hold_requests
      };
      if !hold {
         return None;
      }
      let (tx, rx) = oneshot::channel();
      state.held.push(tx);
      Some(rx)
   }

   fn peer(&self, conn: Connection) -> Result<Peer, GattError> {
      self
         .state
         .lock()
         .peers
         .get(&conn)
         .cloned()
         .ok_or(GattError::Disconnected)
   }
}

async fn pass(gate: Option<oneshot::Receiver<()>>) -> Result<(), GattError> {
   match gate {
      Some(rx) => rx.await.map_err(|_| GattError::Disconnected),
      None => Ok(()),
   }
}

impl GattClient for MockGattClient {
   fn discover_primary(
      &self,
      conn: Connection,
      uuid: Uuid,
   ) -> BoxFuture<'_, Result<Option<ServiceRange>, GattError>> {
      let gate = self.gate(true);
      Box::pin(async move {
         pass(gate).await?;
         let peer = self.peer(conn)?;
         Ok(peer.mics.filter(|_| uuid == MICS_UUID))
      })
   }

   fn discover_characteristic(
      &self,
      conn: Connection,
      range: ServiceRange,
      uuid: Uuid,
   ) -> BoxFuture<'_, Result<Option<CharacteristicHandles>, GattError>> {
      Box::pin(async move {
         let peer = self.peer(conn)?;
         Ok(peer
            .mute
            .filter(|mute| uuid == MUTE_UUID && range.contains(mute.value_handle)))
      })
   }

   fn discover_included(
      &self,
      conn: Connection,
      _range: ServiceRange,
   ) -> BoxFuture<'_, Result<Vec<IncludedService>, GattError>> {
      Box::pin(async move {
         let peer = self.peer(conn)?;
         self.state.lock().included_calls += 1;
         Ok(peer.included)
      })
   }

   fn subscribe(
      &self,
      conn: Connection,
      value_handle: u16,
      ccc_handle: u16,
   ) -> BoxFuture<'_, Result<(), GattError>> {
      Box::pin(async move {
         let peer = self.peer(conn)?;
         if let Some(e) = peer.subscribe_error {
            return Err(e);
         }
         self
            .state
            .lock()
            .subscriptions
            .push((conn, value_handle, ccc_handle));
         Ok(())
      })
   }

   fn read(&self, conn: Connection, _handle: u16) -> BoxFuture<'_, Result<Packet, GattError>> {
      let gate = self.gate(false);
      Box::pin(async move {
         pass(gate).await?;
         Ok(self.peer(conn)?.value)
      })
   }

   fn write(
      &self,
      conn: Connection,
      handle: u16,
      data: Packet,
   ) -> BoxFuture<'_, Result<(), GattError>> {
      self.state.lock().writes.push((conn, handle, data.to_vec()));
      let gate = self.gate(false);
      Box::pin(async move {
         pass(gate).await?;
         let peer = self.peer(conn)?;
         if let Some(e) = peer.write_error {
            return Err(GattError::Att(e));
         }
         self.update_peer(conn, |peer| peer.value = data);
         Ok(())
      })
   }
}

/// AICS subsystem handing out sequential references.
#[derive(Default)]
pub struct MockAics {
   next: AtomicU16,
   calls: AtomicUsize,
   live: Mutex<Vec<AicsRef>>,
   fail_register_at: Mutex<Option<usize>>,
   discovered: Mutex<Vec<ServiceRange>>,
   fail_at: Mutex<Option<ServiceRange>>,
}

impl MockAics {
   pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
   }

   /// Local instances registered and not released.
   pub fn registered(&self) -> usize {
      self.live.lock().len()
   }

   /// Makes the `index`-th registration call (zero-based) fail.
   pub fn fail_registration_at(&self, index: usize) {
      *self.fail_register_at.lock() = Some(index);
   }

   pub fn discovered(&self) -> Vec<ServiceRange> {
      self.discovered.lock().clone()
   }

   pub fn fail_discovery_at(&self, range: ServiceRange) {
      *self.fail_at.lock() = Some(range);
   }

   fn allocate(&self) -> AicsRef {
      AicsRef::from_raw(self.next.fetch_add(1, Ordering::Relaxed))
   }
}

impl AicsService for MockAics {
   fn register(&self, _param: &AicsRegisterParam) -> Result<AicsRef, GattError> {
      let call = self.calls.fetch_add(1, Ordering::Relaxed);
      if *self.fail_register_at.lock() == Some(call) {
         return Err(GattError::Att(AttError::UNLIKELY));
      }
      let aics = self.allocate();
      self.live.lock().push(aics);
      Ok(aics)
   }

   fn unregister(&self, aics: AicsRef) {
      self.live.lock().retain(|live| *live != aics);
   }

   fn discover(
      &self,
      _conn: Connection,
      range: ServiceRange,
   ) -> BoxFuture<'_, Result<AicsRef, GattError>> {
      Box::pin(async move {
         if *self.fail_at.lock() == Some(range) {
            return Err(GattError::Att(AttError::UNLIKELY));
         }
         self.discovered.lock().push(range);
         Ok(self.allocate())
      })
   }
}

/// Pauses one notification: signals `entered`, then waits on `resume`.
struct NotifyGate {
   entered: channel::Sender<()>,
   resume: channel::Receiver<()>,
}

/// Server transport recording published services and notifications.
#[derive(Default)]
pub struct MockGattServer {
   services: Mutex<Vec<ServiceDefinition>>,
   notifications: Mutex<Vec<(Uuid, Vec<u8>)>>,
   refuse: AtomicBool,
   gate: Mutex<Option<NotifyGate>>,
}

impl MockGattServer {
   pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
   }

   pub fn refuse_registration(&self) {
      self.refuse.store(true, Ordering::Relaxed);
   }

   pub fn services(&self) -> Vec<ServiceDefinition> {
      self.services.lock().clone()
   }

   pub fn notifications(&self) -> Vec<(Uuid, Vec<u8>)> {
      self.notifications.lock().clone()
   }

   /// Blocks the next `notify` call until the returned sender fires. The
   /// returned receiver fires once that call has started.
   pub fn pause_next_notify(&self) -> (channel::Receiver<()>, channel::Sender<()>) {
      let (entered_tx, entered_rx) = channel::bounded(1);
      let (resume_tx, resume_rx) = channel::bounded(1);
      *self.gate.lock() = Some(NotifyGate {
         entered: entered_tx,
         resume: resume_rx,
      });
      (entered_rx, resume_tx)
   }
}

impl GattServer for MockGattServer {
   fn register_service(&self, service: &ServiceDefinition) -> Result<(), GattError> {
      if self.refuse.load(Ordering::Relaxed) {
         return Err(GattError::Transport("service registration refused".to_string()));
      }
      self.services.lock().push(service.clone());
      Ok(())
   }

   fn notify(&self, characteristic: Uuid, value: &[u8]) -> Result<(), GattError> {
      let gate = self.gate.lock().take();
      if let Some(gate) = gate {
         let _ = gate.entered.send(());
         let _ = gate.resume.recv();
      }
      self
         .notifications
         .lock()
         .push((characteristic, value.to_vec()));
      Ok(())
   }
}
