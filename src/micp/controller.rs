//! Mic controller (client role).
//!
//! The client role is process-wide: at most one controller context exists at a
//! time, so it holds the only client callback registration and the only
//! connection-to-instance table. One actor task owns every remote MICP
//! instance. The public [`MicpController`] handle only enqueues commands; GATT
//! work runs in spawned tasks that report back to the actor through a loopback
//! channel, so all state changes and callback dispatch happen on the actor, one
//! command at a time.

use std::{fmt, sync::Arc};

use crossbeam::atomic::AtomicCell;

use log::{debug, error, info, warn};
use serde_json::json;
use tokio::{
   select,
   sync::{mpsc, oneshot},
   task::AbortHandle,
};

use crate::{
   config::MicCtlrConfig,
   error::{GattError, MicpError, Result},
   event::{ControllerCallbackRef, ControllerEvent, WriteOp},
   gatt::{
      aics::AicsServiceRef,
      transport::{Connection, GattClientRef, Packet},
   },
   micp::{
      discovery::{self, Discovered, DiscoveryState},
      included::Included,
      protocol::{MAX_REMOTE_INSTANCES, MuteState},
   },
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 64;

static CONTROLLER_ACTIVE: AtomicCell<bool> = AtomicCell::new(false);

/// Process-wide claim on the client role, held by every handle to a context
/// and released when the last one drops.
struct RoleClaim;

impl RoleClaim {
   fn acquire() -> Result<Self> {
      CONTROLLER_ACTIVE
         .compare_exchange(false, true)
         .map(|_| Self)
         .map_err(|_| MicpError::AlreadyRegistered)
   }
}

impl Drop for RoleClaim {
   fn drop(&mut self) {
      CONTROLLER_ACTIVE.store(false);
      debug!("Mic controller role released");
   }
}

/// Opaque reference to a remote MICP instance.
///
/// A slot index plus the generation the slot had when the instance was
/// created. Once the instance is gone, lookups with the handle fail with
/// [`MicpError::InvalidInstance`] even if the slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MicpHandle {
   slot: u8,
   generation: u32,
}

impl MicpHandle {
   pub const fn slot(self) -> u8 {
      self.slot
   }

   pub const fn generation(self) -> u32 {
      self.generation
   }
}

impl fmt::Display for MicpHandle {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "micp#{}.{}", self.slot, self.generation)
   }
}

// === Commands ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestOp {
   Read,
   Write(WriteOp),
}

enum ControllerCommand {
   // User commands
   CbRegister(ControllerCallbackRef, oneshot::Sender<Result<()>>),
   Discover(Connection, oneshot::Sender<Result<MicpHandle>>),
   Request(MicpHandle, RequestOp, oneshot::Sender<Result<()>>),
   IncludedGet(MicpHandle, oneshot::Sender<Result<Included>>),
   ConnGet(MicpHandle, oneshot::Sender<Result<Connection>>),
   Status(oneshot::Sender<serde_json::Value>),

   // Transport events
   Notification(Connection, u16, Packet),
   Disconnected(Connection, oneshot::Sender<()>),

   // Task results
   DiscoveryFinished(MicpHandle, std::result::Result<Discovered, GattError>),
   RequestFinished(MicpHandle, u64, std::result::Result<Packet, GattError>),
}

// === Public handle ===

/// Client-role context: discovers remote mic devices and drives their mute
/// state.
///
/// Cloning yields another handle to the same context. The context shuts down
/// once every handle is dropped, which frees the client role for a new one.
#[derive(Clone)]
pub struct MicpController {
   inbox: mpsc::Sender<ControllerCommand>,
   _claim: Arc<RoleClaim>,
}

impl MicpController {
   /// Spawns the process-wide controller on the current tokio runtime.
   ///
   /// Fails with [`MicpError::AlreadyRegistered`] while another context is
   /// alive. `aics` is ignored when AICS support is disabled in `config`.
   pub fn new(
      config: MicCtlrConfig,
      client: GattClientRef,
      aics: Option<AicsServiceRef>,
   ) -> Result<Self> {
      let claim = RoleClaim::acquire()?;
      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      tokio::spawn(ControllerActor::new(config, client, aics, command_rx).run());
      Ok(Self {
         inbox: command_tx,
         _claim: Arc::new(claim),
      })
   }

   /// Installs the process-wide client callback set, shared by every remote
   /// instance. Fails with [`MicpError::AlreadyRegistered`] once set.
   pub async fn cb_register(&self, cb: ControllerCallbackRef) -> Result<()> {
      self
         .call(|tx| ControllerCommand::CbRegister(cb, tx))
         .await?
   }

   /// Starts discovery on `conn` and returns the instance handle right away.
   ///
   /// The outcome arrives as [`ControllerEvent::DiscoverCompleted`].
   pub async fn discover(&self, conn: Connection) -> Result<MicpHandle> {
      self
         .call(|tx| ControllerCommand::Discover(conn, tx))
         .await?
   }

   /// Writes Muted; completes with [`ControllerEvent::WriteCompleted`].
   pub async fn mute(&self, micp: MicpHandle) -> Result<()> {
      self.request(micp, RequestOp::Write(WriteOp::Mute)).await
   }

   /// Writes Unmuted; completes with [`ControllerEvent::WriteCompleted`].
   pub async fn unmute(&self, micp: MicpHandle) -> Result<()> {
      self.request(micp, RequestOp::Write(WriteOp::Unmute)).await
   }

   /// Reads the mute state; completes with [`ControllerEvent::ReadCompleted`].
   pub async fn mute_get(&self, micp: MicpHandle) -> Result<()> {
      self.request(micp, RequestOp::Read).await
   }

   /// AICS instances found by a completed discovery.
   pub async fn included_get(&self, micp: MicpHandle) -> Result<Included> {
      self
         .call(|tx| ControllerCommand::IncludedGet(micp, tx))
         .await?
   }

   pub async fn conn_get(&self, micp: MicpHandle) -> Result<Connection> {
      self
         .call(|tx| ControllerCommand::ConnGet(micp, tx))
         .await?
   }

   /// Snapshot of every tracked instance, for diagnostics.
   pub async fn status(&self) -> Result<serde_json::Value> {
      self.call(ControllerCommand::Status).await
   }

   /// Feeds a notification received on `conn` for attribute `handle`.
   pub async fn notification(&self, conn: Connection, handle: u16, data: &[u8]) -> Result<()> {
      self
         .inbox
         .send(ControllerCommand::Notification(
            conn,
            handle,
            Packet::from_slice(data),
         ))
         .await
         .map_err(|_| MicpError::ControllerShutdown)
   }

   /// Reports that `conn` is gone. Returns once the owning instance has been
   /// torn down and any pending work resolved.
   pub async fn disconnected(&self, conn: Connection) -> Result<()> {
      self
         .call(|tx| ControllerCommand::Disconnected(conn, tx))
         .await
   }

   async fn request(&self, micp: MicpHandle, op: RequestOp) -> Result<()> {
      self
         .call(|tx| ControllerCommand::Request(micp, op, tx))
         .await?
   }

   async fn call<T>(
      &self,
      command: impl FnOnce(oneshot::Sender<T>) -> ControllerCommand,
   ) -> Result<T> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(command(tx))
         .await
         .map_err(|_| MicpError::ControllerShutdown)?;
      rx.await.map_err(|_| MicpError::ControllerShutdown)
   }
}

// === Controller Actor ===

struct PendingRequest {
   id: u64,
   op: RequestOp,
   task: AbortHandle,
}

struct RemoteMicp {
   handle: MicpHandle,
   conn: Connection,
   state: DiscoveryState,
   discovered: Option<Discovered>,
   discovery: Option<AbortHandle>,
   pending: Option<PendingRequest>,
}

impl RemoteMicp {
   fn ready(&self) -> Result<&Discovered> {
      match (&self.state, &self.discovered) {
         (DiscoveryState::Ready, Some(discovered)) => Ok(discovered),
         _ => Err(MicpError::NotReady),
      }
   }

   fn to_json(&self) -> serde_json::Value {
      json!({
          "handle": self.handle.to_string(),
          "conn": self.conn.to_string(),
          "state": self.state.to_str(),
          "aics_count": self.discovered.as_ref().map_or(0, |d| d.included.aics_count()),
          "pending": self.pending.is_some(),
      })
   }
}

#[derive(Default)]
struct Slot {
   generation: u32,
   instance: Option<RemoteMicp>,
}

struct ControllerActor {
   config: MicCtlrConfig,
   client: GattClientRef,
   aics: Option<AicsServiceRef>,
   command_rx: mpsc::Receiver<ControllerCommand>,
   loopback_rx: mpsc::Receiver<ControllerCommand>,
   loopback_tx: mpsc::Sender<ControllerCommand>,

   // State
   callbacks: Option<ControllerCallbackRef>,
   slots: heapless::Vec<Slot, MAX_REMOTE_INSTANCES>,
   next_request_id: u64,
}

impl ControllerActor {
   fn new(
      config: MicCtlrConfig,
      client: GattClientRef,
      aics: Option<AicsServiceRef>,
      command_rx: mpsc::Receiver<ControllerCommand>,
   ) -> Self {
      let (loopback_tx, loopback_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let mut slots = heapless::Vec::new();
      for _ in 0..config.max_instances.clamp(1, MAX_REMOTE_INSTANCES as u8) {
         let _ = slots.push(Slot::default());
      }
      let aics = aics.filter(|_| config.aics_enabled);
      Self {
         config,
         client,
         aics,
         command_rx,
         loopback_rx,
         loopback_tx,
         callbacks: None,
         slots,
         next_request_id: 0,
      }
   }

   async fn run(mut self) {
      info!(
         "Mic controller starting up ({} slots, AICS {})",
         self.slots.len(),
         if self.aics.is_some() { "enabled" } else { "disabled" }
      );

      loop {
         select! {
             cmd = self.command_rx.recv() => {
                 let Some(cmd) = cmd else {
                     info!("Mic controller shutting down");
                     break;
                 };
                 self.handle_command(cmd);
             }
             Some(cmd) = self.loopback_rx.recv() => {
                 self.handle_command(cmd);
             }
         }
      }

      self.cleanup();
   }

   fn handle_command(&mut self, cmd: ControllerCommand) {
      match cmd {
         ControllerCommand::CbRegister(cb, tx) => {
            let _ = tx.send(self.cb_register(cb));
         },
         ControllerCommand::Discover(conn, tx) => {
            let _ = tx.send(self.discover(conn));
         },
         ControllerCommand::Request(micp, op, tx) => {
            let _ = tx.send(self.request(micp, op));
         },
         ControllerCommand::IncludedGet(micp, tx) => {
            let result = self
               .instance(micp)
               .and_then(|inst| Ok(inst.ready()?.included.clone()));
            let _ = tx.send(result);
         },
         ControllerCommand::ConnGet(micp, tx) => {
            let _ = tx.send(self.instance(micp).map(|inst| inst.conn));
         },
         ControllerCommand::Status(tx) => {
            let _ = tx.send(self.status());
         },
         ControllerCommand::Notification(conn, handle, data) => {
            self.handle_notification(conn, handle, &data);
         },
         ControllerCommand::Disconnected(conn, tx) => {
            self.handle_disconnected(conn);
            let _ = tx.send(());
         },
         ControllerCommand::DiscoveryFinished(micp, result) => {
            self.handle_discovery_finished(micp, result);
         },
         ControllerCommand::RequestFinished(micp, id, result) => {
            self.handle_request_finished(micp, id, result);
         },
      }
   }

   fn cb_register(&mut self, cb: ControllerCallbackRef) -> Result<()> {
      if self.callbacks.is_some() {
         return Err(MicpError::AlreadyRegistered);
      }
      self.callbacks = Some(cb);
      info!("Mic controller callbacks registered");
      Ok(())
   }

   // === Instance table ===

   fn instance(&self, micp: MicpHandle) -> Result<&RemoteMicp> {
      self
         .slots
         .get(micp.slot as usize)
         .filter(|slot| slot.generation == micp.generation)
         .and_then(|slot| slot.instance.as_ref())
         .ok_or(MicpError::InvalidInstance)
   }

   fn instance_mut(&mut self, micp: MicpHandle) -> Result<&mut RemoteMicp> {
      self
         .slots
         .get_mut(micp.slot as usize)
         .filter(|slot| slot.generation == micp.generation)
         .and_then(|slot| slot.instance.as_mut())
         .ok_or(MicpError::InvalidInstance)
   }

   fn slot_of(&self, conn: Connection) -> Option<usize> {
      self
         .slots
         .iter()
         .position(|slot| slot.instance.as_ref().is_some_and(|inst| inst.conn == conn))
   }

   // === Discovery ===

   fn discover(&mut self, conn: Connection) -> Result<MicpHandle> {
      let index = match self.slot_of(conn) {
         Some(index) => {
            let state = self.slots[index]
               .instance
               .as_ref()
               .map_or(DiscoveryState::Undiscovered, |inst| inst.state);
            if matches!(state, DiscoveryState::Discovering | DiscoveryState::Ready) {
               return Err(MicpError::AlreadyDiscovering);
            }
            index
         },
         None => self
            .slots
            .iter()
            .position(|slot| slot.instance.is_none())
            .ok_or(MicpError::NoMemory)?,
      };

      let slot = &mut self.slots[index];
      slot.generation = slot.generation.wrapping_add(1);
      let handle = MicpHandle {
         slot: index as u8,
         generation: slot.generation,
      };

      let client = self.client.clone();
      let aics = self.aics.clone();
      let limit = self.config.effective_aics_count();
      let loopback = self.loopback_tx.clone();
      let task = tokio::spawn(async move {
         let result = discovery::discover(&*client, aics.as_deref(), conn, limit).await;
         if let Err(e) = loopback
            .send(ControllerCommand::DiscoveryFinished(handle, result))
            .await
         {
            error!("{conn}: Failed to report discovery result: {e}");
         }
      });

      slot.instance = Some(RemoteMicp {
         handle,
         conn,
         state: DiscoveryState::Discovering,
         discovered: None,
         discovery: Some(task.abort_handle()),
         pending: None,
      });
      info!("{conn}: Discovering MICP as {handle}");
      Ok(handle)
   }

   fn handle_discovery_finished(
      &mut self,
      micp: MicpHandle,
      result: std::result::Result<Discovered, GattError>,
   ) {
      let Ok(inst) = self.instance_mut(micp) else {
         debug!("Dropping discovery result for stale {micp}");
         return;
      };
      if inst.state != DiscoveryState::Discovering {
         return;
      }
      inst.discovery = None;

      let event = match result {
         Ok(discovered) => {
            let count = discovered.included.aics_count();
            info!(
               "{}: MICP ready as {micp} with {count} AICS instance(s)",
               inst.conn
            );
            inst.state = DiscoveryState::Ready;
            inst.discovered = Some(discovered);
            ControllerEvent::DiscoverCompleted(Ok(count))
         },
         Err(e) => {
            warn!("{}: MICP discovery failed: {e}", inst.conn);
            inst.state = DiscoveryState::Failed;
            ControllerEvent::DiscoverCompleted(Err(e))
         },
      };
      self.dispatch(micp, event);
   }

   // === Requests ===

   fn request(&mut self, micp: MicpHandle, op: RequestOp) -> Result<()> {
      let id = self.next_request_id;
      let client = self.client.clone();
      let loopback = self.loopback_tx.clone();

      let inst = self.instance_mut(micp)?;
      let mute_handle = inst.ready()?.mute_handle;
      if inst.pending.is_some() {
         return Err(MicpError::Busy);
      }

      let conn = inst.conn;
      let task = match op {
         RequestOp::Read => {
            debug!("→ {conn}: mute read 0x{mute_handle:04x}");
            tokio::spawn(async move {
               let result = client.read(conn, mute_handle).await;
               let _ = loopback
                  .send(ControllerCommand::RequestFinished(micp, id, result))
                  .await;
            })
         },
         RequestOp::Write(write) => {
            let value = write.target().encode();
            debug!("→ {conn}: mute {}", hex::encode(value));
            tokio::spawn(async move {
               let result = client
                  .write(conn, mute_handle, Packet::from_slice(&value))
                  .await
                  .map(|()| Packet::new());
               let _ = loopback
                  .send(ControllerCommand::RequestFinished(micp, id, result))
                  .await;
            })
         },
      };

      inst.pending = Some(PendingRequest {
         id,
         op,
         task: task.abort_handle(),
      });
      self.next_request_id = id.wrapping_add(1);
      Ok(())
   }

   fn handle_request_finished(
      &mut self,
      micp: MicpHandle,
      id: u64,
      result: std::result::Result<Packet, GattError>,
   ) {
      let Ok(inst) = self.instance_mut(micp) else {
         debug!("Dropping request result for stale {micp}");
         return;
      };
      let conn = inst.conn;
      let Some(pending) = inst.pending.take_if(|pending| pending.id == id) else {
         debug!("{conn}: Dropping unmatched request result #{id}");
         return;
      };

      let event = match pending.op {
         RequestOp::Read => ControllerEvent::ReadCompleted(result.and_then(|data| {
            debug!("← {conn}: mute {}", hex::encode(&data));
            MuteState::decode(&data)
         })),
         RequestOp::Write(op) => {
            if let Err(e) = &result {
               warn!("{conn}: Mute write ({op}) failed: {e}");
            }
            ControllerEvent::WriteCompleted {
               op,
               result: result.map(|_| ()),
            }
         },
      };
      self.dispatch(micp, event);
   }

   // === Transport events ===

   fn handle_notification(&mut self, conn: Connection, handle: u16, data: &[u8]) {
      debug!("← {conn}: notification 0x{handle:04x} {}", hex::encode(data));

      let Some(inst) = self
         .slot_of(conn)
         .and_then(|index| self.slots[index].instance.as_ref())
      else {
         debug!("{conn}: Ignoring notification for unknown connection");
         return;
      };
      let Ok(discovered) = inst.ready() else {
         debug!("{conn}: Ignoring notification before discovery completed");
         return;
      };
      if discovered.mute_handle != handle {
         debug!("{conn}: Ignoring notification for handle 0x{handle:04x}");
         return;
      }

      match MuteState::decode(data) {
         Ok(state) => {
            let micp = inst.handle;
            self.dispatch(micp, ControllerEvent::MuteChanged(state));
         },
         Err(e) => warn!("{conn}: Dropping malformed mute notification: {e}"),
      }
   }

   fn handle_disconnected(&mut self, conn: Connection) {
      let Some(index) = self.slot_of(conn) else {
         return;
      };
      let Some(inst) = self.slots[index].instance.take() else {
         return;
      };
      info!("{conn}: Disconnected, dropping {}", inst.handle);
      self.resolve_all(inst, GattError::Disconnected);
   }

   /// Aborts outstanding work of a removed instance and resolves it exactly
   /// once with `error`.
   fn resolve_all(&self, inst: RemoteMicp, error: GattError) {
      if let Some(task) = inst.discovery {
         task.abort();
         if inst.state == DiscoveryState::Discovering {
            self.dispatch(
               inst.handle,
               ControllerEvent::DiscoverCompleted(Err(error.clone())),
            );
         }
      }
      if let Some(pending) = inst.pending {
         pending.task.abort();
         let event = match pending.op {
            RequestOp::Read => ControllerEvent::ReadCompleted(Err(error)),
            RequestOp::Write(op) => ControllerEvent::WriteCompleted {
               op,
               result: Err(error),
            },
         };
         self.dispatch(inst.handle, event);
      }
   }

   fn dispatch(&self, micp: MicpHandle, event: ControllerEvent) {
      match &self.callbacks {
         Some(cb) => cb.on_event(micp, event),
         None => warn!("No controller callbacks registered, dropping {event:?} for {micp}"),
      }
   }

   fn status(&self) -> serde_json::Value {
      let instances: Vec<_> = self
         .slots
         .iter()
         .filter_map(|slot| slot.instance.as_ref())
         .map(RemoteMicp::to_json)
         .collect();
      json!({
          "slots": self.slots.len(),
          "aics_enabled": self.aics.is_some(),
          "callbacks": self.callbacks.is_some(),
          "instances": instances,
      })
   }

   fn cleanup(&mut self) {
      let instances: Vec<RemoteMicp> = self
         .slots
         .iter_mut()
         .filter_map(|slot| slot.instance.take())
         .collect();
      for inst in instances {
         self.resolve_all(inst, GattError::Disconnected);
      }
   }
}
