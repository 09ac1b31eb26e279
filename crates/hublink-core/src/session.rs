//! Hub session: the connected device and everything known about it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::events::{HubEvent, HubObserver, LogLevel, ObserverRegistry, SubscriptionId};
use crate::payload::{ProgramError, ProgramImage, TransferGrant};
use crate::protocol::constants::*;
use crate::rpc::{Request, system_exit_resolver, wait_ready};
use crate::state::{DeviceMode, ModeMachine};
use crate::storage::{DeviceInfo, HubInfo, InvalidSlot, Slot, SlotInfo, StorageSnapshot};
use crate::transaction::TransactionError;
use crate::transport::{Channel, ChannelError, SerialChannel};

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Device not connected")]
    NotConnected,

    #[error("Device already connected. First disconnect it...")]
    AlreadyConnected,

    #[error(transparent)]
    InvalidSlot(#[from] InvalidSlot),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error("Unexpected reply to {method}: {message}")]
    UnexpectedReply { method: String, message: String },
}

/// Configuration for a hub session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port to use when none is given on the command line.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub request_timeout_ms: u64,
    pub ready_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub upload_timeout_ms: u64,
    /// Mode the hub is assumed to be in right after connecting.
    pub initial_mode: DeviceMode,
    /// `project_id` sent with uploads.
    pub project_id: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT.as_millis() as u64,
            stop_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            upload_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            initial_mode: DeviceMode::Structured,
            project_id: PYTHON_PROJECT_ID.to_string(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }
}

/// Operations a front end can ask of a connected hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubCommand {
    RefreshStatus,
    Run { slot: u32 },
    Stop,
    Move { from: u32, to: u32 },
    Remove { slot: u32 },
    Upload { name: String, text: String, slot: u32 },
}

/// Session with one hub.
///
/// Owns the channel. Every operation takes `&mut self`, so requests on the
/// channel are serialized by construction; share a session between threads
/// by wrapping it in a `Mutex`.
pub struct HubSession<C: Channel> {
    config: SessionConfig,
    channel: Option<C>,
    mode: ModeMachine,
    info: Option<DeviceInfo>,
    storage: Option<StorageSnapshot>,
    observers: ObserverRegistry,
}

impl HubSession<SerialChannel> {
    /// Open the serial port at `address` and connect.
    #[instrument(skip(self))]
    pub fn connect(&mut self, address: &str) -> Result<(), HubError> {
        if self.is_connected() {
            return Err(HubError::AlreadyConnected);
        }
        let channel = SerialChannel::open_with_baud(address, self.config.baud_rate)?;
        self.connect_with(channel)
    }
}

impl<C: Channel> HubSession<C> {
    pub fn new(config: SessionConfig) -> Self {
        let mode = ModeMachine::new(config.initial_mode);
        Self {
            config,
            channel: None,
            mode,
            info: None,
            storage: None,
            observers: ObserverRegistry::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe(&mut self, observer: Arc<dyn HubObserver>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn unsubscribe_all(&mut self) {
        self.observers.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_open())
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode.mode()
    }

    pub fn info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    pub fn storage(&self) -> Option<&StorageSnapshot> {
        self.storage.as_ref()
    }

    /// Occupied slots from the last refresh.
    pub fn slots(&self) -> Option<&BTreeMap<u32, SlotInfo>> {
        self.storage.as_ref().map(|s| &s.slots)
    }

    /// Adopt an already open channel, then load identity and storage.
    ///
    /// Either both loads succeed or the channel is closed and the session
    /// is left disconnected.
    #[instrument(skip(self, channel), fields(channel = %channel.name()))]
    pub fn connect_with(&mut self, channel: C) -> Result<(), HubError> {
        if self.is_connected() {
            return Err(HubError::AlreadyConnected);
        }
        // A channel that died on its own is just dropped.
        self.channel = Some(channel);
        self.mode = ModeMachine::new(self.config.initial_mode);

        if let Err(e) = self.load_identity().and_then(|_| self.refresh_storage_status().map(|_| ())) {
            if let Err(close_err) = self.teardown() {
                warn!(error = %close_err, "Failed to close channel after connect failure");
            }
            self.emit(HubEvent::Log {
                level: LogLevel::Warn,
                message: format!("Connect failed: {e}"),
            });
            return Err(e);
        }

        let info = self.info.clone().unwrap_or_else(|| DeviceInfo {
            name: String::new(),
            firmware_version: String::new(),
        });
        self.emit(HubEvent::Connected {
            name: info.name,
            firmware: info.firmware_version,
        });
        Ok(())
    }

    /// Close the channel, forget the hub, and drop every observer.
    /// Does nothing when not connected.
    pub fn disconnect(&mut self) -> Result<(), HubError> {
        if self.channel.is_none() {
            return Ok(());
        }
        let closed = self.teardown();
        self.emit(HubEvent::Disconnected);
        self.observers.clear();
        closed.map_err(HubError::from)
    }

    fn teardown(&mut self) -> Result<(), ChannelError> {
        let closed = match self.channel.take() {
            Some(mut channel) => channel.close(),
            None => Ok(()),
        };
        self.info = None;
        self.storage = None;
        self.mode = ModeMachine::new(self.config.initial_mode);
        closed
    }

    fn load_identity(&mut self) -> Result<(), HubError> {
        let timeout = self.config.request_timeout();
        let reply = self.request(GET_HUB_INFO, json!({}), timeout)?;
        let hub_info: HubInfo = decode_reply(GET_HUB_INFO, reply)?;
        let name = self.channel_mut()?.name().to_string();

        self.info = Some(DeviceInfo {
            name,
            firmware_version: hub_info.firmware_version(),
        });
        self.emit(HubEvent::InfoChanged);
        Ok(())
    }

    /// Re-read storage status and replace the snapshot.
    ///
    /// On failure the previous snapshot is kept.
    #[instrument(skip(self))]
    pub fn refresh_storage_status(&mut self) -> Result<&StorageSnapshot, HubError> {
        let timeout = self.config.request_timeout();
        let reply = self.request(GET_STORAGE_STATUS, json!({}), timeout)?;
        let snapshot: StorageSnapshot = decode_reply(GET_STORAGE_STATUS, reply)?;
        info!(used_slots = snapshot.slots.len(), "Storage status refreshed");

        let snapshot = self.storage.insert(snapshot);
        self.observers.emit(&HubEvent::StorageChanged);
        Ok(snapshot)
    }

    /// Start the program in `slot`.
    #[instrument(skip(self))]
    pub fn run_program(&mut self, slot: u32) -> Result<Value, HubError> {
        let slot = Slot::new(slot)?;
        let timeout = self.config.request_timeout();
        self.request(PROGRAM_EXECUTE, json!({ "slotid": slot.index() }), timeout)
    }

    /// Terminate the running program; settles once the hub prints
    /// `SystemExit:`.
    #[instrument(skip(self))]
    pub fn stop_program(&mut self) -> Result<(), HubError> {
        let request = Request::new(PROGRAM_TERMINATE, json!({}))
            .timeout(self.config.stop_timeout())
            .with_line_resolver(system_exit_resolver());
        self.send(request)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn move_program(&mut self, from: u32, to: u32) -> Result<(), HubError> {
        let from = Slot::new(from)?;
        let to = Slot::new(to)?;
        let timeout = self.config.request_timeout();
        self.request(
            MOVE_PROJECT,
            json!({ "old_slotid": from.index(), "new_slotid": to.index() }),
            timeout,
        )?;
        self.refresh_storage_status()?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn remove_program(&mut self, slot: u32) -> Result<(), HubError> {
        let slot = Slot::new(slot)?;
        let timeout = self.config.request_timeout();
        self.request(REMOVE_PROJECT, json!({ "slotid": slot.index() }), timeout)?;
        self.refresh_storage_status()?;
        Ok(())
    }

    /// Write `text` as program `name` into `slot`.
    ///
    /// Blocks are sent one at a time, each acknowledged before the next:
    /// the hub assembles the transfer in arrival order.
    #[instrument(skip(self, text), fields(size = text.len()))]
    pub fn upload_program(&mut self, name: &str, text: &str, slot: u32) -> Result<(), HubError> {
        let slot = Slot::new(slot)?;
        let image = ProgramImage::new(name, text);
        let timeout = self.config.upload_timeout();
        let now_ms = chrono::Utc::now().timestamp_millis();

        let reply = self.request(
            START_WRITE_PROGRAM,
            json!({
                "slotid": slot.index(),
                "size": image.size(),
                "meta": image.meta(&self.config.project_id, now_ms),
            }),
            timeout,
        )?;
        let grant: TransferGrant = decode_reply(START_WRITE_PROGRAM, reply)?;

        let blocks = image.blocks(grant.blocksize)?;
        let total = blocks.total() as u64;
        info!(
            transfer_id = %grant.transferid,
            block_size = grant.blocksize,
            blocks = total,
            "Uploading program"
        );

        for (index, block) in blocks.enumerate() {
            self.request(
                WRITE_PACKAGE,
                json!({ "data": block, "transferid": grant.transferid }),
                timeout,
            )?;
            self.emit(HubEvent::UploadProgress {
                slot: slot.index(),
                current: index as u64 + 1,
                total,
            });
        }

        self.refresh_storage_status()?;
        Ok(())
    }

    /// Dispatch a [`HubCommand`]. Commands without a result yield `null`.
    pub fn execute(&mut self, command: HubCommand) -> Result<Value, HubError> {
        match command {
            HubCommand::RefreshStatus => {
                let snapshot = self.refresh_storage_status()?;
                serde_json::to_value(snapshot).map_err(|e| HubError::UnexpectedReply {
                    method: GET_STORAGE_STATUS.to_string(),
                    message: e.to_string(),
                })
            }
            HubCommand::Run { slot } => self.run_program(slot),
            HubCommand::Stop => self.stop_program().map(|_| Value::Null),
            HubCommand::Move { from, to } => self.move_program(from, to).map(|_| Value::Null),
            HubCommand::Remove { slot } => self.remove_program(slot).map(|_| Value::Null),
            HubCommand::Upload { name, text, slot } => {
                self.upload_program(&name, &text, slot).map(|_| Value::Null)
            }
        }
    }

    fn request(&mut self, method: &str, params: Value, timeout: Duration) -> Result<Value, HubError> {
        self.send(Request::new(method, params).timeout(timeout))
    }

    fn send(&mut self, request: Request<'_>) -> Result<Value, HubError> {
        self.ensure_structured()?;
        let channel = self.channel_mut()?;
        Ok(request.send(channel)?)
    }

    /// Bring an interactive hub into structured mode. On failure the mode
    /// is unchanged, so the next request probes again.
    fn ensure_structured(&mut self) -> Result<(), HubError> {
        if !self.mode.needs_ready_probe() {
            return Ok(());
        }
        let timeout = self.config.ready_timeout();
        wait_ready(self.channel_mut()?, timeout)?;
        if let Some(from) = self.mode.mark_structured() {
            self.emit(HubEvent::ModeChanged {
                from,
                to: DeviceMode::Structured,
            });
        }
        Ok(())
    }

    fn channel_mut(&mut self) -> Result<&mut C, HubError> {
        self.channel.as_mut().ok_or(HubError::NotConnected)
    }

    fn emit(&self, event: HubEvent) {
        self.observers.emit(&event);
    }
}

fn decode_reply<T: DeserializeOwned>(method: &str, reply: Value) -> Result<T, HubError> {
    serde_json::from_value(reply).map_err(|e| HubError::UnexpectedReply {
        method: method.to_string(),
        message: e.to_string(),
    })
}
