//! The connector: one network connection, many device streams
//!
//! A [`Connector`] owns one TCP connection (client or server role), the
//! receive thread feeding per-device [`FrameBuffer`]s, the device registry,
//! the command exchange and the event bus. All consumer-side work happens in
//! [`Connector::periodic_process`], which an external scheduler calls on a
//! fixed tick: it drains connection transitions, decodes buffered frames into
//! devices, flushes changed outgoing devices and expires overdue commands.
//! Every call returns promptly; only the blocking command send loops.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::command::{CommandExchange, CommandHandle, CommandOptions, CommandStatus};
use crate::device::{Device, DeviceContent, DeviceKey, DeviceRegistry, Direction};
use crate::error::{IgtlError, Result};
use crate::io::events::{ConnectorEvent, EventBus, EventToken};
use crate::io::frame_buffer::{FrameBuffer, RawFrame};
use crate::io::reconnect::ReconnectConfig;
use crate::protocol::crc::{calculate_crc, verify_crc};
use crate::protocol::header::{DeviceName, Header, Timestamp, TypeName};
use crate::protocol::message::{Message, MessagePrefix};
use crate::protocol::types::CommandMessage;

/// Read timeout on the established socket; bounds stop latency
const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Poll interval of the server accept loop
const ACCEPT_POLL: Duration = Duration::from_millis(50);
/// Connect timeout per client attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Body sizes beyond this are treated as transport corruption
const MAX_BODY_SIZE: u64 = 256 * 1024 * 1024;

/// Connection role: reach out to a peer, or listen for one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorRole {
    /// Connect to `host:port` and keep retrying until it answers
    Client {
        /// Remote host name or address
        host: String,
        /// Remote port
        port: u16,
    },
    /// Listen on `port` and accept one peer at a time
    Server {
        /// Local listen port
        port: u16,
    },
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// Not started, or stopped
    Off,
    /// Started, no peer yet (connecting or listening)
    WaitConnection,
    /// Socket established
    Connected,
}

/// Connector configuration, read at `start()`
///
/// Mutating the configuration after start has no effect on the running
/// connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connection role
    pub role: ConnectorRole,
    /// Reconnect automatically after losing an established connection
    pub persistent: bool,
    /// Discard inbound messages whose device name has no registered
    /// outgoing device
    pub restrict_device_name: bool,
    /// Verify the body CRC of received messages
    pub check_crc: bool,
    /// Pacing of connect/accept retries
    pub reconnect: ReconnectConfig,
    /// First command ID issued by this connector's command exchange
    pub command_id_seed: u32,
}

impl ConnectorConfig {
    /// Client configuration with defaults
    pub fn client(host: impl Into<String>, port: u16) -> Self {
        ConnectorConfig {
            role: ConnectorRole::Client {
                host: host.into(),
                port,
            },
            persistent: true,
            restrict_device_name: false,
            check_crc: true,
            reconnect: ReconnectConfig::default(),
            command_id_seed: 1,
        }
    }

    /// Server configuration with defaults
    pub fn server(port: u16) -> Self {
        ConnectorConfig {
            role: ConnectorRole::Server { port },
            persistent: true,
            restrict_device_name: false,
            check_crc: true,
            reconnect: ReconnectConfig::default(),
            command_id_seed: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Transition {
    Connected,
    Disconnected,
}

/// State shared between the receive thread and the consumer
struct Shared {
    running: AtomicBool,
    state: Mutex<ConnectorState>,
    transitions: Mutex<Vec<Transition>>,
    writer: Mutex<Option<TcpStream>>,
    listen_addr: Mutex<Option<std::net::SocketAddr>>,
    /// Frame buffers keyed by the full on-wire type name plus device name
    buffers: Mutex<HashMap<DeviceKey, Arc<FrameBuffer>>>,
}

impl Shared {
    fn new() -> Self {
        Shared {
            running: AtomicBool::new(false),
            state: Mutex::new(ConnectorState::Off),
            transitions: Mutex::new(Vec::new()),
            writer: Mutex::new(None),
            listen_addr: Mutex::new(None),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn state(&self) -> ConnectorState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ConnectorState) {
        *self.state.lock().unwrap() = state;
    }

    fn push_transition(&self, transition: Transition) {
        self.transitions.lock().unwrap().push(transition);
    }

    fn take_transitions(&self) -> Vec<Transition> {
        std::mem::take(&mut *self.transitions.lock().unwrap())
    }

    fn buffer_for(&self, key: &DeviceKey) -> Arc<FrameBuffer> {
        self.buffers
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(FrameBuffer::new()))
            .clone()
    }

    fn updated_buffers(&self) -> Vec<(DeviceKey, Arc<FrameBuffer>)> {
        self.buffers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, buffer)| buffer.is_updated())
            .map(|(key, buffer)| (key.clone(), buffer.clone()))
            .collect()
    }
}

/// Connection manager and device multiplexer for one OpenIGTLink link
pub struct Connector {
    config: ConnectorConfig,
    registry: DeviceRegistry,
    exchange: CommandExchange,
    events: EventBus,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Connector {
    pub fn new(config: ConnectorConfig) -> Self {
        let exchange = CommandExchange::with_seed(config.command_id_seed);
        Connector {
            config,
            registry: DeviceRegistry::new(),
            exchange,
            events: EventBus::new(),
            shared: Arc::new(Shared::new()),
            thread: None,
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Replace the configuration; ignored (returns `false`) while running
    pub fn set_config(&mut self, config: ConnectorConfig) -> bool {
        if self.thread.is_some() {
            warn!("Configuration change ignored while the connector is running");
            return false;
        }
        self.config = config;
        true
    }

    pub fn state(&self) -> ConnectorState {
        self.shared.state()
    }

    /// Bound listen address of a started server-role connector
    ///
    /// `None` until the listen socket exists (or for client role).
    pub fn listen_addr(&self) -> Option<std::net::SocketAddr> {
        *self.shared.listen_addr.lock().unwrap()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Register a content codec for a custom device-type string
    pub fn register_codec(
        &mut self,
        type_name: &str,
        codec: Arc<dyn crate::device::ContentCodec>,
    ) {
        self.registry.register_codec(type_name, codec);
    }

    /// Subscribe to connector events; the token guarantees removal
    pub fn subscribe<F>(&mut self, callback: F) -> EventToken
    where
        F: FnMut(&ConnectorEvent) + Send + 'static,
    {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, token: EventToken) -> bool {
        self.events.unsubscribe(token)
    }

    /// Start the receive thread and begin connecting or listening
    pub fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            debug!("Connector already started");
            return Ok(());
        }

        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.set_state(ConnectorState::WaitConnection);

        let shared = self.shared.clone();
        let config = self.config.clone();
        self.thread = Some(
            std::thread::Builder::new()
                .name("igtl-receive".into())
                .spawn(move || receive_thread(config, shared))?,
        );

        self.events.emit(&ConnectorEvent::Activated);
        Ok(())
    }

    /// Close the connection and join the receive thread
    ///
    /// Devices persist for potential reuse on a later `start()`.
    pub fn stop(&mut self) {
        if self.thread.is_none() {
            return;
        }

        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(writer) = self.shared.writer.lock().unwrap().take() {
            let _ = writer.shutdown(Shutdown::Both);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.shared.set_state(ConnectorState::Off);

        for transition in self.shared.take_transitions() {
            self.emit_transition(transition);
        }
        self.events.emit(&ConnectorEvent::Deactivated);
    }

    /// One cooperative processing tick; always returns promptly
    pub fn periodic_process(&mut self) {
        for transition in self.shared.take_transitions() {
            self.emit_transition(transition);
        }

        for (wire_key, buffer) in self.shared.updated_buffers() {
            if let Some(frame) = buffer.pull_frame() {
                self.dispatch_frame(&wire_key.name, frame);
            }
        }

        self.flush_outgoing();

        for handle in self.exchange.expire_overdue() {
            debug!(id = handle.id(), "Command expired");
            self.events.emit(&ConnectorEvent::CommandCompleted {
                command_id: handle.id(),
                status: CommandStatus::Expired,
            });
        }
    }

    fn emit_transition(&mut self, transition: Transition) {
        match transition {
            Transition::Connected => self.events.emit(&ConnectorEvent::Connected),
            Transition::Disconnected => self.events.emit(&ConnectorEvent::Disconnected),
        }
    }

    /// Route one inbound frame to the registry and the command exchange
    fn dispatch_frame(&mut self, device_name: &str, frame: RawFrame) {
        if self.config.restrict_device_name && !self.registry.has_outgoing_name(device_name) {
            trace!(
                device = device_name,
                "Dropping message for unregistered device name"
            );
            return;
        }

        let (prefix, base_type) = MessagePrefix::split(&frame.type_name);
        match prefix {
            MessagePrefix::Rts if base_type == "COMMAND" => {
                self.handle_command_response(device_name, &frame);
            }
            MessagePrefix::NotDefined => {
                self.handle_data_frame(base_type.to_owned(), device_name, &frame);
            }
            _ => {
                debug!(
                    type_name = %frame.type_name,
                    device = device_name,
                    "Ignoring query-prefixed message"
                );
            }
        }
    }

    fn handle_command_response(&mut self, device_name: &str, frame: &RawFrame) {
        let response = match CommandMessage::decode_content(&frame.body) {
            Ok(response) => response,
            Err(e) => {
                warn!(device = device_name, error = %e, "Dropping malformed command response");
                return;
            }
        };

        let Some(handle) = self
            .exchange
            .take_matching(device_name, response.command_id)
        else {
            warn!(
                device = device_name,
                id = response.command_id,
                "Dropping command response with no matching query"
            );
            return;
        };

        self.events.emit(&ConnectorEvent::CommandResponseReceived {
            device: device_name.to_owned(),
            command_id: response.command_id,
        });
        if let Some(status) = handle.complete_with_response(&response.command) {
            self.events.emit(&ConnectorEvent::CommandCompleted {
                command_id: response.command_id,
                status,
            });
        }
    }

    fn handle_data_frame(&mut self, base_type: String, device_name: &str, frame: &RawFrame) {
        let key = DeviceKey::new(base_type.clone(), device_name);

        let Some(codec) = self.registry.codec(&base_type) else {
            warn!(device = %key, "Dropping message of unknown device type");
            return;
        };
        let content = match codec.decode(&frame.body) {
            Ok(content) => content,
            Err(e) => {
                warn!(device = %key, error = %e, "Dropping undecodable message body");
                return;
            }
        };
        let incoming_command = content.as_command().cloned();

        let created = match self.registry.get_or_create(&key) {
            Ok((device, created)) => {
                device.assign_direction(Direction::Incoming);
                device.set_content(content);
                // Inbound updates must not be queued back to the peer
                device.mark_flushed();
                created
            }
            Err(e) => {
                warn!(device = %key, error = %e, "Dropping message");
                return;
            }
        };

        if created {
            info!(device = %key, "New device");
            self.events.emit(&ConnectorEvent::NewDevice(key.clone()));
        }
        self.events
            .emit(&ConnectorEvent::DeviceContentModified(key.clone()));

        if let Some(command) = incoming_command {
            self.exchange
                .record_incoming(device_name, command.clone());
            self.events.emit(&ConnectorEvent::CommandReceived {
                device: device_name.to_owned(),
                command_id: command.command_id,
                name: command.command_name,
            });
        }
    }

    /// Send changed outgoing devices; queued sends are dropped once the
    /// connector is off
    fn flush_outgoing(&mut self) {
        let pending: Vec<DeviceKey> = self
            .registry
            .iter()
            .filter(|d| d.direction() == Direction::Outgoing && d.pending_send())
            .map(|d| d.key().clone())
            .collect();
        if pending.is_empty() {
            return;
        }

        match self.state() {
            ConnectorState::Connected => {
                for key in pending {
                    match self.write_device(&key, MessagePrefix::NotDefined) {
                        Ok(()) => {
                            if let Some(device) = self.registry.get_mut(&key) {
                                device.mark_flushed();
                            }
                        }
                        Err(e) => {
                            warn!(device = %key, error = %e, "Failed to send outgoing content");
                        }
                    }
                }
            }
            // Sends stay queued while a connection is still expected
            ConnectorState::WaitConnection => {}
            ConnectorState::Off => {
                debug!("Connector off; dropping queued outgoing content");
                for key in pending {
                    if let Some(device) = self.registry.get_mut(&key) {
                        device.mark_flushed();
                    }
                }
            }
        }
    }

    /// Serialize one device's current content and write it now
    pub fn send_message(&mut self, key: &DeviceKey, prefix: MessagePrefix) -> Result<()> {
        match self.state() {
            ConnectorState::Connected => {
                self.write_device(key, prefix)?;
                if let Some(device) = self.registry.get_mut(key) {
                    device.mark_flushed();
                }
                Ok(())
            }
            ConnectorState::WaitConnection => {
                // Queue: the flush after Connected picks it up
                let device = self
                    .registry
                    .get_mut(key)
                    .ok_or_else(|| IgtlError::DeviceNotFound(key.to_string()))?;
                device.mark_pending();
                Ok(())
            }
            ConnectorState::Off => {
                warn!(device = %key, "Connector off; dropping send");
                Err(IgtlError::NotConnected)
            }
        }
    }

    fn write_device(&self, key: &DeviceKey, prefix: MessagePrefix) -> Result<()> {
        let device = self
            .registry
            .get(key)
            .ok_or_else(|| IgtlError::DeviceNotFound(key.to_string()))?;
        let codec = self
            .registry
            .codec(&key.device_type)
            .ok_or_else(|| IgtlError::UnknownDeviceType(key.device_type.clone()))?;
        let body = codec.encode(device.content())?;
        self.write_raw(&prefix.apply(&key.device_type), &key.name, &body)
    }

    fn write_raw(&self, type_name: &str, device_name: &str, body: &[u8]) -> Result<()> {
        let header = Header {
            version: 2,
            type_name: TypeName::new(type_name)?,
            device_name: DeviceName::new(device_name)?,
            timestamp: Timestamp::now(),
            body_size: body.len() as u64,
            crc: calculate_crc(body),
        };

        let mut writer = self.shared.writer.lock().unwrap();
        let Some(stream) = writer.as_mut() else {
            return Err(IgtlError::NotConnected);
        };

        let result = stream
            .write_all(&header.encode())
            .and_then(|_| stream.write_all(body))
            .and_then(|_| stream.flush());
        if let Err(e) = result {
            warn!(error = %e, "Socket write failed");
            *writer = None;
            return Err(IgtlError::Io(e));
        }
        trace!(
            type_name,
            device = device_name,
            bytes = body.len(),
            "Sent message"
        );
        Ok(())
    }

    /// Send a command and track its response
    ///
    /// Blocking mode drives `periodic_process` in a cooperative poll loop
    /// until the query completes (at worst by expiry). A blocking send on a
    /// device that already has a blocking query in flight replaces it: the
    /// earlier query is cancelled with its completion notification.
    pub fn send_command(
        &mut self,
        device_name: &str,
        command_name: &str,
        content: &str,
        options: CommandOptions,
    ) -> Result<CommandHandle> {
        let mut options = options;
        if options.blocking && options.timeout.is_zero() {
            options.timeout = CommandOptions::default().timeout;
        }

        if options.blocking {
            if let Some(previous) = self.exchange.blocking_in_flight(device_name) {
                warn!(
                    device = device_name,
                    id = previous.id(),
                    "Replacing blocking command already in flight"
                );
                self.cancel_command(&previous);
            }
        }

        let key = DeviceKey::new("COMMAND", device_name);
        let created = {
            let (device, created) = self.registry.get_or_create(&key)?;
            device.assign_direction(Direction::Outgoing);
            created
        };
        if created {
            self.events.emit(&ConnectorEvent::NewDevice(key.clone()));
        }

        let (handle, message) =
            self.exchange
                .begin_query(device_name, command_name, content, &options);
        debug!(
            device = device_name,
            id = handle.id(),
            name = command_name,
            "Sending command"
        );

        if let Some(device) = self.registry.get_mut(&key) {
            device.set_content(DeviceContent::Command(message));
        }
        match self.state() {
            ConnectorState::Connected => {
                match self.write_device(&key, MessagePrefix::NotDefined) {
                    Ok(()) => {
                        if let Some(device) = self.registry.get_mut(&key) {
                            device.mark_flushed();
                        }
                    }
                    Err(e) => warn!(error = %e, "Command send deferred to flush"),
                }
            }
            ConnectorState::WaitConnection => {}
            ConnectorState::Off => {
                warn!("Connector off; command cannot be transmitted");
                if let Some(device) = self.registry.get_mut(&key) {
                    device.mark_flushed();
                }
            }
        }

        if options.blocking {
            let mut polls = 0usize;
            while !handle.is_completed() {
                self.periodic_process();
                if handle.is_completed() {
                    break;
                }
                polls += 1;
                if options.max_polls.is_some_and(|max| polls >= max) {
                    if self.exchange.expire(&handle) {
                        self.events.emit(&ConnectorEvent::CommandCompleted {
                            command_id: handle.id(),
                            status: CommandStatus::Expired,
                        });
                    }
                    break;
                }
                std::thread::sleep(options.poll_interval);
            }
        }

        Ok(handle)
    }

    /// Answer the unanswered incoming command on a device
    ///
    /// The pending command's name must match, otherwise
    /// [`IgtlError::CommandNameMismatch`] is returned and nothing is sent or
    /// consumed.
    pub fn send_command_response(
        &mut self,
        device_name: &str,
        command_name: &str,
        content: &str,
    ) -> Result<()> {
        match self.exchange.pending_incoming(device_name) {
            Some(pending) if pending.command_name == command_name => {}
            Some(pending) => {
                return Err(IgtlError::CommandNameMismatch {
                    device: device_name.to_owned(),
                    pending: Some(pending.command_name.clone()),
                    requested: command_name.to_owned(),
                });
            }
            None => {
                return Err(IgtlError::CommandNameMismatch {
                    device: device_name.to_owned(),
                    pending: None,
                    requested: command_name.to_owned(),
                });
            }
        }
        if self.state() != ConnectorState::Connected {
            return Err(IgtlError::NotConnected);
        }

        let pending = self.exchange.take_incoming(device_name, command_name)?;
        let response = CommandMessage::new(pending.command_id, command_name, content);
        self.write_raw("RTS_COMMAND", device_name, &response.encode_content()?)
    }

    /// Cancel a waiting command; safe to call at any time, no-op once
    /// terminal
    pub fn cancel_command(&mut self, handle: &CommandHandle) {
        if self.exchange.cancel(handle) {
            debug!(id = handle.id(), "Command cancelled");
            self.events.emit(&ConnectorEvent::CommandCompleted {
                command_id: handle.id(),
                status: CommandStatus::Cancelled,
            });
        }
    }

    /// Create (or look up) a device with an explicit role
    pub fn add_device(&mut self, key: DeviceKey, direction: Direction) -> Result<()> {
        let created = {
            let (device, created) = self.registry.get_or_create(&key)?;
            device.assign_direction(direction);
            created
        };
        if created {
            self.events.emit(&ConnectorEvent::NewDevice(key));
        }
        Ok(())
    }

    /// Remove a device; `false` when the key is unknown
    pub fn remove_device(&mut self, key: &DeviceKey) -> bool {
        self.registry.remove(key).is_some()
    }

    pub fn device(&self, key: &DeviceKey) -> Option<&Device> {
        self.registry.get(key)
    }

    /// Update an outgoing device's content; transmitted on the next tick
    pub fn set_device_content(&mut self, key: &DeviceKey, content: DeviceContent) -> Result<()> {
        let device = self
            .registry
            .get_mut(key)
            .ok_or_else(|| IgtlError::DeviceNotFound(key.to_string()))?;
        device.set_content(content);
        self.events
            .emit(&ConnectorEvent::DeviceContentModified(key.clone()));
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn inject_frame(&self, wire_type: &str, device_name: &str, frame: RawFrame) {
        let key = DeviceKey::new(wire_type, device_name);
        self.shared.buffer_for(&key).push_frame(frame);
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Receive thread
// ---------------------------------------------------------------------------

enum ReadOutcome {
    Complete,
    Idle,
    Stopped,
    Failed(std::io::Error),
}

fn receive_thread(config: ConnectorConfig, shared: Arc<Shared>) {
    let mut listener: Option<TcpListener> = None;
    let mut attempt = 0usize;

    while shared.running() {
        let stream = match establish(&config, &shared, &mut listener, &mut attempt) {
            Some(stream) => stream,
            None => {
                if !shared.running() {
                    break;
                }
                continue;
            }
        };
        attempt = 0;

        if configure_stream(&stream, &shared).is_err() {
            continue;
        }
        shared.set_state(ConnectorState::Connected);
        shared.push_transition(Transition::Connected);
        info!("Connection established");

        read_loop(&stream, &config, &shared);

        *shared.writer.lock().unwrap() = None;
        shared.push_transition(Transition::Disconnected);
        if !shared.running() {
            break;
        }
        if config.persistent {
            info!("Peer disconnected; waiting for a new connection");
            shared.set_state(ConnectorState::WaitConnection);
        } else {
            info!("Peer disconnected; connector off");
            shared.set_state(ConnectorState::Off);
            shared.running.store(false, Ordering::SeqCst);
            break;
        }
    }
}

/// Connect (client) or accept (server) one peer, pacing retries
fn establish(
    config: &ConnectorConfig,
    shared: &Shared,
    listener: &mut Option<TcpListener>,
    attempt: &mut usize,
) -> Option<TcpStream> {
    match &config.role {
        ConnectorRole::Client { host, port } => match try_connect(host, *port) {
            Ok(stream) => Some(stream),
            Err(e) => {
                debug!(host = %host, port = *port, error = %e, "Connect attempt failed");
                backoff(config, shared, attempt)
            }
        },
        ConnectorRole::Server { port } => {
            if listener.is_none() {
                match TcpListener::bind(("0.0.0.0", *port)) {
                    Ok(bound) => {
                        if let Err(e) = bound.set_nonblocking(true) {
                            error!(error = %e, "Failed to configure listener");
                            return backoff(config, shared, attempt);
                        }
                        info!(port = *port, "Listening");
                        *shared.listen_addr.lock().unwrap() = bound.local_addr().ok();
                        *listener = Some(bound);
                    }
                    Err(e) => {
                        warn!(port = *port, error = %e, "Failed to bind listen socket");
                        return backoff(config, shared, attempt);
                    }
                }
            }
            accept_pending(listener.as_ref().unwrap(), shared)
        }
    }
}

/// Shared failure path: sleep the backoff delay, give up past max attempts
fn backoff(config: &ConnectorConfig, shared: &Shared, attempt: &mut usize) -> Option<TcpStream> {
    if let Some(max) = config.reconnect.max_attempts {
        if *attempt + 1 >= max {
            error!(attempts = max, "Giving up on connection");
            shared.set_state(ConnectorState::Off);
            shared.running.store(false, Ordering::SeqCst);
            return None;
        }
    }
    let delay = config.reconnect.delay_for_attempt(*attempt);
    *attempt += 1;
    sleep_interruptible(delay, shared);
    None
}

/// Sleep for `delay`, waking early when the connector is stopped
fn sleep_interruptible(delay: Duration, shared: &Shared) {
    let deadline = Instant::now() + delay;
    while shared.running() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(ACCEPT_POLL.min(deadline - now));
    }
}

fn try_connect(host: &str, port: u16) -> std::io::Result<TcpStream> {
    let mut addrs = (host, port).to_socket_addrs()?;
    let addr = addrs.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "host did not resolve")
    })?;
    TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
}

fn accept_pending(listener: &TcpListener, shared: &Shared) -> Option<TcpStream> {
    while shared.running() {
        match listener.accept() {
            Ok((stream, peer)) => {
                info!(%peer, "Accepted client");
                return Some(stream);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    None
}

fn configure_stream(stream: &TcpStream, shared: &Shared) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    *shared.writer.lock().unwrap() = Some(stream.try_clone()?);
    Ok(())
}

/// Frame inbound bytes into per-device buffers until disconnect or stop
fn read_loop(stream: &TcpStream, config: &ConnectorConfig, shared: &Shared) {
    let mut stream = stream;
    let mut header_buf = [0u8; Header::SIZE];

    loop {
        match read_exact_interruptible(&mut stream, &mut header_buf, shared, true) {
            ReadOutcome::Complete => {}
            ReadOutcome::Idle => continue,
            ReadOutcome::Stopped => return,
            ReadOutcome::Failed(e) => {
                debug!(error = %e, "Read failed");
                return;
            }
        }

        let header = match Header::decode(&header_buf) {
            Ok(header) => header,
            Err(e) => {
                warn!(error = %e, "Undecodable header; closing connection");
                return;
            }
        };
        if header.body_size > MAX_BODY_SIZE {
            warn!(
                body_size = header.body_size,
                "Implausible body size; closing corrupted connection"
            );
            return;
        }

        let mut body = vec![0u8; header.body_size as usize];
        match read_exact_interruptible(&mut stream, &mut body, shared, false) {
            ReadOutcome::Complete => {}
            ReadOutcome::Idle => unreachable!("body read never idles"),
            ReadOutcome::Stopped => return,
            ReadOutcome::Failed(e) => {
                debug!(error = %e, "Read failed mid-body");
                return;
            }
        }

        if config.check_crc && !verify_crc(&body, header.crc) {
            warn!("CRC mismatch; dropping frame");
            continue;
        }
        let (type_name, device_name) =
            match (header.type_name.to_str(), header.device_name.to_str()) {
                (Ok(t), Ok(d)) => (t, d),
                _ => {
                    warn!("Invalid name fields; dropping frame");
                    continue;
                }
            };

        trace!(
            type_name = %type_name,
            device = %device_name,
            bytes = body.len(),
            "Received message"
        );
        let key = DeviceKey::new(type_name.clone(), device_name);
        shared.buffer_for(&key).push_frame(RawFrame {
            type_name,
            timestamp: header.timestamp,
            body,
        });
    }
}

/// `read_exact` that honours the read timeout and the stop flag
///
/// `allow_idle` applies only while nothing of the message has been read yet:
/// a timeout then reports `Idle` instead of retrying, so the caller can check
/// for shutdown between messages.
fn read_exact_interruptible(
    stream: &mut &TcpStream,
    buf: &mut [u8],
    shared: &Shared,
    allow_idle: bool,
) -> ReadOutcome {
    let mut offset = 0usize;
    while offset < buf.len() {
        match stream.read(&mut buf[offset..]) {
            Ok(0) => {
                return ReadOutcome::Failed(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed the connection",
                ))
            }
            Ok(n) => offset += n,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                if offset == 0 && allow_idle {
                    return ReadOutcome::Idle;
                }
                if !shared.running() {
                    return ReadOutcome::Stopped;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return ReadOutcome::Failed(e),
        }
    }
    ReadOutcome::Complete
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{CommandResponseMessage, TransformMessage};
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    fn capture_events(connector: &mut Connector) -> Arc<StdMutex<Vec<ConnectorEvent>>> {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        connector.subscribe(move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        events
    }

    fn transform_frame() -> RawFrame {
        RawFrame {
            type_name: "TRANSFORM".into(),
            timestamp: Timestamp::now(),
            body: TransformMessage::identity().encode_content().unwrap(),
        }
    }

    fn offline_connector() -> Connector {
        Connector::new(ConnectorConfig::client("127.0.0.1", 18944))
    }

    #[test]
    fn test_inbound_frame_creates_device_and_fires_events() {
        let mut connector = offline_connector();
        let events = capture_events(&mut connector);

        connector.inject_frame("TRANSFORM", "Probe", transform_frame());
        connector.periodic_process();

        let key = DeviceKey::new("TRANSFORM", "Probe");
        let device = connector.device(&key).expect("device created");
        assert_eq!(device.direction(), Direction::Incoming);
        assert!(matches!(device.content(), DeviceContent::Transform(_)));

        let events = events.lock().unwrap();
        assert!(events.contains(&ConnectorEvent::NewDevice(key.clone())));
        assert!(events.contains(&ConnectorEvent::DeviceContentModified(key)));
    }

    #[test]
    fn test_second_frame_reuses_device() {
        let mut connector = offline_connector();
        let events = capture_events(&mut connector);

        connector.inject_frame("TRANSFORM", "Probe", transform_frame());
        connector.periodic_process();
        connector.inject_frame("TRANSFORM", "Probe", transform_frame());
        connector.periodic_process();

        let new_device_count = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ConnectorEvent::NewDevice(_)))
            .count();
        assert_eq!(new_device_count, 1);
    }

    #[test]
    fn test_unknown_device_type_is_dropped() {
        let mut connector = offline_connector();
        let events = capture_events(&mut connector);

        connector.inject_frame(
            "MYSTERY",
            "X",
            RawFrame {
                type_name: "MYSTERY".into(),
                timestamp: Timestamp::now(),
                body: vec![1, 2, 3],
            },
        );
        connector.periodic_process();

        assert!(connector.registry().is_empty());
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_restrict_device_name_drops_unregistered() {
        let mut config = ConnectorConfig::client("127.0.0.1", 18944);
        config.restrict_device_name = true;
        let mut connector = Connector::new(config);
        let events = capture_events(&mut connector);

        connector.inject_frame("TRANSFORM", "Foo", transform_frame());
        connector.periodic_process();

        assert!(connector.registry().is_empty());
        assert!(events.lock().unwrap().is_empty());

        // With an outgoing device of that name registered, the message passes
        connector
            .add_device(DeviceKey::new("STATUS", "Foo"), Direction::Outgoing)
            .unwrap();
        connector.inject_frame("TRANSFORM", "Foo", transform_frame());
        connector.periodic_process();
        assert!(connector
            .device(&DeviceKey::new("TRANSFORM", "Foo"))
            .is_some());
    }

    #[test]
    fn test_command_response_correlation() {
        let mut connector = offline_connector();
        let events = capture_events(&mut connector);

        let handle = connector
            .send_command(
                "Ultrasound",
                "StartRecording",
                r#"<Command Name="StartRecording"/>"#,
                CommandOptions::asynchronous(Duration::from_secs(30)),
            )
            .unwrap();
        assert!(handle.is_in_progress());

        let response = CommandResponseMessage::new(
            handle.id(),
            "StartRecording",
            r#"<Command Status="SUCCESS" Message="recording"/>"#,
        );
        connector.inject_frame(
            "RTS_COMMAND",
            "Ultrasound",
            RawFrame {
                type_name: "RTS_COMMAND".into(),
                timestamp: Timestamp::now(),
                body: response.encode_content().unwrap(),
            },
        );
        connector.periodic_process();

        assert!(handle.succeeded());
        assert_eq!(
            handle.response_message(0).as_deref(),
            Some("recording")
        );
        let events = events.lock().unwrap();
        assert!(events.contains(&ConnectorEvent::CommandResponseReceived {
            device: "Ultrasound".into(),
            command_id: handle.id(),
        }));
        assert!(events.contains(&ConnectorEvent::CommandCompleted {
            command_id: handle.id(),
            status: CommandStatus::Success,
        }));
    }

    #[test]
    fn test_unmatched_response_is_dropped() {
        let mut connector = offline_connector();
        let events = capture_events(&mut connector);

        let response = CommandResponseMessage::new(99, "Nothing", r#"<Command Status="SUCCESS"/>"#);
        connector.inject_frame(
            "RTS_COMMAND",
            "Ultrasound",
            RawFrame {
                type_name: "RTS_COMMAND".into(),
                timestamp: Timestamp::now(),
                body: response.encode_content().unwrap(),
            },
        );
        connector.periodic_process();

        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_blocking_send_expires_without_peer() {
        let mut connector = offline_connector();
        let events = capture_events(&mut connector);

        let started = Instant::now();
        let handle = connector
            .send_command(
                "Ultrasound",
                "Ping",
                "<Command/>",
                CommandOptions::blocking(Duration::from_millis(100)),
            )
            .unwrap();

        assert_eq!(handle.status(), CommandStatus::Expired);
        // Expiry latency is bounded by the poll interval, not exact
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(events.lock().unwrap().contains(&ConnectorEvent::CommandCompleted {
            command_id: handle.id(),
            status: CommandStatus::Expired,
        }));
    }

    #[test]
    fn test_cancel_command_notifies_once() {
        let mut connector = offline_connector();
        let events = capture_events(&mut connector);

        let handle = connector
            .send_command(
                "Ultrasound",
                "Ping",
                "<Command/>",
                CommandOptions::asynchronous(Duration::from_secs(30)),
            )
            .unwrap();

        connector.cancel_command(&handle);
        connector.cancel_command(&handle);
        assert_eq!(handle.status(), CommandStatus::Cancelled);

        let completions = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ConnectorEvent::CommandCompleted { .. }))
            .count();
        assert_eq!(completions, 1);
    }

    #[test]
    fn test_incoming_command_and_response_name_check() {
        let mut connector = offline_connector();
        let events = capture_events(&mut connector);

        let incoming = CommandMessage::new(5, "SaveConfig", "<Command/>");
        connector.inject_frame(
            "COMMAND",
            "Remote",
            RawFrame {
                type_name: "COMMAND".into(),
                timestamp: Timestamp::now(),
                body: incoming.encode_content().unwrap(),
            },
        );
        connector.periodic_process();

        assert!(events.lock().unwrap().contains(&ConnectorEvent::CommandReceived {
            device: "Remote".into(),
            command_id: 5,
            name: "SaveConfig".into(),
        }));

        // Wrong name: synchronous error, pending entry untouched
        let err = connector
            .send_command_response("Remote", "WrongName", "<Command Status=\"SUCCESS\"/>")
            .unwrap_err();
        assert!(matches!(err, IgtlError::CommandNameMismatch { .. }));

        // Right name but no connection: the query survives for a later try
        let err = connector
            .send_command_response("Remote", "SaveConfig", "<Command Status=\"SUCCESS\"/>")
            .unwrap_err();
        assert!(matches!(err, IgtlError::NotConnected));
    }

    #[test]
    fn test_blocking_send_leaves_async_queries_alone() {
        let mut connector = offline_connector();

        let async_handle = connector
            .send_command(
                "Dev",
                "A",
                "<Command/>",
                CommandOptions::asynchronous(Duration::from_secs(30)),
            )
            .unwrap();

        let blocking = connector
            .send_command(
                "Dev",
                "B",
                "<Command/>",
                CommandOptions::blocking(Duration::from_millis(50)),
            )
            .unwrap();
        assert_eq!(blocking.status(), CommandStatus::Expired);
        assert!(async_handle.is_in_progress());
    }

    #[test]
    fn test_blocking_send_poll_cap() {
        let mut connector = offline_connector();
        let events = capture_events(&mut connector);

        let handle = connector
            .send_command(
                "Dev",
                "C",
                "<Command/>",
                CommandOptions {
                    blocking: true,
                    timeout: Duration::from_secs(60),
                    max_polls: Some(3),
                    ..Default::default()
                },
            )
            .unwrap();

        // The poll cap bounds the wait even far below the timeout
        assert_eq!(handle.status(), CommandStatus::Expired);
        let completions = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ConnectorEvent::CommandCompleted { .. }))
            .count();
        assert_eq!(completions, 1);
    }

    #[test]
    fn test_send_message_when_off_is_dropped() {
        let mut connector = offline_connector();
        let key = DeviceKey::new("STRING", "Notes");
        connector.add_device(key.clone(), Direction::Outgoing).unwrap();
        connector
            .set_device_content(
                &key,
                DeviceContent::Text(crate::protocol::types::StringMessage::new("hi")),
            )
            .unwrap();

        let result = connector.send_message(&key, MessagePrefix::NotDefined);
        assert!(matches!(result, Err(IgtlError::NotConnected)));

        // The queued flag is cleared by the flush in the next tick
        connector.periodic_process();
        assert!(!connector.device(&key).unwrap().pending_send());
    }

    #[test]
    fn test_config_locked_while_running() {
        let mut connector = Connector::new(ConnectorConfig::server(0));
        // Port 0 binds to an ephemeral port; no client will connect
        connector.start().unwrap();
        assert!(!connector.set_config(ConnectorConfig::server(1)));
        connector.stop();
        assert_eq!(connector.state(), ConnectorState::Off);
        assert!(connector.set_config(ConnectorConfig::server(1)));
    }
}
