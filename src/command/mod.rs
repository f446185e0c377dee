//! Command query tracking and response correlation
//!
//! A command send creates a [`CommandHandle`] tracked by the per-connector
//! [`CommandExchange`] until a response with the matching `(device, id)`
//! arrives, the query is cancelled, or it expires. Completion is delivered
//! through one path for success, failure, expiry and cancellation alike:
//! the status turns terminal, the handle's watch channel fires, and the
//! connector emits a single `CommandCompleted` event.

pub mod xml;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::warn;

use crate::error::{IgtlError, Result};
use crate::protocol::types::CommandMessage;
use xml::XmlElement;

/// Lifecycle state of a command query
///
/// Transitions are monotonic: `Unknown → Waiting → {Success, Fail, Expired,
/// Cancelled}`; a terminal state never re-enters `Waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Unknown,
    Waiting,
    Success,
    Fail,
    Expired,
    Cancelled,
}

impl CommandStatus {
    /// Human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Unknown => "Unknown",
            CommandStatus::Waiting => "Waiting",
            CommandStatus::Success => "Success",
            CommandStatus::Fail => "Fail",
            CommandStatus::Expired => "Expired",
            CommandStatus::Cancelled => "Cancelled",
        }
    }

    /// Parse a wire-level `Status` attribute keyword
    pub fn parse_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "SUCCESS" => Some(CommandStatus::Success),
            "FAIL" => Some(CommandStatus::Fail),
            _ => None,
        }
    }

    /// Wire-level `Status` attribute keyword, for the states that have one
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            CommandStatus::Success => Some("SUCCESS"),
            CommandStatus::Fail => Some("FAIL"),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Success
                | CommandStatus::Fail
                | CommandStatus::Expired
                | CommandStatus::Cancelled
        )
    }
}

/// Delivery mode and timing knobs for a command send
#[derive(Debug, Clone)]
pub struct CommandOptions {
    /// Wait cooperatively for the response inside the send call
    pub blocking: bool,
    /// Wall-clock budget measured from query creation; zero disables expiry
    pub timeout: Duration,
    /// Sleep between processing ticks in the blocking wait loop
    pub poll_interval: Duration,
    /// Upper bound on blocking-wait iterations (`None` = timeout only)
    pub max_polls: Option<usize>,
}

impl Default for CommandOptions {
    fn default() -> Self {
        CommandOptions {
            blocking: true,
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(5),
            max_polls: None,
        }
    }
}

impl CommandOptions {
    /// Async delivery: return immediately, complete via events / the handle
    pub fn asynchronous(timeout: Duration) -> Self {
        CommandOptions {
            blocking: false,
            timeout,
            ..Default::default()
        }
    }

    /// Blocking delivery with the given timeout
    pub fn blocking(timeout: Duration) -> Self {
        CommandOptions {
            blocking: true,
            timeout,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct QueryInner {
    id: u32,
    device_name: String,
    command_name: String,
    request: String,
    status: CommandStatus,
    response_text: Option<String>,
    response_xml: Option<XmlElement>,
    created_at: Instant,
    timeout: Duration,
    blocking: bool,
    notified: bool,
    status_tx: watch::Sender<CommandStatus>,
}

impl QueryInner {
    /// Monotonic transition into a terminal state; `true` exactly once
    fn complete(&mut self, status: CommandStatus) -> bool {
        if self.notified || self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.notified = true;
        let _ = self.status_tx.send(status);
        true
    }

    /// Store the raw response text verbatim and derive the terminal status
    ///
    /// Malformed XML or a missing/invalid `Status` attribute forces `Fail`;
    /// the original text stays inspectable either way.
    fn set_response_text(&mut self, text: &str) -> CommandStatus {
        self.response_text = Some(text.to_owned());
        self.response_xml = xml::parse(text);

        match &self.response_xml {
            Some(element) => match element.attribute("Status").and_then(CommandStatus::parse_keyword)
            {
                Some(status) => status,
                None => {
                    warn!(id = self.id, "Command response has no valid Status attribute");
                    CommandStatus::Fail
                }
            },
            None => {
                warn!(id = self.id, "Command response is not XML: {text}");
                CommandStatus::Fail
            }
        }
    }
}

/// Caller-side handle to one outstanding (or finished) command query
#[derive(Debug, Clone)]
pub struct CommandHandle {
    inner: Arc<Mutex<QueryInner>>,
    status_rx: watch::Receiver<CommandStatus>,
}

impl CommandHandle {
    pub fn id(&self) -> u32 {
        self.inner.lock().unwrap().id
    }

    pub fn device_name(&self) -> String {
        self.inner.lock().unwrap().device_name.clone()
    }

    pub fn command_name(&self) -> String {
        self.inner.lock().unwrap().command_name.clone()
    }

    /// XML request content this query was sent with
    pub fn request_content(&self) -> String {
        self.inner.lock().unwrap().request.clone()
    }

    pub fn status(&self) -> CommandStatus {
        self.inner.lock().unwrap().status
    }

    pub fn is_in_progress(&self) -> bool {
        self.status() == CommandStatus::Waiting
    }

    pub fn is_completed(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.status() == CommandStatus::Success
    }

    /// Failure covers the response-level `Fail` as well as expiry and
    /// cancellation
    pub fn failed(&self) -> bool {
        matches!(
            self.status(),
            CommandStatus::Fail | CommandStatus::Expired | CommandStatus::Cancelled
        )
    }

    /// Raw response text exactly as received, even when it wasn't XML
    pub fn response_text(&self) -> Option<String> {
        self.inner.lock().unwrap().response_text.clone()
    }

    /// Attribute of the response's root element
    pub fn response_attribute(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .response_xml
            .as_ref()
            .and_then(|el| el.attribute(name).map(str::to_owned))
    }

    /// Response message text for multi-part results
    ///
    /// Index 0 prefers the root `Message` attribute; otherwise the indexed
    /// nested element's `Message` attribute is used.
    pub fn response_message(&self, index: usize) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        let element = inner.response_xml.as_ref()?;
        if index == 0 {
            if let Some(message) = element.attribute("Message") {
                return Some(message.to_owned());
            }
        }
        element
            .child(index)?
            .attribute("Message")
            .map(str::to_owned)
    }

    /// Await the terminal status without polling
    ///
    /// The async counterpart to the blocking send loop; completes as soon as
    /// the query reaches any terminal state.
    pub async fn completed(&self) -> CommandStatus {
        let mut rx = self.status_rx.clone();
        let result = match rx.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            // Sender dropped: report whatever state the query ended in
            Err(_) => self.status(),
        };
        result
    }

    pub(crate) fn blocking(&self) -> bool {
        self.inner.lock().unwrap().blocking
    }

    pub(crate) fn complete(&self, status: CommandStatus) -> bool {
        self.inner.lock().unwrap().complete(status)
    }

    pub(crate) fn complete_with_response(&self, text: &str) -> Option<CommandStatus> {
        let mut inner = self.inner.lock().unwrap();
        let status = inner.set_response_text(text);
        inner.complete(status).then_some(status)
    }

    fn matches(&self, device_name: &str, command_id: u32) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.status == CommandStatus::Waiting
            && inner.id == command_id
            && inner.device_name == device_name
    }

    fn overdue(&self, now: Instant) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.status == CommandStatus::Waiting
            && inner.timeout > Duration::ZERO
            && now.duration_since(inner.created_at) > inner.timeout
    }
}

/// Per-connector command bookkeeping: ID generation, outstanding queries and
/// unanswered incoming commands
///
/// The ID counter is owned by the instance (seedable for deterministic
/// tests); there is no process-wide state.
pub struct CommandExchange {
    next_id: u32,
    pending: Vec<CommandHandle>,
    incoming: HashMap<String, CommandMessage>,
}

impl CommandExchange {
    pub fn new() -> Self {
        Self::with_seed(1)
    }

    /// Start the command ID counter at `seed`
    pub fn with_seed(seed: u32) -> Self {
        CommandExchange {
            next_id: seed,
            pending: Vec::new(),
            incoming: HashMap::new(),
        }
    }

    /// Create a waiting query and the COMMAND body that transmits it
    pub fn begin_query(
        &mut self,
        device_name: &str,
        command_name: &str,
        content: &str,
        options: &CommandOptions,
    ) -> (CommandHandle, CommandMessage) {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let (status_tx, status_rx) = watch::channel(CommandStatus::Waiting);
        let handle = CommandHandle {
            inner: Arc::new(Mutex::new(QueryInner {
                id,
                device_name: device_name.to_owned(),
                command_name: command_name.to_owned(),
                request: content.to_owned(),
                status: CommandStatus::Waiting,
                response_text: None,
                response_xml: None,
                created_at: Instant::now(),
                timeout: options.timeout,
                blocking: options.blocking,
                notified: false,
                status_tx,
            })),
            status_rx,
        };
        self.pending.push(handle.clone());

        let message = CommandMessage::new(id, command_name, content);
        (handle, message)
    }

    /// Take the waiting query matching a response's `(device, id)` pair
    ///
    /// `None` means the response is unmatched and should be dropped.
    pub fn take_matching(&mut self, device_name: &str, command_id: u32) -> Option<CommandHandle> {
        let index = self
            .pending
            .iter()
            .position(|handle| handle.matches(device_name, command_id))?;
        Some(self.pending.remove(index))
    }

    /// Waiting blocking query on a device, if any
    pub fn blocking_in_flight(&self, device_name: &str) -> Option<CommandHandle> {
        self.pending
            .iter()
            .find(|handle| handle.blocking() && handle.is_in_progress() && handle.device_name() == device_name)
            .cloned()
    }

    /// Cancel a waiting query
    ///
    /// Removes it from the pending set and turns it `Cancelled`; `true` only
    /// on the call that performed the transition, so the completion
    /// notification fires once. Terminal queries are left untouched.
    pub fn cancel(&mut self, handle: &CommandHandle) -> bool {
        self.pending
            .retain(|pending| !Arc::ptr_eq(&pending.inner, &handle.inner));
        handle.complete(CommandStatus::Cancelled)
    }

    /// Force-expire one query (used when a blocking wait hits its poll cap)
    ///
    /// Same exactly-once semantics as [`CommandExchange::cancel`].
    pub fn expire(&mut self, handle: &CommandHandle) -> bool {
        self.pending
            .retain(|pending| !Arc::ptr_eq(&pending.inner, &handle.inner));
        handle.complete(CommandStatus::Expired)
    }

    /// Expire every waiting query whose wall-clock budget has run out
    ///
    /// Returns the queries whose completion notification should fire now.
    pub fn expire_overdue(&mut self) -> Vec<CommandHandle> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.pending.retain(|handle| {
            if handle.overdue(now) {
                expired.push(handle.clone());
                false
            } else {
                // Drop queries that went terminal through other paths too
                handle.is_in_progress()
            }
        });
        expired.retain(|handle| handle.complete(CommandStatus::Expired));
        expired
    }

    /// Record an unanswered incoming command for its device
    pub fn record_incoming(&mut self, device_name: &str, command: CommandMessage) {
        self.incoming.insert(device_name.to_owned(), command);
    }

    /// Unanswered incoming command on a device, if any
    pub fn pending_incoming(&self, device_name: &str) -> Option<&CommandMessage> {
        self.incoming.get(device_name)
    }

    /// Claim the unanswered incoming command a response is answering
    ///
    /// The pending command's name must equal `command_name`, otherwise
    /// [`IgtlError::CommandNameMismatch`] is returned and nothing changes.
    pub fn take_incoming(&mut self, device_name: &str, command_name: &str) -> Result<CommandMessage> {
        let pending_name = self
            .incoming
            .get(device_name)
            .map(|pending| pending.command_name.clone());
        match pending_name {
            Some(name) if name == command_name => Ok(self.incoming.remove(device_name).unwrap()),
            pending => Err(IgtlError::CommandNameMismatch {
                device: device_name.to_owned(),
                pending,
                requested: command_name.to_owned(),
            }),
        }
    }

    /// Number of outstanding queries
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for CommandExchange {
    fn default() -> Self {
        Self::new()
    }
}
