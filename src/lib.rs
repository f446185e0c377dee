//! OpenIGTLink connector and device-multiplexing layer
//!
//! This crate implements the connection-management core that sits between an
//! OpenIGTLink peer and a host application: one [`Connector`](io::Connector)
//! owns a TCP connection (client or server role), multiplexes many named,
//! typed message streams ("devices") over it, correlates command queries with
//! their responses, and hands inbound frames from the network thread to the
//! consumer through a fixed-size non-blocking buffer.
//!
//! # Quick Start
//!
//! ```no_run
//! use openigtlink_connect::command::CommandOptions;
//! use openigtlink_connect::io::{Connector, ConnectorConfig, ConnectorEvent};
//! use std::time::Duration;
//!
//! let mut connector = Connector::new(ConnectorConfig::client("127.0.0.1", 18944));
//! connector.subscribe(|event| {
//!     if let ConnectorEvent::DeviceContentModified(key) = event {
//!         println!("updated: {key}");
//!     }
//! });
//! connector.start()?;
//!
//! // Drive the connector from the host's timer loop
//! for _ in 0..100 {
//!     connector.periodic_process();
//!     std::thread::sleep(Duration::from_millis(10));
//! }
//!
//! // Request/response with a cooperative blocking wait
//! let reply = connector.send_command(
//!     "Ultrasound",
//!     "StartRecording",
//!     r#"<Command Name="StartRecording"/>"#,
//!     CommandOptions::blocking(Duration::from_secs(5)),
//! )?;
//! println!("command finished: {}", reply.status().as_str());
//! # Ok::<(), openigtlink_connect::IgtlError>(())
//! ```
//!
//! # Architecture
//!
//! - **`protocol`**: wire format, i.e. the 58-byte header, CRC-64 checksums
//!   and the body types the core interprets (transform, status, string,
//!   command).
//! - **`device`**: the [`DeviceRegistry`](device::DeviceRegistry) mapping
//!   `(type, name)` keys to devices, with per-type content codecs and an open
//!   registration point for custom types.
//! - **`io`**: the [`Connector`](io::Connector) state machine
//!   (`Off -> WaitConnection -> Connected`), the receive thread, the
//!   three-slot [`FrameBuffer`](io::FrameBuffer) handoff and the typed event
//!   bus.
//! - **`command`**: outstanding-query tracking, i.e. correlation by
//!   `(device, command id)`, blocking and async completion, cancellation and
//!   wall-clock expiry.
//!
//! # Design Notes
//!
//! Everything except the blocking command wait is non-blocking: the host
//! calls [`Connector::periodic_process`](io::Connector::periodic_process) on
//! a fixed tick and each call returns promptly. Stream-level problems such as
//! unknown device types, CRC mismatches and unmatched responses are logged
//! and dropped without tearing down the connection; socket-level problems
//! move the state machine, which reconnects automatically when the connector
//! is persistent.

pub mod command;
pub mod device;
pub mod error;
pub mod io;
pub mod protocol;

pub use error::{IgtlError, Result};
