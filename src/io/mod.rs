//! Network I/O: the connector, frame handoff and event plumbing

pub mod connector;
pub mod events;
pub mod frame_buffer;
pub mod reconnect;

pub use connector::{Connector, ConnectorConfig, ConnectorRole, ConnectorState};
pub use events::{ConnectorEvent, EventBus, EventToken};
pub use frame_buffer::{FrameBuffer, RawFrame, FRAME_BUFFER_SLOTS};
pub use reconnect::ReconnectConfig;
