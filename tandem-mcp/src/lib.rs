//! MCP client layer for tandem.
//!
//! Connects to Model Context Protocol servers over stdio subprocesses or
//! SSE endpoints, multiplexes JSON-RPC requests over a single transport,
//! and tracks connection state and health through a [`ConnectionManager`].

pub mod connection;
pub mod error;
pub mod manager;
pub mod multiplex;
pub mod protocol;
pub mod transport;

pub use connection::{ConnectionInfo, ConnectionState, McpConnection};
pub use error::{McpError, McpResult};
pub use manager::{ConnectionManager, HealthStatus};
pub use multiplex::RequestMultiplexer;
pub use protocol::{RemoteTool, ToolCallResult, ToolContent, PROTOCOL_VERSION};
pub use transport::{SseTransport, StdioTransport, Transport, TransportConfig};
