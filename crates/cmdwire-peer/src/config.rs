use std::time::Duration;

use cmdwire_frame::FrameConfig;

/// Default bound of a connection's outbound queue, in frames.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 1024;

/// Default timeout for correlated calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for establishing a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What happens when a frame is sent to a connection whose outbound queue is
/// full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Close the connection. The sender sees `QueueFull`.
    #[default]
    Disconnect,
    /// Drop the frame and keep the connection. The sender sees `QueueFull`.
    DropFrame,
}

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub frame: FrameConfig,
    pub outbound_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Timeout applied by `Connection::call`. `None` waits forever.
    pub call_timeout: Option<Duration>,
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE,
            overflow_policy: OverflowPolicy::default(),
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Refuse new sockets once this many clients are connected.
    pub max_connections: Option<usize>,
    pub connection: ConnectionConfig,
}
