//! Transport Layer for Proxy-Relay IPC
//!
//! - [`in_process`]: the duplex frame channel between the two contexts
//! - [`launcher`]: how the proxy locates, starts and discards relay contexts

pub mod in_process;
pub mod launcher;

// Re-exports for convenience
pub use in_process::{new_pair, FrameReceiver, FrameSender, ProxyEndpoint, RelayEndpoint};
pub use launcher::{RelayContext, RelayLauncher, TaskLauncher};
