//! Transport abstraction: an asynchronous, callback-driven message link.

use crate::Result;
use std::sync::Arc;

/// Handler invoked with the raw payload of one received message.
pub type Callback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A message-based device link.
///
/// Implementations send opcode-tagged messages and deliver responses
/// asynchronously, typically from a dedicated reader thread, to the
/// callbacks registered for each opcode. The engine never assumes a
/// response arrives on the calling thread.
pub trait Link: Send + Sync {
    /// Sends one message to the device.
    fn send(&self, opcode: u8, payload: &[u8]) -> Result<()>;

    /// Registers `callback` to run on every received message carrying
    /// `opcode`.
    fn register_callback(&self, opcode: u8, callback: Callback);
}
