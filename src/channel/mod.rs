//! Bidirectional channel to the kernel congestion-control module.
//!
//! The channel reads periodic statistics records and writes protocol-switch
//! commands. The production implementation speaks netlink ([`NetlinkChannel`]);
//! the training loop only depends on the [`KernelChannel`] trait.

mod record;

#[cfg(target_os = "linux")]
mod netlink;

pub use record::{decode_payload, StatField, StatRecord};

#[cfg(target_os = "linux")]
pub use netlink::NetlinkChannel;

use crate::error::ChannelError;
use crate::types::Action;
use async_trait::async_trait;
use std::time::Duration;

/// A channel to the kernel that is exclusively owned by one running model.
///
/// Opening is implementation-specific (see [`NetlinkChannel::open`]) and fails
/// with an unavailable error when the kernel endpoint cannot be reached.
#[async_trait]
pub trait KernelChannel: Send + std::fmt::Debug {
    /// Waits up to `timeout` for the next statistics record.
    ///
    /// Returns `Ok(None)` if the timeout elapsed without a record, which lets
    /// the caller keep its step cadence while the kernel is silent.
    ///
    /// # Errors
    ///
    /// Returns an unavailable error if the endpoint is gone, or a decode error
    /// for a single malformed record (the channel stays usable).
    async fn receive(&mut self, timeout: Duration) -> Result<Option<StatRecord>, ChannelError>;

    /// Issues a protocol-switch command.
    ///
    /// Fire-and-forget: the switch takes effect eventually, so the next few
    /// records may still reflect the previous protocol.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be written.
    async fn send(&mut self, action: Action) -> Result<(), ChannelError>;

    /// Releases the channel. Idempotent and safe after partial failure.
    fn close(&mut self);
}
