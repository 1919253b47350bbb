//! Network subsystem for the multicast feed

pub mod probe;
pub mod udp;

use async_trait::async_trait;

use crate::error::NetworkError;

pub use probe::{probe_server, ProbeState, ServerStatus};
pub use udp::{create_multicast_socket, MulticastSource};

/// Source of raw datagrams for one worker
#[async_trait]
pub trait PacketSource: Send {
    /// Receive one datagram into `buf`, returning its length.
    ///
    /// Waits indefinitely; callers bound the wait and race it against
    /// cancellation.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetworkError>;

    /// Leave the group and release the socket; further receives fail
    fn close(&mut self);
}
