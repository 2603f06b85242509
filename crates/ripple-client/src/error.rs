//! Client errors.

use ripple_core::RegistryError;
use thiserror::Error;

/// Errors surfaced by [`RealtimeClient`](crate::RealtimeClient).
///
/// Network failures are not among them: they drive reconnection and only
/// surface as [`ConnectionStatus`](crate::ConnectionStatus) changes. Sends
/// never fail either.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The registry rejected a subscription.
    #[error("Subscription rejected: {0}")]
    Registry(#[from] RegistryError),

    /// The connection task died and cannot be restarted.
    #[error("Connection task failed: {0}")]
    ActorFailed(String),
}
