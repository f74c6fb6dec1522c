pub mod http;

use crate::error::EndpointError;

/// Remote side that actually delivers a message. Session semantics are up to
/// the implementation; the send loop only sees success or a failure reason.
pub trait MessagingEndpoint: Send + Sync {
    /// Called once per credential before the first send. An error drops that
    /// credential from the task.
    fn login(&self, _credential: &str) -> Result<(), EndpointError> {
        Ok(())
    }

    /// Delivers `body` to `target`. Implementations must bound the call with a timeout.
    fn send(&self, target: &str, credential: &str, body: &str) -> Result<(), EndpointError>;

    /// Best-effort release of whatever `login` acquired.
    fn logout(&self, _credential: &str) -> Result<(), EndpointError> {
        Ok(())
    }
}
