use std::fmt;

/// The reason a put or get did not transfer a value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, thiserror::Error)]
pub enum ChannelError {
    /// The channel is closed and has nothing further to offer.
    ///
    /// Getters see this once a closed channel is drained. Putters
    /// see it as soon as the channel is closed.
    #[error("channel is closed")]
    BrokenChannel,
    /// The operation was abandoned by [cancel](crate::Channel::cancel),
    /// by destroying the channel, or by shutting down the service.
    #[error("channel operation was cancelled")]
    CancelledOperation,
}

/// An error returned from a put when the value could not be
/// delivered.
///
/// The unsent value is returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PutError<T> {
    /// The value that was not put.
    pub value: T,
    /// Why the value was not put.
    pub cause: ChannelError,
}

impl<T> PutError<T> {
    pub(crate) fn new(value: T, cause: ChannelError) -> Self {
        PutError { value, cause }
    }

    /// Discards the unsent value, keeping only the cause.
    pub fn into_cause(self) -> ChannelError {
        self.cause
    }
}

impl<T> fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to put value on channel: {}", self.cause)
    }
}

impl<T: fmt::Debug> std::error::Error for PutError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

impl<T> From<PutError<T>> for ChannelError {
    fn from(e: PutError<T>) -> Self {
        e.cause
    }
}
