//! Error types of the inventory client.

use inventory_types::ResourceIdError;
use snafu::Snafu;

/// Errors returned by the inventory client and its caches.
///
/// Cache misses are reported as `NotFound` and only decide whether a remote call is made.
/// Failures of remote calls are [`Error::Rpc`], except for rejections of an unknown client,
/// which are `Unavailable` like every request made while the client is not registered.
#[derive(Debug, Snafu)]
#[expect(missing_docs)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("not found: {descr}"))]
    NotFound { descr: String },

    #[snafu(display("invalid argument: {descr}"))]
    InvalidArgument { descr: String },

    #[snafu(display("unavailable: {descr}"))]
    Unavailable { descr: String },

    #[snafu(display("canceled: {descr}"))]
    Canceled { descr: String },

    #[snafu(display("deadline exceeded: {descr}"))]
    DeadlineExceeded { descr: String },

    #[snafu(display("internal: {descr}"))]
    Internal { descr: String },

    #[snafu(display("invalid client config: {descr}"))]
    InvalidConfig { descr: String },

    #[snafu(display("inventory request failed: {source}"))]
    Rpc { source: tonic::Status },
}

impl Error {
    /// Whether the requested resource does not exist, locally or remotely.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Rpc { source } => source.code() == tonic::Code::NotFound,
            _ => false,
        }
    }
}

impl From<ResourceIdError> for Error {
    fn from(e: ResourceIdError) -> Self {
        Self::InvalidArgument {
            descr: e.to_string(),
        }
    }
}

impl From<tonic::Status> for Error {
    fn from(source: tonic::Status) -> Self {
        Self::Rpc { source }
    }
}

/// A specialized `Error` for inventory client errors
pub type Result<T, E = Error> = std::result::Result<T, E>;
