//! Error types for the tracker service.

use tonic::Status;

/// Main error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required field is missing or an identifier is malformed.
    #[error("{0}")]
    InvalidArgument(String),

    /// The entity being created already exists.
    #[error("{0}")]
    AlreadyExists(String),

    /// The entity does not exist or is not visible to the caller.
    #[error("{0}")]
    NotFound(String),

    /// No caller identity was attached to the request.
    #[error("{0}")]
    Unauthenticated(String),

    /// A storage operation failed.
    #[error("{context}: {source}")]
    Database {
        /// What the service was doing when the failure happened.
        context: &'static str,
        /// Underlying driver error.
        source: sqlx::Error,
    },

    /// Password hashing or verification failed for a reason other than a mismatch.
    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    /// Startup configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Schema migration failed.
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// The RPC server stopped with a transport error.
    #[error("rpc server error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The connection multiplexer failed.
    #[error("multiplexer error: {0}")]
    Mux(#[from] crate::mux::MuxError),

    /// Socket-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wraps a driver error with the operation it interrupted.
    pub fn database(context: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Database { context, source }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidArgument(msg) => Status::invalid_argument(msg),
            Error::AlreadyExists(msg) => Status::already_exists(msg),
            Error::NotFound(msg) => Status::not_found(msg),
            Error::Unauthenticated(msg) => Status::unauthenticated(msg),
            other => {
                tracing::error!(error = %other, "internal failure");
                Status::internal(other.to_string())
            }
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use tonic::Code;

    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (Error::InvalidArgument("email is required".into()), Code::InvalidArgument),
            (Error::AlreadyExists("user already exists".into()), Code::AlreadyExists),
            (Error::NotFound("group not found".into()), Code::NotFound),
            (Error::Unauthenticated("please log in".into()), Code::Unauthenticated),
            (Error::PasswordHash("bad salt".into()), Code::Internal),
            (Error::Config("missing url".into()), Code::Internal),
        ];

        for (err, code) in cases {
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn database_errors_keep_context_in_message() {
        let err = Error::database("failed to create account")(sqlx::Error::RowNotFound);
        let status = Status::from(err);

        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().starts_with("failed to create account"));
    }
}
