//! Caller identity for both transports.
//!
//! The caller asserts who they are in a single header (`x-atom-user` by
//! default). The value is trusted as-is: there is no token validation,
//! expiry or signature check. Both the RPC interceptor and the HTTP
//! middleware extract it through the same [`IdentityHeader`] and attach the
//! same [`Caller`] extension, so the service reads the identity the same way
//! whichever transport the call arrived on.

use http::{HeaderMap, HeaderName};
use tonic::metadata::MetadataMap;
use uuid::Uuid;

use crate::{Error, Result};

/// HTTP middleware.
pub mod middleware;
/// gRPC interceptor.
pub mod rpc;

pub use middleware::require_caller;
pub use rpc::RpcAuthInterceptor;

/// Header carrying the caller identity unless configured otherwise.
pub const DEFAULT_IDENTITY_HEADER: &str = "x-atom-user";

/// Message returned with every authentication rejection.
pub const UNAUTHENTICATED_MESSAGE: &str = "please log in";

/// Name of the caller-identity header.
///
/// Built once at startup and cloned into every component that needs to read
/// or forward the identity. Header names are stored lower-case, which is the
/// canonical form for both HTTP/1 header maps and gRPC metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityHeader(HeaderName);

impl IdentityHeader {
    /// Creates the token for a custom header name.
    pub fn new(name: &str) -> Result<Self> {
        HeaderName::from_bytes(name.as_bytes())
            .map(Self)
            .map_err(|e| Error::Config(format!("invalid identity header '{name}': {e}")))
    }

    /// The lower-case header name.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The header name as an `http` type.
    pub fn header_name(&self) -> &HeaderName {
        &self.0
    }

    /// Reads the caller from HTTP headers (name matched case-insensitively).
    pub fn caller_from_headers(&self, headers: &HeaderMap) -> Option<Caller> {
        headers
            .get(&self.0)
            .and_then(|value| value.to_str().ok())
            .and_then(Caller::new)
    }

    /// Reads the caller from gRPC metadata.
    pub fn caller_from_metadata(&self, metadata: &MetadataMap) -> Option<Caller> {
        metadata
            .get(self.as_str())
            .and_then(|value| value.to_str().ok())
            .and_then(Caller::new)
    }
}

impl Default for IdentityHeader {
    fn default() -> Self {
        Self(HeaderName::from_static(DEFAULT_IDENTITY_HEADER))
    }
}

/// Identity of the caller, attached to the request extensions once the
/// interceptor has accepted the call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller(String);

impl Caller {
    /// Wraps a raw header value; empty values identify nobody.
    pub fn new(value: &str) -> Option<Self> {
        if value.is_empty() {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    /// The raw header value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interprets the identity as a user id.
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.0)
            .map_err(|_| Error::InvalidArgument("malformed caller id".to_string()))
    }
}

/// Returns the caller attached to a request by either transport.
pub fn caller<T>(request: &tonic::Request<T>) -> Result<&Caller> {
    request
        .extensions()
        .get::<Caller>()
        .ok_or_else(|| Error::Unauthenticated(UNAUTHENTICATED_MESSAGE.to_string()))
}
