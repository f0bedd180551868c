use tonic::{Request, Status};

use super::{IdentityHeader, UNAUTHENTICATED_MESSAGE};

/// gRPC interceptor that requires a caller identity on every call.
///
/// Implements `tonic::service::Interceptor` and is cloneable so it can be
/// shared across service registrations. Runs before the request message is
/// decoded, so a rejected call never reaches the service.
#[derive(Clone, Debug, Default)]
pub struct RpcAuthInterceptor {
    identity: IdentityHeader,
}

impl RpcAuthInterceptor {
    /// Creates an interceptor reading the given identity header.
    pub fn new(identity: IdentityHeader) -> Self {
        Self { identity }
    }
}

impl tonic::service::Interceptor for RpcAuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let caller = self
            .identity
            .caller_from_metadata(request.metadata())
            .ok_or_else(|| Status::unauthenticated(UNAUTHENTICATED_MESSAGE))?;

        request.extensions_mut().insert(caller);
        Ok(request)
    }
}
