use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tonic::Status;

use super::{IdentityHeader, UNAUTHENTICATED_MESSAGE};
use crate::gateway::status_response;

/// Axum middleware that requires a caller identity on every request.
///
/// Mirrors [`RpcAuthInterceptor`](super::RpcAuthInterceptor): the same header,
/// the same rejection condition and the same [`Caller`](super::Caller)
/// extension. Rejections are rendered as the gRPC-shaped JSON error body with
/// HTTP 401.
pub async fn require_caller(
    State(identity): State<IdentityHeader>,
    mut request: Request,
    next: Next,
) -> Response {
    match identity.caller_from_headers(request.headers()) {
        Some(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        None => status_response(&Status::unauthenticated(UNAUTHENTICATED_MESSAGE)),
    }
}
