use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::Server;
use tonic_health::pb::health_server::{Health, HealthServer};
use tracing::{debug, info};

use crate::auth::{IdentityHeader, RpcAuthInterceptor};
use crate::mux::{MuxError, MuxListener};
use crate::proto::api_server::{Api, ApiServer};
use crate::Result;

/// Runs the RPC stack on connections classified as RPC.
///
/// Serves the API behind the identity interceptor plus the health service,
/// which needs no identity. Returns once the listener closes.
pub async fn serve_rpc<T, H>(
    listener: MuxListener,
    api: Arc<T>,
    identity: IdentityHeader,
    request_timeout: Option<Duration>,
    health: HealthServer<H>,
) -> Result<()>
where
    T: Api,
    H: Health,
{
    let mut builder = Server::builder();
    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }

    let api = InterceptedService::new(ApiServer::from_arc(api), RpcAuthInterceptor::new(identity));

    info!(protocol = %listener.protocol(), "rpc stack ready");
    builder
        .add_service(health)
        .add_service(api)
        .serve_with_incoming(listener.into_incoming())
        .await?;

    info!("rpc stack stopped");
    Ok(())
}

/// Runs the HTTP/1.1 stack on connections classified as HTTP.
///
/// Each connection is driven by its own task. Returns once the listener
/// closes; any other accept failure is returned as fatal.
pub async fn serve_http(mut listener: MuxListener, router: Router) -> Result<()> {
    info!(protocol = %listener.protocol(), "http stack ready");

    loop {
        let stream = match listener.accept().await {
            Ok(stream) => stream,
            Err(MuxError::ListenerClosed) => {
                info!("http stack stopped");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let service = TowerToHyperService::new(router.clone());
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(error = %e, "http connection ended with error");
            }
        });
    }
}
