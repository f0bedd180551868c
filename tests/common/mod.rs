//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};
use tracker::auth::{self, IdentityHeader};
use tracker::gateway::Gateway;
use tracker::mux::{Multiplexer, MuxSettings, Protocol};
use tracker::proto::api_server::{Api, ApiServer};
use tracker::proto::*;
use tracker::server::config::DocsSettings;
use tracker::server::{serve_http, serve_rpc};

/// Initialize test tracing (call once at the beginning of tests).
///
/// Only logs from the crate under test are shown, filtering out HTTP/2 and
/// tower noise. Subsequent calls are safe and will be ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new("tracker=debug");

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

/// In-memory `Api` that records what reached it.
///
/// Account and group calls echo their input and the caller; ticket calls
/// other than `UpdateTicket` report `Unimplemented` like the real service.
#[derive(Default)]
pub struct StubApi {
    calls: AtomicUsize,
    last_metadata: Mutex<Option<MetadataMap>>,
}

impl StubApi {
    /// Number of calls that reached the service.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Metadata of the most recent call.
    pub fn last_metadata(&self) -> Option<MetadataMap> {
        self.last_metadata.lock().unwrap().clone()
    }

    fn enter<T>(&self, request: &Request<T>) -> Result<String, Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_metadata.lock().unwrap() = Some(request.metadata().clone());
        let caller = auth::caller(request).map_err(Status::from)?;
        Ok(caller.as_str().to_string())
    }
}

fn user(id: String, email: String) -> User {
    User {
        id,
        email,
        ..Default::default()
    }
}

#[tonic::async_trait]
impl Api for StubApi {
    async fn create_account(
        &self,
        request: Request<CreateAccountRequest>,
    ) -> Result<Response<CreateAccountResponse>, Status> {
        let caller = self.enter(&request)?;
        let req = request.into_inner();
        Ok(Response::new(CreateAccountResponse {
            message: format!("Account for the user {} created", req.email),
            user: Some(user(caller, req.email)),
        }))
    }

    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let caller = self.enter(&request)?;
        let req = request.into_inner();
        Ok(Response::new(LoginResponse {
            message: format!("user {} successfully logged in", req.email),
            user: Some(user(caller, req.email)),
        }))
    }

    async fn get_user(&self, request: Request<()>) -> Result<Response<GetUserResponse>, Status> {
        let caller = self.enter(&request)?;
        Ok(Response::new(GetUserResponse {
            user: Some(user(caller, String::new())),
        }))
    }

    async fn update_user(
        &self,
        request: Request<UpdateUserRequest>,
    ) -> Result<Response<UpdateUserResponse>, Status> {
        self.enter(&request)?;
        Err(Status::unimplemented("not implemented"))
    }

    async fn delete_account(
        &self,
        request: Request<DeleteAccountRequest>,
    ) -> Result<Response<DeleteAccountResponse>, Status> {
        self.enter(&request)?;
        Err(Status::unimplemented("not implemented"))
    }

    async fn create_group(
        &self,
        request: Request<CreateGroupRequest>,
    ) -> Result<Response<CreateGroupResponse>, Status> {
        let caller = self.enter(&request)?;
        let req = request.into_inner();
        Ok(Response::new(CreateGroupResponse {
            message: format!("group {} created", req.name),
            group: Some(Group {
                id: "g-1".to_string(),
                owner_id: caller,
                name: req.name,
                description: req.description,
                created_at: Some(prost_types::Timestamp {
                    seconds: 1_700_000_040,
                    nanos: 0,
                }),
                deleted_at: None,
            }),
        }))
    }

    async fn get_group(
        &self,
        request: Request<GetGroupRequest>,
    ) -> Result<Response<GetGroupResponse>, Status> {
        let caller = self.enter(&request)?;
        let req = request.into_inner();
        Ok(Response::new(GetGroupResponse {
            group: Some(Group {
                id: req.group_id,
                owner_id: caller,
                ..Default::default()
            }),
        }))
    }

    async fn list_groups(
        &self,
        request: Request<()>,
    ) -> Result<Response<ListGroupsResponse>, Status> {
        self.enter(&request)?;
        Ok(Response::new(ListGroupsResponse::default()))
    }

    async fn create_ticket(
        &self,
        request: Request<CreateTicketRequest>,
    ) -> Result<Response<CreateTicketResponse>, Status> {
        self.enter(&request)?;
        Err(Status::unimplemented("not implemented"))
    }

    async fn list_tickets(
        &self,
        request: Request<()>,
    ) -> Result<Response<ListTicketsResponse>, Status> {
        self.enter(&request)?;
        Err(Status::unimplemented("not implemented"))
    }

    async fn filter_tickets(
        &self,
        request: Request<FilterTicketsRequest>,
    ) -> Result<Response<FilterTicketsResponse>, Status> {
        self.enter(&request)?;
        Err(Status::unimplemented("not implemented"))
    }

    async fn get_ticket(
        &self,
        request: Request<GetTicketRequest>,
    ) -> Result<Response<GetTicketResponse>, Status> {
        self.enter(&request)?;
        Err(Status::unimplemented("not implemented"))
    }

    async fn update_ticket(
        &self,
        request: Request<UpdateTicketRequest>,
    ) -> Result<Response<UpdateTicketResponse>, Status> {
        let caller = self.enter(&request)?;
        let req = request.into_inner();
        Ok(Response::new(UpdateTicketResponse {
            ticket: Some(Ticket {
                id: req.ticket_id,
                created_by: caller,
                title: req.title.unwrap_or_default(),
                ..Default::default()
            }),
        }))
    }

    async fn delete_ticket(
        &self,
        request: Request<DeleteTicketRequest>,
    ) -> Result<Response<DeleteTicketResponse>, Status> {
        self.enter(&request)?;
        Err(Status::unimplemented("not implemented"))
    }
}

/// A running multiplexer with both stacks behind it.
pub struct TestServer {
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    mux: JoinHandle<Result<(), tracker::mux::MuxError>>,
    rpc: JoinHandle<tracker::Result<()>>,
    http: JoinHandle<tracker::Result<()>>,
}

impl TestServer {
    /// Starts the full single-port stack on `127.0.0.1:0` in front of `api`.
    pub async fn start(api: Arc<StubApi>) -> Self {
        let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut mux = Multiplexer::new(socket, MuxSettings::default());
        let addr = mux.local_addr().unwrap();

        let rpc_listener = mux.listener(Protocol::Rpc);
        let http_listener = mux.listener(Protocol::Http);

        let identity = IdentityHeader::default();
        let (reporter, health_service) = tonic_health::server::health_reporter();
        reporter.set_serving::<ApiServer<StubApi>>().await;

        let router =
            Gateway::new(Arc::clone(&api), identity.clone()).router(&DocsSettings::default());

        let rpc = tokio::spawn(serve_rpc(rpc_listener, api, identity, None, health_service));
        let http = tokio::spawn(serve_http(http_listener, router));

        let (stop, stop_rx) = oneshot::channel();
        let mux = tokio::spawn(mux.serve(async move {
            let _ = stop_rx.await;
        }));

        Self {
            addr,
            stop: Some(stop),
            mux,
            rpc,
            http,
        }
    }

    /// Base URL for both clients.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stops the multiplexer and waits for both stacks to exit cleanly.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.mux.await.unwrap().unwrap();
        self.rpc.await.unwrap().unwrap();
        self.http.await.unwrap().unwrap();
    }
}
