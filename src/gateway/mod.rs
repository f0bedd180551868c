//! HTTP/JSON gateway in front of the gRPC service.
//!
//! Every `tracker.v1.Api` method has a REST route. A handler decodes the JSON
//! body into the generated request message, builds a `tonic::Request` carrying
//! the forwarded metadata and the caller, and invokes the same [`Api`]
//! implementation the RPC server wraps. Results are encoded back to JSON with
//! every field present; failures use the gRPC-shaped error body from
//! [`status_response`].
//!
//! Static API documentation is served next to the API routes, outside the
//! authenticated surface.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use bytes::Bytes;
use http::{HeaderMap, HeaderName};
use serde::de::DeserializeOwned;
use tonic::metadata::{Ascii, MetadataKey, MetadataValue};
use tonic::Status;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::auth::{require_caller, Caller, IdentityHeader};
use crate::proto::api_server::Api;
use crate::proto::{
    CreateAccountRequest, CreateAccountResponse, CreateGroupRequest, CreateGroupResponse,
    CreateTicketRequest, CreateTicketResponse, DeleteAccountRequest, DeleteAccountResponse,
    DeleteTicketRequest, DeleteTicketResponse, FilterTicketsRequest, FilterTicketsResponse,
    GetGroupRequest, GetGroupResponse, GetTicketRequest, GetTicketResponse, GetUserResponse,
    ListGroupsResponse, ListTicketsResponse, LoginRequest, LoginResponse, UpdateTicketRequest,
    UpdateTicketResponse, UpdateUserRequest, UpdateUserResponse,
};
use crate::server::config::DocsSettings;

/// Gateway error rendering.
pub mod response;
/// Timestamp JSON encoding.
pub mod timestamp;

pub use response::{http_status, status_response, StatusError};

/// Prefix under which arbitrary metadata can be passed through HTTP headers.
const METADATA_HEADER_PREFIX: &str = "grpc-metadata-";

type GatewayResult<M> = Result<Json<M>, StatusError>;

/// Decides which incoming HTTP headers become call metadata, and under which key.
///
/// The identity header is allow-listed and kept verbatim; `Grpc-Metadata-*`
/// headers are forwarded without their prefix. Everything else is dropped.
pub fn forwarded_metadata_key(identity: &IdentityHeader, name: &HeaderName) -> Option<String> {
    if name == identity.header_name() {
        return Some(name.as_str().to_string());
    }

    name.as_str()
        .strip_prefix(METADATA_HEADER_PREFIX)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

/// Shared state of the gateway routes.
pub struct Gateway<T> {
    api: Arc<T>,
    identity: IdentityHeader,
}

impl<T> Clone for Gateway<T> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            identity: self.identity.clone(),
        }
    }
}

impl<T: Api> Gateway<T> {
    /// Creates a gateway calling into `api`.
    pub fn new(api: Arc<T>, identity: IdentityHeader) -> Self {
        Self { api, identity }
    }

    /// Builds the full HTTP router: authenticated API routes plus static docs.
    pub fn router(self, docs: &DocsSettings) -> Router {
        let identity = self.identity.clone();

        let api = Router::new()
            .route("/v1/accounts", post(create_account::<T>))
            .route("/v1/login", post(login::<T>))
            .route(
                "/v1/user",
                get(get_user::<T>)
                    .patch(update_user::<T>)
                    .delete(delete_account::<T>),
            )
            .route("/v1/groups", post(create_group::<T>).get(list_groups::<T>))
            .route("/v1/groups/{group_id}", get(get_group::<T>))
            .route("/v1/tickets", post(create_ticket::<T>).get(list_tickets::<T>))
            .route("/v1/tickets/filter", post(filter_tickets::<T>))
            .route(
                "/v1/tickets/{ticket_id}",
                get(get_ticket::<T>)
                    .patch(update_ticket::<T>)
                    .delete(delete_ticket::<T>),
            )
            .route_layer(middleware::from_fn_with_state(identity, require_caller))
            .with_state(self);

        Router::new()
            .merge(api)
            .route_service("/swagger.json", ServeFile::new(&docs.spec_path))
            .nest_service("/swaggerui", ServeDir::new(&docs.ui_dir))
            .layer(TraceLayer::new_for_http())
    }

    /// Wraps a decoded message into the request the RPC stack would have built.
    fn forward<M>(&self, headers: &HeaderMap, caller: Caller, message: M) -> tonic::Request<M> {
        let mut request = tonic::Request::new(message);

        for (name, value) in headers {
            let Some(key) = forwarded_metadata_key(&self.identity, name) else {
                continue;
            };
            let Ok(key) = MetadataKey::<Ascii>::from_bytes(key.as_bytes()) else {
                continue;
            };
            let Some(value) = value
                .to_str()
                .ok()
                .and_then(|v| v.parse::<MetadataValue<Ascii>>().ok())
            else {
                continue;
            };
            request.metadata_mut().append(key, value);
        }

        request.extensions_mut().insert(caller);
        request
    }
}

/// Decodes a JSON body; an empty body is the default message.
fn decode<M: DeserializeOwned + Default>(body: &Bytes) -> Result<M, Status> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(M::default());
    }

    serde_json::from_slice(body)
        .map_err(|e| Status::invalid_argument(format!("invalid request body: {e}")))
}

async fn create_account<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<CreateAccountResponse> {
    let message: CreateAccountRequest = decode(&body)?;
    let response = gateway
        .api
        .create_account(gateway.forward(&headers, caller, message))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn login<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<LoginResponse> {
    let message: LoginRequest = decode(&body)?;
    let response = gateway
        .api
        .login(gateway.forward(&headers, caller, message))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn get_user<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
) -> GatewayResult<GetUserResponse> {
    let response = gateway
        .api
        .get_user(gateway.forward(&headers, caller, ()))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn update_user<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<UpdateUserResponse> {
    let message: UpdateUserRequest = decode(&body)?;
    let response = gateway
        .api
        .update_user(gateway.forward(&headers, caller, message))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn delete_account<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<DeleteAccountResponse> {
    let message: DeleteAccountRequest = decode(&body)?;
    let response = gateway
        .api
        .delete_account(gateway.forward(&headers, caller, message))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn create_group<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<CreateGroupResponse> {
    let message: CreateGroupRequest = decode(&body)?;
    let response = gateway
        .api
        .create_group(gateway.forward(&headers, caller, message))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn get_group<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
) -> GatewayResult<GetGroupResponse> {
    let message = GetGroupRequest { group_id };
    let response = gateway
        .api
        .get_group(gateway.forward(&headers, caller, message))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn list_groups<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
) -> GatewayResult<ListGroupsResponse> {
    let response = gateway
        .api
        .list_groups(gateway.forward(&headers, caller, ()))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn create_ticket<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<CreateTicketResponse> {
    let message: CreateTicketRequest = decode(&body)?;
    let response = gateway
        .api
        .create_ticket(gateway.forward(&headers, caller, message))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn list_tickets<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
) -> GatewayResult<ListTicketsResponse> {
    let response = gateway
        .api
        .list_tickets(gateway.forward(&headers, caller, ()))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn filter_tickets<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<FilterTicketsResponse> {
    let message: FilterTicketsRequest = decode(&body)?;
    let response = gateway
        .api
        .filter_tickets(gateway.forward(&headers, caller, message))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn get_ticket<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    Path(ticket_id): Path<String>,
    headers: HeaderMap,
) -> GatewayResult<GetTicketResponse> {
    let message = GetTicketRequest { ticket_id };
    let response = gateway
        .api
        .get_ticket(gateway.forward(&headers, caller, message))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn update_ticket<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    Path(ticket_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<UpdateTicketResponse> {
    let message = UpdateTicketRequest {
        ticket_id,
        ..decode(&body)?
    };
    let response = gateway
        .api
        .update_ticket(gateway.forward(&headers, caller, message))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn delete_ticket<T: Api>(
    State(gateway): State<Gateway<T>>,
    Extension(caller): Extension<Caller>,
    Path(ticket_id): Path<String>,
    headers: HeaderMap,
) -> GatewayResult<DeleteTicketResponse> {
    let message = DeleteTicketRequest { ticket_id };
    let response = gateway
        .api
        .delete_ticket(gateway.forward(&headers, caller, message))
        .await?;
    Ok(Json(response.into_inner()))
}
