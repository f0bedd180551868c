use std::time::Instant;

use metrics::{counter, histogram};
use tonic::{Request, Response, Status};
use uuid::Uuid;

use super::state::{NewAccount, NewGroup, ServerState};
use crate::auth;
use crate::proto::api_server::Api;
use crate::proto::{
    CreateAccountRequest, CreateAccountResponse, CreateGroupRequest, CreateGroupResponse,
    CreateTicketRequest, CreateTicketResponse, DeleteAccountRequest, DeleteAccountResponse,
    DeleteTicketRequest, DeleteTicketResponse, FilterTicketsRequest, FilterTicketsResponse,
    GetGroupRequest, GetGroupResponse, GetTicketRequest, GetTicketResponse, GetUserResponse,
    ListGroupsResponse, ListTicketsResponse, LoginRequest, LoginResponse, UpdateTicketRequest,
    UpdateTicketResponse, UpdateUserRequest, UpdateUserResponse,
};
use crate::{Error, Result};

/// Records the outcome of one call.
fn record<T>(method: &'static str, start: Instant, result: &std::result::Result<T, Status>) {
    histogram!("tracker.rpc.duration", "method" => method).record(start.elapsed().as_secs_f64());

    match result {
        Ok(_) => counter!("tracker.rpc.success", "method" => method).increment(1),
        Err(status) => {
            counter!(
                "tracker.rpc.failure",
                "method" => method,
                "code" => status.code().description()
            )
            .increment(1);
        }
    }
}

fn required(value: &str, field: &'static str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidArgument(format!("{field} is required")));
    }
    Ok(())
}

fn caller_id<T>(request: &Request<T>) -> Result<Uuid> {
    auth::caller(request)?.user_id()
}

fn not_implemented<T>(method: &'static str) -> std::result::Result<Response<T>, Status> {
    let start = Instant::now();
    counter!("tracker.rpc.requests", "method" => method).increment(1);
    let result: std::result::Result<Response<T>, Status> =
        Err(Status::unimplemented("not implemented"));
    record(method, start, &result);
    result
}

/// The `tracker.v1.Api` implementation backed by PostgreSQL.
#[derive(Clone, Debug)]
pub struct ApiService {
    state: ServerState,
}

impl ApiService {
    /// Creates the service over the given storage.
    pub fn new(state: ServerState) -> Self {
        Self { state }
    }

    async fn run<T, F>(
        method: &'static str,
        call: F,
    ) -> std::result::Result<Response<T>, Status>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let start = Instant::now();
        counter!("tracker.rpc.requests", "method" => method).increment(1);

        let result = call.await.map(Response::new).map_err(Status::from);
        record(method, start, &result);
        result
    }

    async fn handle_create_account(
        &self,
        request: Request<CreateAccountRequest>,
    ) -> Result<CreateAccountResponse> {
        auth::caller(&request)?;
        let req = request.into_inner();

        required(&req.email, "email")?;
        required(&req.password, "password")?;
        required(&req.first_name, "first name")?;
        required(&req.last_name, "last name")?;

        let user = self
            .state
            .create_account(NewAccount {
                email: req.email,
                password: req.password,
                first_name: req.first_name,
                last_name: req.last_name,
                user_type: req.user_type,
                auth_method: req.auth_method,
            })
            .await?;

        let message = format!("Account for the user {} created", user.email);
        Ok(CreateAccountResponse {
            user: Some(user.into()),
            message,
        })
    }

    async fn handle_login(&self, request: Request<LoginRequest>) -> Result<LoginResponse> {
        auth::caller(&request)?;
        let req = request.into_inner();

        required(&req.email, "email")?;
        required(&req.password, "password")?;

        let user = self.state.login(&req.email, &req.password).await?;

        let message = format!("user {} successfully logged in", user.email);
        Ok(LoginResponse {
            user: Some(user.into()),
            message,
        })
    }

    async fn handle_get_user(&self, request: Request<()>) -> Result<GetUserResponse> {
        let user_id = caller_id(&request)?;
        let user = self.state.get_user(user_id).await?;

        Ok(GetUserResponse {
            user: Some(user.into()),
        })
    }

    async fn handle_create_group(
        &self,
        request: Request<CreateGroupRequest>,
    ) -> Result<CreateGroupResponse> {
        let owner = caller_id(&request)?;
        let req = request.into_inner();

        required(&req.name, "group name")?;

        let group = self
            .state
            .create_group(
                owner,
                NewGroup {
                    name: req.name,
                    description: req.description,
                },
            )
            .await?;

        let message = format!("group {} created", group.name);
        Ok(CreateGroupResponse {
            group: Some(group.into()),
            message,
        })
    }

    async fn handle_get_group(
        &self,
        request: Request<GetGroupRequest>,
    ) -> Result<GetGroupResponse> {
        let member = caller_id(&request)?;
        let req = request.into_inner();

        let group_id = Uuid::parse_str(&req.group_id)
            .map_err(|_| Error::InvalidArgument("malformed group id".to_string()))?;

        let group = self.state.get_group(member, group_id).await?;

        Ok(GetGroupResponse {
            group: Some(group.into()),
        })
    }

    async fn handle_list_groups(&self, request: Request<()>) -> Result<ListGroupsResponse> {
        let member = caller_id(&request)?;
        let groups = self.state.list_groups(member).await?;

        Ok(ListGroupsResponse {
            groups: groups.into_iter().map(Into::into).collect(),
        })
    }
}

#[tonic::async_trait]
impl Api for ApiService {
    async fn create_account(
        &self,
        request: Request<CreateAccountRequest>,
    ) -> std::result::Result<Response<CreateAccountResponse>, Status> {
        Self::run("create_account", self.handle_create_account(request)).await
    }

    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> std::result::Result<Response<LoginResponse>, Status> {
        Self::run("login", self.handle_login(request)).await
    }

    async fn get_user(
        &self,
        request: Request<()>,
    ) -> std::result::Result<Response<GetUserResponse>, Status> {
        Self::run("get_user", self.handle_get_user(request)).await
    }

    async fn update_user(
        &self,
        _request: Request<UpdateUserRequest>,
    ) -> std::result::Result<Response<UpdateUserResponse>, Status> {
        not_implemented("update_user")
    }

    async fn delete_account(
        &self,
        _request: Request<DeleteAccountRequest>,
    ) -> std::result::Result<Response<DeleteAccountResponse>, Status> {
        not_implemented("delete_account")
    }

    async fn create_group(
        &self,
        request: Request<CreateGroupRequest>,
    ) -> std::result::Result<Response<CreateGroupResponse>, Status> {
        Self::run("create_group", self.handle_create_group(request)).await
    }

    async fn get_group(
        &self,
        request: Request<GetGroupRequest>,
    ) -> std::result::Result<Response<GetGroupResponse>, Status> {
        Self::run("get_group", self.handle_get_group(request)).await
    }

    async fn list_groups(
        &self,
        request: Request<()>,
    ) -> std::result::Result<Response<ListGroupsResponse>, Status> {
        Self::run("list_groups", self.handle_list_groups(request)).await
    }

    async fn create_ticket(
        &self,
        _request: Request<CreateTicketRequest>,
    ) -> std::result::Result<Response<CreateTicketResponse>, Status> {
        not_implemented("create_ticket")
    }

    async fn list_tickets(
        &self,
        _request: Request<()>,
    ) -> std::result::Result<Response<ListTicketsResponse>, Status> {
        not_implemented("list_tickets")
    }

    async fn filter_tickets(
        &self,
        _request: Request<FilterTicketsRequest>,
    ) -> std::result::Result<Response<FilterTicketsResponse>, Status> {
        not_implemented("filter_tickets")
    }

    async fn get_ticket(
        &self,
        _request: Request<GetTicketRequest>,
    ) -> std::result::Result<Response<GetTicketResponse>, Status> {
        not_implemented("get_ticket")
    }

    async fn update_ticket(
        &self,
        _request: Request<UpdateTicketRequest>,
    ) -> std::result::Result<Response<UpdateTicketResponse>, Status> {
        not_implemented("update_ticket")
    }

    async fn delete_ticket(
        &self,
        _request: Request<DeleteTicketRequest>,
    ) -> std::result::Result<Response<DeleteTicketResponse>, Status> {
        not_implemented("delete_ticket")
    }
}

#[cfg(test)]
mod tests {
    use sqlx::postgres::PgPoolOptions;
    use tonic::Code;

    use super::*;
    use crate::auth::Caller;

    // The pool never connects: every case here fails before storage is touched.
    fn service() -> ApiService {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://tracker@localhost/unreachable")
            .unwrap();
        ApiService::new(ServerState::new(pool))
    }

    fn as_caller<T>(message: T, caller: &str) -> Request<T> {
        let mut request = Request::new(message);
        request
            .extensions_mut()
            .insert(Caller::new(caller).unwrap());
        request
    }

    fn account() -> CreateAccountRequest {
        CreateAccountRequest {
            email: "ada@example.com".to_string(),
            password: "hunter2".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_account_checks_fields_in_order() {
        let svc = service();
        let caller = Uuid::new_v4().to_string();

        let cases = [
            // Everything empty reports the first field.
            (CreateAccountRequest::default(), "email"),
            (
                CreateAccountRequest {
                    password: String::new(),
                    first_name: String::new(),
                    ..account()
                },
                "password",
            ),
            (
                CreateAccountRequest {
                    first_name: String::new(),
                    ..account()
                },
                "first name",
            ),
            (
                CreateAccountRequest {
                    last_name: String::new(),
                    ..account()
                },
                "last name",
            ),
        ];

        for (req, field) in cases {
            let status = Api::create_account(&svc, as_caller(req, &caller))
                .await
                .unwrap_err();
            assert_eq!(status.code(), Code::InvalidArgument);
            assert!(status.message().starts_with(field), "{}", status.message());
        }
    }

    #[tokio::test]
    async fn login_requires_both_fields() {
        let svc = service();
        let caller = Uuid::new_v4().to_string();

        let status = Api::login(
            &svc,
            as_caller(
                LoginRequest {
                    email: "ada@example.com".to_string(),
                    password: String::new(),
                },
                &caller,
            ),
        )
        .await
        .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn calls_without_caller_are_unauthenticated() {
        let svc = service();

        let status = Api::create_account(&svc, Request::new(account()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);

        let status = Api::get_user(&svc, Request::new(())).await.unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
    }

    #[tokio::test]
    async fn non_uuid_caller_is_malformed() {
        let svc = service();

        let status = Api::get_user(&svc, as_caller((), "alice")).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "malformed caller id");

        let status = Api::list_groups(&svc, as_caller((), "alice")).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn group_input_is_validated_before_storage() {
        let svc = service();
        let caller = Uuid::new_v4().to_string();

        let status = Api::create_group(
            &svc,
            as_caller(CreateGroupRequest::default(), &caller),
        )
        .await
        .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);

        let status = Api::get_group(
            &svc,
            as_caller(
                GetGroupRequest {
                    group_id: "not-a-uuid".to_string(),
                },
                &caller,
            ),
        )
        .await
        .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn reserved_operations_are_unimplemented() {
        let svc = service();
        let caller = Uuid::new_v4().to_string();

        let results = [
            Api::update_user(&svc, as_caller(UpdateUserRequest::default(), &caller))
                .await
                .map(drop),
            Api::delete_account(&svc, as_caller(DeleteAccountRequest::default(), &caller))
                .await
                .map(drop),
            Api::create_ticket(&svc, as_caller(CreateTicketRequest::default(), &caller))
                .await
                .map(drop),
            Api::list_tickets(&svc, as_caller((), &caller)).await.map(drop),
            Api::filter_tickets(&svc, as_caller(FilterTicketsRequest::default(), &caller))
                .await
                .map(drop),
            Api::get_ticket(&svc, as_caller(GetTicketRequest::default(), &caller))
                .await
                .map(drop),
            Api::update_ticket(&svc, as_caller(UpdateTicketRequest::default(), &caller))
                .await
                .map(drop),
            Api::delete_ticket(&svc, as_caller(DeleteTicketRequest::default(), &caller))
                .await
                .map(drop),
        ];

        for result in results {
            let status = result.unwrap_err();
            assert_eq!(status.code(), Code::Unimplemented);
            assert_eq!(status.message(), "not implemented");
        }
    }
}
