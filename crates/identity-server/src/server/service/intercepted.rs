//! Applies the [`UnaryInterceptor`] to every method of an [`IdentityService`].
//!
//! The server registers one `Intercepted<IdentityHandler>`; individual
//! handlers stay unaware of logging and panic containment.

use crate::server::interceptor::unary::UnaryInterceptor;
use identity_core::proto::{
    GetUserRequest, GetUserResponse, GetUsersRequest, GetUsersResponse, StoreUserRequest,
    StoreUserResponse, identity_service_server::IdentityService,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub const GET_USERS: &str = "/identity.v1.IdentityService/GetUsers";
pub const GET_USER: &str = "/identity.v1.IdentityService/GetUser";
pub const STORE_USER: &str = "/identity.v1.IdentityService/StoreUser";

pub struct Intercepted<S> {
    inner: Arc<S>,
    interceptor: UnaryInterceptor,
}

impl<S> Intercepted<S> {
    pub fn new(inner: S, interceptor: UnaryInterceptor) -> Self {
        Self {
            inner: Arc::new(inner),
            interceptor,
        }
    }
}

impl<S> Clone for Intercepted<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            interceptor: self.interceptor.clone(),
        }
    }
}

#[tonic::async_trait]
impl<S: IdentityService> IdentityService for Intercepted<S> {
    async fn get_users(
        &self,
        request: Request<GetUsersRequest>,
    ) -> Result<Response<GetUsersResponse>, Status> {
        let inner = &self.inner;
        self.interceptor
            .call(GET_USERS, request, |request| inner.get_users(request))
            .await
    }

    async fn get_user(
        &self,
        request: Request<GetUserRequest>,
    ) -> Result<Response<GetUserResponse>, Status> {
        let inner = &self.inner;
        self.interceptor
            .call(GET_USER, request, |request| inner.get_user(request))
            .await
    }

    async fn store_user(
        &self,
        request: Request<StoreUserRequest>,
    ) -> Result<Response<StoreUserResponse>, Status> {
        let inner = &self.inner;
        self.interceptor
            .call(STORE_USER, request, |request| inner.store_user(request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::interceptor::{config::InterceptorConfig, testing::CapturedLogs};
    use identity_core::proto::{
        identity_service_client::IdentityServiceClient,
        identity_service_server::IdentityServiceServer,
    };
    use tokio::net::TcpListener;
    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::{Code, transport::Server};

    /// Panics on `GetUser("boom")`, answers everything else.
    struct Volatile;

    #[tonic::async_trait]
    impl IdentityService for Volatile {
        async fn get_users(
            &self,
            _request: Request<GetUsersRequest>,
        ) -> Result<Response<GetUsersResponse>, Status> {
            Ok(Response::new(GetUsersResponse::default()))
        }

        async fn get_user(
            &self,
            request: Request<GetUserRequest>,
        ) -> Result<Response<GetUserResponse>, Status> {
            let id = request.into_inner().id;
            if id == "boom" {
                panic!("boom");
            }
            Ok(Response::new(GetUserResponse {
                name: id,
                ..GetUserResponse::default()
            }))
        }

        async fn store_user(
            &self,
            _request: Request<StoreUserRequest>,
        ) -> Result<Response<StoreUserResponse>, Status> {
            Err(Status::unimplemented("read only"))
        }
    }

    #[tokio::test]
    async fn panicking_call_does_not_stop_the_server() {
        let (logs, _guard) = CapturedLogs::install();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = Intercepted::new(Volatile, UnaryInterceptor::new(InterceptorConfig::default()));

        let server = tokio::spawn(
            Server::builder()
                .add_service(IdentityServiceServer::new(service))
                .serve_with_incoming(TcpListenerStream::new(listener)),
        );

        let mut client = IdentityServiceClient::connect(format!("http://{addr}"))
            .await
            .unwrap();

        let status = client
            .get_user(GetUserRequest {
                id: "boom".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(!status.message().contains("boom"));

        let response = client
            .get_user(GetUserRequest {
                id: "ada".to_string(),
            })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.name, "ada");

        let status = client
            .store_user(StoreUserRequest::default())
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);

        let panicked = logs.find("gRPC method panicked").unwrap();
        assert_eq!(panicked["grpc.method"], GET_USER);
        assert!(panicked["grpc.panic"].as_str().unwrap().contains("boom"));
        assert!(panicked["grpc.peer.addr"].as_str().unwrap().starts_with("127.0.0.1:"));

        server.abort();
    }
}
