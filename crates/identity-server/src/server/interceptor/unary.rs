//! Logging interceptor for unary calls.
//!
//! [`UnaryInterceptor::call`] wraps one handler invocation:
//!
//! ```text
//! received --handler--> completed | completed (SLOW) | failed
//!              \
//!               +--panic--> panicked (caller sees Internal)
//! ```
//!
//! Every entry is a standalone `tracing` event under the `grpc` target and
//! repeats the call context (server name, method, service, start time, peer
//! and, when enabled, redacted metadata), so entries from concurrent calls
//! can interleave freely.

use crate::server::interceptor::{
    boundary::{guard, install_panic_hook},
    config::{CallLogLevel, InterceptorConfig},
    redact::Redactor,
};
use crate::server::telemetry::{
    increment_rpc_errors, increment_rpc_panics, increment_rpc_requests, increment_rpc_slow,
    record_rpc_duration,
};
use chrono::{SecondsFormat, Utc};
use core::fmt::Debug;
use core::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tonic::{Code, Request, Response, Status};

/// Message returned to callers whose handler panicked.
pub const PANIC_STATUS_MESSAGE: &str = "internal server error";

/// Emits a `grpc` event at a runtime-selected level, prefixed with the call
/// context fields.
macro_rules! call_event {
    (@emit $lvl:ident, $ctx:ident, $($fields:tt)+) => {
        tracing::event!(
            target: "grpc",
            tracing::Level::$lvl,
            server_name = %$ctx.server_name,
            grpc.method = %$ctx.method,
            grpc.service = %$ctx.service,
            grpc.start_time = %$ctx.start_time,
            grpc.peer.addr = $ctx.peer.as_deref(),
            grpc.metadata = $ctx.metadata.as_deref(),
            $($fields)+
        )
    };
    ($level:expr, $ctx:expr, $($fields:tt)+) => {{
        let ctx: &CallContext<'_> = $ctx;
        match $level {
            CallLogLevel::Trace => call_event!(@emit TRACE, ctx, $($fields)+),
            CallLogLevel::Debug => call_event!(@emit DEBUG, ctx, $($fields)+),
            CallLogLevel::Info => call_event!(@emit INFO, ctx, $($fields)+),
            CallLogLevel::Warn => call_event!(@emit WARN, ctx, $($fields)+),
            CallLogLevel::Error => call_event!(@emit ERROR, ctx, $($fields)+),
        }
    }};
}

struct CallContext<'a> {
    server_name: &'a str,
    method: &'a str,
    service: &'a str,
    start_time: String,
    peer: Option<String>,
    metadata: Option<String>,
}

/// Cheap to clone; all clones share one configuration snapshot.
#[derive(Clone)]
pub struct UnaryInterceptor {
    config: Arc<InterceptorConfig>,
    redactor: Arc<Redactor>,
}

impl UnaryInterceptor {
    pub fn new(config: InterceptorConfig) -> Self {
        install_panic_hook();
        let redactor = Redactor::new(&config.sensitive_fields);
        Self {
            config: Arc::new(config),
            redactor: Arc::new(redactor),
        }
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    /// Invokes `handler` with `request` and logs the call.
    ///
    /// The handler's result is returned unchanged. A panic inside the handler
    /// becomes [`Status::internal`] with [`PANIC_STATUS_MESSAGE`]; the panic
    /// message and stack trace are only logged.
    pub async fn call<Req, Resp, H, Fut>(
        &self,
        full_method: &str,
        request: Request<Req>,
        handler: H,
    ) -> Result<Response<Resp>, Status>
    where
        Req: Debug,
        Resp: Debug,
        H: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        let started = Instant::now();
        let config = &*self.config;
        let ctx = CallContext {
            server_name: &config.server_name,
            method: full_method,
            service: service_name(full_method),
            start_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            peer: request.remote_addr().map(|addr| addr.to_string()),
            metadata: config
                .log_metadata
                .then(|| self.render_metadata(&request)),
        };
        increment_rpc_requests();

        let payload = config
            .log_requests
            .then(|| self.redactor.redact_payload(request.get_ref()));
        call_event!(
            config.log_level,
            &ctx,
            grpc.request = payload.as_deref(),
            "gRPC request received"
        );

        let outcome = guard(async move { handler(request).await }).await;
        let duration = started.elapsed();
        let duration_ms = duration.as_secs_f64() * 1000.0;
        record_rpc_duration(duration_ms);

        match outcome {
            Err(panicked) => {
                increment_rpc_panics();
                call_event!(
                    CallLogLevel::Error,
                    &ctx,
                    grpc.panic = %panicked.message,
                    grpc.stack = %panicked.stack,
                    grpc.duration = ?duration,
                    grpc.duration_ms = duration_ms,
                    "gRPC method panicked"
                );
                Err(Status::internal(PANIC_STATUS_MESSAGE))
            }
            Ok(Err(status)) => {
                increment_rpc_errors();
                call_event!(
                    CallLogLevel::Error,
                    &ctx,
                    grpc.duration = ?duration,
                    grpc.duration_ms = duration_ms,
                    grpc.code = ?status.code(),
                    grpc.message = %status.message(),
                    "gRPC method failed"
                );
                Err(status)
            }
            Ok(Ok(response)) => {
                let body = config
                    .log_responses
                    .then(|| self.redactor.redact_payload(response.get_ref()));
                if duration > config.slow_request_threshold {
                    increment_rpc_slow();
                    call_event!(
                        CallLogLevel::Warn,
                        &ctx,
                        grpc.duration = ?duration,
                        grpc.duration_ms = duration_ms,
                        grpc.code = ?Code::Ok,
                        grpc.response = body.as_deref(),
                        grpc.slow_request = true,
                        "gRPC method completed (SLOW)"
                    );
                } else {
                    call_event!(
                        config.log_level,
                        &ctx,
                        grpc.duration = ?duration,
                        grpc.duration_ms = duration_ms,
                        grpc.code = ?Code::Ok,
                        grpc.response = body.as_deref(),
                        "gRPC method completed"
                    );
                }
                Ok(response)
            }
        }
    }

    fn render_metadata<T>(&self, request: &Request<T>) -> String {
        let redacted = self.redactor.redact_metadata(request.metadata());
        serde_json::to_string(&redacted).unwrap_or_default()
    }
}

/// `/pkg.Service/Method` -> `pkg.Service`. Anything else is returned as is.
fn service_name(full_method: &str) -> &str {
    full_method
        .split('/')
        .nth(1)
        .filter(|service| !service.is_empty())
        .unwrap_or(full_method)
}
