use core::time::Duration;

/// Substrings that trigger redaction unless configured otherwise.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &["password", "token", "secret", "key", "authorization"];

/// Severity used for the routine "received" and "completed" entries.
///
/// Failures, panics and slow calls use fixed severities regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CallLogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Immutable interceptor settings, built once at startup and shared by every
/// call.
#[derive(Debug, Clone)]
pub struct InterceptorConfig {
    pub log_level: CallLogLevel,
    pub log_requests: bool,
    /// Off by default: responses routinely carry personal data.
    pub log_responses: bool,
    pub log_metadata: bool,
    /// Case-insensitive substrings. Matching is done on lowercase text.
    pub sensitive_fields: Vec<String>,
    /// Calls strictly longer than this are logged at warn with
    /// `grpc.slow_request = true`.
    pub slow_request_threshold: Duration,
    pub server_name: String,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            log_level: CallLogLevel::Info,
            log_requests: true,
            log_responses: false,
            log_metadata: false,
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
            slow_request_threshold: Duration::from_secs(5),
            server_name: "unknown-server".to_string(),
        }
    }
}
