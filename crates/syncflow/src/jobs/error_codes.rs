// src/jobs/error_codes.rs
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Config,
    TokenRefresh,
    ExternalApi,
    Timeout,
    Cancelled,
    Panic,
    UnknownJobType,
    Transport,
    BadPayload,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "CONFIG",
            Self::TokenRefresh => "TOKEN_REFRESH",
            Self::ExternalApi => "EXTERNAL_API",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Panic => "PANIC",
            Self::UnknownJobType => "UNKNOWN_JOB_TYPE",
            Self::Transport => "TRANSPORT",
            Self::BadPayload => "BAD_PAYLOAD",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn suggested_action(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::Config => {
            "User settings are incomplete (spreadsheet or credentials). Ask the user to reconnect, then resubmit."
        }
        ErrorCode::TokenRefresh => {
            "Provider rejected the refresh token or is down. Check provider status; the user may need to re-authorize."
        }
        ErrorCode::ExternalApi => {
            "Fitness tracker or spreadsheet API failed after retries. Check provider status and rate limits, then resubmit."
        }
        ErrorCode::Timeout => {
            "Job exceeded its budget. Check downstream latency or raise timeout_seconds for this trigger."
        }
        ErrorCode::Cancelled => "Worker was shutting down. Resubmit the job once workers are back.",
        ErrorCode::Panic => {
            "Processor crashed. Capture the panic message from logs and fix the processor before resubmitting."
        }
        ErrorCode::UnknownJobType => {
            "No processor is registered for this job type. Fix the worker registration or the producer."
        }
        ErrorCode::Transport => "Queue database unreachable. Check DATABASE_URL and Postgres health.",
        ErrorCode::BadPayload => "Job payload could not be used. Fix the producer.",
    }
}

/// Terminal failure of one job. Logged and counted, never requeued.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Config, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "cancelled by shutdown")
    }

    /// Builds a `PANIC` error from a payload caught with `catch_unwind`.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::new(ErrorCode::Panic, panic_message(payload.as_ref()))
    }
}

pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
