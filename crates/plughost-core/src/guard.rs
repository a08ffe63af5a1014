//! Failure boundary around calls into plugin code.
//!
//! Plugin callables may return an error or panic. Neither is allowed to
//! escape into the host, so every call site funnels through [`run_guarded`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

/// Outcome of one guarded call into plugin code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded {
    Ok,
    /// The callable returned an error (rendered with its context chain).
    Failed(String),
    /// The callable panicked.
    Panicked(String),
}

impl Guarded {
    pub fn is_ok(&self) -> bool {
        matches!(self, Guarded::Ok)
    }

    /// Error text for failed or panicked calls.
    pub fn error_text(&self) -> Option<&str> {
        match self {
            Guarded::Ok => None,
            Guarded::Failed(msg) | Guarded::Panicked(msg) => Some(msg),
        }
    }
}

/// Await a plugin future, converting errors and panics into a [`Guarded`].
pub async fn run_guarded<F>(fut: F) -> Guarded
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => Guarded::Ok,
        Ok(Err(e)) => Guarded::Failed(format!("{e:#}")),
        Err(payload) => Guarded::Panicked(panic_message(payload.as_ref())),
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}
