//! Panic recovery boundary.
//!
//! A panic anywhere below [`recover_panics`] is turned into a single opaque
//! 500 response; the worker keeps serving. The stack trace is captured at the
//! panic site by a process-wide hook, since it is gone once unwinding reaches
//! the boundary.

use std::{
    any::Any,
    backtrace::Backtrace,
    cell::{Cell, RefCell},
    future::Future,
    panic::AssertUnwindSafe,
    sync::Once,
};

use axum::{extract::Request, middleware::Next, response::Response};
use futures::FutureExt;
use tracing::error;

use crate::error::internal_server_error;

struct CapturedPanic {
    location: Option<String>,
    backtrace: String,
}

thread_local! {
    static BOUNDARY_DEPTH: Cell<usize> = const { Cell::new(0) };
    static CAPTURED: RefCell<Option<CapturedPanic>> = const { RefCell::new(None) };
}

/// Marks the current thread as polling inside a recovery boundary.
struct BoundaryGuard;

impl BoundaryGuard {
    fn enter() -> Self {
        BOUNDARY_DEPTH.with(|d| d.set(d.get() + 1));
        BoundaryGuard
    }
}

impl Drop for BoundaryGuard {
    fn drop(&mut self) {
        BOUNDARY_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

static HOOK: Once = Once::new();

/// Installs the panic hook that records stack traces for the boundary.
///
/// Panics outside a boundary are forwarded to the previously installed hook.
/// Calling this more than once has no further effect.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if BOUNDARY_DEPTH.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let captured = CapturedPanic {
                location: info.location().map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
                backtrace: Backtrace::force_capture().to_string(),
            };
            CAPTURED.with(|c| *c.borrow_mut() = Some(captured));
        }));
    });
}

/// Extracts a printable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Polls `fut` with the boundary marker set, so the hook knows to capture.
async fn guarded<F: Future>(fut: F) -> F::Output {
    let mut fut = std::pin::pin!(fut);
    std::future::poll_fn(move |cx| {
        let _guard = BoundaryGuard::enter();
        fut.as_mut().poll(cx)
    })
    .await
}

/// Outermost middleware: converts panics into `500 {"error":"Internal server error","code":500}`.
pub async fn recover_panics(req: Request, next: Next) -> Response {
    install_panic_hook();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match AssertUnwindSafe(guarded(next.run(req))).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            let message = panic_message(&*payload);
            let captured = CAPTURED.with(|c| c.borrow_mut().take());
            let (location, backtrace) = match captured {
                Some(c) => (c.location, c.backtrace),
                None => (None, "<unavailable>".to_string()),
            };
            error!(
                %method,
                path = %path,
                panic = %message,
                location = location.as_deref().unwrap_or("<unknown>"),
                "Recovered from panic in request handler\n{backtrace}"
            );
            internal_server_error()
        }
    }
}
