//! Envelope dispatch.
//!
//! Each populated slot of an incoming envelope is routed to the handler
//! registered for its exact type, in slot declaration order. All handlers
//! share one reply envelope carrying the request's tag; the reply is only
//! produced if some handler actually wrote into it.

use crate::error::{DispatchError, HandlerError};
use crate::handler::HandlerSet;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tagwire_protocol::{Envelope, PayloadSet};

/// Outcome of dispatching one envelope.
#[derive(Debug)]
pub struct Dispatch<P> {
    /// Reply to send back, present only if a handler populated it.
    pub reply: Option<Envelope<P>>,
    /// Number of slots whose handler ran successfully.
    pub handled: usize,
    /// Per-slot failures, in slot order.
    pub failures: Vec<DispatchError>,
}

impl<P> Dispatch<P> {
    /// Returns whether every populated slot was handled.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Dispatches every populated slot of `incoming` to `handlers`.
///
/// Missing handlers, handler errors and handler panics are logged and
/// collected in [`Dispatch::failures`]; they never stop the remaining slots.
/// Reply writes made by a handler before it failed are kept.
pub fn dispatch<P: PayloadSet>(incoming: &Envelope<P>, handlers: &HandlerSet<P>) -> Dispatch<P> {
    let tag = incoming.tag();
    let mut reply = Envelope::reply_to(incoming);
    let baseline = reply.payloads().clone();

    let mut handled = 0;
    let mut failures = Vec::new();

    for payload in incoming.payloads().populated() {
        let Some(registration) = handlers.resolve(payload) else {
            tracing::warn!(tag, payload = payload.type_name(), "No handler for payload");
            failures.push(DispatchError::NoHandler {
                tag,
                payload: payload.type_name(),
            });
            continue;
        };

        tracing::debug!(
            tag,
            payload = payload.type_name(),
            handler = registration.type_name(),
            "Dispatching payload"
        );

        let result = catch_unwind(AssertUnwindSafe(|| registration.call(payload, &mut reply)))
            .unwrap_or_else(|panic| Err(panic_error(panic)));

        match result {
            Ok(()) => handled += 1,
            Err(e) => {
                tracing::warn!(
                    tag,
                    payload = payload.type_name(),
                    error = %e,
                    "Handler failed"
                );
                failures.push(DispatchError::HandlerFailed {
                    tag,
                    payload: payload.type_name(),
                    source: e,
                });
            }
        }
    }

    let reply = (reply.payloads() != &baseline).then_some(reply);

    Dispatch {
        reply,
        handled,
        failures,
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> HandlerError {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    format!("handler panicked: {}", message).into()
}
