//! Handler registry.
//!
//! A [`HandlerSet`] binds concrete payload types to handler functions. It is
//! built once, before the connection starts reading, and is keyed by exact
//! `TypeId`: a handler registered for `T` only ever sees payloads of type
//! `T`. Payloads with no exact match go to the fallback handler if one was
//! registered.

use crate::error::HandlerError;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use tagwire_protocol::{Envelope, Payload, PayloadSet};

/// Result type for handler functions.
pub type HandlerResult = Result<(), HandlerError>;

type BoxedHandler<P> = Box<dyn Fn(&dyn Payload, &mut Envelope<P>) -> HandlerResult + Send + Sync>;

/// How a registered handler is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Handler receives only the payload; it can never reply.
    PayloadOnly,
    /// Handler receives the payload and the reply envelope.
    WithReply,
}

/// A single capability registration.
pub struct Registration<P> {
    type_name: &'static str,
    arity: Arity,
    handler: BoxedHandler<P>,
}

impl<P> Registration<P> {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Invokes the handler.
    pub fn call(&self, payload: &dyn Payload, reply: &mut Envelope<P>) -> HandlerResult {
        (self.handler)(payload, reply)
    }
}

impl<P> fmt::Debug for Registration<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("type_name", &self.type_name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Registry mapping payload types to handlers.
pub struct HandlerSet<P> {
    /// Registrations in registration order.
    entries: Vec<Registration<P>>,
    /// Payload type to index into `entries`.
    index: HashMap<TypeId, usize>,
    /// Catch-all for payload types with no registration.
    fallback: Option<Registration<P>>,
}

impl<P: PayloadSet> HandlerSet<P> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            fallback: None,
        }
    }

    /// Registers a handler for payloads of type `T` that may write a reply.
    ///
    /// If `T` already has a handler, the first registration is kept.
    pub fn on<T, F>(self, handler: F) -> Self
    where
        T: Payload,
        F: Fn(&T, &mut Envelope<P>) -> HandlerResult + Send + Sync + 'static,
    {
        let boxed: BoxedHandler<P> = Box::new(move |payload: &dyn Payload, reply: &mut Envelope<P>| {
            handler(downcast::<T>(payload)?, reply)
        });
        self.insert::<T>(Arity::WithReply, boxed)
    }

    /// Registers a handler for payloads of type `T` that never replies.
    ///
    /// If `T` already has a handler, the first registration is kept.
    pub fn on_notify<T, F>(self, handler: F) -> Self
    where
        T: Payload,
        F: Fn(&T) -> HandlerResult + Send + Sync + 'static,
    {
        let boxed: BoxedHandler<P> = Box::new(move |payload: &dyn Payload, _: &mut Envelope<P>| {
            handler(downcast::<T>(payload)?)
        });
        self.insert::<T>(Arity::PayloadOnly, boxed)
    }

    /// Registers a catch-all handler for payload types with no registration.
    ///
    /// Replaces any previously registered fallback.
    pub fn fallback<F>(mut self, handler: F) -> Self
    where
        F: Fn(&dyn Payload, &mut Envelope<P>) -> HandlerResult + Send + Sync + 'static,
    {
        self.fallback = Some(Registration {
            type_name: "*",
            arity: Arity::WithReply,
            handler: Box::new(handler),
        });
        self
    }

    fn insert<T: Payload>(mut self, arity: Arity, handler: BoxedHandler<P>) -> Self {
        let type_id = TypeId::of::<T>();
        if self.index.contains_key(&type_id) {
            tracing::warn!(
                payload = type_name::<T>(),
                "Duplicate handler registration ignored"
            );
            return self;
        }

        self.index.insert(type_id, self.entries.len());
        self.entries.push(Registration {
            type_name: type_name::<T>(),
            arity,
            handler,
        });
        self
    }

    /// Finds the handler for a payload: exact type match first, then the
    /// fallback.
    pub fn resolve(&self, payload: &dyn Payload) -> Option<&Registration<P>> {
        self.index
            .get(&payload.as_any().type_id())
            .map(|&i| &self.entries[i])
            .or(self.fallback.as_ref())
    }

    /// Returns whether a handler is registered for exactly `T`.
    pub fn contains<T: Payload>(&self) -> bool {
        self.index.contains_key(&TypeId::of::<T>())
    }

    /// Returns whether a fallback handler is registered.
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Returns the registered payload type names in registration order.
    pub fn registered(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.type_name).collect()
    }

    /// Returns the number of typed registrations (excluding the fallback).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P: PayloadSet> Default for HandlerSet<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for HandlerSet<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSet")
            .field("entries", &self.entries)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

fn downcast<T: Payload>(payload: &dyn Payload) -> Result<&T, HandlerError> {
    payload.as_any().downcast_ref::<T>().ok_or_else(|| {
        format!(
            "handler for '{}' received '{}'",
            type_name::<T>(),
            payload.type_name()
        )
        .into()
    })
}
