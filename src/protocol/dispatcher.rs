//! # Frame Dispatcher
//!
//! Routes incoming frames by message-type id. Routes are registered
//! once, from the header table, when a session is built; dispatching an
//! id with no registered route is an explicit no-op, not an error.

use std::collections::HashMap;

/// What the session should do with an incoming frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Keep-alive probe; answer with a pong.
    Ping,
    /// Server's signed DH prime and generator.
    DhParams,
    /// Server's DH public value completing the exchange.
    DhComplete,
    /// Authentication acknowledged; the session is live.
    AuthOk,
    /// Activity-point balance notification.
    ActivityPoints,
    /// Unrecognized id; deliberately ignored.
    Ignore,
}

/// Id → route table with zero-allocation lookups on the hot path.
#[derive(Debug, Default)]
pub struct Dispatcher {
    routes: HashMap<u16, Route>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route for an id, replacing any previous entry.
    pub fn register(&mut self, id: u16, route: Route) {
        self.routes.insert(id, route);
    }

    /// Resolves an id; unknown ids map to [`Route::Ignore`].
    pub fn dispatch(&self, id: u16) -> Route {
        self.routes.get(&id).copied().unwrap_or(Route::Ignore)
    }
}
