use std::sync::Arc;

use crate::engine::TicketEngine;

use super::auth::Authenticator;

/// Shared application state for the API server
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TicketEngine>,
    pub authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(engine: Arc<TicketEngine>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self { engine, authenticator }
    }
}
