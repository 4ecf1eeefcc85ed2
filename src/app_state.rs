use std::sync::Arc;

use crate::services::{auth::TokenVerifier, jobs::JobService};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
    /// Present only when uploads require a bearer token.
    pub auth: Option<Arc<TokenVerifier>>,
}

impl AppState {
    pub fn new(jobs: JobService, auth: Option<TokenVerifier>) -> Self {
        Self {
            jobs: Arc::new(jobs),
            auth: auth.map(Arc::new),
        }
    }
}
