//! Admin API.
//!
//! # Data Flow
//! ```text
//! Operator / hostgate-cli
//!     → auth.rs (Bearer token)
//!     → handlers.rs (route CRUD, status, SSE change stream)
//!     → HttpServer::{add,set,remove,get,list}_route
//!     → route store → sync → route table
//! ```
//!
//! # Design Decisions
//! - Routes are mounted from an explicit [`Capabilities`] set, never probed
//! - Admin listens on its own address, separate from proxied traffic

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, MethodRouter};
use axum::{middleware, Router};

use crate::http::HttpServer;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Operations the admin API exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub create: bool,
    pub read: bool,
    pub list: bool,
    pub update: bool,
    pub remove: bool,
}

impl Capabilities {
    pub const ALL: Self = Self {
        create: true,
        read: true,
        list: true,
        update: true,
        remove: true,
    };

    pub const READ_ONLY: Self = Self {
        create: false,
        read: true,
        list: true,
        update: false,
        remove: false,
    };

    pub fn for_mode(read_only: bool) -> Self {
        if read_only {
            Self::READ_ONLY
        } else {
            Self::ALL
        }
    }
}

/// Shared state of the admin router.
#[derive(Clone)]
pub struct AdminState {
    pub server: Arc<HttpServer>,
    pub api_key: Arc<str>,
    pub started: Instant,
}

impl AdminState {
    pub fn new(server: Arc<HttpServer>, api_key: &str) -> Self {
        Self {
            server,
            api_key: Arc::from(api_key),
            started: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState, capabilities: Capabilities) -> Router {
    let mut collection = MethodRouter::new();
    if capabilities.list {
        collection = collection.get(list_routes);
    }
    if capabilities.create {
        collection = collection.post(create_route);
    }
    if capabilities.update {
        collection = collection.put(update_route);
    }

    let mut item = MethodRouter::new();
    if capabilities.read {
        item = item.get(get_route);
    }
    if capabilities.remove {
        item = item.delete(delete_route);
    }

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", collection)
        .route("/admin/routes/{id}", item)
        .route("/admin/events", get(stream_events))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
