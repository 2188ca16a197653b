//! Request routing
//!
//! A request line is decoded into a [`Request`] envelope and routed by its
//! `handler` name to one of the domain handlers in [`crate::handlers`]. Every
//! failure is turned into a structured error [`Response`]; nothing that goes
//! wrong while handling a request closes the connection.

use crate::betting::BettingCoordinator;
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::handlers;
use crate::repository::Repositories;
use crate::scheduler::RaceScheduler;
use log::{debug, error, warn};
use shared::{decode_line, Request, Response, HANDLER_AUTH, HANDLER_BET, HANDLER_RACE, HANDLER_RACER};
use std::sync::Arc;

/// Everything a request handler may touch, built once at startup
#[derive(Clone)]
pub struct Services {
    pub repos: Repositories,
    pub scheduler: RaceScheduler,
    pub betting: Arc<BettingCoordinator>,
    pub config: Arc<ServerConfig>,
}

/// Per-connection state
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Session {
    /// User logged in on this connection
    pub username: Option<String>,
    /// Set when the client asked to disconnect
    pub closing: bool,
}

impl Session {
    pub fn require_login(&self) -> Result<String, ApiError> {
        self.username
            .clone()
            .ok_or_else(|| ApiError::DomainState("not logged in".to_string()))
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    services: Services,
}

impl Dispatcher {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Decodes and handles one request line.
    pub fn handle_line(&self, session: &mut Session, line: &str) -> Response {
        match decode_line::<Request>(line) {
            Ok(request) => self.dispatch(session, request),
            Err(e) => {
                debug!("Malformed request line: {}", e);
                let err = ApiError::Protocol(format!("malformed request: {}", e));
                Response::error("", "", err.to_body())
            }
        }
    }

    pub fn dispatch(&self, session: &mut Session, request: Request) -> Response {
        let Request {
            handler,
            action,
            payload,
        } = request;

        let result = match handler.as_str() {
            HANDLER_AUTH => handlers::auth(&self.services, session, &action, payload),
            HANDLER_RACER => handlers::racer(&self.services, &action, payload),
            HANDLER_RACE => handlers::race(&self.services, &action, payload),
            HANDLER_BET => handlers::bet(&self.services, session, &action, payload),
            other => Err(ApiError::Protocol(format!("unknown handler: {}", other))),
        };

        match result {
            Ok(payload) => Response::ok(&handler, &action, payload),
            Err(err) => {
                match &err {
                    ApiError::Persistence(e) => error!("{}.{} failed: {}", handler, action, e),
                    other => warn!("{}.{} rejected: {}", handler, action, other),
                }
                Response::error(&handler, &action, err.to_body())
            }
        }
    }
}
