//! Connection admission.
//!
//! The token is checked before the WebSocket upgrade completes. A rejected
//! attempt never reaches the registry and is closed with a code the client
//! can act on.

use std::sync::Arc;

use giftlist_auth::{AuthError, IdentityValidator};
use giftlist_core::{ConnectionId, SubjectId};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::connection::ClientConnection;
use super::lifecycle::{ConnectionGuard, Lifecycle};
use super::registry::RegistryError;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_REJECTIONS_TOTAL};

/// Close code sent when the identity token is missing or invalid.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
/// Close code sent when `max_connections` is reached (try again later).
pub const CLOSE_AT_CAPACITY: u16 = 1013;
/// Close code sent while the server is shutting down (going away).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Why an upgrade attempt was refused.
#[derive(Debug, thiserror::Error)]
pub enum GateRejection {
    /// The token did not validate.
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),
    /// The connection limit is reached.
    #[error("server at capacity")]
    AtCapacity,
    /// The registry is stopped.
    #[error("server shutting down")]
    ShuttingDown,
}

impl GateRejection {
    /// WebSocket close code for this rejection.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Unauthorized(_) => CLOSE_UNAUTHORIZED,
            Self::AtCapacity => CLOSE_AT_CAPACITY,
            Self::ShuttingDown => CLOSE_GOING_AWAY,
        }
    }

    /// Close reason text for this rejection.
    pub fn close_reason(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::AtCapacity => "server at capacity",
            Self::ShuttingDown => "server shutting down",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Unauthorized(e) => e.kind(),
            Self::AtCapacity => "at_capacity",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// An admitted connection, ready to be attached to a socket.
///
/// Dropping it without running a session releases the registration.
pub struct Admission {
    /// The registered connection.
    pub connection: Arc<ClientConnection>,
    /// Receiving half of the connection's outbound queue.
    pub outbound: mpsc::Receiver<Arc<String>>,
    /// Releases the connection when dropped.
    pub guard: ConnectionGuard,
}

/// Validates tokens and registers admitted connections.
pub struct ConnectionGate {
    validator: Arc<dyn IdentityValidator>,
    lifecycle: Lifecycle,
    queue_capacity: usize,
}

impl ConnectionGate {
    /// Create a gate. `queue_capacity` bounds each connection's outbound queue.
    pub fn new(
        validator: Arc<dyn IdentityValidator>,
        lifecycle: Lifecycle,
        queue_capacity: usize,
    ) -> Self {
        Self {
            validator,
            lifecycle,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Check a token without admitting anything.
    pub fn authenticate(&self, token: Option<&str>) -> Result<SubjectId, AuthError> {
        match token {
            Some(token) if !token.is_empty() => self.validator.validate(token),
            _ => Err(AuthError::MissingToken),
        }
    }

    /// Validate `token` and register a new connection with no subscriptions.
    pub fn admit(&self, token: Option<&str>) -> Result<Admission, GateRejection> {
        let result = self.try_admit(token);
        if let Err(rejection) = &result {
            counter!(WS_REJECTIONS_TOTAL, "reason" => rejection.label()).increment(1);
            warn!(reason = rejection.label(), error = %rejection, "connection rejected");
        }
        result
    }

    fn try_admit(&self, token: Option<&str>) -> Result<Admission, GateRejection> {
        let subject = self.authenticate(token)?;

        let (tx, outbound) = mpsc::channel(self.queue_capacity);
        let connection = Arc::new(ClientConnection::new(ConnectionId::new(), subject, tx));
        self.lifecycle
            .registry()
            .register(Arc::clone(&connection))
            .map_err(|e| match e {
                RegistryError::Closed => GateRejection::ShuttingDown,
                _ => GateRejection::AtCapacity,
            })?;

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(conn_id = %connection.id(), subject = %connection.subject(), "connection admitted");

        let guard = self.lifecycle.guard(Arc::clone(&connection));
        Ok(Admission {
            connection,
            outbound,
            guard,
        })
    }
}
