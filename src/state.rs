use std::sync::Arc;

use crate::db::DbPool;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::rooms::Rooms;

/// Shared application state passed to all handlers via axum State extractor.
///
/// The registry and rooms maps are the only in-process shared mutable
/// state; everything else lives in SQLite.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Active connection per actor id (users and admins separately)
    pub registry: Arc<ConnectionRegistry>,
    /// Logical room membership for conversation and admin fan-out
    pub rooms: Arc<Rooms>,
}

impl AppState {
    pub fn new(db: DbPool, jwt_secret: Vec<u8>) -> Self {
        Self {
            db,
            jwt_secret,
            registry: Arc::new(ConnectionRegistry::new()),
            rooms: Arc::new(Rooms::new()),
        }
    }
}
