pub mod jwt;
pub mod middleware;

use serde::{Deserialize, Serialize};

/// Actor kind, resolved once at token issue time and carried explicitly
/// thereafter. Users and admins never share identity space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    User,
    Admin,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// The presence table this kind's rows live in.
    pub fn table(&self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Admin => "admins",
        }
    }
}
