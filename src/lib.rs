//! Client-side identity and role synchronization for the field-agent app.
//!
//! [`SessionCache`] owns the signed-in identity and its staleness policy,
//! [`RoleGate`] turns the mirrored role copies into one effective role, and
//! [`LifecycleMonitor`] decides when the cache re-checks staleness.

pub mod clock;
pub mod config;
pub mod error;
pub mod state;
pub mod telemetry;

pub mod models {
    pub mod session;
    pub mod user;
}

pub mod repositories {
    pub mod redis_store;
    pub mod remote;
    pub mod store;
}

pub mod services {
    pub mod auth;
    pub mod lifecycle;
    pub mod role_gate;
    pub mod session_cache;
}

pub mod validation {
    pub mod auth;
    pub mod profile;
}

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{AppError, Result};
pub use models::session::{Role, RoleId, SessionRecord, UserId, DEFAULT_AVATAR};
pub use models::user::RemoteIdentity;
pub use repositories::remote::{HttpIdentityService, RemoteIdentityService};
pub use repositories::store::{keys, MemoryStore, PersistentStore};
pub use services::lifecycle::{AppPhase, CheckOutcome, CheckRequested, LifecycleMonitor, Trigger};
pub use services::role_gate::{resolve, RoleChange, RoleGate};
pub use services::session_cache::{CacheSettings, RoleMirrors, SessionCache, SessionEvent};
pub use state::IdentityState;
pub use validation::profile::ProfileUpdate;
