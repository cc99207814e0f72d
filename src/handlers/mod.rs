mod health;
mod identity;
mod root;

pub use health::{SERVICE_NAME, health_check, liveness_check, readiness_check};
pub use identity::current_identity;
pub use root::{DOCUMENTATION_PATH, not_found, root};
