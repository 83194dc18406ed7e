mod identity;
mod store;

pub use identity::{new_session_id, SessionContext, SessionId, SessionIdentity, SESSION_KEY};
pub use store::LocalStore;
