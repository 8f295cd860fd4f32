pub mod auth;

pub use auth::{AuthContext, AuthMethod, AuthState, auth_middleware};
