//! The identity management layer. [`server::IdentityStore`] owns the backend and the
//! collaborators, and its operations are split by concern across the submodules.

pub mod credential;
pub mod crud;
pub mod keyrules;
pub mod lookup;
pub mod server;
pub mod username;
pub mod verify;
