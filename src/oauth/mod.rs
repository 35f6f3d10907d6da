//! # OAuth Module
//!
//! Third-party sign-in with the authorization-code flow (PKCE S256 plus a
//! single-use state), and linking provider accounts to local users.

pub mod client;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod linker;
pub mod models;
pub mod pkce;
pub mod providers;
pub mod routes;
pub mod state_store;


pub use routes::oauth_routes;
