// src/services/mod.rs
//
// Shared services used across the auth and oauth modules

pub mod encryption;

pub use encryption::TokenCipher;
