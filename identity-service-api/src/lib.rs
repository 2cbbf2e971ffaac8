//! # identity-service-api
//!
//! Shared API types for the identity service.
//! This crate is designed to be WASM-compatible and can be used in both
//! backend (Rust) and frontend (WASM/TypeScript via wasm-bindgen) applications.
//!
//! ## Features
//!
//! - Request DTOs (`SignupRequest`, `FederatedLoginRequest`, `UpdateSettingsRequest`, etc.)
//! - Response DTOs (`UserResponse`, `SessionResponse`, `UserListResponse`, etc.)
//! - Error response format (`ErrorResponse`, `FieldViolation`)
//! - Generic response wrapper (`AppResponse`)
//!
//! ## Example
//!
//! ```rust
//! use identity_service_api::LoginRequest;
//!
//! let request = LoginRequest {
//!     email: "user@example.com".to_string(),
//!     password: "password123".to_string(),
//!     remember_me: false,
//! };
//! ```

pub mod error;
pub mod requests;
pub mod responses;
pub mod result;

// Re-exports for convenient access
pub use error::{ErrorResponse, FieldViolation};
pub use requests::*;
pub use responses::*;
pub use result::{AppResponse, StatusCode};
