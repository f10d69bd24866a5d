//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, tower layers)
//!     → request.rs (request ID)
//!     → middleware/rate_limit.rs (route preset, 429 on rejection)
//!     → handlers.rs / admin (database calls through the retry executor)
//!     → response.rs (errors mapped to status + JSON)
//!     → Send to client
//! ```

pub mod handlers;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::ApiError;
pub use server::{AppState, GuardServer, ServerError};
