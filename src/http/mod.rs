//! HTTP surface: response envelope and the application router.

pub mod response;
pub mod routes;

pub use response::{ApiResponse, JsonResponse, NoContentResponse};
pub use routes::{AppState, router, serve};
