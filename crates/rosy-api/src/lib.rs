//! HTTP surface and session logic for Rosy Scan: one-time-code login, the
//! per-user scan/proof flow, and the reward ledger behind it.

pub mod auth;
pub mod clock;
pub mod codes;
pub mod error;
pub mod extract;
pub mod flow;
pub mod ledger;
pub mod locks;
pub mod mailer;
pub mod middleware;
pub mod proof;
pub mod routes;
pub mod scan;
pub mod state;
pub mod upload;

pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, AppStateInner};
