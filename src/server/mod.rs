//! HTTP service fronting the chat completion upstream.

pub mod guards;
pub mod router;
pub mod routes;

pub use router::{PilotState, pilot_router};
