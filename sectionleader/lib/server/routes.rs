use axum::{
    routing::{get, post},
    Router,
};
use fcdriver::HypervisorDriver;

use super::{handlers, state::ServerState};

//-------------------------------------------------------------------------------------------------
// Functions
//-------------------------------------------------------------------------------------------------

/// Creates a router with every endpoint configured.
pub fn create_router<D: HypervisorDriver>(state: ServerState<D>) -> Router {
    Router::new()
        .route("/status", get(handlers::status_handler::<D>))
        .route(
            "/machines",
            get(handlers::list_handler::<D>).post(handlers::create_handler::<D>),
        )
        .route("/machines/{name}", get(handlers::get_handler::<D>))
        .route("/machines/{name}/pause", post(handlers::pause_handler::<D>))
        .route("/machines/{name}/resume", post(handlers::resume_handler::<D>))
        .route("/machines/{name}/stop", post(handlers::stop_handler::<D>))
        .route("/shutdown-all", post(handlers::shutdown_all_handler::<D>))
        .with_state(state)
}
