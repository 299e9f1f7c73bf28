use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fcdriver::HypervisorDriver;
use serde::Serialize;

use super::{
    state::ServerState,
    types::{
        CreateResponse, ErrorResponse, LifecycleResponse, ListResponse, ShutdownAllResponse,
        StatusResponse,
    },
};
use crate::{
    vm::{Transition, VmState},
    LeaderError, LeaderResult,
};

//-------------------------------------------------------------------------------------------------
// Functions: Handlers
//-------------------------------------------------------------------------------------------------

/// Handler for `GET /status`
pub async fn status_handler<D: HypervisorDriver>(State(state): State<ServerState<D>>) -> Response {
    let manager = state.manager();
    respond(Ok::<_, LeaderError>(StatusResponse {
        machines: manager.len().await,
        public_ip: *manager.config().get_public_ip(),
    }))
}

/// Handler for `GET /machines`
pub async fn list_handler<D: HypervisorDriver>(State(state): State<ServerState<D>>) -> Response {
    let machines = state.manager().list().await;
    respond(Ok::<_, LeaderError>(ListResponse { machines }))
}

/// Handler for `POST /machines`
///
/// Waits for the new machine up to the configured create timeout.
pub async fn create_handler<D: HypervisorDriver>(State(state): State<ServerState<D>>) -> Response {
    let manager = state.manager();
    let result = manager
        .create_vm_and_wait()
        .await
        .map(|info| CreateResponse::new(info, *manager.config().get_public_ip()));

    respond(result)
}

/// Handler for `GET /machines/{name}`
pub async fn get_handler<D: HypervisorDriver>(
    State(state): State<ServerState<D>>,
    Path(name): Path<String>,
) -> Response {
    respond(state.manager().get_by_name(&name).await)
}

/// Handler for `POST /machines/{name}/pause`
pub async fn pause_handler<D: HypervisorDriver>(
    State(state): State<ServerState<D>>,
    Path(name): Path<String>,
) -> Response {
    respond(handle_lifecycle(&state, &name, Transition::Pause).await)
}

/// Handler for `POST /machines/{name}/resume`
pub async fn resume_handler<D: HypervisorDriver>(
    State(state): State<ServerState<D>>,
    Path(name): Path<String>,
) -> Response {
    respond(handle_lifecycle(&state, &name, Transition::Resume).await)
}

/// Handler for `POST /machines/{name}/stop`
///
/// Returns once the machine has been stopped.
pub async fn stop_handler<D: HypervisorDriver>(
    State(state): State<ServerState<D>>,
    Path(name): Path<String>,
) -> Response {
    respond(handle_lifecycle(&state, &name, Transition::Shutdown).await)
}

/// Handler for `POST /shutdown-all`
pub async fn shutdown_all_handler<D: HypervisorDriver>(
    State(state): State<ServerState<D>>,
) -> Response {
    let manager = state.manager();
    let result = match manager.shutdown_all().await {
        Ok(()) => Ok(ShutdownAllResponse {
            remaining: manager.len().await,
        }),
        Err(e) => Err(e),
    };

    respond(result)
}

//-------------------------------------------------------------------------------------------------
// Functions: Helpers
//-------------------------------------------------------------------------------------------------

/// The status code an error is reported with.
pub fn status_for(error: &LeaderError) -> StatusCode {
    if error.is_timeout() {
        return StatusCode::GATEWAY_TIMEOUT;
    }

    match error {
        LeaderError::NotFound(_) => StatusCode::NOT_FOUND,
        LeaderError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The message an error is reported with. Allocation details stay in the logs.
fn message_for(error: &LeaderError) -> String {
    match error {
        LeaderError::NotFound(_) | LeaderError::InvalidStateTransition { .. } => error.to_string(),
        e if e.is_timeout() => "operation timed out".to_string(),
        e if e.is_exhausted() => "no capacity left for another machine".to_string(),
        _ => "internal error".to_string(),
    }
}

fn respond<T: Serialize>(result: LeaderResult<T>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "request failed");
            (
                status_for(&e),
                Json(ErrorResponse {
                    error: message_for(&e),
                }),
            )
                .into_response()
        }
    }
}

async fn handle_lifecycle<D: HypervisorDriver>(
    state: &ServerState<D>,
    name: &str,
    transition: Transition,
) -> LeaderResult<LifecycleResponse> {
    let manager = state.manager();
    let id = manager.resolve(name).await?;

    let state = match transition {
        Transition::Pause => {
            manager.pause_vm(&id).await?;
            VmState::Paused
        }
        Transition::Resume => {
            manager.resume_vm(&id).await?;
            VmState::Active
        }
        Transition::Shutdown => {
            let signal = manager.graceful_shutdown_vm(&id).await?;
            if !signal.wait().await {
                return Err(LeaderError::ShutdownFailed { failed: 1 });
            }
            VmState::Stopped
        }
    };

    Ok(LifecycleResponse {
        machine_id: id,
        state,
    })
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------
