//! HTTP and websocket delivery adapters for the Parley orchestrator.

mod error;
mod routes;
mod ws;

pub use error::{ApiError, status_for};
pub use routes::{
    CreateSessionRequest, DEFAULT_MESSAGE_LIMIT, MessagesResponse, PromptRequest,
    ResourceRequest, TitleRequest,
};

use log::info;
use parley_config::ServerConfig;
use parley_core::Orchestrator;
use rocket::{Build, Rocket, catchers, routes};
use std::sync::Arc;

/// Attach the orchestrator, routes, and JSON error catchers to a rocket instance.
pub fn mount(rocket: Rocket<Build>, orchestrator: Arc<Orchestrator>) -> Rocket<Build> {
    rocket
        .manage(orchestrator)
        .mount(
            "/",
            routes![
                routes::chat,
                routes::create_session,
                routes::list_sessions,
                routes::get_session,
                routes::delete_session,
                routes::clear_session,
                routes::update_title,
                routes::session_messages,
                routes::session_stats,
                routes::tools,
                routes::prompts,
                routes::resources,
                routes::fetch_resource,
                routes::execute_prompt,
                routes::reconnect_provider,
                routes::memory_stats,
                routes::save_now,
                routes::health,
                ws::stream,
            ],
        )
        .register(
            "/",
            catchers![
                error::bad_request,
                error::not_found,
                error::unprocessable,
                error::internal
            ],
        )
}

/// Build a rocket bound to the configured address and port.
pub fn build_rocket(orchestrator: Arc<Orchestrator>, server: &ServerConfig) -> Rocket<Build> {
    info!(
        "configuring http server (address={}, port={})",
        server.address, server.port
    );
    let figment = rocket::Config::figment()
        .merge(("address", server.address.clone()))
        .merge(("port", server.port));
    mount(rocket::custom(figment), orchestrator)
}
