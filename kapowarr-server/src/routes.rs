//! Route organisation. Everything lives under the `/api` prefix; every
//! route except `/auth` goes through the API key middleware.

use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;

use crate::auth;
use crate::handlers::{
    activity, blocklist, clients, credentials, files, issues,
    libraryimport, masseditor, rootfolders, settings_api, system, volumes,
};
use crate::state::AppState;
use crate::websocket;

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "NotFound", "result": {} })),
    )
}

pub fn api_router(state: AppState) -> Router {
    let protected = Router::new()
        // System
        .route("/system/about", get(system::about))
        .route("/system/logs", get(system::logs))
        .route(
            "/system/tasks",
            get(system::list_tasks).post(system::add_task),
        )
        .route(
            "/system/tasks/history",
            get(system::task_history).delete(system::clear_task_history),
        )
        .route("/system/tasks/planning", get(system::task_planning))
        .route(
            "/system/tasks/{id}",
            get(system::get_task).delete(system::delete_task),
        )
        .route("/system/power/shutdown", post(system::shutdown))
        .route("/system/power/restart", post(system::restart))
        // Settings
        .route(
            "/settings",
            get(settings_api::get_settings)
                .put(settings_api::update_settings),
        )
        .route(
            "/settings/api_key",
            post(settings_api::regenerate_api_key),
        )
        .route(
            "/settings/availableformats",
            get(settings_api::available_formats),
        )
        // Root folders
        .route(
            "/rootfolder",
            get(rootfolders::list).post(rootfolders::add),
        )
        .route(
            "/rootfolder/{id}",
            get(rootfolders::get_one).delete(rootfolders::delete),
        )
        // Library import
        .route(
            "/libraryimport",
            get(libraryimport::propose).post(libraryimport::commit),
        )
        // Volumes
        .route("/volumes", get(volumes::list).post(volumes::add))
        .route("/volumes/search", get(volumes::search))
        .route("/volumes/stats", get(volumes::stats))
        .route(
            "/volumes/{id}",
            get(volumes::get_one)
                .put(volumes::update)
                .delete(volumes::delete),
        )
        .route("/volumes/{id}/cover", get(volumes::cover))
        .route(
            "/volumes/{id}/rename",
            get(volumes::preview_rename).post(volumes::execute_rename),
        )
        .route(
            "/volumes/{id}/convert",
            get(volumes::preview_convert).post(volumes::execute_convert),
        )
        .route(
            "/volumes/{id}/manualsearch",
            get(volumes::manual_search),
        )
        .route("/volumes/{id}/download", post(volumes::download))
        // Issues
        .route(
            "/issues/{id}",
            get(issues::get_one).put(issues::update),
        )
        .route(
            "/issues/{id}/rename",
            get(issues::preview_rename).post(issues::execute_rename),
        )
        .route("/issues/{id}/convert", post(issues::execute_convert))
        .route(
            "/issues/{id}/manualsearch",
            get(issues::manual_search),
        )
        .route("/issues/{id}/download", post(issues::download))
        // Activity
        .route("/activity/queue", get(activity::queue))
        .route(
            "/activity/queue/{id}",
            get(activity::queue_entry)
                .put(activity::move_queue_entry)
                .delete(activity::delete_queue_entry),
        )
        .route(
            "/activity/history",
            get(activity::history).delete(activity::clear_history),
        )
        .route("/activity/folder", get(activity::folder))
        // Blocklist
        .route(
            "/blocklist",
            get(blocklist::list)
                .post(blocklist::add)
                .delete(blocklist::clear),
        )
        .route(
            "/blocklist/{id}",
            get(blocklist::get_one).delete(blocklist::delete),
        )
        // Credentials
        .route(
            "/credentials",
            get(credentials::list).post(credentials::add),
        )
        .route(
            "/credentials/{id}",
            get(credentials::get_one).delete(credentials::delete),
        )
        // External clients
        .route("/externalclients/options", get(clients::options))
        .route("/externalclients/test", post(clients::test))
        .route(
            "/externalclients",
            get(clients::list).post(clients::add),
        )
        .route(
            "/externalclients/{id}",
            get(clients::get_one)
                .put(clients::update)
                .delete(clients::delete),
        )
        // Mass editor
        .route("/masseditor", post(masseditor::run))
        // Files
        .route("/files/{id}", get(files::get_one))
        // Websocket (the key arrives as a query parameter here)
        .route("/ws", get(websocket::websocket_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/auth", post(auth::login))
        .merge(protected)
        .fallback(not_found)
        .with_state(state)
}

pub fn router(state: AppState) -> Router {
    let url_base = state.config.normalized_url_base();
    let api = api_router(state);

    if url_base.is_empty() {
        Router::new().nest("/api", api)
    } else {
        Router::new().nest(&format!("{url_base}/api"), api)
    }
}
