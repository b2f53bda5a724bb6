//! Shared state handed to every handler.

use std::sync::Arc;

use kapowarr_core::Application;
use tokio::sync::mpsc;

use crate::config::ServerConfig;

/// What the power endpoints ask the main loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Shutdown,
    Restart,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub app: Application,
    pub config: Arc<ServerConfig>,
    pub power: mpsc::Sender<PowerAction>,
}
