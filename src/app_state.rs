use crate::broadcast::BroadcastServer;
use crate::config::Config;
use crate::db::MongoDB;
use actix::Addr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub broadcast: Addr<BroadcastServer>,
    pub mongodb: Arc<MongoDB>,
    pub config: Config,
}
