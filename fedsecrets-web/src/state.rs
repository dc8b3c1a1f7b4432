use std::sync::Arc;

use fedsecrets_core::SecretAccessor;

use crate::auth::{LoginFlow, SessionStore};
use crate::config::AppConfig;

pub type SharedConfig = Arc<AppConfig>;
pub type SharedAccessor = Arc<SecretAccessor>;

#[derive(Clone)]
pub struct AppState {
    pub config: SharedConfig,
    pub accessor: SharedAccessor,
    pub sessions: SessionStore,
    pub login: Arc<LoginFlow>,
}

impl AppState {
    pub fn new(
        config: SharedConfig,
        accessor: SharedAccessor,
        sessions: SessionStore,
        login: Arc<LoginFlow>,
    ) -> Self {
        Self {
            config,
            accessor,
            sessions,
            login,
        }
    }
}
