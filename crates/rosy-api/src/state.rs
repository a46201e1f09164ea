use std::sync::Arc;

use rosy_db::Database;

use crate::codes::CodeService;
use crate::flow::FlowController;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub codes: CodeService,
    pub flow: FlowController,
    pub jwt_secret: String,
}
