use std::sync::Arc;

use eval_bus::Bus;
use eval_broker::WorkQueue;
use eval_storage::Facade;

use crate::config::Config;
use crate::dispatcher_client::DispatcherClient;

#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<Facade>,
    pub queue: Arc<dyn WorkQueue>,
    pub bus: Arc<dyn Bus>,
    pub dispatcher: Arc<DispatcherClient>,
    pub config: Arc<Config>,
}
