use std::sync::Arc;

use eval_bus::Bus;

use crate::config::Config;
use crate::image_catalog::ImageCatalog;
use crate::isolation::IsolationCache;
use crate::log_aggregation::LogAggregationClient;

#[derive(Clone)]
pub struct AppState {
    pub client: kube::Client,
    pub bus: Arc<dyn Bus>,
    pub image_catalog: Arc<ImageCatalog>,
    pub isolation: Arc<IsolationCache>,
    pub log_aggregation: Option<Arc<LogAggregationClient>>,
    pub config: Arc<Config>,
}
