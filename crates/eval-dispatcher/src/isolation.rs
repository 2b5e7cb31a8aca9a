//! Isolation runtime (e.g. gVisor) availability check (§4.3.4): cached
//! process-wide so repeated `Execute` calls don't hit the scheduler API
//! on every request.

use k8s_openapi::api::node::v1::RuntimeClass;
use kube::api::Api;
use tokio::sync::OnceCell;

const RUNTIME_CLASS_NAME: &str = "gvisor";

/// Process-wide cache of whether the isolation runtime class is present
/// on the cluster. Populated once per process lifetime.
pub struct IsolationCache {
    cached: OnceCell<bool>,
}

impl IsolationCache {
    pub fn new() -> Self {
        Self {
            cached: OnceCell::new(),
        }
    }

    /// Whether evaluations should run under the isolation runtime class.
    /// On local macOS development the check is bypassed entirely and
    /// isolation is considered both unavailable and not required.
    pub async fn is_available(&self, client: &kube::Client, environment: &str, host_os: &str) -> bool {
        if environment == "local" && host_os == "darwin" {
            return false;
        }
        *self
            .cached
            .get_or_init(|| async { Self::probe(client).await })
            .await
    }

    async fn probe(client: &kube::Client) -> bool {
        let api: Api<RuntimeClass> = Api::all(client.clone());
        match api.get(RUNTIME_CLASS_NAME).await {
            Ok(_) => {
                tracing::info!("isolation runtime class found, will use for evaluations");
                true
            }
            Err(kube::Error::Api(response)) if response.code == 404 => {
                tracing::error!("isolation runtime class not found, evaluations will be rejected");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "error checking isolation runtime availability");
                false
            }
        }
    }
}

impl Default for IsolationCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the environment/host combination is allowed to run without the
/// isolation runtime at all (§4.3.4 "local-development environment on
/// non-Linux hosts").
pub fn bypass_allowed(environment: &str, host_os: &str) -> bool {
    environment == "local" && host_os == "darwin"
}
