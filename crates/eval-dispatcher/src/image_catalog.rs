//! Executor image catalog (§4.3.5): a ConfigMap-backed, 30s TTL-cached
//! mapping from short image names to full registry paths.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use serde::Deserialize;
use tokio::sync::Mutex;

const CACHE_TTL: Duration = Duration::from_secs(30);
const CONFIG_MAP_NAME: &str = "executor-images";
const CONFIG_MAP_KEY: &str = "images.yaml";

#[derive(Debug, Clone, Deserialize)]
struct ImagesYaml {
    #[serde(default)]
    images: Vec<ImageEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ImageEntry {
    name: String,
    image: String,
    #[serde(default = "default_true")]
    available: bool,
    #[serde(default)]
    default: bool,
}

fn default_true() -> bool {
    true
}

/// One entry as surfaced by `GET /images`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CatalogImage {
    pub name: String,
    pub image: String,
    pub default: bool,
}

/// A resolved mapping (`name -> full image path`), plus a synthetic
/// `"default"` entry registered under the chosen fallback (§4.3.5
/// Supplemented behavior) so `/images` and `resolve` share one source of
/// truth.
#[derive(Debug, Clone, Default)]
struct ResolvedCatalog {
    by_name: HashMap<String, String>,
    default_image: Option<String>,
}

struct CacheEntry {
    catalog: ResolvedCatalog,
    fetched_at: Instant,
}

/// Process-wide, lazily-refreshed cache of the executor image catalog
/// (§9 "process-wide globals... become lazily initialized, time-bounded
/// caches on the Dispatcher instance").
pub struct ImageCatalog {
    client: kube::Client,
    namespace: String,
    registry_prefix: String,
    default_tag: String,
    fallback_image: String,
    cache: Mutex<Option<CacheEntry>>,
}

impl ImageCatalog {
    pub fn new(
        client: kube::Client,
        namespace: String,
        registry_prefix: String,
        default_tag: String,
        fallback_image: String,
    ) -> Self {
        Self {
            client,
            namespace,
            registry_prefix,
            default_tag,
            fallback_image,
            cache: Mutex::new(None),
        }
    }

    /// Resolve a requested executor image name (or full path) to a
    /// complete registry path (§4.3.3 step 2).
    pub async fn resolve(&self, requested: Option<&str>) -> String {
        let catalog = self.load().await;
        let image = pick_image(requested, &catalog.by_name, catalog.default_image.as_deref(), &self.fallback_image);
        apply_registry_and_tag(image, &self.registry_prefix, &self.default_tag)
    }

    pub async fn list(&self) -> Vec<CatalogImage> {
        let catalog = self.load().await;
        catalog
            .by_name
            .iter()
            .map(|(name, image)| CatalogImage {
                name: name.clone(),
                image: image.clone(),
                default: Some(image.as_str()) == catalog.default_image.as_deref(),
            })
            .collect()
    }

    async fn load(&self) -> ResolvedCatalog {
        let mut guard = self.cache.lock().await;
        if let Some(entry) = guard.as_ref() {
            if entry.fetched_at.elapsed() < CACHE_TTL {
                return entry.catalog.clone();
            }
        }

        let catalog = self.fetch().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load executor images ConfigMap, falling back to env default");
            ResolvedCatalog {
                by_name: HashMap::new(),
                default_image: Some(self.fallback_image.clone()),
            }
        });
        *guard = Some(CacheEntry {
            catalog: catalog.clone(),
            fetched_at: Instant::now(),
        });
        catalog
    }

    async fn fetch(&self) -> Result<ResolvedCatalog, kube::Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let config_map = api.get(CONFIG_MAP_NAME).await?;
        let raw = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIG_MAP_KEY))
            .cloned()
            .unwrap_or_default();
        let parsed: ImagesYaml = serde_yaml::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "malformed executor-images ConfigMap, treating as empty");
            ImagesYaml { images: Vec::new() }
        });

        let mut by_name = HashMap::new();
        let mut default_image = None;
        for entry in parsed.images.into_iter().filter(|e| e.available) {
            if entry.default && default_image.is_none() {
                default_image = Some(entry.image.clone());
            }
            by_name.insert(entry.name, entry.image);
        }
        if default_image.is_none() {
            default_image = by_name.values().next().cloned();
        }
        if let Some(default) = &default_image {
            by_name.insert("default".to_string(), default.clone());
        }
        tracing::info!(count = by_name.len(), "loaded executor images from ConfigMap");
        Ok(ResolvedCatalog { by_name, default_image })
    }

}

/// Decide which catalog entry (or verbatim path, or fallback default) a
/// requested image name resolves to, before the registry prefix/tag are
/// applied (§4.3.3 step 2).
fn pick_image(
    requested: Option<&str>,
    by_name: &HashMap<String, String>,
    default_image: Option<&str>,
    fallback_image: &str,
) -> String {
    match requested {
        Some(name) if by_name.contains_key(name) => by_name[name].clone(),
        Some(name) if name.contains('/') || name.contains(':') => name.to_string(),
        Some(name) => {
            tracing::warn!(requested = name, "unknown executor image, using default");
            default_image.unwrap_or(fallback_image).to_string()
        }
        None => default_image.unwrap_or(fallback_image).to_string(),
    }
}

fn apply_registry_and_tag(mut image: String, registry_prefix: &str, default_tag: &str) -> String {
    if !registry_prefix.is_empty() && !image.starts_with(registry_prefix) {
        image = format!("{registry_prefix}/{image}");
    }
    let last_segment = image.rsplit('/').next().unwrap_or(&image).to_string();
    if !last_segment.contains(':') {
        image = format!("{image}:{default_tag}");
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_short_name_resolves_and_gets_registry_prefix_and_tag() {
        let mut by_name = HashMap::new();
        by_name.insert("python-ml".to_string(), "crucible-platform/executor-ml".to_string());
        let image = pick_image(Some("python-ml"), &by_name, None, "executor-ml");
        let image = apply_registry_and_tag(image, "localhost:5000", "latest");
        assert_eq!(image, "localhost:5000/crucible-platform/executor-ml:latest");
    }

    #[test]
    fn full_path_request_is_used_verbatim_before_prefix_and_tag() {
        let image = pick_image(Some("myrepo/custom:v2"), &HashMap::new(), None, "executor-ml");
        let image = apply_registry_and_tag(image, "", "latest");
        assert_eq!(image, "myrepo/custom:v2");
    }

    #[test]
    fn unknown_short_name_falls_back_to_catalog_default() {
        let image = pick_image(Some("nonexistent"), &HashMap::new(), Some("crucible-platform/base"), "executor-ml");
        assert_eq!(image, "crucible-platform/base");
    }

    #[test]
    fn missing_request_falls_back_to_env_default_when_catalog_has_none() {
        let image = pick_image(None, &HashMap::new(), None, "executor-ml");
        assert_eq!(image, "executor-ml");
    }

    #[test]
    fn tag_is_only_appended_when_absent() {
        let image = apply_registry_and_tag("repo/image:v1".to_string(), "", "latest");
        assert_eq!(image, "repo/image:v1");
    }

    #[test]
    fn registry_prefix_is_not_doubled_if_already_present() {
        let image = apply_registry_and_tag("localhost:5000/repo/image".to_string(), "localhost:5000", "latest");
        assert_eq!(image, "localhost:5000/repo/image:latest");
    }
}
