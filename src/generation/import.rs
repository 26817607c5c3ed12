use super::glb::{GlbAsset, parse_glb};
use super::transport::TransportError;
use crate::config::ImportSettings;
use crate::error::{SketchError, SketchResult, cancellable};
use crate::geometry::Aabb;
use crate::scene::{Collider, NodeId, PhysicsBody, Renderable, Scene, SceneError, SceneNode};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub const CONTAINER_NAME: &str = "GeneratedAsset";
const MIN_MASS: f32 = 0.0001;

/// Downloads the raw container behind a result URL.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

#[cfg(feature = "remote-http")]
pub use http::HttpAssetFetcher;

#[cfg(feature = "remote-http")]
mod http {
    use super::AssetFetcher;
    use crate::generation::transport::{TransportError, map_reqwest};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Plain GET; result URLs are pre-signed and carry no bearer token.
    pub struct HttpAssetFetcher {
        client: reqwest::Client,
    }

    impl HttpAssetFetcher {
        pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
            let client = reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .map_err(map_reqwest)?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl AssetFetcher for HttpAssetFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
            let response = self.client.get(url).send().await.map_err(map_reqwest)?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            let bytes = response.bytes().await.map_err(map_reqwest)?;
            Ok(bytes.to_vec())
        }
    }
}

/// Turns a generated model into scene nodes under a fresh container.
pub struct AssetImporter<F> {
    fetcher: F,
    settings: ImportSettings,
}

impl<F: AssetFetcher> AssetImporter<F> {
    pub fn new(fetcher: F, settings: ImportSettings) -> Self {
        Self { fetcher, settings }
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Fetches, parses and instantiates the asset at `url`. On failure
    /// nothing is left in `scene`.
    pub async fn import_result(
        &self,
        url: &str,
        scene: &mut Scene,
        parent: Option<NodeId>,
        cancel: &CancellationToken,
    ) -> SketchResult<NodeId> {
        let bytes = cancellable(cancel, async {
            self.fetcher
                .fetch(url)
                .await
                .map_err(|err| SketchError::ImportFailure(format!("failed to fetch {url}: {err}")))
        })
        .await?;
        let asset = parse_glb(&bytes)
            .map_err(|err| SketchError::ImportFailure(format!("failed to parse {url}: {err}")))?;

        let container = match parent {
            Some(parent) => scene
                .spawn_child(parent, SceneNode::new(CONTAINER_NAME))
                .map_err(|err| SketchError::ImportFailure(err.to_string()))?,
            None => scene.spawn(SceneNode::new(CONTAINER_NAME)),
        };
        if let Err(reason) = instantiate(&asset, scene, container) {
            if let Err(err) = scene.despawn(container) {
                log::warn!("[generation] failed to remove partial import: {err}");
            }
            return Err(SketchError::ImportFailure(reason));
        }

        if self.settings.add_physics {
            if self.settings.add_colliders {
                attach_colliders(scene, container, &self.settings);
            }
            if let Some(node) = scene.get_mut(container) {
                let body = node
                    .body
                    .get_or_insert_with(|| PhysicsBody::dynamic(MIN_MASS));
                body.use_gravity = true;
                body.is_kinematic = false;
                body.mass = self.settings.mass.max(MIN_MASS);
            }
        }

        log::info!(
            "[generation] imported {} nodes ({} meshes) from {url}",
            asset.nodes.len(),
            asset.mesh_count()
        );
        Ok(container)
    }
}

fn instantiate(asset: &GlbAsset, scene: &mut Scene, container: NodeId) -> Result<(), String> {
    if asset.roots.is_empty() {
        return Err("asset has no nodes to instantiate".into());
    }
    let mut pending: Vec<(usize, NodeId)> = asset.roots.iter().map(|root| (*root, container)).collect();
    while let Some((index, parent)) = pending.pop() {
        let source = &asset.nodes[index];
        let mut node = SceneNode::new(source.name.clone()).with_transform(source.transform);
        node.renderable = source.renderable();
        let spawned = scene
            .spawn_child(parent, node)
            .map_err(|err: SceneError| err.to_string())?;
        pending.extend(source.children.iter().map(|child| (*child, spawned)));
    }
    Ok(())
}

/// Colliders for every renderable below `root` that has none yet.
fn attach_colliders(scene: &mut Scene, root: NodeId, settings: &ImportSettings) {
    for id in scene.descendants(root) {
        let Some(node) = scene.get_mut(id) else {
            continue;
        };
        if node.collider.is_some() {
            continue;
        }
        node.collider = match node.renderable {
            None => continue,
            Some(Renderable::Mesh(None)) => Some(Collider::Box(Aabb::unit())),
            Some(Renderable::Mesh(Some(info)))
                if settings.convex && info.triangle_count > settings.convex_triangle_limit =>
            {
                log::debug!(
                    "[generation] {} has {} triangles; using a box collider",
                    node.name,
                    info.triangle_count
                );
                Some(Collider::Box(info.bounds))
            }
            Some(Renderable::Mesh(Some(info))) => Some(Collider::Mesh {
                bounds: info.bounds,
                convex: settings.convex,
            }),
            Some(Renderable::Skinned(info)) => Some(Collider::Box(info.bounds)),
        };
    }
}
