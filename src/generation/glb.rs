//! Reader for binary glTF containers, limited to what the importer needs:
//! the node hierarchy, local transforms and per-mesh vertex/triangle counts
//! with bounds.

use crate::geometry::{Aabb, Pose, Quat, Vec3};
use crate::scene::{MeshInfo, Renderable};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

const MAGIC: u32 = 0x4654_6C67; // "glTF"
const VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A; // "JSON"
const CHUNK_BIN: u32 = 0x004E_4942; // "BIN\0"
const HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const MODE_TRIANGLES: u32 = 4;

#[derive(Debug, Error)]
pub enum GlbError {
    #[error("container too short: {0} bytes")]
    TooShort(usize),
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported container version {0}")]
    UnsupportedVersion(u32),
    #[error("declared length {declared} exceeds {actual} available bytes")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("chunk at offset {0} runs past the end of the container")]
    ChunkOutOfBounds(usize),
    #[error("first chunk is not JSON")]
    MissingJson,
    #[error("invalid document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{kind} index {index} is out of range")]
    BadIndex { kind: &'static str, index: usize },
    #[error("node {0} is reachable through more than one parent")]
    NodeGraph(usize),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Document {
    scene: Option<usize>,
    scenes: Vec<SceneDef>,
    nodes: Vec<NodeDef>,
    meshes: Vec<MeshDef>,
    accessors: Vec<AccessorDef>,
    skins: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SceneDef {
    nodes: Vec<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeDef {
    name: Option<String>,
    mesh: Option<usize>,
    skin: Option<usize>,
    children: Vec<usize>,
    translation: Option<[f32; 3]>,
    rotation: Option<[f32; 4]>,
    scale: Option<[f32; 3]>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MeshDef {
    primitives: Vec<PrimitiveDef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PrimitiveDef {
    attributes: HashMap<String, usize>,
    indices: Option<usize>,
    mode: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AccessorDef {
    count: u32,
    min: Option<Vec<f32>>,
    max: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlbMesh {
    /// `None` when the mesh carries no position data.
    pub info: Option<MeshInfo>,
    pub skinned: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlbNode {
    pub name: String,
    pub transform: Pose,
    pub mesh: Option<GlbMesh>,
    pub children: Vec<usize>,
}

impl GlbNode {
    pub fn renderable(&self) -> Option<Renderable> {
        let mesh = self.mesh?;
        Some(if mesh.skinned {
            Renderable::Skinned(mesh.info.unwrap_or(MeshInfo {
                vertex_count: 0,
                triangle_count: 0,
                bounds: Aabb::unit(),
            }))
        } else {
            Renderable::Mesh(mesh.info)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlbAsset {
    pub nodes: Vec<GlbNode>,
    /// Nodes of the default scene, in document order.
    pub roots: Vec<usize>,
    pub binary_len: usize,
}

impl GlbAsset {
    pub fn mesh_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.mesh.is_some()).count()
    }
}

pub fn parse_glb(bytes: &[u8]) -> Result<GlbAsset, GlbError> {
    if bytes.len() < HEADER_LEN + CHUNK_HEADER_LEN {
        return Err(GlbError::TooShort(bytes.len()));
    }
    let magic = read_u32(bytes, 0);
    if magic != MAGIC {
        return Err(GlbError::BadMagic(magic));
    }
    let version = read_u32(bytes, 4);
    if version != VERSION {
        return Err(GlbError::UnsupportedVersion(version));
    }
    let declared = read_u32(bytes, 8) as usize;
    if declared > bytes.len() {
        return Err(GlbError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }
    let bytes = &bytes[..declared];

    let mut offset = HEADER_LEN;
    let mut json = None;
    let mut binary_len = 0;
    while offset + CHUNK_HEADER_LEN <= bytes.len() {
        let len = read_u32(bytes, offset) as usize;
        let kind = read_u32(bytes, offset + 4);
        let start = offset + CHUNK_HEADER_LEN;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .ok_or(GlbError::ChunkOutOfBounds(offset))?;
        match kind {
            CHUNK_JSON if json.is_none() => json = Some(&bytes[start..end]),
            CHUNK_BIN => binary_len = len,
            _ if json.is_none() => return Err(GlbError::MissingJson),
            // unknown chunks after the document are skipped
            _ => {}
        }
        offset = end;
    }

    let document: Document = serde_json::from_slice(json.ok_or(GlbError::MissingJson)?)?;
    build_asset(document, binary_len)
}

fn build_asset(document: Document, binary_len: usize) -> Result<GlbAsset, GlbError> {
    let node_count = document.nodes.len();
    let mut parents = vec![0_u32; node_count];
    let mut nodes = Vec::with_capacity(node_count);

    for node in &document.nodes {
        for &child in &node.children {
            let slot = parents.get_mut(child).ok_or(GlbError::BadIndex {
                kind: "node",
                index: child,
            })?;
            *slot += 1;
            if *slot > 1 {
                return Err(GlbError::NodeGraph(child));
            }
        }
        if let Some(skin) = node.skin {
            if skin >= document.skins.len() {
                return Err(GlbError::BadIndex {
                    kind: "skin",
                    index: skin,
                });
            }
        }
        let mesh = node
            .mesh
            .map(|index| mesh_info(&document, index))
            .transpose()?
            .map(|info| GlbMesh {
                info,
                skinned: node.skin.is_some(),
            });
        let scale = node.scale.map(Vec3::from).unwrap_or(Vec3::ONE);
        let mesh = mesh.map(|mut mesh| {
            if let Some(info) = mesh.info.as_mut() {
                info.bounds = Aabb::new(info.bounds.min * scale, info.bounds.max * scale);
            }
            mesh
        });

        nodes.push(GlbNode {
            name: node.name.clone().unwrap_or_default(),
            transform: Pose::new(
                node.translation.map(Vec3::from).unwrap_or(Vec3::ZERO),
                node.rotation
                    .map(|[x, y, z, w]| Quat::from_xyzw(x, y, z, w).normalize())
                    .unwrap_or(Quat::IDENTITY),
            ),
            mesh,
            children: node.children.clone(),
        });
    }

    let roots = match document.scene.or((!document.scenes.is_empty()).then_some(0)) {
        Some(scene) => {
            let scene = document.scenes.get(scene).ok_or(GlbError::BadIndex {
                kind: "scene",
                index: scene,
            })?;
            for &root in &scene.nodes {
                match parents.get(root) {
                    None => return Err(GlbError::BadIndex { kind: "node", index: root }),
                    Some(0) => {}
                    Some(_) => return Err(GlbError::NodeGraph(root)),
                }
            }
            scene.nodes.clone()
        }
        None => (0..node_count).filter(|&index| parents[index] == 0).collect(),
    };

    reject_cycles(&nodes, &roots)?;
    Ok(GlbAsset {
        nodes,
        roots,
        binary_len,
    })
}

/// With at most one parent per node, a cycle is exactly a node reachable
/// from itself; walking from the roots must never revisit one.
fn reject_cycles(nodes: &[GlbNode], roots: &[usize]) -> Result<(), GlbError> {
    let mut visited = vec![false; nodes.len()];
    let mut stack: Vec<usize> = roots.to_vec();
    while let Some(index) = stack.pop() {
        if std::mem::replace(&mut visited[index], true) {
            return Err(GlbError::NodeGraph(index));
        }
        stack.extend(&nodes[index].children);
    }
    Ok(())
}

fn mesh_info(document: &Document, index: usize) -> Result<Option<MeshInfo>, GlbError> {
    let mesh = document.meshes.get(index).ok_or(GlbError::BadIndex {
        kind: "mesh",
        index,
    })?;
    let accessor = |index: usize| {
        document.accessors.get(index).ok_or(GlbError::BadIndex {
            kind: "accessor",
            index,
        })
    };

    let mut info: Option<MeshInfo> = None;
    for primitive in &mesh.primitives {
        let Some(&position) = primitive.attributes.get("POSITION") else {
            continue;
        };
        let positions = accessor(position)?;
        let triangles = if primitive.mode.unwrap_or(MODE_TRIANGLES) != MODE_TRIANGLES {
            0
        } else if let Some(indices) = primitive.indices {
            accessor(indices)?.count / 3
        } else {
            positions.count / 3
        };
        let bounds = accessor_bounds(positions);

        info = Some(match info {
            None => MeshInfo {
                vertex_count: positions.count,
                triangle_count: triangles,
                bounds,
            },
            Some(acc) => MeshInfo {
                vertex_count: acc.vertex_count + positions.count,
                triangle_count: acc.triangle_count + triangles,
                bounds: Aabb::new(acc.bounds.min.min(bounds.min), acc.bounds.max.max(bounds.max)),
            },
        });
    }
    Ok(info)
}

fn accessor_bounds(accessor: &AccessorDef) -> Aabb {
    match (accessor.min.as_deref(), accessor.max.as_deref()) {
        (Some([min_x, min_y, min_z, ..]), Some([max_x, max_y, max_z, ..])) => Aabb::new(
            Vec3::new(*min_x, *min_y, *min_z),
            Vec3::new(*max_x, *max_y, *max_z),
        ),
        _ => Aabb::unit(),
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}
