use crate::geometry::{Aabb, Pose, Ray, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Linear RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const YELLOW: Color = Color::rgb(1.0, 0.92, 0.016);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn to_rgb8(self) -> [u8; 3] {
        let channel = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        [channel(self.r), channel(self.g), channel(self.b)]
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

/// Generational handle to a node in a [`Scene`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub const fn index(self) -> u32 {
        self.index
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshInfo {
    pub vertex_count: u32,
    pub triangle_count: u32,
    pub bounds: Aabb,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Renderable {
    /// Static mesh slot; `None` when the slot carries no mesh data.
    Mesh(Option<MeshInfo>),
    Skinned(MeshInfo),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Collider {
    Box(Aabb),
    Mesh { bounds: Aabb, convex: bool },
}

impl Collider {
    pub fn bounds(&self) -> Aabb {
        match self {
            Collider::Box(bounds) => *bounds,
            Collider::Mesh { bounds, .. } => *bounds,
        }
    }
}

/// Simulation flags of a rigid body. Simulation itself is owned by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsBody {
    pub use_gravity: bool,
    pub is_kinematic: bool,
    pub mass: f32,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl PhysicsBody {
    pub fn dynamic(mass: f32) -> Self {
        Self {
            use_gravity: true,
            is_kinematic: false,
            mass,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    /// Relative to the parent, or world space for root nodes.
    pub transform: Pose,
    pub color: Color,
    pub renderable: Option<Renderable>,
    pub collider: Option<Collider>,
    pub body: Option<PhysicsBody>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Pose::IDENTITY,
            color: Color::WHITE,
            renderable: None,
            collider: None,
            body: None,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_transform(mut self, transform: Pose) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_renderable(mut self, renderable: Renderable) -> Self {
        self.renderable = Some(renderable);
        self
    }

    pub fn with_collider(mut self, collider: Collider) -> Self {
        self.collider = Some(collider);
        self
    }

    pub fn with_body(mut self, body: PhysicsBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

struct Slot {
    generation: u32,
    node: Option<SceneNode>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SceneError {
    NoSuchNode(NodeId),
    WouldCycle { child: NodeId, parent: NodeId },
}

impl fmt::Display for SceneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneError::NoSuchNode(node) => {
                write!(f, "node {:?} is not alive in this scene", node)
            }
            SceneError::WouldCycle { child, parent } => {
                write!(f, "attaching {:?} under {:?} would create a cycle", child, parent)
            }
        }
    }
}

impl std::error::Error for SceneError {}

/// Hierarchy of placed and imported objects.
#[derive(Default)]
pub struct Scene {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, node: SceneNode) -> NodeId {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    pub fn spawn_child(&mut self, parent: NodeId, node: SceneNode) -> Result<NodeId, SceneError> {
        self.validate(parent)?;
        let child = self.spawn(node);
        self.attach(child, parent)?;
        Ok(child)
    }

    /// Re-parents `child` under `parent`, keeping its local transform.
    /// `parent` may not be `child` or one of its descendants.
    pub fn attach(&mut self, child: NodeId, parent: NodeId) -> Result<(), SceneError> {
        self.validate(child)?;
        self.validate(parent)?;
        let mut ancestor = Some(parent);
        while let Some(current) = ancestor {
            if current == child {
                return Err(SceneError::WouldCycle { child, parent });
            }
            ancestor = self.get(current).and_then(|node| node.parent);
        }
        self.detach(child)?;
        if let Some(node) = self.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.get_mut(parent) {
            node.children.push(child);
        }
        Ok(())
    }

    fn detach(&mut self, child: NodeId) -> Result<(), SceneError> {
        let previous = self.get(child).ok_or(SceneError::NoSuchNode(child))?.parent;
        if let Some(previous) = previous {
            if let Some(node) = self.get_mut(previous) {
                node.children.retain(|id| *id != child);
            }
        }
        if let Some(node) = self.get_mut(child) {
            node.parent = None;
        }
        Ok(())
    }

    /// Removes `node` and its whole subtree.
    pub fn despawn(&mut self, node: NodeId) -> Result<(), SceneError> {
        self.validate(node)?;
        self.detach(node)?;
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            let slot = &mut self.slots[current.index as usize];
            if let Some(removed) = slot.node.take() {
                pending.extend(removed.children);
                slot.generation = slot.generation.wrapping_add(1);
                self.free_list.push(current.index);
            }
        }
        Ok(())
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.slots
            .get(node.index as usize)
            .map(|slot| slot.generation == node.generation && slot.node.is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, node: NodeId) -> Option<&SceneNode> {
        let slot = self.slots.get(node.index as usize)?;
        if slot.generation != node.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn get_mut(&mut self, node: NodeId) -> Option<&mut SceneNode> {
        let slot = self.slots.get_mut(node.index as usize)?;
        if slot.generation != node.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &SceneNode)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|node| {
                (
                    NodeId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    node,
                )
            })
        })
    }

    /// Pre-order traversal of `root` and its descendants.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut ordered = Vec::new();
        let mut pending = vec![root];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.get(current) {
                ordered.push(current);
                pending.extend(node.children.iter().rev().copied());
            }
        }
        ordered
    }

    pub fn root_of(&self, node: NodeId) -> NodeId {
        let mut current = node;
        while let Some(parent) = self.get(current).and_then(|node| node.parent) {
            current = parent;
        }
        current
    }

    pub fn world_pose(&self, node: NodeId) -> Option<Pose> {
        let mut pose = self.get(node)?.transform;
        let mut parent = self.get(node)?.parent;
        while let Some(id) = parent {
            let parent_node = self.get(id)?;
            pose = parent_node.transform.compose(&pose);
            parent = parent_node.parent;
        }
        Some(pose)
    }

    /// Nearest collider hit along `ray`, returned with its distance.
    pub fn raycast(&self, ray: &Ray) -> Option<(NodeId, f32)> {
        let mut best: Option<(NodeId, f32)> = None;
        for (id, node) in self.nodes() {
            let Some(collider) = node.collider else {
                continue;
            };
            let Some(pose) = self.world_pose(id) else {
                continue;
            };
            if let Some(distance) = collider.bounds().transformed(&pose).intersect_ray(ray) {
                if best.map_or(true, |(_, closest)| distance < closest) {
                    best = Some((id, distance));
                }
            }
        }
        best
    }

    fn validate(&self, node: NodeId) -> Result<(), SceneError> {
        if self.contains(node) {
            Ok(())
        } else {
            Err(SceneError::NoSuchNode(node))
        }
    }
}
