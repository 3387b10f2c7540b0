//! Arena-backed scene graph.
//!
//! Every node lives in a single [`SceneGraph`] and is addressed by a
//! [`NodeId`]. Transform nodes hold handles to their children rather than
//! owning them, so one subtree may be attached under several parents
//! (instancing) and is dropped exactly once, together with the arena.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::SceneError;
use crate::render::{DrawCommand, Material, MeshHandle, Shading};

/// Stable handle into a [`SceneGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Periodic swing applied on top of a transform's local matrix.
///
/// The animation matrix is a rotation of `cos(angle) * amplitude` radians about
/// `axis`, pivoting around `pivot`, where `angle` is the node's phase in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Swing {
    pub pivot: Vec3,
    pub axis: Vec3,
    pub amplitude: f32,
    /// Phase advance per update, in degrees.
    pub step: f32,
}

impl Default for Swing {
    fn default() -> Self {
        Self {
            pivot: Vec3::new(-26.75, 0.0, 45.0),
            axis: Vec3::X,
            amplitude: std::f32::consts::FRAC_PI_4,
            step: 0.5,
        }
    }
}

impl Swing {
    pub fn matrix(&self, angle_degrees: f32) -> Mat4 {
        let axis = self.axis.normalize_or_zero();
        if axis == Vec3::ZERO {
            return Mat4::IDENTITY;
        }
        let angle = angle_degrees.to_radians().cos() * self.amplitude;
        Mat4::from_translation(self.pivot)
            * Mat4::from_axis_angle(axis, angle)
            * Mat4::from_translation(-self.pivot)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformNode {
    pub local: Mat4,
    animation: Mat4,
    swing: Option<Swing>,
    angle: f32,
    children: Vec<NodeId>,
}

impl TransformNode {
    fn new(local: Mat4, swing: Option<Swing>) -> Self {
        Self {
            local,
            animation: Mat4::IDENTITY,
            swing,
            angle: 0.0,
            children: Vec::new(),
        }
    }

    pub fn is_animated(&self) -> bool {
        self.swing.is_some()
    }

    pub fn animation(&self) -> Mat4 {
        self.animation
    }

    /// Current phase in degrees, always within `[0, 360)`.
    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Matrix handed down to children.
    pub fn combined(&self, parent: Mat4) -> Mat4 {
        if self.is_animated() {
            parent * self.local * self.animation
        } else {
            parent * self.local
        }
    }

    fn advance(&mut self) {
        let Some(swing) = self.swing else {
            return;
        };
        self.animation = swing.matrix(self.angle);
        self.angle = (self.angle + swing.step).rem_euclid(360.0);
        if self.angle >= 360.0 {
            self.angle = 0.0;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeometryNode {
    pub mesh: MeshHandle,
    pub material: Material,
    pub shading: Shading,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Transform(TransformNode),
    Geometry(GeometryNode),
}

/// Owner of every scene node.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    nodes: Vec<Node>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_transform(&mut self, local: Mat4) -> NodeId {
        self.push(Node::Transform(TransformNode::new(local, None)))
    }

    pub fn add_animated_transform(&mut self, local: Mat4, swing: Swing) -> NodeId {
        self.push(Node::Transform(TransformNode::new(local, Some(swing))))
    }

    pub fn add_geometry(&mut self, mesh: MeshHandle, material: Material) -> NodeId {
        self.push(Node::Geometry(GeometryNode {
            mesh,
            material,
            shading: Shading::Lit,
        }))
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn transform(&self, id: NodeId) -> Option<&TransformNode> {
        match self.nodes.get(id.0)? {
            Node::Transform(node) => Some(node),
            Node::Geometry(_) => None,
        }
    }

    pub fn transform_mut(&mut self, id: NodeId) -> Option<&mut TransformNode> {
        match self.nodes.get_mut(id.0)? {
            Node::Transform(node) => Some(node),
            Node::Geometry(_) => None,
        }
    }

    /// Appends `child` to `parent`'s children.
    ///
    /// The same child may be attached to several parents; attaching a node
    /// beneath one of its own descendants is rejected.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SceneError> {
        if child.0 >= self.nodes.len() {
            return Err(SceneError::UnknownNode(child));
        }
        match self.nodes.get(parent.0) {
            None => return Err(SceneError::UnknownNode(parent)),
            Some(Node::Geometry(_)) => return Err(SceneError::NotATransform(parent)),
            Some(Node::Transform(_)) => {}
        }
        if parent == child || self.reaches(child, parent) {
            return Err(SceneError::Cycle { parent, child });
        }
        if let Some(Node::Transform(node)) = self.nodes.get_mut(parent.0) {
            node.children.push(child);
        }
        Ok(())
    }

    /// Detaches the first occurrence of `child` from `parent`. The node itself
    /// stays in the arena and keeps any other parents.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        let Some(node) = self.transform_mut(parent) else {
            return false;
        };
        match node.children.iter().position(|&c| c == child) {
            Some(index) => {
                node.children.remove(index);
                true
            }
            None => false,
        }
    }

    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if std::mem::replace(&mut seen[id.0], true) {
                continue;
            }
            if let Some(Node::Transform(node)) = self.nodes.get(id.0) {
                stack.extend_from_slice(&node.children);
            }
        }
        false
    }

    /// Walks the subtree under `root`, emitting one draw per geometry leaf
    /// reached, with the cumulative matrix of the path that reached it.
    pub fn draw(&self, root: NodeId, parent: Mat4, out: &mut Vec<DrawCommand>) {
        match self.nodes.get(root.0) {
            Some(Node::Transform(node)) => {
                let combined = node.combined(parent);
                for &child in &node.children {
                    self.draw(child, combined, out);
                }
            }
            Some(Node::Geometry(leaf)) => out.push(DrawCommand {
                mesh: leaf.mesh,
                model: parent,
                material: leaf.material,
                shading: leaf.shading,
            }),
            None => {}
        }
    }

    /// Advances the animation of every transform reachable from `root`.
    ///
    /// Non-animated transforms are passed through so animated descendants
    /// still update. A node shared between several parents advances once.
    pub fn update(&mut self, root: NodeId) {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(flag) = visited.get_mut(id.0) else {
                continue;
            };
            if std::mem::replace(flag, true) {
                continue;
            }
            if let Some(Node::Transform(node)) = self.nodes.get_mut(id.0) {
                node.advance();
                stack.extend(node.children.iter().rev());
            }
        }
    }
}
