// Copyright © 2018 Cormac O'Brien
//
// Permission is hereby granted, free of charge, to any person obtaining a copy of this software
// and associated documentation files (the "Software"), to deal in the Software without
// restriction, including without limitation the rights to use, copy, modify, merge, publish,
// distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all copies or
// substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING
// BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM,
// DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Quake III BSP collision model.
//!
//! # Data Structure
//!
//! The binary space partitioning tree, or BSP, is the central data structure used by the engine
//! for collision detection. At its core, the BSP tree is a binary search tree with each node
//! representing a subspace of the map. The tree is navigated using the planes stored in each node;
//! each child represents one side of the plane. Leaves reference the convex brushes and curved
//! surfaces that touch their volume, and those are what traces actually collide with.
//!
//! # File Format
//!
//! The file begins with a 4-byte magic number followed by an `i32` version. Two combinations are
//! understood:
//!
//! - `IBSP` version 46 (Quake III Arena), with 17 lumps.
//! - `RBSP` version 1 (Raven), with 18 lumps.
//!
//! This is followed by a series of "lumps", which act as a directory into the file data. Each lump
//! is a 32-bit offset (into the file data) and a 32-bit size (in bytes). All values are stored
//! little-endian.
//!
//! ## Shaders
//!
//! Lump 1 holds 72-byte shader records: a 64-byte null-padded name, then the surface flags and
//! content flags as `i32`s. Brushes and brush sides take their contents and surface flags from
//! these.
//!
//! ## Planes
//!
//! Lump 2 holds the planes used to partition the map, stored in point-normal form as 4 IEEE 754
//! single-precision floats. Planes are snapped and pooled on load, so the indices stored in nodes
//! and brush sides are remapped.
//!
//! ## Nodes
//!
//! Nodes are stored with a 32-bit plane ID followed by two 32-bit children. A negative child `c`
//! refers to leaf `-1 - c`; otherwise it refers to another node. The integer bounds that follow are
//! ignored.
//!
//! ## Leaves
//!
//! Each leaf stores its cluster and area (both `-1` when the leaf is solid), integer bounds, and
//! ranges into the leaf-surface and leaf-brush lists.
//!
//! ## Brushes
//!
//! A brush is a convex solid given by a range of brush sides and a shader. Each brush side names a
//! plane facing out of the brush and a shader. Raven maps append a draw surface index to each side.
//!
//! ## Surfaces
//!
//! Surfaces reference ranges of draw vertices and draw indexes. Only bezier patches and triangle
//! soups participate in collision. Patch control grids give their dimensions in the last two
//! `i32`s of the record.
//!
//! ## Visibility
//!
//! The visibility lump starts with the cluster count and the size of a cluster's bit row, followed
//! by one uncompressed row per cluster.

mod area;
mod config;
mod error;
mod facet;
mod load;
mod patch;
mod plane;
mod query;
mod trace;
mod trisoup;

#[cfg(test)]
pub(crate) mod testmap;

use std::collections::HashSet;

use crate::common::math::{Hyperplane, MAX_WORLD_COORD};

use cgmath::Vector3;

pub use self::{
    area::{AreaPortals, MAX_MAP_AREAS},
    config::CollisionConfig,
    error::{BspError, BspErrorKind},
    facet::{Facet, FacetBorder, FacetCollide},
    patch::{
        PatchCollide, PatchGrid, DEFAULT_SUBDIVIDE_TOLERANCE, MAX_GRID_SIZE, MAX_PATCH_VERTS,
    },
    plane::PlanePool,
    query::BoxLeafs,
    trace::{TraceRequest, TraceResult, SURFACE_CLIP_EPSILON},
    trisoup::TriSoup,
};

bitflags! {
    pub struct ContentFlags: u32 {
        const SOLID = 0x1;
        const LAVA = 0x8;
        const SLIME = 0x10;
        const WATER = 0x20;
        const FOG = 0x40;
        const NOTTEAM1 = 0x80;
        const NOTTEAM2 = 0x100;
        const NOBOTCLIP = 0x200;
        const AREAPORTAL = 0x8000;
        const PLAYERCLIP = 0x10000;
        const MONSTERCLIP = 0x20000;
        const TELEPORTER = 0x40000;
        const JUMPPAD = 0x80000;
        const CLUSTERPORTAL = 0x100000;
        const DONOTENTER = 0x200000;
        const BOTCLIP = 0x400000;
        const MOVER = 0x800000;
        const ORIGIN = 0x1000000;
        const BODY = 0x2000000;
        const CORPSE = 0x4000000;
        const DETAIL = 0x8000000;
        const STRUCTURAL = 0x10000000;
        const TRANSLUCENT = 0x20000000;
        const TRIGGER = 0x40000000;
        const NODROP = 0x80000000;

        const MASK_SOLID = Self::SOLID.bits;
        const MASK_PLAYERSOLID = Self::SOLID.bits | Self::PLAYERCLIP.bits | Self::BODY.bits;
        const MASK_DEADSOLID = Self::SOLID.bits | Self::PLAYERCLIP.bits;
        const MASK_WATER = Self::WATER.bits | Self::LAVA.bits | Self::SLIME.bits;
        const MASK_OPAQUE = Self::SOLID.bits | Self::SLIME.bits | Self::LAVA.bits;
        const MASK_SHOT = Self::SOLID.bits | Self::BODY.bits | Self::CORPSE.bits;
    }
}

bitflags! {
    pub struct SurfaceFlags: u32 {
        const NODAMAGE = 0x1;
        const SLICK = 0x2;
        const SKY = 0x4;
        const LADDER = 0x8;
        const NOIMPACT = 0x10;
        const NOMARKS = 0x20;
        const FLESH = 0x40;
        const NODRAW = 0x80;
        const HINT = 0x100;
        const SKIP = 0x200;
        const NOLIGHTMAP = 0x400;
        const POINTLIGHT = 0x800;
        const METALSTEPS = 0x1000;
        const NOSTEPS = 0x2000;
        const NONSOLID = 0x4000;
        const LIGHTFILTER = 0x8000;
        const ALPHASHADOW = 0x10000;
        const NODLIGHT = 0x20000;
        const DUST = 0x40000;
    }
}

/// One of the two supported map file layouts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BspDialect {
    /// `IBSP` version 46.
    Quake3,

    /// `RBSP` version 1.
    Raven,
}

impl BspDialect {
    pub fn from_header(magic: [u8; 4], version: i32) -> Result<BspDialect, BspError> {
        let dialect = match &magic {
            b"IBSP" => BspDialect::Quake3,
            b"RBSP" => BspDialect::Raven,
            _ => return Err(BspErrorKind::BadMagic(magic).into()),
        };

        if version != dialect.version() {
            return Err(BspErrorKind::BadVersion { magic, version }.into());
        }

        Ok(dialect)
    }

    pub fn magic(&self) -> &'static [u8; 4] {
        match *self {
            BspDialect::Quake3 => b"IBSP",
            BspDialect::Raven => b"RBSP",
        }
    }

    pub fn version(&self) -> i32 {
        match *self {
            BspDialect::Quake3 => 46,
            BspDialect::Raven => 1,
        }
    }

    pub fn lump_count(&self) -> usize {
        match *self {
            BspDialect::Quake3 => 17,
            BspDialect::Raven => 18,
        }
    }

    pub fn brush_side_size(&self) -> usize {
        match *self {
            BspDialect::Quake3 => 8,
            BspDialect::Raven => 12,
        }
    }

    pub fn draw_vert_size(&self) -> usize {
        match *self {
            BspDialect::Quake3 => 44,
            BspDialect::Raven => 80,
        }
    }

    pub fn surface_size(&self) -> usize {
        match *self {
            BspDialect::Quake3 => 104,
            BspDialect::Raven => 148,
        }
    }

    /// Size of the header: magic, version and the lump directory.
    pub fn header_size(&self) -> usize {
        8 + 8 * self.lump_count()
    }
}

#[derive(Clone, Debug)]
pub struct BspShader {
    pub name: String,
    pub surface_flags: SurfaceFlags,
    pub contents: ContentFlags,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeChild {
    Node(usize),
    Leaf(usize),
}

#[derive(Debug)]
pub struct BspNode {
    pub plane_id: usize,
    pub children: [NodeChild; 2],
}

#[derive(Clone, Debug)]
pub struct BspLeaf {
    /// The PVS cluster this leaf belongs to, or `None` if it is opaque.
    pub cluster: Option<usize>,

    /// The portal area this leaf belongs to, or `None` if it is opaque.
    pub area: Option<usize>,

    /// The region of space bounded by the axial planes above this leaf.
    pub mins: Vector3<f32>,
    pub maxs: Vector3<f32>,

    pub leaf_brush_id: usize,
    pub leaf_brush_count: usize,
    pub leaf_surface_id: usize,
    pub leaf_surface_count: usize,
}

impl BspLeaf {
    fn empty() -> BspLeaf {
        BspLeaf {
            cluster: None,
            area: None,
            mins: Vector3::new(-MAX_WORLD_COORD, -MAX_WORLD_COORD, -MAX_WORLD_COORD),
            maxs: Vector3::new(MAX_WORLD_COORD, MAX_WORLD_COORD, MAX_WORLD_COORD),
            leaf_brush_id: 0,
            leaf_brush_count: 0,
            leaf_surface_id: 0,
            leaf_surface_count: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BspBrushSide {
    /// Index into the pooled plane table.
    pub plane_id: usize,

    /// The plane itself, facing out of the brush.
    pub plane: Hyperplane,

    pub shader_id: Option<usize>,
    pub surface_flags: SurfaceFlags,
}

/// Corners and edges of a brush with non-axial sides, used to round capsule contacts.
#[derive(Clone, Debug, Default)]
pub struct BrushGeometry {
    pub vertices: Vec<Vector3<f32>>,
    pub edges: Vec<(Vector3<f32>, Vector3<f32>)>,
}

#[derive(Debug)]
pub struct BspBrush {
    pub shader_id: usize,
    pub contents: ContentFlags,
    pub mins: Vector3<f32>,
    pub maxs: Vector3<f32>,
    pub side_id: usize,
    pub side_count: usize,
    pub geometry: Option<BrushGeometry>,
}

/// The collidable part of a draw surface.
#[derive(Debug)]
pub enum SurfaceCollide {
    Patch(PatchCollide),
    TriSoup(TriSoup),
}

#[derive(Debug)]
pub struct BspSurface {
    pub shader_id: usize,
    pub contents: ContentFlags,
    pub surface_flags: SurfaceFlags,
    pub collide: SurfaceCollide,
}

/// An inline model: the world (model 0) or a brush entity such as a door or platform.
#[derive(Debug)]
pub struct BspSubmodel {
    pub mins: Vector3<f32>,
    pub maxs: Vector3<f32>,

    /// A pseudo-leaf listing every brush and surface of the model. Unused for the world, which is
    /// traced through the tree.
    pub leaf: BspLeaf,
}

/// Selects what a trace or contents query collides with.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ModelHandle {
    /// The world model, traced through the BSP tree.
    World,

    /// An inline submodel, by index. Index 0 is the world.
    Inline(usize),

    /// A solid box with the given bounds, used for entities without a brush model.
    TempBox {
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
    },

    /// A capsule fitted to the given bounds.
    TempCapsule {
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
    },
}

impl ModelHandle {
    /// Returns a temporary model for an entity with the given bounds.
    pub fn temp_box(mins: Vector3<f32>, maxs: Vector3<f32>, capsule: bool) -> ModelHandle {
        if capsule {
            ModelHandle::TempCapsule { mins, maxs }
        } else {
            ModelHandle::TempBox { mins, maxs }
        }
    }
}

/// A loaded collision model.
///
/// Everything except the area portal state is immutable after loading, so any number of traces
/// may run against a shared reference at once.
#[derive(Debug)]
pub struct CollisionModel {
    name: String,
    dialect: BspDialect,
    config: CollisionConfig,
    entities: String,
    shaders: Vec<BspShader>,
    planes: Vec<Hyperplane>,
    nodes: Vec<BspNode>,
    leaves: Vec<BspLeaf>,
    leaf_brushes: Vec<usize>,
    leaf_surfaces: Vec<usize>,
    brush_sides: Vec<BspBrushSide>,
    brushes: Vec<BspBrush>,
    surfaces: Vec<Option<BspSurface>>,
    submodels: Vec<BspSubmodel>,
    num_clusters: usize,
    cluster_bytes: usize,
    visibility: Vec<u8>,
    vised: bool,
    areas: AreaPortals,
}

impl CollisionModel {
    /// Parses a map file into a collision model.
    ///
    /// Any format error aborts the load; no partially built model is ever returned.
    pub fn load<S>(
        name: S,
        data: &[u8],
        config: &CollisionConfig,
    ) -> Result<CollisionModel, BspError>
    where
        S: AsRef<str>,
    {
        load::load(name.as_ref(), data, config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> BspDialect {
        self.dialect
    }

    pub fn config(&self) -> &CollisionConfig {
        &self.config
    }

    /// Returns the raw entity lump.
    pub fn entities(&self) -> &str {
        &self.entities
    }

    pub fn shaders(&self) -> &[BspShader] {
        &self.shaders
    }

    pub fn planes(&self) -> &[Hyperplane] {
        &self.planes
    }

    pub fn nodes(&self) -> &[BspNode] {
        &self.nodes
    }

    pub fn leaves(&self) -> &[BspLeaf] {
        &self.leaves
    }

    pub fn brushes(&self) -> &[BspBrush] {
        &self.brushes
    }

    pub fn brush_sides(&self, brush: &BspBrush) -> &[BspBrushSide] {
        &self.brush_sides[brush.side_id..brush.side_id + brush.side_count]
    }

    pub fn surfaces(&self) -> &[Option<BspSurface>] {
        &self.surfaces
    }

    pub fn submodels(&self) -> &[BspSubmodel] {
        &self.submodels
    }

    pub fn num_inline_models(&self) -> usize {
        self.submodels.len()
    }

    /// Returns a handle to the given inline model, or `None` if it does not exist.
    pub fn inline_model(&self, index: usize) -> Option<ModelHandle> {
        match index {
            0 => Some(ModelHandle::World),
            i if i < self.submodels.len() => Some(ModelHandle::Inline(i)),
            _ => None,
        }
    }

    /// Returns the bounds of the given model.
    pub fn model_bounds(&self, model: ModelHandle) -> (Vector3<f32>, Vector3<f32>) {
        match model {
            ModelHandle::World => (self.submodels[0].mins, self.submodels[0].maxs),
            ModelHandle::Inline(i) => match self.submodels.get(i) {
                Some(m) => (m.mins, m.maxs),
                None => (Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.0)),
            },
            ModelHandle::TempBox { mins, maxs } | ModelHandle::TempCapsule { mins, maxs } => {
                (mins, maxs)
            }
        }
    }

    /// Returns the pseudo-leaf of an inline submodel.
    fn model_leaf(&self, model: ModelHandle) -> Option<&BspLeaf> {
        match model {
            ModelHandle::Inline(i) if i > 0 => self.submodels.get(i).map(|m| &m.leaf),
            _ => None,
        }
    }

    fn leaf_brush_ids(&self, leaf: &BspLeaf) -> &[usize] {
        &self.leaf_brushes[leaf.leaf_brush_id..leaf.leaf_brush_id + leaf.leaf_brush_count]
    }

    fn leaf_surface_ids(&self, leaf: &BspLeaf) -> &[usize] {
        &self.leaf_surfaces[leaf.leaf_surface_id..leaf.leaf_surface_id + leaf.leaf_surface_count]
    }

    /// Generates a Graphviz description of the node tree.
    pub fn gen_dot_graph(&self) -> String {
        let mut dot = String::new();
        dot += "digraph collision {\n";
        dot += "    rankdir=LR\n";

        let mut rank_lists = Vec::new();

        if !self.nodes.is_empty() {
            dot += &self.gen_dot_graph_recursive(0, &mut rank_lists, 0);
        }

        for rank in rank_lists {
            let mut rank: Vec<usize> = rank.into_iter().collect();
            rank.sort();

            dot += "    {rank=same;";
            for node_id in rank {
                dot += &format!("n{},", node_id);
            }
            // discard trailing comma
            dot.pop();
            dot += "}\n"
        }

        dot += "}";

        dot
    }

    fn gen_dot_graph_recursive(
        &self,
        rank: usize,
        rank_lists: &mut Vec<HashSet<usize>>,
        node_id: usize,
    ) -> String {
        let mut result = String::new();

        if rank >= rank_lists.len() {
            rank_lists.push(HashSet::new());
        }

        rank_lists[rank].insert(node_id);

        for child in self.nodes[node_id].children.iter() {
            match *child {
                NodeChild::Node(n) => {
                    result += &format!("    n{} -> n{}\n", node_id, n);
                    result += &self.gen_dot_graph_recursive(rank + 1, rank_lists, n);
                }
                NodeChild::Leaf(leaf_id) => {
                    let leaf = &self.leaves[leaf_id];
                    if leaf.cluster.is_none() && leaf.leaf_brush_count == 0 {
                        result += &format!(
                            "    l{0}_{1} [shape=point label=\"\"]\n    n{1} -> l{0}_{1}\n",
                            leaf_id, node_id
                        );
                    } else {
                        result += &format!(
                            "    l{0} [label=\"l{0} b{1} s{2}\"]\n    n{3} -> l{0}\n",
                            leaf_id, leaf.leaf_brush_count, leaf.leaf_surface_count, node_id
                        );
                    }
                }
            }
        }

        result
    }
}

/// Holds the current collision model.
///
/// Only one model is live at a time: loading a new map drops the old model before the new one is
/// parsed.
#[derive(Debug, Default)]
pub struct ClipMapSlot {
    current: Option<CollisionModel>,
}

impl ClipMapSlot {
    pub fn new() -> ClipMapSlot {
        ClipMapSlot { current: None }
    }

    /// Replaces the current model with one parsed from `data`.
    ///
    /// The previous model is released first, so on failure the slot is left empty.
    pub fn load<S>(
        &mut self,
        name: S,
        data: &[u8],
        config: &CollisionConfig,
    ) -> Result<&mut CollisionModel, BspError>
    where
        S: AsRef<str>,
    {
        self.clear();
        let model = CollisionModel::load(name, data, config)?;
        Ok(self.current.get_or_insert(model))
    }

    pub fn clear(&mut self) {
        if let Some(old) = self.current.take() {
            debug!("Releasing collision model {}", old.name());
        }
    }

    pub fn current(&self) -> Option<&CollisionModel> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut CollisionModel> {
        self.current.as_mut()
    }
}
