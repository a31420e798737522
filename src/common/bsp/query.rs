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

use crate::common::{
    bsp::{BspLeaf, CollisionModel, ContentFlags, ModelHandle, NodeChild, SURFACE_CLIP_EPSILON},
    math::{Angles, BoxSides},
};

use cgmath::{InnerSpace, Matrix, Vector3};

/// The leaves touched by a box.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoxLeafs {
    pub leafs: Vec<usize>,

    /// The first node whose plane splits the box, if any.
    pub top_node: Option<usize>,

    /// Set if more leaves touched the box than were asked for.
    pub truncated: bool,
}

/// Returns true if `point` lies inside the capsule fitted to the given bounds.
pub(crate) fn point_in_capsule(point: Vector3<f32>, mins: Vector3<f32>, maxs: Vector3<f32>) -> bool {
    let center = (mins + maxs) * 0.5;
    let half_width = maxs.x - center.x;
    let half_height = maxs.z - center.z;
    let radius = half_width.min(half_height);
    let offset = half_height - radius;

    let p = point - center;
    let z = p.z.max(-offset).min(offset);
    (p - Vector3::new(0.0, 0.0, z)).magnitude2() <= radius * radius
}

impl CollisionModel {
    /// Returns the leaf containing `point`. Every point maps to some leaf.
    pub fn leaf_at(&self, point: Vector3<f32>) -> usize {
        let mut child = NodeChild::Node(0);
        loop {
            match child {
                NodeChild::Leaf(l) => return l,
                NodeChild::Node(n) => {
                    let node = &self.nodes[n];
                    let d = self.planes[node.plane_id].point_dist(point);
                    child = if d < 0.0 {
                        node.children[1]
                    } else {
                        node.children[0]
                    };
                }
            }
        }
    }

    pub fn leaf_cluster(&self, leaf: usize) -> Option<usize> {
        self.leaves[leaf].cluster
    }

    pub fn leaf_area(&self, leaf: usize) -> Option<usize> {
        self.leaves[leaf].area
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn cluster_bytes(&self) -> usize {
        self.cluster_bytes
    }

    /// Returns true if the map carried visibility data.
    pub fn is_vised(&self) -> bool {
        self.vised
    }

    /// Returns the potentially visible set of `cluster` as one bit per cluster.
    ///
    /// Maps without visibility data see everything from everywhere. Otherwise a cluster out of
    /// range has no row.
    pub fn cluster_pvs(&self, cluster: usize) -> Option<&[u8]> {
        if !self.vised {
            return Some(&self.visibility[..self.cluster_bytes]);
        }

        if cluster >= self.num_clusters {
            return None;
        }

        let start = cluster * self.cluster_bytes;
        Some(&self.visibility[start..start + self.cluster_bytes])
    }

    /// Returns the union of the contents of every brush in `leaf` that contains `point` and
    /// matches `mask`.
    fn leaf_point_contents(&self, leaf: &BspLeaf, point: Vector3<f32>, mask: ContentFlags) -> ContentFlags {
        let mut contents = ContentFlags::empty();

        for &brush_id in self.leaf_brush_ids(leaf) {
            let brush = &self.brushes[brush_id];
            if !brush.contents.intersects(mask) {
                continue;
            }

            let outside_bounds = (0..3).any(|i| {
                point[i] < brush.mins[i] - SURFACE_CLIP_EPSILON
                    || point[i] > brush.maxs[i] + SURFACE_CLIP_EPSILON
            });
            if outside_bounds {
                continue;
            }

            if self
                .brush_sides(brush)
                .iter()
                .all(|side| side.plane.point_dist(point) <= 0.0)
            {
                contents |= brush.contents;
            }
        }

        contents
    }

    /// Returns the contents at `point` within `model`, restricted to `mask`.
    pub fn point_contents(
        &self,
        point: Vector3<f32>,
        mask: ContentFlags,
        model: ModelHandle,
    ) -> ContentFlags {
        match model {
            ModelHandle::World | ModelHandle::Inline(0) => {
                let leaf = &self.leaves[self.leaf_at(point)];
                self.leaf_point_contents(leaf, point, mask)
            }

            ModelHandle::Inline(_) => match self.model_leaf(model) {
                Some(leaf) => self.leaf_point_contents(leaf, point, mask),
                None => ContentFlags::empty(),
            },

            ModelHandle::TempBox { mins, maxs } => {
                let inside = (0..3).all(|i| point[i] >= mins[i] && point[i] <= maxs[i]);
                if inside {
                    ContentFlags::BODY & mask
                } else {
                    ContentFlags::empty()
                }
            }

            ModelHandle::TempCapsule { mins, maxs } => {
                if point_in_capsule(point, mins, maxs) {
                    ContentFlags::BODY & mask
                } else {
                    ContentFlags::empty()
                }
            }
        }
    }

    /// Like `point_contents`, for a model placed at `origin` and rotated by `angles`.
    pub fn transformed_point_contents(
        &self,
        point: Vector3<f32>,
        mask: ContentFlags,
        model: ModelHandle,
        origin: Vector3<f32>,
        angles: Angles,
    ) -> ContentFlags {
        let mut local = point - origin;

        let is_box = match model {
            ModelHandle::TempBox { .. } => true,
            _ => false,
        };
        if !is_box && !angles.is_zero() {
            local = angles.mat3_local_to_world().transpose() * local;
        }

        self.point_contents(local, mask, model)
    }

    /// Collects the leaves touched by the box, stopping after `max`.
    pub fn box_leafs(&self, mins: Vector3<f32>, maxs: Vector3<f32>, max: usize) -> BoxLeafs {
        let mut result = BoxLeafs::default();
        self.box_leafs_r(NodeChild::Node(0), mins, maxs, max, &mut result);
        result
    }

    fn box_leafs_r(
        &self,
        mut child: NodeChild,
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
        max: usize,
        out: &mut BoxLeafs,
    ) {
        loop {
            let node_id = match child {
                NodeChild::Leaf(l) => {
                    if out.leafs.len() >= max {
                        out.truncated = true;
                    } else {
                        out.leafs.push(l);
                    }
                    return;
                }
                NodeChild::Node(n) => n,
            };

            let node = &self.nodes[node_id];
            let sides = self.planes[node.plane_id].box_on_plane_side(mins, maxs);

            child = if sides == BoxSides::FRONT {
                node.children[0]
            } else if sides == BoxSides::BACK {
                node.children[1]
            } else {
                if out.top_node.is_none() {
                    out.top_node = Some(node_id);
                }
                self.box_leafs_r(node.children[0], mins, maxs, max, out);
                node.children[1]
            };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::common::bsp::{testmap::TestMap, BspDialect, CollisionConfig};

    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn floor() -> CollisionModel {
        let data = TestMap::floor().with_door().build(BspDialect::Quake3);
        CollisionModel::load("floor", &data, &CollisionConfig::default()).unwrap()
    }

    #[test]
    fn test_leaf_at_far_outside() {
        let cm = floor();
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for _ in 0..1000 {
            let p = Vector3::new(
                rng.gen_range(-1.0e7f32, 1.0e7),
                rng.gen_range(-1.0e7f32, 1.0e7),
                rng.gen_range(-1.0e7f32, 1.0e7),
            );
            assert!(cm.leaf_at(p) < cm.leaves().len());
        }

        assert_eq!(cm.leaf_at(Vector3::new(0.0, 0.0, 1.0e9)), 0);
        assert_eq!(cm.leaf_at(Vector3::new(0.0, 0.0, -1.0e9)), 1);
    }

    #[test]
    fn test_point_contents_floor() {
        let cm = floor();
        let above = Vector3::new(0.0, 0.0, 8.0);
        let inside = Vector3::new(0.0, 0.0, -8.0);

        assert_eq!(
            cm.point_contents(above, ContentFlags::all(), ModelHandle::World),
            ContentFlags::empty()
        );
        assert_eq!(
            cm.point_contents(inside, ContentFlags::all(), ModelHandle::World),
            ContentFlags::SOLID
        );
        assert_eq!(
            cm.point_contents(inside, ContentFlags::MASK_WATER, ModelHandle::World),
            ContentFlags::empty()
        );

        // far outside the map there is nothing
        assert_eq!(
            cm.point_contents(
                Vector3::new(1.0e6, 1.0e6, -10.0),
                ContentFlags::all(),
                ModelHandle::World
            ),
            ContentFlags::empty()
        );
    }

    #[test]
    fn test_point_contents_idempotent_and_monotonic() {
        let cm = floor();
        let mut rng = SmallRng::seed_from_u64(7);
        let masks = [
            ContentFlags::MASK_SOLID,
            ContentFlags::MASK_PLAYERSOLID,
            ContentFlags::all(),
        ];

        for _ in 0..500 {
            let p = Vector3::new(
                rng.gen_range(-5000.0f32, 5000.0),
                rng.gen_range(-5000.0f32, 5000.0),
                rng.gen_range(-100.0f32, 100.0),
            );

            let first = cm.point_contents(p, ContentFlags::all(), ModelHandle::World);
            let second = cm.point_contents(p, ContentFlags::all(), ModelHandle::World);
            assert_eq!(first, second);

            // each mask in the list is a superset of the one before
            for pair in masks.windows(2) {
                let narrow = cm.point_contents(p, pair[0], ModelHandle::World);
                let wide = cm.point_contents(p, pair[1], ModelHandle::World);
                assert!(wide.contains(narrow));
            }
        }
    }

    #[test]
    fn test_point_contents_inline_and_temp() {
        let cm = floor();
        let in_door = Vector3::new(108.0, 0.0, 64.0);

        assert_eq!(
            cm.point_contents(in_door, ContentFlags::all(), ModelHandle::Inline(1)),
            ContentFlags::SOLID
        );
        // the door is not part of the world tree
        assert_eq!(
            cm.point_contents(in_door, ContentFlags::all(), ModelHandle::World),
            ContentFlags::empty()
        );

        let mins = Vector3::new(-16.0, -16.0, -24.0);
        let maxs = Vector3::new(16.0, 16.0, 32.0);
        let temp_box = ModelHandle::temp_box(mins, maxs, false);
        let capsule = ModelHandle::temp_box(mins, maxs, true);
        let corner = Vector3::new(15.0, 15.0, 31.0);

        assert_eq!(
            cm.point_contents(corner, ContentFlags::all(), temp_box),
            ContentFlags::BODY
        );
        // the capsule rounds off the corners of its box
        assert_eq!(
            cm.point_contents(corner, ContentFlags::all(), capsule),
            ContentFlags::empty()
        );
        assert_eq!(
            cm.point_contents(Vector3::new(0.0, 0.0, 4.0), ContentFlags::all(), capsule),
            ContentFlags::BODY
        );
        assert_eq!(
            cm.point_contents(corner, ContentFlags::MASK_SOLID, temp_box),
            ContentFlags::empty()
        );
    }

    #[test]
    fn test_transformed_point_contents() {
        let cm = floor();

        // yawing the door a quarter turn swings it from +x onto +y
        let angles = Angles::new(0.0, 90.0, 0.0);
        let origin = Vector3::new(0.0, 0.0, 0.0);
        assert_eq!(
            cm.transformed_point_contents(
                Vector3::new(0.0, 108.0, 64.0),
                ContentFlags::all(),
                ModelHandle::Inline(1),
                origin,
                angles
            ),
            ContentFlags::SOLID
        );
        assert_eq!(
            cm.transformed_point_contents(
                Vector3::new(108.0, 0.0, 64.0),
                ContentFlags::all(),
                ModelHandle::Inline(1),
                origin,
                angles
            ),
            ContentFlags::empty()
        );

        // translation alone
        assert_eq!(
            cm.transformed_point_contents(
                Vector3::new(108.0, 0.0, 564.0),
                ContentFlags::all(),
                ModelHandle::Inline(1),
                Vector3::new(0.0, 0.0, 500.0),
                Angles::zero()
            ),
            ContentFlags::SOLID
        );
    }

    #[test]
    fn test_box_leafs() {
        let cm = floor();

        let straddle = cm.box_leafs(
            Vector3::new(-8.0, -8.0, -8.0),
            Vector3::new(8.0, 8.0, 8.0),
            16,
        );
        assert_eq!(straddle.leafs.len(), 2);
        assert_eq!(straddle.top_node, Some(0));
        assert!(!straddle.truncated);

        let above = cm.box_leafs(
            Vector3::new(-8.0, -8.0, 8.0),
            Vector3::new(8.0, 8.0, 16.0),
            16,
        );
        assert_eq!(above.leafs, vec![0]);
        assert_eq!(above.top_node, None);

        let capped = cm.box_leafs(
            Vector3::new(-8.0, -8.0, -8.0),
            Vector3::new(8.0, 8.0, 8.0),
            1,
        );
        assert_eq!(capped.leafs.len(), 1);
        assert!(capped.truncated);
    }

    #[test]
    fn test_cluster_pvs() {
        let cm = floor();
        assert!(!cm.is_vised());
        assert!(cm.cluster_pvs(0).unwrap().iter().all(|&b| b == 0xFF));

        let data = TestMap::floor()
            .with_three_areas()
            .with_vis(3, 1, vec![0b011, 0b111, 0b110])
            .build(BspDialect::Quake3);
        let cm = CollisionModel::load("vis", &data, &CollisionConfig::default()).unwrap();

        let leaf = cm.leaf_at(Vector3::new(1000.0, 0.0, 16.0));
        assert_eq!(cm.leaf_area(leaf), Some(2));
        assert_eq!(cm.leaf_cluster(leaf), Some(2));
        assert_eq!(cm.cluster_pvs(2), Some(&[0b110u8][..]));
        assert_eq!(cm.cluster_pvs(3), None);
    }
}
