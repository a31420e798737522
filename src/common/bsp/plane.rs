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

use std::collections::HashMap;

use crate::common::math::{Hyperplane, NORMAL_EPSILON};

use cgmath::Vector3;

/// Width of a distance bucket in map units.
const BUCKET_WIDTH: f32 = 8.0;

/// Tolerances used when pooling the planes of a map file.
const MAP_NORMAL_EPSILON: f32 = NORMAL_EPSILON;
const MAP_DIST_EPSILON: f32 = 0.02;

/// Tolerances used when pooling the planes of a single patch.
const PATCH_NORMAL_EPSILON: f32 = 0.0001;
const PATCH_DIST_EPSILON: f32 = 0.02;

/// De-duplicated plane storage.
///
/// Planes are snapped before insertion. Two planes share an index when their normals and
/// distances agree within the pool's tolerances. Lookups hash on a quantized distance and probe the
/// neighbouring buckets, so planes that straddle a bucket boundary still match.
#[derive(Debug)]
pub struct PlanePool {
    planes: Vec<Hyperplane>,
    buckets: HashMap<i32, Vec<usize>>,
    normal_epsilon: f32,
    dist_epsilon: f32,
}

impl PlanePool {
    pub fn new(normal_epsilon: f32, dist_epsilon: f32) -> PlanePool {
        PlanePool {
            planes: Vec::new(),
            buckets: HashMap::new(),
            normal_epsilon,
            dist_epsilon,
        }
    }

    /// Returns a pool tuned for the plane lump of a map.
    pub fn for_map() -> PlanePool {
        PlanePool::new(MAP_NORMAL_EPSILON, MAP_DIST_EPSILON)
    }

    /// Returns a pool tuned for the facet planes of one patch.
    pub fn for_patch() -> PlanePool {
        PlanePool::new(PATCH_NORMAL_EPSILON, PATCH_DIST_EPSILON)
    }

    fn bucket(dist: f32) -> i32 {
        (dist.abs() / BUCKET_WIDTH).floor() as i32
    }

    /// Looks up an existing plane matching `plane` without inserting it.
    pub fn find(&self, plane: &Hyperplane) -> Option<usize> {
        let plane = plane.snapped();
        let key = PlanePool::bucket(plane.dist());

        for probe in &[key, key - 1, key + 1] {
            if let Some(chain) = self.buckets.get(probe) {
                for &id in chain {
                    if self.planes[id].approx_eq(&plane, self.normal_epsilon, self.dist_epsilon) {
                        return Some(id);
                    }
                }
            }
        }

        None
    }

    /// Returns the index of `plane`, inserting it if no matching plane exists.
    pub fn insert(&mut self, plane: Hyperplane) -> usize {
        if let Some(id) = self.find(&plane) {
            return id;
        }

        let plane = plane.snapped();
        let id = self.planes.len();
        self.planes.push(plane);
        self.buckets
            .entry(PlanePool::bucket(plane.dist()))
            .or_insert_with(Vec::new)
            .push(id);

        id
    }

    /// Inserts the plane with the given normal and distance.
    pub fn insert_normal(&mut self, normal: Vector3<f32>, dist: f32) -> usize {
        self.insert(Hyperplane::new(normal, dist))
    }

    pub fn get(&self, id: usize) -> &Hyperplane {
        &self.planes[id]
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn into_planes(self) -> Vec<Hyperplane> {
        self.planes
    }
}
