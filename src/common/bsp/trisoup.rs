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
    bsp::{
        facet::{FacetBuilder, FacetCollide},
        trace::{self, TraceWork},
    },
    math,
};

use cgmath::Vector3;

/// Triangle soup collision for terrain and model surfaces.
///
/// Each triangle becomes a two-sided facet bounded by its three edge planes and its own back
/// plane, so it can be struck from either side.
#[derive(Clone, Debug)]
pub struct TriSoup {
    pub vertices: Vec<Vector3<f32>>,
    pub triangles: Vec<[usize; 3]>,
    pub collide: FacetCollide,
}

impl TriSoup {
    /// Builds the facets for the given triangles. Indices must be in range for `vertices`.
    pub fn new(vertices: Vec<Vector3<f32>>, triangles: Vec<[usize; 3]>) -> TriSoup {
        let mut builder = FacetBuilder::new();

        for tri in triangles.iter() {
            let (a, b, c) = (vertices[tri[0]], vertices[tri[1]], vertices[tri[2]]);
            if let Some(plane) = builder.triangle_plane(a, b, c) {
                builder.add_polygon(plane, &[a, b, c], true, false);
            }
        }

        let (mut mins, mut maxs) = math::bounds(vertices.iter());
        mins -= Vector3::new(1.0, 1.0, 1.0);
        maxs += Vector3::new(1.0, 1.0, 1.0);

        TriSoup {
            collide: builder.finish(mins, maxs),
            vertices,
            triangles,
        }
    }

    /// Sweeps the trace through every triangle, keeping the nearest hit.
    pub(crate) fn trace(&self, tw: &mut TraceWork) {
        trace::trace_through_facets(tw, &self.collide);
    }

    /// Returns true if the trace's start volume overlaps any triangle.
    pub(crate) fn position_test(&self, tw: &TraceWork) -> bool {
        trace::position_test_facets(tw, &self.collide)
    }
}
