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

//! Bezier patch tessellation for collision.
//!
//! A patch is a grid of quadratic bezier spans given by its control points. Columns of the grid
//! are subdivided until every span is flat enough, the grid is transposed and the process repeats
//! for the rows. The resulting vertex grid is cut into cells, each cell into two triangles, and
//! every triangle (or coplanar pair) becomes a [`Facet`](super::Facet).

use crate::common::{
    bsp::facet::{FacetBuilder, FacetCollide},
    math,
};

use cgmath::{InnerSpace, Vector3};

/// Default maximum distance between a span's curve midpoint and its chord midpoint.
pub const DEFAULT_SUBDIVIDE_TOLERANCE: f32 = 16.0;

/// Maximum number of points along either axis of a tessellated grid.
pub const MAX_GRID_SIZE: usize = 129;

/// Maximum number of control points in a patch.
pub const MAX_PATCH_VERTS: usize = 1024;

/// Maximum number of times a single span is halved.
pub const MAX_PATCH_SUBDIVISION_DEPTH: u32 = 6;

/// Adjacent grid points closer than this on every axis are considered the same point.
const POINT_EPSILON: f32 = 0.1;

/// A rectangular grid of points stored row by row.
///
/// Column `i` of row `j` lives at index `j * width + i`.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchGrid {
    width: usize,
    height: usize,
    points: Vec<Vector3<f32>>,
}

/// Returns true if a control grid of the given dimensions can be tessellated.
pub fn is_valid_control_grid(width: i32, height: i32, point_count: usize) -> bool {
    width >= 3
        && height >= 3
        && width % 2 == 1
        && height % 2 == 1
        && width as usize <= MAX_GRID_SIZE
        && height as usize <= MAX_GRID_SIZE
        && (width * height) as usize <= MAX_PATCH_VERTS
        && (width * height) as usize == point_count
}

fn needs_subdivision(a: Vector3<f32>, b: Vector3<f32>, c: Vector3<f32>, tolerance: f32) -> bool {
    let curve_mid = ((a + b) * 0.5 + (b + c) * 0.5) * 0.5;
    let chord_mid = (a + c) * 0.5;
    (curve_mid - chord_mid).magnitude() >= tolerance
}

/// Number of halvings the span `a`-`b`-`c` needs to meet `tolerance`, at most `max_depth`.
fn adaptive_depth(
    a: Vector3<f32>,
    b: Vector3<f32>,
    c: Vector3<f32>,
    tolerance: f32,
    max_depth: u32,
) -> u32 {
    if max_depth == 0 || !needs_subdivision(a, b, c, tolerance) {
        return 0;
    }

    let ab = (a + b) * 0.5;
    let bc = (b + c) * 0.5;
    let mid = (ab + bc) * 0.5;

    1 + adaptive_depth(a, ab, mid, tolerance, max_depth - 1).max(adaptive_depth(
        mid,
        bc,
        c,
        tolerance,
        max_depth - 1,
    ))
}

/// Appends the on-curve points of the span after halving it `depth` times, excluding `a`.
fn subdivide_span(
    a: Vector3<f32>,
    b: Vector3<f32>,
    c: Vector3<f32>,
    depth: u32,
    out: &mut Vec<Vector3<f32>>,
) {
    if depth == 0 {
        out.push(c);
        return;
    }

    let ab = (a + b) * 0.5;
    let bc = (b + c) * 0.5;
    let mid = (ab + bc) * 0.5;

    subdivide_span(a, ab, mid, depth - 1, out);
    subdivide_span(mid, bc, c, depth - 1, out);
}

fn points_equal(a: Vector3<f32>, b: Vector3<f32>) -> bool {
    (a.x - b.x).abs() <= POINT_EPSILON
        && (a.y - b.y).abs() <= POINT_EPSILON
        && (a.z - b.z).abs() <= POINT_EPSILON
}

impl PatchGrid {
    /// Creates a control grid from row-major points, or `None` if the dimensions don't describe a
    /// valid control grid for `points`.
    pub fn new(width: i32, height: i32, points: Vec<Vector3<f32>>) -> Option<PatchGrid> {
        if !is_valid_control_grid(width, height, points.len()) {
            return None;
        }

        Some(PatchGrid {
            width: width as usize,
            height: height as usize,
            points,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, i: usize, j: usize) -> Vector3<f32> {
        self.points[j * self.width + i]
    }

    pub fn points(&self) -> &[Vector3<f32>] {
        &self.points
    }

    pub fn transpose(&self) -> PatchGrid {
        let mut points = Vec::with_capacity(self.points.len());
        for i in 0..self.width {
            for j in 0..self.height {
                points.push(self.get(i, j));
            }
        }

        PatchGrid {
            width: self.height,
            height: self.width,
            points,
        }
    }

    /// Replaces every span of control columns with on-curve columns.
    ///
    /// `span_depth` gives the number of halvings for one row of a span, bounded by its first
    /// argument. Each span is halved the same number of times in every row, the largest any row
    /// asks for. If the result would be wider than `MAX_GRID_SIZE`, the bound is lowered and the
    /// depths are recomputed.
    fn subdivide_columns<F>(&self, max_depth: u32, span_depth: F) -> PatchGrid
    where
        F: Fn(u32, Vector3<f32>, Vector3<f32>, Vector3<f32>) -> u32,
    {
        let spans = (self.width - 1) / 2;
        let mut bound = max_depth;

        let depths = loop {
            let depths: Vec<u32> = (0..spans)
                .map(|s| {
                    (0..self.height)
                        .map(|j| {
                            span_depth(
                                bound,
                                self.get(2 * s, j),
                                self.get(2 * s + 1, j),
                                self.get(2 * s + 2, j),
                            )
                        })
                        .max()
                        .unwrap_or(0)
                })
                .collect();

            let width = 1 + depths.iter().map(|&d| 1usize << d).sum::<usize>();
            if width <= MAX_GRID_SIZE || bound == 0 {
                break depths;
            }

            bound -= 1;
        };

        let width = 1 + depths.iter().map(|&d| 1usize << d).sum::<usize>();
        let mut points = Vec::with_capacity(width * self.height);
        for j in 0..self.height {
            points.push(self.get(0, j));
            for (s, &depth) in depths.iter().enumerate() {
                subdivide_span(
                    self.get(2 * s, j),
                    self.get(2 * s + 1, j),
                    self.get(2 * s + 2, j),
                    depth,
                    &mut points,
                );
            }
        }

        PatchGrid {
            width,
            height: self.height,
            points,
        }
    }

    /// Drops every column that duplicates the column before it.
    fn remove_degenerate_columns(&self) -> PatchGrid {
        let mut keep = vec![0];
        for i in 1..self.width {
            let last = keep[keep.len() - 1];
            if (0..self.height).any(|j| !points_equal(self.get(i, j), self.get(last, j))) {
                keep.push(i);
            }
        }

        let mut points = Vec::with_capacity(keep.len() * self.height);
        for j in 0..self.height {
            for &i in keep.iter() {
                points.push(self.get(i, j));
            }
        }

        PatchGrid {
            width: keep.len(),
            height: self.height,
            points,
        }
    }

    fn tessellate_with<F>(&self, max_depth: u32, span_depth: F) -> PatchGrid
    where
        F: Fn(u32, Vector3<f32>, Vector3<f32>, Vector3<f32>) -> u32,
    {
        self.subdivide_columns(max_depth, &span_depth)
            .remove_degenerate_columns()
            .transpose()
            .subdivide_columns(max_depth, &span_depth)
            .remove_degenerate_columns()
            .transpose()
    }

    /// Subdivides each span until its midpoint lies within `tolerance` of its chord.
    pub fn tessellate(&self, tolerance: f32) -> PatchGrid {
        self.tessellate_with(MAX_PATCH_SUBDIVISION_DEPTH, |bound, a, b, c| {
            adaptive_depth(a, b, c, tolerance, bound)
        })
    }

    /// Halves every span exactly `level` times, giving `2^level` segments per span.
    pub fn tessellate_fixed(&self, level: u32) -> PatchGrid {
        self.tessellate_with(level, |bound, _, _, _| bound)
    }
}

/// Collision data for one bezier patch.
#[derive(Clone, Debug)]
pub struct PatchCollide {
    pub grid_width: usize,
    pub grid_height: usize,

    /// Number of non-degenerate triangles the grid produced.
    pub triangles: usize,

    pub collide: FacetCollide,
}

impl PatchCollide {
    /// Tessellates a control grid with the given tolerance and builds its facets.
    pub fn generate(control: &PatchGrid, tolerance: f32) -> PatchCollide {
        PatchCollide::from_grid(control, &control.tessellate(tolerance))
    }

    /// Tessellates a control grid at a fixed level and builds its facets.
    pub fn generate_fixed(control: &PatchGrid, level: u32) -> PatchCollide {
        PatchCollide::from_grid(control, &control.tessellate_fixed(level))
    }

    fn from_grid(control: &PatchGrid, grid: &PatchGrid) -> PatchCollide {
        let mut builder = FacetBuilder::new();
        let mut triangles = 0;

        for j in 0..grid.height().saturating_sub(1) {
            for i in 0..grid.width().saturating_sub(1) {
                let p1 = grid.get(i, j);
                let p2 = grid.get(i + 1, j);
                let p3 = grid.get(i + 1, j + 1);
                let p4 = grid.get(i, j + 1);

                // cells are split along the p1-p3 diagonal
                let t1 = builder.triangle_plane(p1, p2, p3);
                let t2 = builder.triangle_plane(p3, p4, p1);

                match (t1, t2) {
                    (Some(a), Some(b)) if a == b => {
                        builder.add_polygon(a, &[p1, p2, p3, p4], false, true);
                        triangles += 2;
                    }

                    _ => {
                        if let Some(a) = t1 {
                            builder.add_polygon(a, &[p1, p2, p3], false, true);
                            triangles += 1;
                        }
                        if let Some(b) = t2 {
                            builder.add_polygon(b, &[p3, p4, p1], false, true);
                            triangles += 1;
                        }
                    }
                }
            }
        }

        if builder.dropped() > 0 {
            warn!(
                "Dropped {} degenerate facets from a {}x{} patch",
                builder.dropped(),
                grid.width(),
                grid.height()
            );
        }

        let (mut mins, mut maxs) = math::bounds(control.points().iter());
        mins -= Vector3::new(1.0, 1.0, 1.0);
        maxs += Vector3::new(1.0, 1.0, 1.0);

        let collide = builder.finish(mins, maxs);
        trace!(
            "Patch grid {}x{}: {} facets, {} planes",
            grid.width(),
            grid.height(),
            collide.facets.len(),
            collide.planes.len()
        );

        PatchCollide {
            grid_width: grid.width(),
            grid_height: grid.height(),
            triangles,
            collide,
        }
    }
}
