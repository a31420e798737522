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
    bsp::plane::PlanePool,
    math::{self, Hyperplane},
};

use cgmath::{InnerSpace, Vector3};

/// One bounding plane of a facet.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FacetBorder {
    /// Index into the owning collide's plane table.
    pub plane_id: usize,

    /// If true, the stored plane is flipped before use.
    pub inward: bool,
}

/// A convex planar piece of a curved surface or triangle soup.
///
/// The region a facet occupies is the intersection of the space behind its surface plane and
/// behind every border. The last border is always the inverted surface plane.
#[derive(Clone, Debug)]
pub struct Facet {
    pub surface_plane: usize,
    pub borders: Vec<FacetBorder>,

    /// Whether the facet can be struck from behind.
    pub two_sided: bool,

    pub mins: Vector3<f32>,
    pub maxs: Vector3<f32>,
}

impl Facet {
    /// Returns the border plane at index `k`, flipped if the border is inward.
    pub fn border_plane(&self, planes: &[Hyperplane], k: usize) -> Hyperplane {
        let border = self.borders[k];
        if border.inward {
            -planes[border.plane_id]
        } else {
            planes[border.plane_id]
        }
    }
}

/// The facets of a single surface and the planes they share.
#[derive(Clone, Debug)]
pub struct FacetCollide {
    pub mins: Vector3<f32>,
    pub maxs: Vector3<f32>,
    pub planes: Vec<Hyperplane>,
    pub facets: Vec<Facet>,
}

impl FacetCollide {
    /// Returns true if the facet's bounds touch the given box.
    pub fn facet_touches(&self, facet: &Facet, mins: Vector3<f32>, maxs: Vector3<f32>) -> bool {
        math::bounds_intersect(facet.mins, facet.maxs, mins, maxs)
    }
}

/// Accumulates facets for one surface, pooling their planes.
pub(crate) struct FacetBuilder {
    pool: PlanePool,
    facets: Vec<Facet>,
    dropped: usize,
}

impl FacetBuilder {
    pub fn new() -> FacetBuilder {
        FacetBuilder {
            pool: PlanePool::for_patch(),
            facets: Vec::new(),
            dropped: 0,
        }
    }

    /// Returns the pooled plane of the given triangle, or `None` if it has no area.
    pub fn triangle_plane(
        &mut self,
        a: Vector3<f32>,
        b: Vector3<f32>,
        c: Vector3<f32>,
    ) -> Option<usize> {
        Hyperplane::from_points(a, b, c).map(|p| self.pool.insert(p))
    }

    /// Returns the pool entry for `plane` along with whether it is stored flipped.
    fn find_or_insert_oriented(&mut self, plane: Hyperplane) -> FacetBorder {
        if let Some(plane_id) = self.pool.find(&plane) {
            return FacetBorder {
                plane_id,
                inward: false,
            };
        }

        if let Some(plane_id) = self.pool.find(&-plane) {
            return FacetBorder {
                plane_id,
                inward: true,
            };
        }

        FacetBorder {
            plane_id: self.pool.insert(plane),
            inward: false,
        }
    }

    /// Adds a convex polygon lying in pooled plane `surface_plane`.
    ///
    /// Each edge gets a border plane containing the surface normal and facing away from the
    /// polygon. With `bevels` set, the axial planes of the polygon's bounding box are added as
    /// well unless they duplicate a plane already present.
    pub fn add_polygon(
        &mut self,
        surface_plane: usize,
        points: &[Vector3<f32>],
        two_sided: bool,
        bevels: bool,
    ) {
        let surface = *self.pool.get(surface_plane);
        let normal = surface.normal();

        let centroid = points.iter().fold(Vector3::new(0.0, 0.0, 0.0), |acc, p| acc + p)
            / points.len() as f32;

        let mut borders = Vec::with_capacity(points.len() + 7);
        for i in 0..points.len() {
            let a = points[i];
            let b = points[(i + 1) % points.len()];
            let edge_normal = (b - a).cross(normal);
            let len = edge_normal.magnitude();
            if len < 1e-4 {
                continue;
            }

            let mut edge = Hyperplane::from_normal(edge_normal / len, a.dot(edge_normal / len));
            if edge.point_dist(centroid) > 0.0 {
                edge = -edge;
            }

            let border = self.find_or_insert_oriented(edge);
            if !borders.contains(&border) {
                borders.push(border);
            }
        }

        if borders.len() < 3 {
            self.dropped += 1;
            return;
        }

        let (mins, maxs) = math::bounds(points.iter());

        if bevels {
            for axis in 0..3 {
                for &dir in &[-1.0f32, 1.0] {
                    let mut n = Vector3::new(0.0, 0.0, 0.0);
                    n[axis] = dir;
                    let dist = if dir > 0.0 { maxs[axis] } else { -mins[axis] };
                    let bevel = self.find_or_insert_oriented(Hyperplane::from_normal(n, dist));

                    if bevel.plane_id == surface_plane || borders.contains(&bevel) {
                        continue;
                    }

                    borders.push(bevel);
                }
            }
        }

        borders.push(FacetBorder {
            plane_id: surface_plane,
            inward: true,
        });

        self.facets.push(Facet {
            surface_plane,
            borders,
            two_sided,
            mins,
            maxs,
        });
    }

    /// Number of polygons rejected as degenerate so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn finish(self, mins: Vector3<f32>, maxs: Vector3<f32>) -> FacetCollide {
        FacetCollide {
            mins,
            maxs,
            planes: self.pool.into_planes(),
            facets: self.facets,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_square_facet_borders() {
        let mut builder = FacetBuilder::new();
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 8.0, 0.0);
        let c = Vector3::new(8.0, 8.0, 0.0);
        let d = Vector3::new(8.0, 0.0, 0.0);

        let plane = builder.triangle_plane(a, b, c).unwrap();
        builder.add_polygon(plane, &[a, b, c, d], false, true);
        let collide = builder.finish(a, c);

        assert_eq!(collide.facets.len(), 1);
        let facet = &collide.facets[0];
        assert_eq!(collide.planes[facet.surface_plane].normal(), Vector3::unit_z());

        // four edges and the back plane; every axial bevel coincides with one of them
        assert_eq!(facet.borders.len(), 5);
        assert_eq!(
            *facet.borders.last().unwrap(),
            FacetBorder {
                plane_id: facet.surface_plane,
                inward: true
            }
        );

        // the centre of the square is behind every edge border
        let centre = Vector3::new(4.0, 4.0, 0.0);
        for k in 0..4 {
            assert!(facet.border_plane(&collide.planes, k).point_dist(centre) < 0.0);
        }
    }

    #[test]
    fn test_degenerate_polygon_dropped() {
        let mut builder = FacetBuilder::new();
        assert!(builder
            .triangle_plane(
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(2.0, 0.0, 0.0)
            )
            .is_none());

        let plane = builder
            .triangle_plane(
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
            )
            .unwrap();
        let p = Vector3::new(0.0, 0.0, 0.0);
        builder.add_polygon(plane, &[p, p, p], false, false);
        assert_eq!(builder.dropped(), 1);
    }
}
