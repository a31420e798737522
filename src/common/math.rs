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

use std::ops::Neg;

use cgmath::{Angle, Deg, InnerSpace, Matrix3, Vector3, Zero};

/// Normals whose components come this close to an axis are snapped onto it.
pub const NORMAL_EPSILON: f32 = 0.00001;

/// Plane distances this close to an integer are snapped to it.
pub const DIST_EPSILON: f32 = 0.01;

/// The largest coordinate magnitude a map may use.
pub const MAX_WORLD_COORD: f32 = 128.0 * 1024.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Angles {
    pub pitch: Deg<f32>,
    pub roll: Deg<f32>,
    pub yaw: Deg<f32>,
}

impl Angles {
    pub fn zero() -> Angles {
        Angles {
            pitch: Deg(0.0),
            roll: Deg(0.0),
            yaw: Deg(0.0),
        }
    }

    pub fn new(pitch: f32, yaw: f32, roll: f32) -> Angles {
        Angles {
            pitch: Deg(pitch),
            roll: Deg(roll),
            yaw: Deg(yaw),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.pitch.0 == 0.0 && self.roll.0 == 0.0 && self.yaw.0 == 0.0
    }

    /// Returns the forward, right and up vectors for these angles.
    pub fn vectors(&self) -> (Vector3<f32>, Vector3<f32>, Vector3<f32>) {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        let (sr, cr) = self.roll.sin_cos();

        let forward = Vector3::new(cp * cy, cp * sy, -sp);
        let right = Vector3::new(
            -sr * sp * cy + cr * sy,
            -sr * sp * sy - cr * cy,
            -sr * cp,
        );
        let up = Vector3::new(cr * sp * cy + sr * sy, cr * sp * sy - sr * cy, cr * cp);

        (forward, right, up)
    }

    /// Returns the matrix taking a vector from a model's local frame into the world frame.
    ///
    /// The columns are the model's forward, left and up axes. Its transpose takes world-space
    /// vectors into the model's frame.
    pub fn mat3_local_to_world(&self) -> Matrix3<f32> {
        let (forward, right, up) = self.vectors();
        Matrix3::from_cols(forward, -right, up)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum HyperplaneSide {
    Positive = 0,
    Negative = 1,
}

impl Neg for HyperplaneSide {
    type Output = HyperplaneSide;

    fn neg(self) -> Self::Output {
        match self {
            HyperplaneSide::Positive => HyperplaneSide::Negative,
            HyperplaneSide::Negative => HyperplaneSide::Positive,
        }
    }
}

impl HyperplaneSide {
    pub fn from_dist(dist: f32) -> HyperplaneSide {
        if dist >= 0.0 {
            HyperplaneSide::Positive
        } else {
            HyperplaneSide::Negative
        }
    }
}

bitflags! {
    /// Result of classifying a box against a plane.
    pub struct BoxSides: u8 {
        const FRONT = 0x1;
        const BACK = 0x2;
        const CROSSING = Self::FRONT.bits | Self::BACK.bits;
    }
}

#[derive(Copy, Clone, Debug, Eq, FromPrimitive, PartialEq)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

/// Classification of a plane used to pick fast paths.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PlaneType {
    Axial(Axis),
    NonAxial,

    /// The plane was built from degenerate input and has no usable normal.
    NonPlanar,
}

impl PlaneType {
    pub fn for_normal(normal: Vector3<f32>) -> PlaneType {
        if normal == Vector3::zero() || !normal.x.is_finite() || !normal.y.is_finite()
            || !normal.z.is_finite()
        {
            return PlaneType::NonPlanar;
        }

        if normal.x == 1.0 || normal.x == -1.0 {
            PlaneType::Axial(Axis::X)
        } else if normal.y == 1.0 || normal.y == -1.0 {
            PlaneType::Axial(Axis::Y)
        } else if normal.z == 1.0 || normal.z == -1.0 {
            PlaneType::Axial(Axis::Z)
        } else {
            PlaneType::NonAxial
        }
    }

    pub fn axis(&self) -> Option<usize> {
        match *self {
            PlaneType::Axial(a) => Some(a as usize),
            _ => None,
        }
    }
}

/// A plane in point-normal form.
///
/// Alongside the normal and distance a hyperplane caches its type and the sign bits of its
/// normal, which select the box corner nearest the plane.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Hyperplane {
    normal: Vector3<f32>,
    dist: f32,
    kind: PlaneType,
    signbits: u8,
}

impl Neg for Hyperplane {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Hyperplane::from_normal(-self.normal, -self.dist)
    }
}

impl Hyperplane {
    /// Creates a new hyperplane aligned along the given normal, `dist` units away from the origin.
    ///
    /// The normal is normalized. A zero normal produces a `PlaneType::NonPlanar` plane.
    pub fn new(normal: Vector3<f32>, dist: f32) -> Hyperplane {
        let len = normal.magnitude();
        if len == 0.0 {
            return Hyperplane::from_normal(normal, dist);
        }

        Hyperplane::from_normal(normal / len, dist)
    }

    /// Creates a new hyperplane aligned along the x-axis, `dist` units away from the origin.
    pub fn axis_x(dist: f32) -> Hyperplane {
        Hyperplane::from_normal(Vector3::unit_x(), dist)
    }

    /// Creates a new hyperplane aligned along the y-axis, `dist` units away from the origin.
    pub fn axis_y(dist: f32) -> Hyperplane {
        Hyperplane::from_normal(Vector3::unit_y(), dist)
    }

    /// Creates a new hyperplane aligned along the z-axis, `dist` units away from the origin.
    pub fn axis_z(dist: f32) -> Hyperplane {
        Hyperplane::from_normal(Vector3::unit_z(), dist)
    }

    /// Creates a hyperplane from a normal that is already unit length.
    pub fn from_normal(normal: Vector3<f32>, dist: f32) -> Hyperplane {
        Hyperplane {
            normal,
            dist,
            kind: PlaneType::for_normal(normal),
            signbits: sign_bits(normal),
        }
    }

    /// Creates the plane through three points, or `None` if they are collinear.
    ///
    /// The normal is `(c - a) × (b - a)`, so the points wind clockwise when seen from the front.
    pub fn from_points(
        a: Vector3<f32>,
        b: Vector3<f32>,
        c: Vector3<f32>,
    ) -> Option<Hyperplane> {
        let d1 = b - a;
        let d2 = c - a;
        let normal = d2.cross(d1);
        let len = normal.magnitude();

        if len == 0.0 || !len.is_finite() {
            return None;
        }

        let normal = normal / len;
        Some(Hyperplane::from_normal(normal, a.dot(normal)))
    }

    /// Returns a copy with near-axial normals and near-integer distances snapped.
    pub fn snapped(&self) -> Hyperplane {
        let normal = snap_normal(self.normal);
        let mut dist = self.dist;
        let rounded = dist.round();
        if (dist - rounded).abs() < DIST_EPSILON {
            dist = rounded;
        }

        Hyperplane::from_normal(normal, dist)
    }

    /// Returns true if `other` describes the same plane within the given tolerances.
    pub fn approx_eq(&self, other: &Hyperplane, normal_epsilon: f32, dist_epsilon: f32) -> bool {
        (self.normal.x - other.normal.x).abs() < normal_epsilon
            && (self.normal.y - other.normal.y).abs() < normal_epsilon
            && (self.normal.z - other.normal.z).abs() < normal_epsilon
            && (self.dist - other.dist).abs() < dist_epsilon
    }

    /// Returns the surface normal of this plane.
    pub fn normal(&self) -> Vector3<f32> {
        self.normal
    }

    pub fn dist(&self) -> f32 {
        self.dist
    }

    pub fn kind(&self) -> PlaneType {
        self.kind
    }

    pub fn signbits(&self) -> u8 {
        self.signbits
    }

    pub fn is_axial(&self) -> bool {
        self.kind.axis().is_some()
    }

    /// Calculates the signed distance between this hyperplane and the given point.
    pub fn point_dist(&self, point: Vector3<f32>) -> f32 {
        match self.kind {
            PlaneType::Axial(a) if self.normal[a as usize] > 0.0 => {
                point[a as usize] - self.dist
            }
            _ => point.dot(self.normal) - self.dist,
        }
    }

    /// Calculates which side of this hyperplane the given point belongs to.
    ///
    /// Points with a distance of 0.0 are considered to be on the positive side.
    pub fn point_side(&self, point: Vector3<f32>) -> HyperplaneSide {
        HyperplaneSide::from_dist(self.point_dist(point))
    }

    /// Classifies an axis-aligned box against this plane.
    pub fn box_on_plane_side(&self, mins: Vector3<f32>, maxs: Vector3<f32>) -> BoxSides {
        if let PlaneType::Axial(a) = self.kind {
            let a = a as usize;
            if self.normal[a] > 0.0 {
                if self.dist <= mins[a] {
                    return BoxSides::FRONT;
                }
                if self.dist >= maxs[a] {
                    return BoxSides::BACK;
                }
                return BoxSides::CROSSING;
            }
        }

        // pick the corners nearest and farthest along the normal
        let mut near = maxs;
        let mut far = mins;
        for i in 0..3 {
            if self.signbits & (1 << i) == 0 {
                near[i] = mins[i];
                far[i] = maxs[i];
            }
        }

        let mut sides = BoxSides::empty();
        if far.dot(self.normal) >= self.dist {
            sides |= BoxSides::FRONT;
        }
        if near.dot(self.normal) < self.dist {
            sides |= BoxSides::BACK;
        }

        sides
    }
}

/// Returns a bit per axis, set where the component of `v` is negative.
pub fn sign_bits(v: Vector3<f32>) -> u8 {
    ((v.x < 0.0) as u8) | (((v.y < 0.0) as u8) << 1) | (((v.z < 0.0) as u8) << 2)
}

/// Snaps normals that are within `NORMAL_EPSILON` of an axis onto that axis.
pub fn snap_normal(normal: Vector3<f32>) -> Vector3<f32> {
    for i in 0..3 {
        if (normal[i] - 1.0).abs() < NORMAL_EPSILON {
            let mut n = Vector3::zero();
            n[i] = 1.0;
            return n;
        }
        if (normal[i] + 1.0).abs() < NORMAL_EPSILON {
            let mut n = Vector3::zero();
            n[i] = -1.0;
            return n;
        }
    }

    normal
}

/// Intersects three planes, returning `None` when two of them are parallel.
pub fn intersect_planes(a: &Hyperplane, b: &Hyperplane, c: &Hyperplane) -> Option<Vector3<f32>> {
    let bc = b.normal().cross(c.normal());
    let denom = a.normal().dot(bc);
    if denom.abs() < 1e-6 {
        return None;
    }

    let ca = c.normal().cross(a.normal());
    let ab = a.normal().cross(b.normal());

    Some((bc * a.dist() + ca * b.dist() + ab * c.dist()) / denom)
}

/// Returns the closest point to `point` on the line through `start` along unit vector `dir`.
pub fn project_point_onto_line(
    point: Vector3<f32>,
    start: Vector3<f32>,
    dir: Vector3<f32>,
) -> Vector3<f32> {
    start + dir * (point - start).dot(dir)
}

/// Squared distance from `p` to the segment `lp1`-`lp2`, where `dir` is the segment's unit
/// direction.
pub fn distance_from_segment_squared(
    p: Vector3<f32>,
    lp1: Vector3<f32>,
    lp2: Vector3<f32>,
    dir: Vector3<f32>,
) -> f32 {
    let proj = project_point_onto_line(p, lp1, dir);
    for j in 0..3 {
        if (proj[j] > lp1[j] && proj[j] > lp2[j]) || (proj[j] < lp1[j] && proj[j] < lp2[j]) {
            return if (proj[j] - lp1[j]).abs() < (proj[j] - lp2[j]).abs() {
                (p - lp1).magnitude2()
            } else {
                (p - lp2).magnitude2()
            };
        }
    }

    (p - proj).magnitude2()
}

pub fn bounds<'a, I>(points: I) -> (Vector3<f32>, Vector3<f32>)
where
    I: IntoIterator<Item = &'a Vector3<f32>>,
{
    let mut min = Vector3::new(MAX_WORLD_COORD, MAX_WORLD_COORD, MAX_WORLD_COORD);
    let mut max = -min;
    for p in points.into_iter() {
        for c in 0..3 {
            min[c] = p[c].min(min[c]);
            max[c] = p[c].max(max[c]);
        }
    }
    (min, max)
}

/// Returns true if the two boxes overlap, allowing a small tolerance.
pub fn bounds_intersect(
    mins: Vector3<f32>,
    maxs: Vector3<f32>,
    mins2: Vector3<f32>,
    maxs2: Vector3<f32>,
) -> bool {
    const BOUNDS_EPSILON: f32 = 0.1;

    !(maxs.x < mins2.x - BOUNDS_EPSILON
        || maxs.y < mins2.y - BOUNDS_EPSILON
        || maxs.z < mins2.z - BOUNDS_EPSILON
        || mins.x > maxs2.x + BOUNDS_EPSILON
        || mins.y > maxs2.y + BOUNDS_EPSILON
        || mins.z > maxs2.z + BOUNDS_EPSILON)
}

/// Returns the radius of the sphere centered on the origin that encloses the box.
pub fn radius_from_bounds(mins: Vector3<f32>, maxs: Vector3<f32>) -> f32 {
    let mut corner = Vector3::zero();
    for i in 0..3 {
        corner[i] = mins[i].abs().max(maxs[i].abs());
    }
    corner.magnitude()
}
