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

//! Swept volume traces.
//!
//! A trace moves a point, an axis-aligned box or a capsule along a segment and reports the first
//! contact. Boxes are handled by pushing every plane out by the box corner nearest to it, which
//! turns the sweep into a ray cast against the expanded solid. Capsules push planes out by their
//! radius and test against whichever end sphere lies nearest the plane.

use crate::common::{
    bitset::BitSet,
    bsp::{
        facet::FacetCollide, BrushGeometry, BspBrush, BspBrushSide, BspLeaf, BspSurface,
        CollisionModel, ContentFlags, ModelHandle, NodeChild, SurfaceCollide, SurfaceFlags,
    },
    math::{self, Angles, Hyperplane},
};

use cgmath::{InnerSpace, Matrix, Vector3, Zero};

/// Planes are approached no closer than this.
pub const SURFACE_CLIP_EPSILON: f32 = 0.125;

/// Extra radius given to spheres and cylinders in capsule tests.
const RADIUS_EPSILON: f32 = 1.0;

/// Maximum number of leaves examined by a position test.
const MAX_POSITION_LEAFS: usize = 1024;

/// Describes a trace: what moves, along which segment, and what it collides with.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TraceRequest {
    pub start: Vector3<f32>,
    pub end: Vector3<f32>,
    pub mins: Vector3<f32>,
    pub maxs: Vector3<f32>,
    pub model: ModelHandle,
    pub mask: ContentFlags,

    /// Trace a capsule fitted to `mins`/`maxs` instead of the box itself.
    pub capsule: bool,
}

impl TraceRequest {
    /// Creates a box trace against the world.
    pub fn new(
        start: Vector3<f32>,
        end: Vector3<f32>,
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
        mask: ContentFlags,
    ) -> TraceRequest {
        TraceRequest {
            start,
            end,
            mins,
            maxs,
            model: ModelHandle::World,
            mask,
            capsule: false,
        }
    }

    /// Creates a point trace against the world.
    pub fn point(start: Vector3<f32>, end: Vector3<f32>, mask: ContentFlags) -> TraceRequest {
        TraceRequest::new(start, end, Vector3::zero(), Vector3::zero(), mask)
    }

    pub fn with_model(mut self, model: ModelHandle) -> TraceRequest {
        self.model = model;
        self
    }

    pub fn with_capsule(mut self, capsule: bool) -> TraceRequest {
        self.capsule = capsule;
        self
    }
}

/// The outcome of a trace.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceResult {
    /// The whole trace was inside solid; `plane` is not valid.
    pub all_solid: bool,

    /// The trace started inside solid.
    pub start_solid: bool,

    /// How far along the segment the volume travelled. 1.0 means nothing was hit.
    pub fraction: f32,

    /// Where the volume stopped.
    pub end_pos: Vector3<f32>,

    /// The surface that was hit, if any.
    pub plane: Option<Hyperplane>,

    pub surface_flags: SurfaceFlags,
    pub contents: ContentFlags,

    /// The entity that was hit, filled in by the entity world.
    pub entity_num: Option<usize>,
}

impl Default for TraceResult {
    fn default() -> Self {
        TraceResult {
            all_solid: false,
            start_solid: false,
            fraction: 1.0,
            end_pos: Vector3::zero(),
            plane: None,
            surface_flags: SurfaceFlags::empty(),
            contents: ContentFlags::empty(),
            entity_num: None,
        }
    }
}

impl TraceResult {
    /// Returns true if the trace hit something.
    pub fn is_hit(&self) -> bool {
        self.fraction < 1.0
    }
}

/// A capsule described by its radius and the offset of its end spheres from its center.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct Sphere {
    pub radius: f32,
    pub half_height: f32,
    pub offset: Vector3<f32>,
}

impl Sphere {
    /// Fits a vertical capsule inside a box with the given half extents.
    pub fn fit(extents: Vector3<f32>) -> Sphere {
        let radius = extents.x.min(extents.z);
        Sphere {
            radius,
            half_height: extents.z,
            offset: Vector3::new(0.0, 0.0, extents.z - radius),
        }
    }
}

/// Per-trace scratch state.
pub(crate) struct TraceWork {
    start: Vector3<f32>,
    end: Vector3<f32>,

    /// Symmetric box size around the traced center.
    size: [Vector3<f32>; 2],

    /// Box corners indexed by plane sign bits.
    offsets: [Vector3<f32>; 8],

    extents: Vector3<f32>,

    /// Bounds of the whole move.
    bounds: [Vector3<f32>; 2],

    mask: ContentFlags,
    is_point: bool,
    sphere: Option<Sphere>,
    trace: TraceResult,

    checked_brushes: BitSet,
    checked_surfaces: BitSet,

    /// Per-plane scratch for point traces through facets.
    front_facing: Vec<bool>,
    intersections: Vec<f32>,
}

impl TraceWork {
    fn new(
        start: Vector3<f32>,
        end: Vector3<f32>,
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
        mask: ContentFlags,
        capsule: bool,
        sphere: Option<Sphere>,
    ) -> TraceWork {
        // make the box symmetric around its center
        let offset = (mins + maxs) * 0.5;
        let size = [mins - offset, maxs - offset];
        let start = start + offset;
        let end = end + offset;

        let sphere = if capsule {
            Some(sphere.unwrap_or_else(|| Sphere::fit(size[1])))
        } else {
            None
        };

        let mut offsets = [Vector3::zero(); 8];
        for (signbits, corner) in offsets.iter_mut().enumerate() {
            for i in 0..3 {
                corner[i] = size[(signbits >> i) & 1][i];
            }
        }

        let mut bounds = [Vector3::zero(); 2];
        for i in 0..3 {
            let (lo, hi) = if start[i] < end[i] {
                (start[i], end[i])
            } else {
                (end[i], start[i])
            };

            match sphere {
                Some(ref s) => {
                    let spread = s.offset[i].abs() + s.radius;
                    bounds[0][i] = lo - spread;
                    bounds[1][i] = hi + spread;
                }
                None => {
                    bounds[0][i] = lo + size[0][i];
                    bounds[1][i] = hi + size[1][i];
                }
            }
        }

        TraceWork {
            start,
            end,
            size,
            offsets,
            extents: size[1],
            bounds,
            mask,
            // only a box with no extent at all is a point, a flat box keeps its corner offsets
            is_point: size[0] == Vector3::zero(),
            sphere,
            trace: TraceResult::default(),
            checked_brushes: BitSet::new(),
            checked_surfaces: BitSet::new(),
            front_facing: Vec::new(),
            intersections: Vec::new(),
        }
    }

    /// Distance from a plane at which the traced volume touches it.
    fn support(&self, normal: Vector3<f32>) -> f32 {
        self.extents.x * normal.x.abs()
            + self.extents.y * normal.y.abs()
            + self.extents.z * normal.z.abs()
    }

    /// Returns the signed distances of the start and end of the move from `plane`, with the plane
    /// pushed out by the traced volume.
    fn expanded_dists(&self, plane: &Hyperplane) -> (f32, f32) {
        let n = plane.normal();
        match self.sphere {
            Some(ref s) => {
                let dist = plane.dist() + s.radius;

                // use the end sphere nearest the plane
                let off = if n.dot(s.offset) > 0.0 {
                    -s.offset
                } else {
                    s.offset
                };

                ((self.start + off).dot(n) - dist, (self.end + off).dot(n) - dist)
            }

            None => {
                let dist = plane.dist() - self.offsets[plane.signbits() as usize].dot(n);
                (self.start.dot(n) - dist, self.end.dot(n) - dist)
            }
        }
    }

    fn set_solid(&mut self, contents: ContentFlags) {
        self.trace.start_solid = true;
        self.trace.all_solid = true;
        self.trace.fraction = 0.0;
        self.trace.contents = contents;
    }
}

/// A convex brush, borrowed from the model or built on the fly for a temporary box.
struct BrushRef<'a> {
    sides: &'a [BspBrushSide],
    contents: ContentFlags,
    mins: Vector3<f32>,
    maxs: Vector3<f32>,
    geometry: Option<&'a BrushGeometry>,
}

impl<'a> BrushRef<'a> {
    fn new(brush: &'a BspBrush, sides: &'a [BspBrushSide]) -> BrushRef<'a> {
        BrushRef {
            sides,
            contents: brush.contents,
            mins: brush.mins,
            maxs: brush.maxs,
            geometry: brush.geometry.as_ref(),
        }
    }
}

/// Sides of a box brush, in the order +x, -x, +y, -y, +z, -z.
fn box_sides(mins: Vector3<f32>, maxs: Vector3<f32>) -> Vec<BspBrushSide> {
    let mut sides = Vec::with_capacity(6);
    for i in 0..3 {
        let mut n = Vector3::zero();
        n[i] = 1.0;
        for &(normal, dist) in &[(n, maxs[i]), (-n, -mins[i])] {
            sides.push(BspBrushSide {
                plane_id: 0,
                plane: Hyperplane::from_normal(normal, dist),
                shader_id: None,
                surface_flags: SurfaceFlags::empty(),
            });
        }
    }
    sides
}

fn test_box_in_brush(tw: &mut TraceWork, brush: &BrushRef) {
    if brush.sides.is_empty() {
        return;
    }

    // the axial sides are covered by the bounds
    for i in 0..3 {
        if tw.bounds[0][i] > brush.maxs[i] || tw.bounds[1][i] < brush.mins[i] {
            return;
        }
    }

    for side in brush.sides.iter() {
        if tw.sphere.is_none() && side.plane.is_axial() {
            continue;
        }

        let (d1, _) = tw.expanded_dists(&side.plane);
        if d1 > 0.0 {
            return;
        }
    }

    tw.set_solid(brush.contents);
}

fn trace_through_brush(tw: &mut TraceWork, brush: &BrushRef) {
    if brush.sides.is_empty() {
        return;
    }

    let mut enter_frac = -1.0f32;
    let mut leave_frac = 1.0f32;
    let mut lead = None;
    let mut getout = false;
    let mut startout = false;

    for (i, side) in brush.sides.iter().enumerate() {
        let (d1, d2) = tw.expanded_dists(&side.plane);

        if d2 > 0.0 {
            getout = true;
        }
        if d1 > 0.0 {
            startout = true;
        }

        // entirely in front of this side, so the brush can't be touched
        if d1 > 0.0 && (d2 >= SURFACE_CLIP_EPSILON || d2 >= d1) {
            return;
        }

        // entirely behind this side
        if d1 <= 0.0 && d2 <= 0.0 {
            continue;
        }

        if d1 > d2 {
            // entering
            let f = ((d1 - SURFACE_CLIP_EPSILON) / (d1 - d2)).max(0.0);
            if f > enter_frac {
                enter_frac = f;
                lead = Some(i);
            }
        } else {
            // leaving
            let f = ((d1 + SURFACE_CLIP_EPSILON) / (d1 - d2)).min(1.0);
            if f < leave_frac {
                leave_frac = f;
            }
        }
    }

    if !startout {
        tw.trace.start_solid = true;
        if !getout {
            tw.trace.all_solid = true;
            tw.trace.fraction = 0.0;
            tw.trace.contents = brush.contents;
        }
        return;
    }

    if enter_frac < leave_frac && enter_frac > -1.0 && enter_frac < tw.trace.fraction {
        let lead = match lead {
            Some(l) => l,
            None => return,
        };
        let side = &brush.sides[lead];

        let (fraction, plane) = match (tw.sphere, brush.geometry) {
            (Some(sphere), Some(geometry)) if !side.plane.is_axial() => {
                match refine_capsule_contact(tw, &sphere, brush, geometry, lead, enter_frac) {
                    Some(contact) => contact,
                    None => return,
                }
            }
            _ => (enter_frac.max(0.0), side.plane),
        };

        if fraction < tw.trace.fraction {
            tw.trace.fraction = fraction;
            tw.trace.plane = Some(plane);
            tw.trace.surface_flags = side.surface_flags;
            tw.trace.contents = brush.contents;
        }
    }
}

/// Verifies a capsule's contact with a slanted brush side.
///
/// Pushing the side out by the radius overestimates the brush near its edges. If the contact point
/// on the sphere lies outside the face, the end spheres are swept against the brush's rounded edges
/// and corners instead. Returns `None` if they miss.
fn refine_capsule_contact(
    tw: &TraceWork,
    sphere: &Sphere,
    brush: &BrushRef,
    geometry: &BrushGeometry,
    lead: usize,
    enter_frac: f32,
) -> Option<(f32, Hyperplane)> {
    let plane = brush.sides[lead].plane;
    let n = plane.normal();
    let near = if n.dot(sphere.offset) > 0.0 {
        -sphere.offset
    } else {
        sphere.offset
    };

    let center = tw.start + near + (tw.end - tw.start) * enter_frac;
    let contact = center - n * sphere.radius;
    let on_face = brush
        .sides
        .iter()
        .enumerate()
        .all(|(i, s)| i == lead || s.plane.point_dist(contact) <= SURFACE_CLIP_EPSILON);

    if on_face {
        return Some((enter_frac.max(0.0), plane));
    }

    let radius = sphere.radius + RADIUS_EPSILON;
    let mut best: Option<(f32, Vector3<f32>, Vector3<f32>)> = None;
    let mut consider = |hit: Option<(f32, Vector3<f32>, Vector3<f32>)>| {
        if let Some(h) = hit {
            if best.map_or(true, |b| h.0 < b.0) {
                best = Some(h);
            }
        }
    };

    let ends = [sphere.offset, -sphere.offset];
    let centers = if sphere.offset == Vector3::zero() {
        &ends[..1]
    } else {
        &ends[..]
    };

    for &off in centers.iter() {
        let start = tw.start + off;
        let end = tw.end + off;

        for &(e0, e1) in geometry.edges.iter() {
            consider(sweep_point_cylinder(start, end, e0, e1, radius));
        }

        for &v in geometry.vertices.iter() {
            consider(sweep_sphere(start, end, v, radius).map(|t| {
                let at = start + (end - start) * t;
                (t, (at - v).normalize(), v)
            }));
        }
    }

    best.map(|(t, normal, point)| (t, Hyperplane::from_normal(normal, normal.dot(point))))
}

/// Returns the parameter along `start`-`end` at which the point first comes within `radius` of
/// `center`, clamped to zero.
fn sweep_sphere(
    start: Vector3<f32>,
    end: Vector3<f32>,
    center: Vector3<f32>,
    radius: f32,
) -> Option<f32> {
    let d = end - start;
    let w = start - center;

    let a = d.magnitude2();
    if a == 0.0 {
        return None;
    }

    let b = 2.0 * w.dot(d);
    let c = w.magnitude2() - radius * radius;
    let disc = b * b - 4.0 * a * c;
    if disc <= 0.0 {
        return None;
    }

    let t = (-b - disc.sqrt()) / (2.0 * a);
    if t > 1.0 || (-b + disc.sqrt()) / (2.0 * a) < 0.0 {
        return None;
    }

    Some(t.max(0.0))
}

/// Sweeps a point against the cylinder of `radius` around the segment `e0`-`e1`.
///
/// Returns the parameter of first contact, the outward normal there, and the point on the
/// segment nearest the contact.
fn sweep_point_cylinder(
    start: Vector3<f32>,
    end: Vector3<f32>,
    e0: Vector3<f32>,
    e1: Vector3<f32>,
    radius: f32,
) -> Option<(f32, Vector3<f32>, Vector3<f32>)> {
    let axis = e1 - e0;
    let len = axis.magnitude();
    if len == 0.0 {
        return None;
    }
    let u = axis / len;

    let d = end - start;
    let w = start - e0;
    let d_perp = d - u * d.dot(u);
    let w_perp = w - u * w.dot(u);

    let a = d_perp.magnitude2();
    let c = w_perp.magnitude2() - radius * radius;
    if a < 1e-8 || c <= 0.0 {
        return None;
    }

    let b = 2.0 * w_perp.dot(d_perp);
    let disc = b * b - 4.0 * a * c;
    if disc <= 0.0 {
        return None;
    }

    let t = (-b - disc.sqrt()) / (2.0 * a);
    if t < 0.0 || t > 1.0 {
        return None;
    }

    let h = (w + d * t).dot(u);
    if h < 0.0 || h > len {
        return None;
    }

    let normal = (w_perp + d_perp * t).normalize();
    Some((t, normal, e0 + u * h))
}

fn trace_through_sphere(
    tw: &mut TraceWork,
    origin: Vector3<f32>,
    radius: f32,
    start: Vector3<f32>,
    end: Vector3<f32>,
) {
    // starting inside the sphere
    if (start - origin).magnitude2() < radius * radius {
        tw.trace.fraction = 0.0;
        tw.trace.start_solid = true;
        if (end - origin).magnitude2() < radius * radius {
            tw.trace.all_solid = true;
        }
        return;
    }

    let dir = end - start;
    let length = dir.magnitude();
    if length == 0.0 {
        return;
    }

    let l1 = math::distance_from_segment_squared(origin, start, end, dir / length);
    let l2 = (end - origin).magnitude2();
    if l1 > radius * radius && l2 > (radius + SURFACE_CLIP_EPSILON).powi(2) {
        return;
    }

    if let Some(fraction) = sweep_sphere(start, end, origin, radius + RADIUS_EPSILON) {
        if fraction < tw.trace.fraction {
            let intersection = start + dir * fraction;
            let normal = (intersection - origin).normalize();
            tw.trace.fraction = fraction;
            tw.trace.plane = Some(Hyperplane::from_normal(normal, normal.dot(intersection)));
            tw.trace.contents = ContentFlags::BODY;
        }
    }
}

fn trace_through_vertical_cylinder(
    tw: &mut TraceWork,
    origin: Vector3<f32>,
    radius: f32,
    half_height: f32,
    start: Vector3<f32>,
    end: Vector3<f32>,
) {
    let flat = |v: Vector3<f32>| Vector3::new(v.x, v.y, 0.0);
    let (start2d, end2d, org2d) = (flat(start), flat(end), flat(origin));
    let within_height = |z: f32| z <= origin.z + half_height && z >= origin.z - half_height;

    if within_height(start.z) && (start2d - org2d).magnitude2() < radius * radius {
        tw.trace.fraction = 0.0;
        tw.trace.start_solid = true;
        if (end2d - org2d).magnitude2() < radius * radius {
            tw.trace.all_solid = true;
        }
        return;
    }

    let dir = end2d - start2d;
    let length = dir.magnitude();
    if length == 0.0 {
        return;
    }

    let l1 = math::distance_from_segment_squared(org2d, start2d, end2d, dir / length);
    let l2 = (end2d - org2d).magnitude2();
    if l1 > radius * radius && l2 > (radius + SURFACE_CLIP_EPSILON).powi(2) {
        return;
    }

    if let Some(fraction) = sweep_sphere(start2d, end2d, org2d, radius + RADIUS_EPSILON) {
        if fraction < tw.trace.fraction {
            let intersection = start + (end - start) * fraction;
            if within_height(intersection.z) {
                let normal = flat(intersection - origin).normalize();
                tw.trace.fraction = fraction;
                tw.trace.plane = Some(Hyperplane::from_normal(normal, normal.dot(intersection)));
                tw.trace.contents = ContentFlags::BODY;
            }
        }
    }
}

/// Center, radius and end sphere offset of the capsule fitted to a model's bounds.
fn capsule_of(mins: Vector3<f32>, maxs: Vector3<f32>) -> (Vector3<f32>, Sphere) {
    let center = (mins + maxs) * 0.5;
    (center, Sphere::fit(maxs - center))
}

fn trace_capsule_through_capsule(tw: &mut TraceWork, mins: Vector3<f32>, maxs: Vector3<f32>) {
    let sphere = match tw.sphere {
        Some(s) => s,
        None => return,
    };

    for i in 0..3 {
        if tw.bounds[0][i] > maxs[i] + RADIUS_EPSILON
            || tw.bounds[1][i] < mins[i] - RADIUS_EPSILON
        {
            return;
        }
    }

    let (start, end) = (tw.start, tw.end);
    let (center, other) = capsule_of(mins, maxs);
    let top = center + other.offset;
    let bottom = center - other.offset;
    let radius = other.radius + sphere.radius;

    // the cylinders only matter when moving sideways
    if start.x != end.x || start.y != end.y {
        let h = other.half_height + sphere.half_height - radius;
        if h > 0.0 {
            trace_through_vertical_cylinder(tw, center, radius, h, start, end);
        }
    }

    trace_through_sphere(tw, top, radius, start - sphere.offset, end - sphere.offset);
    trace_through_sphere(tw, bottom, radius, start + sphere.offset, end + sphere.offset);
}

/// Builds a capsule trace that swaps roles with a box trace against a capsule model.
///
/// The capsule moves relative to a box of the traced size at the origin, which collides exactly
/// when the box would collide with the capsule.
fn swapped_capsule_work(tw: &TraceWork, center: Vector3<f32>, sphere: Sphere) -> TraceWork {
    let mut sub = TraceWork::new(
        tw.start - center,
        tw.end - center,
        -tw.extents,
        tw.extents,
        tw.mask,
        true,
        Some(sphere),
    );
    sub.trace = tw.trace.clone();
    sub
}

fn trace_bounding_box_through_capsule(tw: &mut TraceWork, mins: Vector3<f32>, maxs: Vector3<f32>) {
    let (center, sphere) = capsule_of(mins, maxs);
    let mut sub = swapped_capsule_work(tw, center, sphere);

    let sides = box_sides(tw.size[0], tw.size[1]);
    trace_through_brush(
        &mut sub,
        &BrushRef {
            sides: &sides,
            contents: ContentFlags::BODY,
            mins: tw.size[0],
            maxs: tw.size[1],
            geometry: None,
        },
    );

    let mut trace = sub.trace;
    trace.plane = trace
        .plane
        .map(|p| Hyperplane::from_normal(p.normal(), p.dist() + p.normal().dot(center)));
    tw.trace = trace;
}

fn test_bounding_box_in_capsule(tw: &mut TraceWork, mins: Vector3<f32>, maxs: Vector3<f32>) {
    let (center, sphere) = capsule_of(mins, maxs);
    let mut sub = swapped_capsule_work(tw, center, sphere);

    let sides = box_sides(tw.size[0], tw.size[1]);
    test_box_in_brush(
        &mut sub,
        &BrushRef {
            sides: &sides,
            contents: ContentFlags::BODY,
            mins: tw.size[0],
            maxs: tw.size[1],
            geometry: None,
        },
    );

    tw.trace = sub.trace;
}

fn test_capsule_in_capsule(tw: &mut TraceWork, mins: Vector3<f32>, maxs: Vector3<f32>) {
    let sphere = match tw.sphere {
        Some(s) => s,
        None => return,
    };

    let top = tw.start + sphere.offset;
    let bottom = tw.start - sphere.offset;
    let (center, other) = capsule_of(mins, maxs);
    let p1 = center + other.offset;
    let p2 = center - other.offset;
    let r2 = (sphere.radius + other.radius).powi(2);

    for &a in &[p1, p2] {
        for &b in &[top, bottom] {
            if (a - b).magnitude2() < r2 {
                tw.set_solid(ContentFlags::BODY);
                return;
            }
        }
    }

    // the vertical segments overlap in height, so compare horizontally
    if bottom.z <= p1.z && top.z >= p2.z {
        let flat = |v: Vector3<f32>| Vector3::new(v.x, v.y, 0.0);
        if (flat(top) - flat(p1)).magnitude2() < r2 {
            tw.set_solid(ContentFlags::BODY);
        }
    }
}

/// Pushes out a facet plane and classifies the move against it.
///
/// Returns false if the move never reaches the plane, so the facet can be skipped. `hit` is set
/// when the plane becomes the new entry plane.
fn check_facet_plane(
    tw: &TraceWork,
    plane: &Hyperplane,
    enter_frac: &mut f32,
    leave_frac: &mut f32,
    hit: &mut bool,
) -> bool {
    *hit = false;
    let (d1, d2) = tw.expanded_dists(plane);

    if d1 > 0.0 && (d2 >= SURFACE_CLIP_EPSILON || d2 >= d1) {
        return false;
    }

    if d1 <= 0.0 && d2 <= 0.0 {
        return true;
    }

    if d1 > d2 {
        let f = ((d1 - SURFACE_CLIP_EPSILON) / (d1 - d2)).max(0.0);
        if f > *enter_frac {
            *enter_frac = f;
            *hit = true;
        }
    } else {
        let f = ((d1 + SURFACE_CLIP_EPSILON) / (d1 - d2)).min(1.0);
        if f < *leave_frac {
            *leave_frac = f;
        }
    }

    true
}

/// Sweeps the traced volume through every facet of a surface.
pub(crate) fn trace_through_facets(tw: &mut TraceWork, collide: &FacetCollide) {
    if !math::bounds_intersect(tw.bounds[0], tw.bounds[1], collide.mins, collide.maxs) {
        return;
    }

    if tw.is_point {
        trace_point_through_facets(tw, collide);
        return;
    }

    for facet in collide.facets.iter() {
        if !math::bounds_intersect(tw.bounds[0], tw.bounds[1], facet.mins, facet.maxs) {
            continue;
        }

        let mut enter_frac = -1.0;
        let mut leave_frac = 1.0;
        let mut hit = false;

        let surface = collide.planes[facet.surface_plane];
        if !check_facet_plane(tw, &surface, &mut enter_frac, &mut leave_frac, &mut hit) {
            continue;
        }
        let mut best = if hit { Some(surface) } else { None };
        let mut hit_border = None;

        let mut crossed = true;
        for k in 0..facet.borders.len() {
            let border = facet.border_plane(&collide.planes, k);
            if !check_facet_plane(tw, &border, &mut enter_frac, &mut leave_frac, &mut hit) {
                crossed = false;
                break;
            }
            if hit {
                best = Some(border);
                hit_border = Some(k);
            }
        }

        if !crossed {
            continue;
        }

        // one-sided facets are never clipped against their back
        if !facet.two_sided && hit_border == Some(facet.borders.len() - 1) {
            continue;
        }

        if enter_frac < leave_frac && enter_frac >= 0.0 && enter_frac < tw.trace.fraction {
            if let Some(plane) = best {
                tw.trace.fraction = enter_frac;
                tw.trace.plane = Some(plane);
            }
        }
    }
}

/// Traces the center of the volume through the facets of a surface as a ray.
pub(crate) fn trace_point_through_facets(tw: &mut TraceWork, collide: &FacetCollide) {
    tw.front_facing.clear();
    tw.intersections.clear();

    for plane in collide.planes.iter() {
        let d1 = plane.point_dist(tw.start);
        let d2 = plane.point_dist(tw.end);

        tw.front_facing.push(d1 > 0.0);
        tw.intersections.push(if d1 == d2 {
            f32::MAX
        } else {
            match d1 / (d1 - d2) {
                t if t <= 0.0 => f32::MAX,
                t => t,
            }
        });
    }

    let front_facing = &tw.front_facing;
    let intersection = &tw.intersections;
    for facet in collide.facets.iter() {
        let s = facet.surface_plane;
        let back_facing = !front_facing[s];
        if back_facing && !facet.two_sided {
            continue;
        }

        let intersect = intersection[s];
        if intersect > tw.trace.fraction {
            continue;
        }

        // the intersection must lie behind every border
        let inside = facet.borders.iter().all(|border| {
            let k = border.plane_id;
            if front_facing[k] ^ border.inward {
                intersection[k] <= intersect
            } else {
                intersection[k] >= intersect
            }
        });

        if !inside {
            continue;
        }

        let plane = if back_facing {
            -collide.planes[s]
        } else {
            collide.planes[s]
        };

        // stop short of the surface
        let d1 = plane.point_dist(tw.start);
        let d2 = plane.point_dist(tw.end);
        let fraction = ((d1 - SURFACE_CLIP_EPSILON) / (d1 - d2)).max(0.0);

        if fraction < tw.trace.fraction {
            tw.trace.fraction = fraction;
            tw.trace.plane = Some(plane);
        }
    }
}

/// Returns true if the start volume overlaps any facet of a surface.
pub(crate) fn position_test_facets(tw: &TraceWork, collide: &FacetCollide) -> bool {
    if tw.is_point {
        return false;
    }

    if !math::bounds_intersect(tw.bounds[0], tw.bounds[1], collide.mins, collide.maxs) {
        return false;
    }

    collide.facets.iter().any(|facet| {
        let (d1, _) = tw.expanded_dists(&collide.planes[facet.surface_plane]);
        if d1 > 0.0 {
            return false;
        }

        (0..facet.borders.len()).all(|k| {
            let (d1, _) = tw.expanded_dists(&facet.border_plane(&collide.planes, k));
            d1 <= 0.0
        })
    })
}

impl CollisionModel {
    /// The collidable surfaces of a leaf, in leaf-list order.
    fn leaf_surfaces<'a>(
        &'a self,
        leaf: &'a BspLeaf,
    ) -> impl Iterator<Item = (usize, &'a BspSurface)> + 'a {
        self.leaf_surface_ids(leaf)
            .iter()
            .filter_map(move |&id| self.surfaces[id].as_ref().map(|s| (id, s)))
    }

    fn test_in_leaf(&self, tw: &mut TraceWork, leaf: &BspLeaf) {
        for &brush_id in self.leaf_brush_ids(leaf) {
            if !tw.checked_brushes.insert(brush_id) {
                continue;
            }

            let brush = &self.brushes[brush_id];
            if !brush.contents.intersects(tw.mask) {
                continue;
            }

            test_box_in_brush(tw, &BrushRef::new(brush, self.brush_sides(brush)));
            if tw.trace.all_solid {
                return;
            }
        }

        for (surface_id, surface) in self.leaf_surfaces(leaf) {
            let collide = match surface.collide {
                SurfaceCollide::Patch(ref p) if !self.config.no_curves => &p.collide,
                _ => continue,
            };

            if !tw.checked_surfaces.insert(surface_id) || !surface.contents.intersects(tw.mask) {
                continue;
            }

            let as_point = !self.config.player_curve_clip;
            if !as_point && position_test_facets(tw, collide) {
                tw.set_solid(surface.contents);
                return;
            }
        }

        for (surface_id, surface) in self.leaf_surfaces(leaf) {
            let soup = match surface.collide {
                SurfaceCollide::TriSoup(ref t) => t,
                _ => continue,
            };

            if !tw.checked_surfaces.insert(surface_id) || !surface.contents.intersects(tw.mask) {
                continue;
            }

            if soup.position_test(tw) {
                tw.set_solid(surface.contents);
                return;
            }
        }
    }

    fn trace_through_leaf(&self, tw: &mut TraceWork, leaf: &BspLeaf) {
        for &brush_id in self.leaf_brush_ids(leaf) {
            if !tw.checked_brushes.insert(brush_id) {
                continue;
            }

            let brush = &self.brushes[brush_id];
            if !brush.contents.intersects(tw.mask)
                || !math::bounds_intersect(tw.bounds[0], tw.bounds[1], brush.mins, brush.maxs)
            {
                continue;
            }

            trace_through_brush(tw, &BrushRef::new(brush, self.brush_sides(brush)));
            if tw.trace.fraction == 0.0 {
                return;
            }
        }

        // patches before triangle soups
        for (surface_id, surface) in self.leaf_surfaces(leaf) {
            let patch = match surface.collide {
                SurfaceCollide::Patch(ref p) if !self.config.no_curves => p,
                _ => continue,
            };

            if !tw.checked_surfaces.insert(surface_id) || !surface.contents.intersects(tw.mask) {
                continue;
            }

            let old_fraction = tw.trace.fraction;
            if self.config.player_curve_clip {
                trace_through_facets(tw, &patch.collide);
            } else if math::bounds_intersect(
                tw.bounds[0],
                tw.bounds[1],
                patch.collide.mins,
                patch.collide.maxs,
            ) {
                trace_point_through_facets(tw, &patch.collide);
            }

            if tw.trace.fraction < old_fraction {
                tw.trace.surface_flags = surface.surface_flags;
                tw.trace.contents = surface.contents;
            }

            if tw.trace.fraction == 0.0 {
                return;
            }
        }

        for (surface_id, surface) in self.leaf_surfaces(leaf) {
            let soup = match surface.collide {
                SurfaceCollide::TriSoup(ref t) => t,
                _ => continue,
            };

            if !tw.checked_surfaces.insert(surface_id) || !surface.contents.intersects(tw.mask) {
                continue;
            }

            let old_fraction = tw.trace.fraction;
            soup.trace(tw);
            if tw.trace.fraction < old_fraction {
                tw.trace.surface_flags = surface.surface_flags;
                tw.trace.contents = surface.contents;
            }

            if tw.trace.fraction == 0.0 {
                return;
            }
        }
    }

    /// Walks the tree, visiting the leaves the move passes through in order.
    fn trace_through_tree(
        &self,
        tw: &mut TraceWork,
        child: NodeChild,
        p1f: f32,
        p2f: f32,
        p1: Vector3<f32>,
        p2: Vector3<f32>,
    ) {
        // already hit something nearer
        if tw.trace.fraction <= p1f {
            return;
        }

        let node = match child {
            NodeChild::Leaf(l) => {
                self.trace_through_leaf(tw, &self.leaves[l]);
                return;
            }
            NodeChild::Node(n) => &self.nodes[n],
        };

        let plane = &self.planes[node.plane_id];
        let t1 = plane.point_dist(p1);
        let t2 = plane.point_dist(p2);
        let offset = tw.support(plane.normal());

        // entirely on one side
        if t1 >= offset + 1.0 && t2 >= offset + 1.0 {
            self.trace_through_tree(tw, node.children[0], p1f, p2f, p1, p2);
            return;
        }
        if t1 < -offset - 1.0 && t2 < -offset - 1.0 {
            self.trace_through_tree(tw, node.children[1], p1f, p2f, p1, p2);
            return;
        }

        // put the crosspoint SURFACE_CLIP_EPSILON units on the near side
        let (side, frac, frac2) = if t1 < t2 {
            let idist = 1.0 / (t1 - t2);
            (
                1,
                (t1 - offset + SURFACE_CLIP_EPSILON) * idist,
                (t1 + offset + SURFACE_CLIP_EPSILON) * idist,
            )
        } else if t1 > t2 {
            let idist = 1.0 / (t1 - t2);
            (
                0,
                (t1 + offset + SURFACE_CLIP_EPSILON) * idist,
                (t1 - offset - SURFACE_CLIP_EPSILON) * idist,
            )
        } else {
            (0, 1.0, 0.0)
        };

        let frac = frac.max(0.0).min(1.0);
        let frac2 = frac2.max(0.0).min(1.0);

        // move up to the node
        let midf = p1f + (p2f - p1f) * frac;
        let mid = p1 + (p2 - p1) * frac;
        self.trace_through_tree(tw, node.children[side], p1f, midf, p1, mid);

        // go past the node
        let midf = p1f + (p2f - p1f) * frac2;
        let mid = p1 + (p2 - p1) * frac2;
        self.trace_through_tree(tw, node.children[side ^ 1], midf, p2f, mid, p2);
    }

    /// Tests the start volume against the world or a model.
    fn position_test(&self, tw: &mut TraceWork, model: ModelHandle) {
        match model {
            ModelHandle::World | ModelHandle::Inline(0) => {
                let one = Vector3::new(1.0, 1.0, 1.0);
                let mins = tw.start + tw.size[0] - one;
                let maxs = tw.start + tw.size[1] + one;

                let leafs = self.box_leafs(mins, maxs, MAX_POSITION_LEAFS);
                for &leaf in leafs.leafs.iter() {
                    self.test_in_leaf(tw, &self.leaves[leaf]);
                    if tw.trace.all_solid {
                        break;
                    }
                }
            }

            ModelHandle::Inline(_) => {
                if let Some(leaf) = self.model_leaf(model) {
                    self.test_in_leaf(tw, leaf);
                }
            }

            ModelHandle::TempBox { mins, maxs } => {
                if tw.mask.intersects(ContentFlags::BODY) {
                    let sides = box_sides(mins, maxs);
                    test_box_in_brush(
                        tw,
                        &BrushRef {
                            sides: &sides,
                            contents: ContentFlags::BODY,
                            mins,
                            maxs,
                            geometry: None,
                        },
                    );
                }
            }

            ModelHandle::TempCapsule { mins, maxs } => {
                if tw.mask.intersects(ContentFlags::BODY) {
                    if tw.sphere.is_some() {
                        test_capsule_in_capsule(tw, mins, maxs);
                    } else {
                        test_bounding_box_in_capsule(tw, mins, maxs);
                    }
                }
            }
        }
    }

    /// Sweeps the start volume to the end against the world or a model.
    fn sweep(&self, tw: &mut TraceWork, model: ModelHandle) {
        match model {
            ModelHandle::World | ModelHandle::Inline(0) => {
                let (start, end) = (tw.start, tw.end);
                self.trace_through_tree(tw, NodeChild::Node(0), 0.0, 1.0, start, end);
            }

            ModelHandle::Inline(_) => {
                if let Some(leaf) = self.model_leaf(model) {
                    self.trace_through_leaf(tw, leaf);
                }
            }

            ModelHandle::TempBox { mins, maxs } => {
                if tw.mask.intersects(ContentFlags::BODY) {
                    let sides = box_sides(mins, maxs);
                    trace_through_brush(
                        tw,
                        &BrushRef {
                            sides: &sides,
                            contents: ContentFlags::BODY,
                            mins,
                            maxs,
                            geometry: None,
                        },
                    );
                }
            }

            ModelHandle::TempCapsule { mins, maxs } => {
                if tw.mask.intersects(ContentFlags::BODY) {
                    if tw.sphere.is_some() {
                        trace_capsule_through_capsule(tw, mins, maxs);
                    } else {
                        trace_bounding_box_through_capsule(tw, mins, maxs);
                    }
                }
            }
        }
    }

    fn trace(&self, req: &TraceRequest, sphere: Option<Sphere>) -> TraceResult {
        let work = |end| {
            TraceWork::new(
                req.start,
                end,
                req.mins,
                req.maxs,
                req.mask,
                req.capsule,
                sphere,
            )
        };

        // a start already in solid never moves
        let mut pw = work(req.start);
        self.position_test(&mut pw, req.model);
        if req.start == req.end || pw.trace.all_solid {
            let mut trace = pw.trace;
            trace.end_pos = req.start;
            return trace;
        }

        let mut tw = work(req.end);
        self.sweep(&mut tw, req.model);

        let mut trace = tw.trace;
        trace.end_pos = if trace.fraction == 1.0 {
            req.end
        } else {
            req.start + (req.end - req.start) * trace.fraction
        };

        trace!(
            "Trace {:?} -> {:?}: fraction {}",
            req.start,
            req.end,
            trace.fraction
        );

        trace
    }

    /// Traces a box, point or capsule through the requested model.
    pub fn box_trace(&self, req: &TraceRequest) -> TraceResult {
        self.trace(req, None)
    }

    /// Traces through a model placed at `origin` and rotated by `angles`.
    ///
    /// The segment is carried into the model's frame, traced there, and the contact plane is
    /// carried back out. Temporary boxes are never rotated.
    pub fn transformed_box_trace(
        &self,
        req: &TraceRequest,
        origin: Vector3<f32>,
        angles: Angles,
    ) -> TraceResult {
        let offset = (req.mins + req.maxs) * 0.5;
        let size = [req.mins - offset, req.maxs - offset];
        let mut start = req.start + offset - origin;
        let mut end = req.end + offset - origin;

        let is_box = match req.model {
            ModelHandle::TempBox { .. } => true,
            _ => false,
        };
        let rotated = !is_box && !angles.is_zero();

        let mut sphere = Sphere::fit(size[1]);
        let local_to_world = angles.mat3_local_to_world();
        if rotated {
            let world_to_local = local_to_world.transpose();
            start = world_to_local * start;
            end = world_to_local * end;
            sphere.offset = world_to_local * sphere.offset;
        }

        let local = TraceRequest {
            start,
            end,
            mins: size[0],
            maxs: size[1],
            ..*req
        };
        let mut trace = self.trace(&local, if req.capsule { Some(sphere) } else { None });

        trace.plane = trace.plane.map(|p| {
            let normal = if rotated {
                local_to_world * p.normal()
            } else {
                p.normal()
            };
            Hyperplane::from_normal(normal, p.dist() + normal.dot(origin))
        });

        trace.end_pos = req.start + (req.end - req.start) * trace.fraction;
        trace
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::common::bsp::{
        testmap::{flat_grid, TestMap},
        BspDialect, CollisionConfig,
    };

    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn load(map: &TestMap) -> CollisionModel {
        CollisionModel::load(
            "test",
            &map.build(BspDialect::Quake3),
            &CollisionConfig::default(),
        )
        .unwrap()
    }

    fn unit_box() -> (Vector3<f32>, Vector3<f32>) {
        (Vector3::new(-0.5, -0.5, -0.5), Vector3::new(0.5, 0.5, 0.5))
    }

    fn approx(a: f32, b: f32, epsilon: f32) -> bool {
        (a - b).abs() <= epsilon
    }

    #[test]
    fn test_box_onto_floor() {
        let cm = load(&TestMap::floor());
        let (mins, maxs) = unit_box();
        let trace = cm.box_trace(&TraceRequest::new(
            Vector3::new(0.0, 0.0, 10.0),
            Vector3::new(0.0, 0.0, -10.0),
            mins,
            maxs,
            ContentFlags::MASK_SOLID,
        ));

        assert!(approx(trace.fraction, 0.5, 0.05));
        assert!(approx(trace.fraction, (9.5 - SURFACE_CLIP_EPSILON) / 20.0, 1e-6));
        assert!(!trace.start_solid);
        assert!(!trace.all_solid);
        assert_eq!(trace.plane.unwrap().normal(), Vector3::unit_z());
        assert_eq!(trace.contents, ContentFlags::SOLID);
        assert_eq!(trace.surface_flags, SurfaceFlags::METALSTEPS);
        assert!(approx(trace.end_pos.z, 0.625, 1e-4));
    }

    #[test]
    fn test_point_onto_floor() {
        let cm = load(&TestMap::floor());
        let trace = cm.box_trace(&TraceRequest::point(
            Vector3::new(8.0, 8.0, 16.0),
            Vector3::new(8.0, 8.0, -16.0),
            ContentFlags::MASK_SOLID,
        ));
        assert!(approx(trace.fraction, (16.0 - SURFACE_CLIP_EPSILON) / 32.0, 1e-6));
    }

    #[test]
    fn test_miss_and_mask() {
        let cm = load(&TestMap::floor());
        let (mins, maxs) = unit_box();

        let miss = cm.box_trace(&TraceRequest::new(
            Vector3::new(0.0, 0.0, 10.0),
            Vector3::new(50.0, 0.0, 10.0),
            mins,
            maxs,
            ContentFlags::MASK_SOLID,
        ));
        assert_eq!(miss.fraction, 1.0);
        assert!(miss.plane.is_none());
        assert_eq!(miss.end_pos, Vector3::new(50.0, 0.0, 10.0));

        let water = cm.box_trace(&TraceRequest::new(
            Vector3::new(0.0, 0.0, 10.0),
            Vector3::new(0.0, 0.0, -10.0),
            mins,
            maxs,
            ContentFlags::MASK_WATER,
        ));
        assert_eq!(water.fraction, 1.0);
    }

    #[test]
    fn test_start_in_solid() {
        let cm = load(&TestMap::floor());
        let (mins, maxs) = unit_box();

        let trace = cm.box_trace(&TraceRequest::new(
            Vector3::new(0.0, 0.0, -8.0),
            Vector3::new(0.0, 0.0, 20.0),
            mins,
            maxs,
            ContentFlags::MASK_SOLID,
        ));
        assert_eq!(trace.fraction, 0.0);
        assert!(trace.start_solid);
        assert!(trace.all_solid);
        assert_eq!(trace.end_pos, Vector3::new(0.0, 0.0, -8.0));
    }

    #[test]
    fn test_position_only() {
        let cm = load(&TestMap::floor());
        let (mins, maxs) = unit_box();

        let inside = cm.box_trace(&TraceRequest::new(
            Vector3::new(0.0, 0.0, -8.0),
            Vector3::new(0.0, 0.0, -8.0),
            mins,
            maxs,
            ContentFlags::MASK_SOLID,
        ));
        assert!(inside.start_solid);
        assert_eq!(inside.fraction, 0.0);

        let outside = cm.box_trace(&TraceRequest::new(
            Vector3::new(0.0, 0.0, 8.0),
            Vector3::new(0.0, 0.0, 8.0),
            mins,
            maxs,
            ContentFlags::MASK_SOLID,
        ));
        assert!(!outside.start_solid);
        assert_eq!(outside.fraction, 1.0);
    }

    #[test]
    fn test_wall_symmetry() {
        let cm = load(&TestMap::floor().with_door());
        let half = Vector3::new(8.0, 8.0, 8.0);
        let a = Vector3::new(0.0, 0.0, 64.0);
        let b = Vector3::new(216.0, 0.0, 64.0);

        let ab = cm.box_trace(
            &TraceRequest::new(a, b, -half, half, ContentFlags::MASK_SOLID)
                .with_model(ModelHandle::Inline(1)),
        );
        let ba = cm.box_trace(
            &TraceRequest::new(b, a, -half, half, ContentFlags::MASK_SOLID)
                .with_model(ModelHandle::Inline(1)),
        );

        assert!(ab.is_hit() && ba.is_hit());
        assert!(approx(ab.fraction, ba.fraction, 1e-6));
        assert_eq!(ab.plane.unwrap().normal(), -ba.plane.unwrap().normal());

        // both contacts stop the same distance short of their faces
        let ab_contact = ab.end_pos.x + half.x;
        let ba_contact = ba.end_pos.x - half.x;
        assert!(approx(100.0 - ab_contact, ba_contact - 116.0, 1e-3));
        assert!(approx(ab.end_pos.x + ba.end_pos.x, a.x + b.x, 1e-3));
    }

    #[test]
    fn test_mask_monotonic() {
        let mut map = TestMap::floor();
        let water = map.add_shader("textures/liquids/water", SurfaceFlags::empty(), ContentFlags::WATER);
        let pool = map.add_box_brush(
            Vector3::new(-256.0, -256.0, 0.0),
            Vector3::new(256.0, 256.0, 64.0),
            water,
        );
        map.leaves[0].brushes.push(pool);
        let cm = load(&map);

        let narrow = ContentFlags::MASK_SOLID;
        let wide = ContentFlags::MASK_SOLID | ContentFlags::WATER;
        let (mins, maxs) = unit_box();
        let mut rng = SmallRng::seed_from_u64(42);

        for _ in 0..200 {
            let mut point = || {
                Vector3::new(
                    rng.gen_range(-400.0f32, 400.0),
                    rng.gen_range(-400.0f32, 400.0),
                    rng.gen_range(1.0f32, 200.0),
                )
            };
            let (start, end) = (point(), point());

            let narrow_trace = cm.box_trace(&TraceRequest::new(start, end, mins, maxs, narrow));
            let wide_trace = cm.box_trace(&TraceRequest::new(start, end, mins, maxs, wide));
            assert!(narrow_trace.fraction >= wide_trace.fraction);
        }
    }

    #[test]
    fn test_flat_patch_matches_brush() {
        let map = TestMap::floor().with_patch(3, 3, &flat_grid(3, 3, 32.0, 8.0));
        let cm = load(&map);
        let (mins, maxs) = unit_box();

        let trace = cm.box_trace(&TraceRequest::new(
            Vector3::new(32.0, 32.0, 20.0),
            Vector3::new(32.0, 32.0, 0.0),
            mins,
            maxs,
            ContentFlags::MASK_SOLID,
        ));

        // the same contact a brush with its top at z = 8 would give
        assert!(approx(trace.fraction, (11.5 - SURFACE_CLIP_EPSILON) / 20.0, 1e-5));
        let plane = trace.plane.unwrap();
        assert!(plane.approx_eq(&Hyperplane::axis_z(8.0), 1e-5, 1e-3));
        assert!(!trace.start_solid);

        // resting on the patch is not solid
        let rest = Vector3::new(32.0, 32.0, 8.5 + SURFACE_CLIP_EPSILON);
        let resting = cm.box_trace(&TraceRequest::new(
            rest,
            rest,
            mins,
            maxs,
            ContentFlags::MASK_SOLID,
        ));
        assert!(!resting.start_solid);
    }

    #[test]
    fn test_patch_switches() {
        let map = TestMap::floor().with_patch(3, 3, &flat_grid(3, 3, 32.0, 8.0));
        let data = map.build(BspDialect::Quake3);
        let (mins, maxs) = unit_box();
        let req = TraceRequest::new(
            Vector3::new(32.0, 32.0, 20.0),
            Vector3::new(32.0, 32.0, 0.0),
            mins,
            maxs,
            ContentFlags::MASK_SOLID,
        );

        let no_curves = CollisionConfig {
            no_curves: true,
            ..CollisionConfig::default()
        };
        let cm = CollisionModel::load("test", &data, &no_curves).unwrap();
        let trace = cm.box_trace(&req);

        // falls through to the floor
        assert!(approx(trace.fraction, (19.5 - SURFACE_CLIP_EPSILON) / 20.0, 1e-5));

        let point_clip = CollisionConfig {
            player_curve_clip: false,
            ..CollisionConfig::default()
        };
        let cm = CollisionModel::load("test", &data, &point_clip).unwrap();
        let trace = cm.box_trace(&req);

        // the box center stops at the patch
        assert!(approx(trace.fraction, (12.0 - SURFACE_CLIP_EPSILON) / 20.0, 1e-5));
    }

    #[test]
    fn test_patch_is_one_sided() {
        let map = TestMap::floor().with_patch(3, 3, &flat_grid(3, 3, 32.0, 8.0));
        let cm = load(&map);

        let up = cm.box_trace(&TraceRequest::point(
            Vector3::new(32.0, 32.0, 2.0),
            Vector3::new(32.0, 32.0, 30.0),
            ContentFlags::MASK_SOLID,
        ));
        assert_eq!(up.fraction, 1.0);

        let down = cm.box_trace(&TraceRequest::point(
            Vector3::new(32.0, 32.0, 30.0),
            Vector3::new(32.0, 32.0, 2.0),
            ContentFlags::MASK_SOLID,
        ));
        assert!(approx(down.fraction, (22.0 - SURFACE_CLIP_EPSILON) / 28.0, 1e-5));
    }

    #[test]
    fn test_trisoup_both_sides() {
        let verts = [
            Vector3::new(0.0, 0.0, 16.0),
            Vector3::new(0.0, 32.0, 16.0),
            Vector3::new(32.0, 0.0, 16.0),
        ];
        let cm = load(&TestMap::floor().with_trisoup(&verts, &[0, 1, 2]));

        let down = cm.box_trace(&TraceRequest::point(
            Vector3::new(8.0, 8.0, 32.0),
            Vector3::new(8.0, 8.0, 4.0),
            ContentFlags::MASK_SOLID,
        ));
        assert!(approx(down.fraction, (16.0 - SURFACE_CLIP_EPSILON) / 28.0, 1e-5));
        assert_eq!(down.plane.unwrap().normal(), Vector3::unit_z());
        assert_eq!(down.surface_flags, SurfaceFlags::DUST);

        let up = cm.box_trace(&TraceRequest::point(
            Vector3::new(8.0, 8.0, 4.0),
            Vector3::new(8.0, 8.0, 28.0),
            ContentFlags::MASK_SOLID,
        ));
        assert!(approx(up.fraction, (12.0 - SURFACE_CLIP_EPSILON) / 24.0, 1e-5));
        assert_eq!(up.plane.unwrap().normal(), -Vector3::unit_z());

        // boxes hit the back as well
        let half = Vector3::new(2.0, 2.0, 2.0);
        let boxed = cm.box_trace(&TraceRequest::new(
            Vector3::new(8.0, 8.0, 4.0),
            Vector3::new(8.0, 8.0, 28.0),
            -half,
            half,
            ContentFlags::MASK_SOLID,
        ));
        assert!(approx(boxed.fraction, (10.0 - SURFACE_CLIP_EPSILON) / 24.0, 1e-5));
        assert_eq!(boxed.plane.unwrap().normal(), -Vector3::unit_z());

        // passing beside the triangle misses it
        let beside = cm.box_trace(&TraceRequest::point(
            Vector3::new(30.0, 30.0, 32.0),
            Vector3::new(30.0, 30.0, 4.0),
            ContentFlags::MASK_SOLID,
        ));
        assert_eq!(beside.fraction, 1.0);
    }

    #[test]
    fn test_capsule_through_capsule() {
        let cm = load(&TestMap::floor());
        let mins = Vector3::new(-16.0, -16.0, -24.0);
        let maxs = Vector3::new(16.0, 16.0, 32.0);

        let trace = cm.box_trace(
            &TraceRequest::new(
                Vector3::new(-100.0, 0.0, 0.0),
                Vector3::new(100.0, 0.0, 0.0),
                mins,
                maxs,
                ContentFlags::MASK_PLAYERSOLID,
            )
            .with_model(ModelHandle::temp_box(mins, maxs, true))
            .with_capsule(true),
        );

        // the cylinders meet when the centers are 32 + 1 units apart
        assert!(approx(trace.fraction, 67.0 / 200.0, 1e-3));
        assert!(approx(trace.plane.unwrap().normal().x, -1.0, 1e-4));
        assert_eq!(trace.contents, ContentFlags::BODY);

        // overlapping capsules start solid
        let overlap = cm.box_trace(
            &TraceRequest::new(
                Vector3::new(-20.0, 0.0, 0.0),
                Vector3::new(100.0, 0.0, 0.0),
                mins,
                maxs,
                ContentFlags::MASK_PLAYERSOLID,
            )
            .with_model(ModelHandle::temp_box(mins, maxs, true))
            .with_capsule(true),
        );
        assert!(overlap.start_solid);
        assert_eq!(overlap.fraction, 0.0);
    }

    #[test]
    fn test_box_through_capsule() {
        let cm = load(&TestMap::floor());
        let mins = Vector3::new(-16.0, -16.0, -24.0);
        let maxs = Vector3::new(16.0, 16.0, 32.0);

        let trace = cm.box_trace(
            &TraceRequest::new(
                Vector3::new(-100.0, 0.0, 0.0),
                Vector3::new(100.0, 0.0, 0.0),
                mins,
                maxs,
                ContentFlags::MASK_PLAYERSOLID,
            )
            .with_model(ModelHandle::temp_box(mins, maxs, true)),
        );

        assert!(approx(trace.fraction, (68.0 - SURFACE_CLIP_EPSILON) / 200.0, 1e-4));
        assert_eq!(trace.plane.unwrap().normal(), -Vector3::unit_x());

        // the solid mask doesn't include bodies
        let ignored = cm.box_trace(
            &TraceRequest::new(
                Vector3::new(-100.0, 0.0, 0.0),
                Vector3::new(100.0, 0.0, 0.0),
                mins,
                maxs,
                ContentFlags::MASK_SOLID,
            )
            .with_model(ModelHandle::temp_box(mins, maxs, true)),
        );
        assert_eq!(ignored.fraction, 1.0);
    }

    #[test]
    fn test_flat_box_is_not_a_point() {
        let mut map = TestMap::floor();
        let pillar = map.add_box_brush(
            Vector3::new(64.0, -16.0, 0.0),
            Vector3::new(96.0, 16.0, 64.0),
            0,
        );
        map.leaves[0].brushes.push(pillar);
        let cm = load(&map);

        let start = Vector3::new(0.0, 24.0, 32.0);
        let end = Vector3::new(128.0, 24.0, 32.0);

        // the center passes beside the pillar
        let point = cm.box_trace(&TraceRequest::point(start, end, ContentFlags::MASK_SOLID));
        assert_eq!(point.fraction, 1.0);

        // a box with no height still sweeps its full width
        let flat = cm.box_trace(&TraceRequest::new(
            start,
            end,
            Vector3::new(-16.0, -16.0, 0.0),
            Vector3::new(16.0, 16.0, 0.0),
            ContentFlags::MASK_SOLID,
        ));
        assert!(approx(flat.fraction, (48.0 - SURFACE_CLIP_EPSILON) / 128.0, 1e-4));
        assert_eq!(flat.plane.unwrap().normal(), -Vector3::unit_x());
    }

    #[test]
    fn test_capsule_onto_floor() {
        let cm = load(&TestMap::floor());
        let mins = Vector3::new(-16.0, -16.0, -24.0);
        let maxs = Vector3::new(16.0, 16.0, 32.0);

        let trace = cm.box_trace(
            &TraceRequest::new(
                Vector3::new(0.0, 0.0, 100.0),
                Vector3::new(0.0, 0.0, 0.0),
                mins,
                maxs,
                ContentFlags::MASK_PLAYERSOLID,
            )
            .with_capsule(true),
        );

        // the bottom of the capsule sits 24 units below its origin
        assert!(approx(trace.end_pos.z, 24.0 + SURFACE_CLIP_EPSILON, 1e-3));
        assert_eq!(trace.plane.unwrap().normal(), Vector3::unit_z());
    }

    #[test]
    fn test_capsule_rounds_slanted_edge() {
        let mut map = TestMap::floor();
        let wedge = map.add_box_brush(
            Vector3::new(0.0, -64.0, 0.0),
            Vector3::new(64.0, 64.0, 64.0),
            0,
        );
        let n = Vector3::new(1.0, 0.0, 1.0).normalize();
        map.add_brush_side(wedge, n, 96.0 * n.x);
        map.leaves[0].brushes.push(wedge);
        let cm = load(&map);

        let mins = Vector3::new(-8.0, -8.0, -8.0);
        let maxs = Vector3::new(8.0, 8.0, 8.0);

        // dropping onto the slope well inside the face
        let on_face = cm.box_trace(
            &TraceRequest::new(
                Vector3::new(40.0, 0.0, 120.0),
                Vector3::new(40.0, 0.0, 40.0),
                mins,
                maxs,
                ContentFlags::MASK_SOLID,
            )
            .with_capsule(true),
        );
        assert!(on_face.is_hit());
        assert!(approx(on_face.plane.unwrap().normal().dot(n), 1.0, 1e-4));

        // The slope meets the top face along x = 32, z = 64. A sphere of radius 24 pushed out
        // along the slope normal overreaches near that edge, where the rounded edge is 25 units
        // out.
        let mins = Vector3::new(-24.0, -24.0, -24.0);
        let maxs = Vector3::new(24.0, 24.0, 24.0);
        let grazing = TraceRequest::new(
            Vector3::new(100.0, 0.0, 87.5),
            Vector3::new(42.0, 0.0, 87.5),
            mins,
            maxs,
            ContentFlags::MASK_SOLID,
        );

        // the box hits the expanded slope, the sphere stays clear of the edge
        let box_past = cm.box_trace(&grazing);
        assert!(box_past.is_hit());
        let past = cm.box_trace(&grazing.with_capsule(true));
        assert_eq!(past.fraction, 1.0);
        assert!(past.plane.is_none());

        // head-on into the edge, contact is where the center comes within 25 units of it
        let into_edge = cm.box_trace(
            &TraceRequest::new(
                Vector3::new(100.0, 0.0, 86.0),
                Vector3::new(0.0, 0.0, 86.0),
                mins,
                maxs,
                ContentFlags::MASK_SOLID,
            )
            .with_capsule(true),
        );
        let contact_x = 32.0 + (25.0f32 * 25.0 - 22.0 * 22.0).sqrt();
        assert!(approx(into_edge.fraction, (100.0 - contact_x) / 100.0, 1e-3));
        assert!(approx(into_edge.end_pos.x, contact_x, 0.1));

        let normal = into_edge.plane.unwrap().normal();
        let expected = Vector3::new(contact_x - 32.0, 0.0, 22.0) / 25.0;
        assert!((normal - expected).magnitude() < 1e-3);
    }

    #[test]
    fn test_transformed_trace() {
        let cm = load(&TestMap::floor().with_door());
        let half = Vector3::new(8.0, 8.0, 8.0);

        // the door swung a quarter turn now blocks motion along +y
        let trace = cm.transformed_box_trace(
            &TraceRequest::new(
                Vector3::new(0.0, 0.0, 64.0),
                Vector3::new(0.0, 216.0, 64.0),
                -half,
                half,
                ContentFlags::MASK_SOLID,
            )
            .with_model(ModelHandle::Inline(1)),
            Vector3::zero(),
            Angles::new(0.0, 90.0, 0.0),
        );

        assert!(trace.is_hit());
        let plane = trace.plane.unwrap();
        assert!((plane.normal() - Vector3::new(0.0, -1.0, 0.0)).magnitude() < 1e-4);
        assert!(approx(plane.dist(), -100.0, 1e-3));
        assert!(approx(trace.end_pos.y, 100.0 - 8.0 - SURFACE_CLIP_EPSILON, 1e-2));

        // translated only
        let lifted = cm.transformed_box_trace(
            &TraceRequest::new(
                Vector3::new(0.0, 0.0, 564.0),
                Vector3::new(216.0, 0.0, 564.0),
                -half,
                half,
                ContentFlags::MASK_SOLID,
            )
            .with_model(ModelHandle::Inline(1)),
            Vector3::new(0.0, 0.0, 500.0),
            Angles::zero(),
        );
        assert!(lifted.is_hit());
        assert!(approx(lifted.end_pos.x, 100.0 - 8.0 - SURFACE_CLIP_EPSILON, 1e-3));
        assert!(approx(lifted.plane.unwrap().dist(), -100.0, 1e-3));
    }

    #[test]
    fn test_temp_box_trace() {
        let cm = load(&TestMap::floor());
        let target = ModelHandle::temp_box(
            Vector3::new(-16.0, -16.0, 0.0),
            Vector3::new(16.0, 16.0, 56.0),
            false,
        );

        let trace = cm.box_trace(
            &TraceRequest::point(
                Vector3::new(-64.0, 0.0, 32.0),
                Vector3::new(64.0, 0.0, 32.0),
                ContentFlags::MASK_SHOT,
            )
            .with_model(target),
        );
        assert!(approx(trace.fraction, (48.0 - SURFACE_CLIP_EPSILON) / 128.0, 1e-5));
        assert_eq!(trace.contents, ContentFlags::BODY);
    }
}
