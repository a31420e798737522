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

use std::io::Cursor;

use crate::common::{
    bsp::{
        area::{AreaPortals, MAX_MAP_AREAS},
        patch::{PatchCollide, PatchGrid},
        plane::PlanePool,
        trisoup::TriSoup,
        BrushGeometry, BspBrush, BspBrushSide, BspDialect, BspError, BspErrorKind, BspLeaf,
        BspNode, BspShader, BspSubmodel, BspSurface, CollisionConfig, CollisionModel,
        ContentFlags, NodeChild, SurfaceCollide, SurfaceFlags,
    },
    math::{self, Hyperplane, PlaneType, MAX_WORLD_COORD},
};

use byteorder::{LittleEndian, ReadBytesExt};
use cgmath::{InnerSpace, Vector3};
use num::FromPrimitive;

const SHADER_SIZE: usize = 72;
const PLANE_SIZE: usize = 16;
const NODE_SIZE: usize = 36;
const LEAF_SIZE: usize = 48;
const INDEX_SIZE: usize = 4;
const MODEL_SIZE: usize = 40;
const BRUSH_SIZE: usize = 12;

const SHADER_NAME_MAX: usize = 64;

const MST_PATCH: i32 = 2;
const MST_TRIANGLE_SOUP: i32 = 3;

/// Vertices this close together are merged when building brush geometry.
const VERTEX_EPSILON: f32 = 0.01;

#[derive(Copy, Clone, Debug, FromPrimitive)]
enum BspLumpId {
    Entities = 0,
    Shaders = 1,
    Planes = 2,
    Nodes = 3,
    Leaves = 4,
    LeafSurfaces = 5,
    LeafBrushes = 6,
    Models = 7,
    Brushes = 8,
    BrushSides = 9,
    DrawVerts = 10,
    DrawIndexes = 11,
    Fogs = 12,
    Surfaces = 13,
    Lightmaps = 14,
    LightGrid = 15,
    Visibility = 16,
    LightArray = 17,
}

struct BspLump {
    offset: usize,
    size: usize,
}

struct LumpTable<'a> {
    data: &'a [u8],
    lumps: Vec<BspLump>,
}

impl<'a> LumpTable<'a> {
    fn bytes(&self, id: BspLumpId) -> &'a [u8] {
        let lump = &self.lumps[id as usize];
        &self.data[lump.offset..lump.offset + lump.size]
    }

    /// Returns the number of `record`-sized entries in the lump.
    fn count(&self, id: BspLumpId, record: usize) -> Result<usize, BspError> {
        let size = self.lumps[id as usize].size;
        if size % record != 0 {
            return Err(BspErrorKind::BadLumpSize {
                lump: id as usize,
                size,
                record,
            }
            .into());
        }

        Ok(size / record)
    }

    fn count_nonempty(&self, id: BspLumpId, record: usize) -> Result<usize, BspError> {
        match self.count(id, record)? {
            0 => Err(BspErrorKind::EmptyLump(id as usize).into()),
            n => Ok(n),
        }
    }
}

fn check_index(what: &'static str, index: i32, count: usize) -> Result<usize, BspError> {
    if index < 0 || index as usize >= count {
        return Err(BspError::bad_index(what, index as i64, count));
    }

    Ok(index as usize)
}

/// Validates the range `first..first + len` against `count`.
fn check_range(
    what: &'static str,
    first: i32,
    len: i32,
    count: usize,
) -> Result<(usize, usize), BspError> {
    if first < 0 || len < 0 {
        return Err(BspError::bad_index(what, first.min(len) as i64, count));
    }

    if first as usize + len as usize > count {
        return Err(BspError::bad_index(
            what,
            first as i64 + len as i64 - 1,
            count,
        ));
    }

    Ok((first as usize, len as usize))
}

fn read_vector<R>(reader: &mut R) -> Result<Vector3<f32>, BspError>
where
    R: ReadBytesExt,
{
    Ok(Vector3::new(
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ))
}

fn load_lumps(data: &[u8]) -> Result<(BspDialect, LumpTable), BspError> {
    if data.len() < 8 {
        return Err(BspErrorKind::TruncatedHeader.into());
    }

    let mut reader = Cursor::new(data);
    let mut magic = [0u8; 4];
    for b in magic.iter_mut() {
        *b = reader.read_u8()?;
    }
    let version = reader.read_i32::<LittleEndian>()?;
    let dialect = BspDialect::from_header(magic, version)?;

    if data.len() < dialect.header_size() {
        return Err(BspErrorKind::TruncatedHeader.into());
    }

    let mut lumps = Vec::with_capacity(dialect.lump_count());
    for l in 0..dialect.lump_count() {
        let offset = reader.read_i32::<LittleEndian>()?;
        let size = reader.read_i32::<LittleEndian>()?;

        debug!(
            "{: <14} Offset = 0x{:>08x} | Size = 0x{:>08x}",
            match BspLumpId::from_usize(l) {
                Some(id) => format!("{:?}:", id),
                None => format!("{}:", l),
            },
            offset,
            size
        );

        if offset < 0 || size < 0 || offset as usize + size as usize > data.len() {
            return Err(BspErrorKind::LumpOutOfBounds(l).into());
        }

        lumps.push(BspLump {
            offset: offset as usize,
            size: size as usize,
        });
    }

    Ok((dialect, LumpTable { data, lumps }))
}

fn load_entities(table: &LumpTable) -> String {
    let bytes = table.bytes(BspLumpId::Entities);
    let len = bytes.iter().position(|&b| b == 0).unwrap_or_else(|| bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

fn load_shaders(table: &LumpTable) -> Result<Vec<BspShader>, BspError> {
    let count = table.count_nonempty(BspLumpId::Shaders, SHADER_SIZE)?;
    let mut reader = Cursor::new(table.bytes(BspLumpId::Shaders));

    let mut shaders = Vec::with_capacity(count);
    for _ in 0..count {
        let mut name_bytes = [0u8; SHADER_NAME_MAX];
        for b in name_bytes.iter_mut() {
            *b = reader.read_u8()?;
        }
        let len = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SHADER_NAME_MAX);

        let surface_flags = reader.read_i32::<LittleEndian>()? as u32;
        let contents = reader.read_i32::<LittleEndian>()? as u32;

        shaders.push(BspShader {
            name: String::from_utf8_lossy(&name_bytes[..len]).into_owned(),
            surface_flags: SurfaceFlags::from_bits_truncate(surface_flags),
            contents: ContentFlags::from_bits_truncate(contents),
        });
    }

    Ok(shaders)
}

/// Loads and pools the plane lump, returning the pooled planes and the file-to-pool mapping.
fn load_planes(table: &LumpTable) -> Result<(Vec<Hyperplane>, Vec<usize>), BspError> {
    let count = table.count_nonempty(BspLumpId::Planes, PLANE_SIZE)?;
    let mut reader = Cursor::new(table.bytes(BspLumpId::Planes));

    let mut pool = PlanePool::for_map();
    let mut remap = Vec::with_capacity(count);
    for _ in 0..count {
        let normal = read_vector(&mut reader)?;
        let dist = reader.read_f32::<LittleEndian>()?;
        remap.push(pool.insert(Hyperplane::new(normal, dist)));
    }

    debug!("Pooled {} planes into {}", count, pool.len());

    Ok((pool.into_planes(), remap))
}

fn load_brush_sides(
    table: &LumpTable,
    dialect: BspDialect,
    planes: &[Hyperplane],
    plane_remap: &[usize],
    shaders: &[BspShader],
) -> Result<Vec<BspBrushSide>, BspError> {
    let size = dialect.brush_side_size();
    let count = table.count(BspLumpId::BrushSides, size)?;
    let mut reader = Cursor::new(table.bytes(BspLumpId::BrushSides));

    let mut sides = Vec::with_capacity(count);
    for _ in 0..count {
        let plane_num = reader.read_i32::<LittleEndian>()?;
        let shader_num = reader.read_i32::<LittleEndian>()?;
        if dialect == BspDialect::Raven {
            // draw surface index
            reader.read_i32::<LittleEndian>()?;
        }

        let plane_id = plane_remap[check_index("plane", plane_num, plane_remap.len())?];
        let (shader_id, surface_flags) = match shader_num {
            -1 => (None, SurfaceFlags::empty()),
            s => {
                let id = check_index("shader", s, shaders.len())?;
                (Some(id), shaders[id].surface_flags)
            }
        };

        sides.push(BspBrushSide {
            plane_id,
            plane: planes[plane_id],
            shader_id,
            surface_flags,
        });
    }

    Ok(sides)
}

/// Computes the corners and edges of a convex brush from its side planes.
fn brush_geometry(sides: &[BspBrushSide]) -> BrushGeometry {
    let mut vertices: Vec<Vector3<f32>> = Vec::new();

    for i in 0..sides.len() {
        for j in i + 1..sides.len() {
            for k in j + 1..sides.len() {
                let p = match math::intersect_planes(&sides[i].plane, &sides[j].plane, &sides[k].plane)
                {
                    Some(p) => p,
                    None => continue,
                };

                if sides.iter().any(|s| s.plane.point_dist(p) > VERTEX_EPSILON) {
                    continue;
                }

                if vertices
                    .iter()
                    .all(|v| (v - p).magnitude() > VERTEX_EPSILON)
                {
                    vertices.push(p);
                }
            }
        }
    }

    let mut edges = Vec::new();
    for i in 0..sides.len() {
        for j in i + 1..sides.len() {
            let dir = sides[i].plane.normal().cross(sides[j].plane.normal());
            if dir.magnitude2() < 1e-6 {
                continue;
            }

            let on_both: Vec<Vector3<f32>> = vertices
                .iter()
                .filter(|v| {
                    sides[i].plane.point_dist(**v).abs() <= VERTEX_EPSILON
                        && sides[j].plane.point_dist(**v).abs() <= VERTEX_EPSILON
                })
                .cloned()
                .collect();

            if on_both.len() < 2 {
                continue;
            }

            let mut lo = on_both[0];
            let mut hi = on_both[0];
            for &v in on_both.iter() {
                if v.dot(dir) < lo.dot(dir) {
                    lo = v;
                }
                if v.dot(dir) > hi.dot(dir) {
                    hi = v;
                }
            }
            edges.push((lo, hi));
        }
    }

    BrushGeometry { vertices, edges }
}

fn load_brushes(
    table: &LumpTable,
    sides: &[BspBrushSide],
    shaders: &[BspShader],
) -> Result<Vec<BspBrush>, BspError> {
    let count = table.count(BspLumpId::Brushes, BRUSH_SIZE)?;
    let mut reader = Cursor::new(table.bytes(BspLumpId::Brushes));

    let mut brushes = Vec::with_capacity(count);
    for _ in 0..count {
        let first_side = reader.read_i32::<LittleEndian>()?;
        let num_sides = reader.read_i32::<LittleEndian>()?;
        let shader_id = check_index("shader", reader.read_i32::<LittleEndian>()?, shaders.len())?;
        let (side_id, side_count) = check_range("brush side", first_side, num_sides, sides.len())?;
        let brush_sides = &sides[side_id..side_id + side_count];

        let mut mins = Vector3::new(-MAX_WORLD_COORD, -MAX_WORLD_COORD, -MAX_WORLD_COORD);
        let mut maxs = -mins;
        let mut axial = true;
        for side in brush_sides.iter() {
            match side.plane.kind() {
                PlaneType::Axial(a) => {
                    let a = a as usize;
                    if side.plane.normal()[a] > 0.0 {
                        maxs[a] = maxs[a].min(side.plane.dist());
                    } else {
                        mins[a] = mins[a].max(-side.plane.dist());
                    }
                }
                _ => axial = false,
            }
        }

        let geometry = if axial {
            None
        } else {
            Some(brush_geometry(brush_sides))
        };

        brushes.push(BspBrush {
            shader_id,
            contents: shaders[shader_id].contents,
            mins,
            maxs,
            side_id,
            side_count,
            geometry,
        });
    }

    Ok(brushes)
}

fn load_indexes(
    table: &LumpTable,
    id: BspLumpId,
    what: &'static str,
    target_count: usize,
) -> Result<Vec<usize>, BspError> {
    let count = table.count(id, INDEX_SIZE)?;
    let mut reader = Cursor::new(table.bytes(id));

    let mut indexes = Vec::with_capacity(count);
    for _ in 0..count {
        indexes.push(check_index(
            what,
            reader.read_i32::<LittleEndian>()?,
            target_count,
        )?);
    }

    Ok(indexes)
}

fn load_draw_verts(table: &LumpTable, dialect: BspDialect) -> Result<Vec<Vector3<f32>>, BspError> {
    let size = dialect.draw_vert_size();
    let count = table.count(BspLumpId::DrawVerts, size)?;
    let bytes = table.bytes(BspLumpId::DrawVerts);

    let mut verts = Vec::with_capacity(count);
    for i in 0..count {
        // only the position matters for collision
        let mut reader = Cursor::new(&bytes[i * size..]);
        verts.push(read_vector(&mut reader)?);
    }

    Ok(verts)
}

fn load_draw_indexes(table: &LumpTable) -> Result<Vec<i32>, BspError> {
    let count = table.count(BspLumpId::DrawIndexes, INDEX_SIZE)?;
    let mut reader = Cursor::new(table.bytes(BspLumpId::DrawIndexes));

    let mut indexes = Vec::with_capacity(count);
    for _ in 0..count {
        indexes.push(reader.read_i32::<LittleEndian>()?);
    }

    Ok(indexes)
}

fn load_surfaces(
    table: &LumpTable,
    dialect: BspDialect,
    shaders: &[BspShader],
    verts: &[Vector3<f32>],
    draw_indexes: &[i32],
    config: &CollisionConfig,
) -> Result<Vec<Option<BspSurface>>, BspError> {
    let size = dialect.surface_size();
    let count = table.count(BspLumpId::Surfaces, size)?;
    let bytes = table.bytes(BspLumpId::Surfaces);

    let mut surfaces = Vec::with_capacity(count);
    let mut patch_count = 0;
    let mut soup_count = 0;

    for surface_id in 0..count {
        let mut reader = Cursor::new(&bytes[surface_id * size..(surface_id + 1) * size]);

        let shader_num = reader.read_i32::<LittleEndian>()?;
        let _fog_num = reader.read_i32::<LittleEndian>()?;
        let surface_type = reader.read_i32::<LittleEndian>()?;
        let first_vert = reader.read_i32::<LittleEndian>()?;
        let num_verts = reader.read_i32::<LittleEndian>()?;
        let first_index = reader.read_i32::<LittleEndian>()?;
        let num_indexes = reader.read_i32::<LittleEndian>()?;

        reader.set_position((size - 8) as u64);
        let width = reader.read_i32::<LittleEndian>()?;
        let height = reader.read_i32::<LittleEndian>()?;

        let collide = match surface_type {
            MST_PATCH => {
                let (first, len) = check_range("vertex", first_vert, num_verts, verts.len())?;
                let control = PatchGrid::new(width, height, verts[first..first + len].to_vec())
                    .ok_or(BspErrorKind::BadPatch {
                        surface: surface_id,
                        width,
                        height,
                    })?;
                patch_count += 1;
                SurfaceCollide::Patch(PatchCollide::generate(
                    &control,
                    config.patch_subdivide_tolerance,
                ))
            }

            MST_TRIANGLE_SOUP => {
                let (first, len) = check_range("vertex", first_vert, num_verts, verts.len())?;
                let (index_first, index_len) =
                    check_range("index", first_index, num_indexes, draw_indexes.len())?;

                let mut triangles = Vec::with_capacity(index_len / 3);
                for tri in draw_indexes[index_first..index_first + index_len].chunks(3) {
                    if tri.len() < 3 {
                        warn!("Surface {} has a trailing partial triangle", surface_id);
                        break;
                    }

                    triangles.push([
                        check_index("vertex", tri[0], len)?,
                        check_index("vertex", tri[1], len)?,
                        check_index("vertex", tri[2], len)?,
                    ]);
                }

                soup_count += 1;
                SurfaceCollide::TriSoup(TriSoup::new(verts[first..first + len].to_vec(), triangles))
            }

            _ => {
                surfaces.push(None);
                continue;
            }
        };

        let shader_id = check_index("shader", shader_num, shaders.len())?;
        surfaces.push(Some(BspSurface {
            shader_id,
            contents: shaders[shader_id].contents,
            surface_flags: shaders[shader_id].surface_flags,
            collide,
        }));
    }

    debug!(
        "Loaded {} surfaces ({} patches, {} triangle soups)",
        count, patch_count, soup_count
    );

    Ok(surfaces)
}

fn load_leaves(
    table: &LumpTable,
    leaf_brush_count: usize,
    leaf_surface_count: usize,
) -> Result<Vec<BspLeaf>, BspError> {
    let count = table.count_nonempty(BspLumpId::Leaves, LEAF_SIZE)?;
    let mut reader = Cursor::new(table.bytes(BspLumpId::Leaves));

    let mut leaves = Vec::with_capacity(count);
    for _ in 0..count {
        let cluster = reader.read_i32::<LittleEndian>()?;
        let area = reader.read_i32::<LittleEndian>()?;

        // integer bounds are recomputed from the tree
        for _ in 0..6 {
            reader.read_i32::<LittleEndian>()?;
        }

        let first_surface = reader.read_i32::<LittleEndian>()?;
        let num_surfaces = reader.read_i32::<LittleEndian>()?;
        let first_brush = reader.read_i32::<LittleEndian>()?;
        let num_brushes = reader.read_i32::<LittleEndian>()?;

        let (leaf_surface_id, leaf_surface_count) =
            check_range("leaf surface", first_surface, num_surfaces, leaf_surface_count)?;
        let (leaf_brush_id, leaf_brush_count) =
            check_range("leaf brush", first_brush, num_brushes, leaf_brush_count)?;

        let area = if area < 0 {
            None
        } else {
            Some(check_index("area", area, MAX_MAP_AREAS)?)
        };

        leaves.push(BspLeaf {
            cluster: if cluster < 0 { None } else { Some(cluster as usize) },
            area,
            leaf_brush_id,
            leaf_brush_count,
            leaf_surface_id,
            leaf_surface_count,
            ..BspLeaf::empty()
        });
    }

    Ok(leaves)
}

fn load_nodes(
    table: &LumpTable,
    plane_remap: &[usize],
    leaf_count: usize,
) -> Result<Vec<BspNode>, BspError> {
    let count = table.count_nonempty(BspLumpId::Nodes, NODE_SIZE)?;
    let mut reader = Cursor::new(table.bytes(BspLumpId::Nodes));

    let mut nodes = Vec::with_capacity(count);
    for node_id in 0..count {
        let plane_id = plane_remap[check_index(
            "plane",
            reader.read_i32::<LittleEndian>()?,
            plane_remap.len(),
        )?];

        let mut children = [NodeChild::Leaf(0); 2];
        for child in children.iter_mut() {
            // a negative child c refers to leaf -1 - c; node children must follow their parent
            *child = match reader.read_i32::<LittleEndian>()? {
                c if c < 0 => NodeChild::Leaf(check_index("leaf", -1 - c, leaf_count)?),
                c if c as usize <= node_id => {
                    return Err(BspError::bad_index("node", c as i64, count));
                }
                c => NodeChild::Node(check_index("node", c, count)?),
            };
        }

        for _ in 0..6 {
            reader.read_i32::<LittleEndian>()?;
        }

        nodes.push(BspNode { plane_id, children });
    }

    Ok(nodes)
}

/// Fills in leaf bounds by narrowing the world box with each axial plane on the way down.
fn compute_leaf_bounds(nodes: &[BspNode], planes: &[Hyperplane], leaves: &mut [BspLeaf]) {
    let world = Vector3::new(MAX_WORLD_COORD, MAX_WORLD_COORD, MAX_WORLD_COORD);
    let mut stack = vec![(NodeChild::Node(0), -world, world)];

    while let Some((child, mins, maxs)) = stack.pop() {
        let node_id = match child {
            NodeChild::Leaf(l) => {
                leaves[l].mins = mins;
                leaves[l].maxs = maxs;
                continue;
            }
            NodeChild::Node(n) => n,
        };

        let node = &nodes[node_id];
        let plane = &planes[node.plane_id];
        let (mut front_mins, mut front_maxs) = (mins, maxs);
        let (mut back_mins, mut back_maxs) = (mins, maxs);

        if let PlaneType::Axial(a) = plane.kind() {
            let a = a as usize;
            if plane.normal()[a] > 0.0 {
                front_mins[a] = front_mins[a].max(plane.dist());
                back_maxs[a] = back_maxs[a].min(plane.dist());
            } else {
                front_maxs[a] = front_maxs[a].min(-plane.dist());
                back_mins[a] = back_mins[a].max(-plane.dist());
            }
        }

        stack.push((node.children[0], front_mins, front_maxs));
        stack.push((node.children[1], back_mins, back_maxs));
    }
}

fn load_submodels(
    table: &LumpTable,
    brushes: &[BspBrush],
    surfaces: &[Option<BspSurface>],
    leaf_brushes: &mut Vec<usize>,
    leaf_surfaces: &mut Vec<usize>,
) -> Result<Vec<BspSubmodel>, BspError> {
    let count = table.count_nonempty(BspLumpId::Models, MODEL_SIZE)?;
    let mut reader = Cursor::new(table.bytes(BspLumpId::Models));

    let mut submodels = Vec::with_capacity(count);
    for _ in 0..count {
        let file_mins = read_vector(&mut reader)?;
        let file_maxs = read_vector(&mut reader)?;
        let first_surface = reader.read_i32::<LittleEndian>()?;
        let num_surfaces = reader.read_i32::<LittleEndian>()?;
        let first_brush = reader.read_i32::<LittleEndian>()?;
        let num_brushes = reader.read_i32::<LittleEndian>()?;

        let (surface_id, surface_count) =
            check_range("surface", first_surface, num_surfaces, surfaces.len())?;
        let (brush_id, brush_count) = check_range("brush", first_brush, num_brushes, brushes.len())?;

        let mut corners = Vec::new();
        for brush in brushes[brush_id..brush_id + brush_count].iter() {
            corners.push(brush.mins);
            corners.push(brush.maxs);
        }
        for surface in surfaces[surface_id..surface_id + surface_count].iter() {
            let collide = match *surface {
                Some(BspSurface {
                    collide: SurfaceCollide::Patch(ref p),
                    ..
                }) => &p.collide,
                Some(BspSurface {
                    collide: SurfaceCollide::TriSoup(ref t),
                    ..
                }) => &t.collide,
                None => continue,
            };
            corners.push(collide.mins);
            corners.push(collide.maxs);
        }

        let (mut mins, mut maxs) = if corners.is_empty() {
            (file_mins, file_maxs)
        } else {
            math::bounds(corners.iter())
        };

        // spread the bounds so they always touch the geometry
        mins -= Vector3::new(1.0, 1.0, 1.0);
        maxs += Vector3::new(1.0, 1.0, 1.0);

        let leaf = BspLeaf {
            leaf_brush_id: leaf_brushes.len(),
            leaf_brush_count: brush_count,
            leaf_surface_id: leaf_surfaces.len(),
            leaf_surface_count: surface_count,
            mins,
            maxs,
            ..BspLeaf::empty()
        };
        leaf_brushes.extend(brush_id..brush_id + brush_count);
        leaf_surfaces.extend(surface_id..surface_id + surface_count);

        submodels.push(BspSubmodel { mins, maxs, leaf });
    }

    Ok(submodels)
}

/// Loads the cluster visibility rows, returning the cluster count, row size and rows.
fn load_visibility(
    table: &LumpTable,
    leaves: &[BspLeaf],
) -> Result<(usize, usize, Vec<u8>, bool), BspError> {
    let bytes = table.bytes(BspLumpId::Visibility);

    if bytes.is_empty() {
        let num_clusters = leaves
            .iter()
            .filter_map(|l| l.cluster)
            .max()
            .map_or(0, |c| c + 1);
        let cluster_bytes = (num_clusters + 31) & !31;
        return Ok((num_clusters, cluster_bytes, vec![0xFF; cluster_bytes], false));
    }

    let mut reader = Cursor::new(bytes);
    let num_clusters = reader.read_i32::<LittleEndian>()?;
    let cluster_bytes = reader.read_i32::<LittleEndian>()?;
    if num_clusters < 0 || cluster_bytes < 0 {
        return Err(BspErrorKind::Truncated.into());
    }

    let (num_clusters, cluster_bytes) = (num_clusters as usize, cluster_bytes as usize);
    let rows = &bytes[8..];
    if rows.len() < num_clusters * cluster_bytes {
        return Err(BspErrorKind::Truncated.into());
    }

    for leaf in leaves.iter() {
        if let Some(c) = leaf.cluster {
            if c >= num_clusters {
                return Err(BspError::bad_index("cluster", c as i64, num_clusters));
            }
        }
    }

    Ok((
        num_clusters,
        cluster_bytes,
        rows[..num_clusters * cluster_bytes].to_vec(),
        true,
    ))
}

/// Parses a map file into a collision model.
pub fn load(name: &str, data: &[u8], config: &CollisionConfig) -> Result<CollisionModel, BspError> {
    let (dialect, table) = load_lumps(data)?;
    debug!("Loading {} ({:?})", name, dialect);

    let entities = load_entities(&table);
    let shaders = load_shaders(&table)?;
    let (planes, plane_remap) = load_planes(&table)?;
    let brush_sides = load_brush_sides(&table, dialect, &planes, &plane_remap, &shaders)?;
    let brushes = load_brushes(&table, &brush_sides, &shaders)?;
    let mut leaf_brushes = load_indexes(&table, BspLumpId::LeafBrushes, "brush", brushes.len())?;

    let verts = load_draw_verts(&table, dialect)?;
    let draw_indexes = load_draw_indexes(&table)?;
    let surfaces = load_surfaces(&table, dialect, &shaders, &verts, &draw_indexes, config)?;
    let mut leaf_surfaces =
        load_indexes(&table, BspLumpId::LeafSurfaces, "surface", surfaces.len())?;

    let mut leaves = load_leaves(&table, leaf_brushes.len(), leaf_surfaces.len())?;
    let nodes = load_nodes(&table, &plane_remap, leaves.len())?;
    compute_leaf_bounds(&nodes, &planes, &mut leaves);

    let submodels = load_submodels(
        &table,
        &brushes,
        &surfaces,
        &mut leaf_brushes,
        &mut leaf_surfaces,
    )?;

    let (num_clusters, cluster_bytes, visibility, vised) = load_visibility(&table, &leaves)?;

    let num_areas = leaves
        .iter()
        .filter_map(|l| l.area)
        .max()
        .map_or(1, |a| a + 1);

    debug!(
        "Loaded {}: {} planes, {} nodes, {} leaves, {} brushes, {} submodels, {} clusters, {} areas",
        name,
        planes.len(),
        nodes.len(),
        leaves.len(),
        brushes.len(),
        submodels.len(),
        num_clusters,
        num_areas
    );

    Ok(CollisionModel {
        name: name.to_owned(),
        dialect,
        config: config.clone(),
        entities,
        shaders,
        planes,
        nodes,
        leaves,
        leaf_brushes,
        leaf_surfaces,
        brush_sides,
        brushes,
        surfaces,
        submodels,
        num_clusters,
        cluster_bytes,
        visibility,
        vised,
        areas: AreaPortals::new(num_areas),
    })
}
