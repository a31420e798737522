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

//! Synthetic map files for tests.

use crate::common::bsp::{BspDialect, ContentFlags, SurfaceFlags};

use byteorder::{LittleEndian, WriteBytesExt};
use cgmath::Vector3;

pub const MST_PATCH: i32 = 2;
pub const MST_TRIANGLE_SOUP: i32 = 3;

/// The floor brush spans this far along x and y.
pub const FLOOR_EXTENT: f32 = 4096.0;

/// Bottom of the floor brush. Its top is at z = 0.
pub const FLOOR_BOTTOM: f32 = -64.0;

#[derive(Clone, Debug)]
pub struct TestShader {
    pub name: String,
    pub surface_flags: u32,
    pub contents: u32,
}

#[derive(Clone, Debug)]
pub struct TestLeaf {
    pub cluster: i32,
    pub area: i32,
    pub brushes: Vec<i32>,
    pub surfaces: Vec<i32>,
}

#[derive(Clone, Debug)]
pub struct TestBrush {
    /// (plane, shader) pairs.
    pub sides: Vec<(i32, i32)>,
    pub shader: i32,
}

#[derive(Clone, Debug)]
pub struct TestModel {
    pub mins: Vector3<f32>,
    pub maxs: Vector3<f32>,
    pub first_surface: i32,
    pub num_surfaces: i32,
    pub first_brush: i32,
    pub num_brushes: i32,
}

#[derive(Clone, Debug)]
pub struct TestSurface {
    pub shader: i32,
    pub kind: i32,
    pub first_vert: i32,
    pub num_verts: i32,
    pub first_index: i32,
    pub num_indexes: i32,
    pub width: i32,
    pub height: i32,
}

/// A map under construction.
///
/// Everything is public so tests can corrupt individual records before building.
#[derive(Clone, Debug)]
pub struct TestMap {
    pub entities: String,
    pub shaders: Vec<TestShader>,
    pub planes: Vec<(Vector3<f32>, f32)>,
    pub nodes: Vec<(i32, [i32; 2])>,
    pub leaves: Vec<TestLeaf>,
    pub brushes: Vec<TestBrush>,
    pub models: Vec<TestModel>,
    pub verts: Vec<Vector3<f32>>,
    pub indexes: Vec<i32>,
    pub surfaces: Vec<TestSurface>,
    pub vis: Option<(i32, i32, Vec<u8>)>,
}

impl TestMap {
    /// A single solid slab whose top face is the plane z = 0.
    ///
    /// The root node splits on z = 0. Leaf 0 is the open space above (cluster 0, area 0) and leaf
    /// 1 holds the slab.
    pub fn floor() -> TestMap {
        let mut map = TestMap {
            entities: String::from("{\n\"classname\" \"worldspawn\"\n}\n"),
            shaders: vec![TestShader {
                name: String::from("textures/base/floor"),
                surface_flags: SurfaceFlags::METALSTEPS.bits(),
                contents: ContentFlags::SOLID.bits(),
            }],
            planes: vec![(Vector3::unit_z(), 0.0)],
            nodes: vec![(0, [-1, -2])],
            leaves: vec![
                TestLeaf {
                    cluster: 0,
                    area: 0,
                    brushes: Vec::new(),
                    surfaces: Vec::new(),
                },
                TestLeaf {
                    cluster: -1,
                    area: -1,
                    brushes: Vec::new(),
                    surfaces: Vec::new(),
                },
            ],
            brushes: Vec::new(),
            models: Vec::new(),
            verts: Vec::new(),
            indexes: Vec::new(),
            surfaces: Vec::new(),
            vis: None,
        };

        let floor = map.add_box_brush(
            Vector3::new(-FLOOR_EXTENT, -FLOOR_EXTENT, FLOOR_BOTTOM),
            Vector3::new(FLOOR_EXTENT, FLOOR_EXTENT, 0.0),
            0,
        );
        map.leaves[1].brushes.push(floor);
        map.models.push(TestModel {
            mins: Vector3::new(-FLOOR_EXTENT, -FLOOR_EXTENT, FLOOR_BOTTOM),
            maxs: Vector3::new(FLOOR_EXTENT, FLOOR_EXTENT, 0.0),
            first_surface: 0,
            num_surfaces: 0,
            first_brush: 0,
            num_brushes: 1,
        });

        map
    }

    pub fn add_shader(&mut self, name: &str, surface_flags: SurfaceFlags, contents: ContentFlags) -> i32 {
        self.shaders.push(TestShader {
            name: name.to_owned(),
            surface_flags: surface_flags.bits(),
            contents: contents.bits(),
        });
        self.shaders.len() as i32 - 1
    }

    pub fn add_plane(&mut self, normal: Vector3<f32>, dist: f32) -> i32 {
        self.planes.push((normal, dist));
        self.planes.len() as i32 - 1
    }

    /// Adds an axial box brush with its sides in compiler order (-x, +x, -y, +y, -z, +z).
    pub fn add_box_brush(&mut self, mins: Vector3<f32>, maxs: Vector3<f32>, shader: i32) -> i32 {
        let mut sides = Vec::new();
        for axis in 0..3 {
            let mut normal = Vector3::new(0.0, 0.0, 0.0);
            normal[axis] = -1.0;
            sides.push((self.add_plane(normal, -mins[axis]), shader));
            normal[axis] = 1.0;
            sides.push((self.add_plane(normal, maxs[axis]), shader));
        }

        self.brushes.push(TestBrush { sides, shader });
        self.brushes.len() as i32 - 1
    }

    /// Adds a sixth non-axial side to an existing brush.
    pub fn add_brush_side(&mut self, brush: i32, normal: Vector3<f32>, dist: f32) {
        let plane = self.add_plane(normal, dist);
        let shader = self.brushes[brush as usize].shader;
        self.brushes[brush as usize].sides.push((plane, shader));
    }

    /// Adds a door-like inline model (model 1) that no leaf references.
    pub fn with_door(mut self) -> TestMap {
        let mins = Vector3::new(100.0, -16.0, 0.0);
        let maxs = Vector3::new(116.0, 16.0, 128.0);
        let brush = self.add_box_brush(mins, maxs, 0);
        self.models.push(TestModel {
            mins,
            maxs,
            first_surface: 0,
            num_surfaces: 0,
            first_brush: brush,
            num_brushes: 1,
        });
        self
    }

    /// Adds a patch surface to the open leaf.
    ///
    /// `points` is row-major with `width` points per row.
    pub fn with_patch(mut self, width: i32, height: i32, points: &[Vector3<f32>]) -> TestMap {
        let shader = self.add_shader(
            "textures/base/curve",
            SurfaceFlags::empty(),
            ContentFlags::SOLID,
        );
        let first_vert = self.verts.len() as i32;
        self.verts.extend_from_slice(points);
        self.surfaces.push(TestSurface {
            shader,
            kind: MST_PATCH,
            first_vert,
            num_verts: points.len() as i32,
            first_index: 0,
            num_indexes: 0,
            width,
            height,
        });
        let surface = self.surfaces.len() as i32 - 1;
        self.leaves[0].surfaces.push(surface);
        self
    }

    /// Adds a triangle soup surface to the open leaf.
    pub fn with_trisoup(mut self, verts: &[Vector3<f32>], indexes: &[i32]) -> TestMap {
        let shader = self.add_shader(
            "textures/terrain/grass",
            SurfaceFlags::DUST,
            ContentFlags::SOLID,
        );
        let first_vert = self.verts.len() as i32;
        let first_index = self.indexes.len() as i32;
        self.verts.extend_from_slice(verts);
        self.indexes.extend_from_slice(indexes);
        self.surfaces.push(TestSurface {
            shader,
            kind: MST_TRIANGLE_SOUP,
            first_vert,
            num_verts: verts.len() as i32,
            first_index,
            num_indexes: indexes.len() as i32,
            width: 0,
            height: 0,
        });
        let surface = self.surfaces.len() as i32 - 1;
        self.leaves[0].surfaces.push(surface);
        self
    }

    /// Replaces the tree with three open leaves in areas 0, 1 and 2, split by the planes x = 0
    /// and x = 512, with the floor slab in its own leaf below z = 0.
    pub fn with_three_areas(mut self) -> TestMap {
        let x0 = self.add_plane(Vector3::unit_x(), 0.0);
        let x512 = self.add_plane(Vector3::unit_x(), 512.0);
        let floor = self.leaves[1].brushes.clone();

        self.nodes = vec![(0, [1, -1]), (x0, [2, -2]), (x512, [-4, -3])];
        self.leaves = vec![
            TestLeaf {
                cluster: -1,
                area: -1,
                brushes: floor,
                surfaces: Vec::new(),
            },
            TestLeaf {
                cluster: 0,
                area: 0,
                brushes: Vec::new(),
                surfaces: Vec::new(),
            },
            TestLeaf {
                cluster: 1,
                area: 1,
                brushes: Vec::new(),
                surfaces: Vec::new(),
            },
            TestLeaf {
                cluster: 2,
                area: 2,
                brushes: Vec::new(),
                surfaces: Vec::new(),
            },
        ];
        self
    }

    pub fn with_vis(mut self, num_clusters: i32, cluster_bytes: i32, rows: Vec<u8>) -> TestMap {
        self.vis = Some((num_clusters, cluster_bytes, rows));
        self
    }

    /// Serializes the map in the given dialect.
    pub fn build(&self, dialect: BspDialect) -> Vec<u8> {
        let mut lumps: Vec<Vec<u8>> = vec![Vec::new(); dialect.lump_count()];

        let mut entities = self.entities.clone().into_bytes();
        entities.push(0);
        lumps[0] = entities;

        for shader in self.shaders.iter() {
            let l = &mut lumps[1];
            let mut name = [0u8; 64];
            for (i, b) in shader.name.bytes().take(63).enumerate() {
                name[i] = b;
            }
            l.extend_from_slice(&name);
            l.write_i32::<LittleEndian>(shader.surface_flags as i32).unwrap();
            l.write_i32::<LittleEndian>(shader.contents as i32).unwrap();
        }

        for &(normal, dist) in self.planes.iter() {
            let l = &mut lumps[2];
            write_vec(l, normal);
            l.write_f32::<LittleEndian>(dist).unwrap();
        }

        for &(plane, children) in self.nodes.iter() {
            let l = &mut lumps[3];
            l.write_i32::<LittleEndian>(plane).unwrap();
            l.write_i32::<LittleEndian>(children[0]).unwrap();
            l.write_i32::<LittleEndian>(children[1]).unwrap();
            for _ in 0..6 {
                l.write_i32::<LittleEndian>(0).unwrap();
            }
        }

        let mut leaf_surfaces = Vec::new();
        let mut leaf_brushes = Vec::new();
        for leaf in self.leaves.iter() {
            let l = &mut lumps[4];
            l.write_i32::<LittleEndian>(leaf.cluster).unwrap();
            l.write_i32::<LittleEndian>(leaf.area).unwrap();
            for _ in 0..6 {
                l.write_i32::<LittleEndian>(0).unwrap();
            }
            l.write_i32::<LittleEndian>(leaf_surfaces.len() as i32).unwrap();
            l.write_i32::<LittleEndian>(leaf.surfaces.len() as i32).unwrap();
            l.write_i32::<LittleEndian>(leaf_brushes.len() as i32).unwrap();
            l.write_i32::<LittleEndian>(leaf.brushes.len() as i32).unwrap();
            leaf_surfaces.extend_from_slice(&leaf.surfaces);
            leaf_brushes.extend_from_slice(&leaf.brushes);
        }

        for s in leaf_surfaces {
            lumps[5].write_i32::<LittleEndian>(s).unwrap();
        }

        for b in leaf_brushes {
            lumps[6].write_i32::<LittleEndian>(b).unwrap();
        }

        for model in self.models.iter() {
            let l = &mut lumps[7];
            write_vec(l, model.mins);
            write_vec(l, model.maxs);
            l.write_i32::<LittleEndian>(model.first_surface).unwrap();
            l.write_i32::<LittleEndian>(model.num_surfaces).unwrap();
            l.write_i32::<LittleEndian>(model.first_brush).unwrap();
            l.write_i32::<LittleEndian>(model.num_brushes).unwrap();
        }

        let mut side_count = 0;
        for brush in self.brushes.iter() {
            let l = &mut lumps[8];
            l.write_i32::<LittleEndian>(side_count).unwrap();
            l.write_i32::<LittleEndian>(brush.sides.len() as i32).unwrap();
            l.write_i32::<LittleEndian>(brush.shader).unwrap();
            side_count += brush.sides.len() as i32;

            for &(plane, shader) in brush.sides.iter() {
                let l = &mut lumps[9];
                l.write_i32::<LittleEndian>(plane).unwrap();
                l.write_i32::<LittleEndian>(shader).unwrap();
                if dialect == BspDialect::Raven {
                    l.write_i32::<LittleEndian>(-1).unwrap();
                }
            }
        }

        for &v in self.verts.iter() {
            let l = &mut lumps[10];
            write_vec(l, v);
            l.resize(l.len() + dialect.draw_vert_size() - 12, 0);
        }

        for &i in self.indexes.iter() {
            lumps[11].write_i32::<LittleEndian>(i).unwrap();
        }

        for surf in self.surfaces.iter() {
            let l = &mut lumps[13];
            let start = l.len();
            l.write_i32::<LittleEndian>(surf.shader).unwrap();
            l.write_i32::<LittleEndian>(-1).unwrap();
            l.write_i32::<LittleEndian>(surf.kind).unwrap();
            l.write_i32::<LittleEndian>(surf.first_vert).unwrap();
            l.write_i32::<LittleEndian>(surf.num_verts).unwrap();
            l.write_i32::<LittleEndian>(surf.first_index).unwrap();
            l.write_i32::<LittleEndian>(surf.num_indexes).unwrap();
            l.resize(start + dialect.surface_size() - 8, 0);
            l.write_i32::<LittleEndian>(surf.width).unwrap();
            l.write_i32::<LittleEndian>(surf.height).unwrap();
        }

        if let Some((num_clusters, cluster_bytes, ref rows)) = self.vis {
            let l = &mut lumps[16];
            l.write_i32::<LittleEndian>(num_clusters).unwrap();
            l.write_i32::<LittleEndian>(cluster_bytes).unwrap();
            l.extend_from_slice(rows);
        }

        let mut data = Vec::new();
        data.extend_from_slice(dialect.magic());
        data.write_i32::<LittleEndian>(dialect.version()).unwrap();

        let mut offset = dialect.header_size();
        for lump in lumps.iter() {
            data.write_i32::<LittleEndian>(offset as i32).unwrap();
            data.write_i32::<LittleEndian>(lump.len() as i32).unwrap();
            offset += (lump.len() + 3) & !3;
        }

        for lump in lumps.iter() {
            data.extend_from_slice(lump);
            let padded = (data.len() + 3) & !3;
            data.resize(padded, 0);
        }

        data
    }
}

fn write_vec(out: &mut Vec<u8>, v: Vector3<f32>) {
    out.write_f32::<LittleEndian>(v.x).unwrap();
    out.write_f32::<LittleEndian>(v.y).unwrap();
    out.write_f32::<LittleEndian>(v.z).unwrap();
}

/// Returns a `width` x `height` row-major control grid on the plane z = `z`.
///
/// Columns advance along +y and rows along +x, which makes the patch face +z.
pub fn flat_grid(width: i32, height: i32, spacing: f32, z: f32) -> Vec<Vector3<f32>> {
    let mut points = Vec::new();
    for row in 0..height {
        for col in 0..width {
            points.push(Vector3::new(row as f32 * spacing, col as f32 * spacing, z));
        }
    }
    points
}
