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

//! Entities linked into the leaves of a collision model.

use crate::common::{
    bitset::BitSet,
    bsp::{CollisionModel, ContentFlags, ModelHandle, TraceRequest, TraceResult},
    math::{self, Angles},
};

use cgmath::{Vector3, Zero};

pub const MAX_GENTITIES: usize = 1024;

/// The entity number reported for hits against the world itself.
pub const ENTITYNUM_WORLD: usize = MAX_GENTITIES - 2;

/// An entity touching more leaves than this is kept on a list that every query checks.
pub const MAX_TOTAL_ENT_LEAFS: usize = 128;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum WorldError {
    #[fail(display = "Entity number {} is out of range", _0)]
    BadEntity(usize),
    #[fail(display = "No inline model {}", _0)]
    BadModel(usize),
}

/// The collision shape of an entity.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum EntityShape {
    /// An axis-aligned box. Boxes ignore the entity's angles.
    Box {
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
    },

    /// A vertical capsule fitted to the given bounds.
    Capsule {
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
    },

    /// An inline submodel of the map, such as a door or platform.
    Inline(usize),
}

/// Everything needed to link an entity.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EntityDef {
    pub shape: EntityShape,
    pub origin: Vector3<f32>,
    pub angles: Angles,
    pub contents: ContentFlags,

    /// Entities never collide with their owner or with what they own.
    pub owner: Option<usize>,
}

impl EntityDef {
    pub fn new(shape: EntityShape, origin: Vector3<f32>, contents: ContentFlags) -> EntityDef {
        EntityDef {
            shape,
            origin,
            angles: Angles::zero(),
            contents,
            owner: None,
        }
    }
}

/// The entities found by an area query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AreaEntities {
    pub entities: Vec<usize>,

    /// Set if more entities touched the area than were asked for.
    pub truncated: bool,
}

#[derive(Debug)]
struct LinkedEntity {
    def: EntityDef,
    model: ModelHandle,
    abs_min: Vector3<f32>,
    abs_max: Vector3<f32>,

    /// The leaves this entity was linked into, or `None` if it went on the overflow list.
    leafs: Option<Vec<usize>>,
}

#[derive(Debug)]
enum EntitySlot {
    Vacant,
    Linked(LinkedEntity),
}

/// The set of entities linked into the current map.
#[derive(Debug)]
pub struct World {
    slots: Box<[EntitySlot]>,
    leaf_entities: Vec<Vec<usize>>,
    overflow: Vec<usize>,
    max_entity_leafs: usize,
}

impl World {
    pub fn new(cm: &CollisionModel) -> World {
        World::with_leaf_limit(cm, MAX_TOTAL_ENT_LEAFS)
    }

    /// Creates a world whose entities may each be linked into at most `max_entity_leafs` leaves.
    pub fn with_leaf_limit(cm: &CollisionModel, max_entity_leafs: usize) -> World {
        let mut slots = Vec::with_capacity(ENTITYNUM_WORLD);
        for _ in 0..ENTITYNUM_WORLD {
            slots.push(EntitySlot::Vacant);
        }

        World {
            slots: slots.into_boxed_slice(),
            leaf_entities: vec![Vec::new(); cm.leaves().len()],
            overflow: Vec::new(),
            max_entity_leafs,
        }
    }

    fn check_entity(&self, num: usize) -> Result<(), WorldError> {
        if num >= self.slots.len() {
            Err(WorldError::BadEntity(num))
        } else {
            Ok(())
        }
    }

    pub fn is_linked(&self, num: usize) -> bool {
        match self.slots.get(num) {
            Some(EntitySlot::Linked(_)) => true,
            _ => false,
        }
    }

    /// Returns the absolute bounds of a linked entity.
    pub fn abs_bounds(&self, num: usize) -> Option<(Vector3<f32>, Vector3<f32>)> {
        match self.slots.get(num) {
            Some(EntitySlot::Linked(e)) => Some((e.abs_min, e.abs_max)),
            _ => None,
        }
    }

    pub fn unlink_entity(&mut self, num: usize) -> Result<(), WorldError> {
        self.check_entity(num)?;

        let entity = match std::mem::replace(&mut self.slots[num], EntitySlot::Vacant) {
            EntitySlot::Linked(e) => e,

            // not linked
            EntitySlot::Vacant => return Ok(()),
        };

        match entity.leafs {
            Some(leafs) => {
                for leaf in leafs {
                    self.leaf_entities[leaf].retain(|&e| e != num);
                }
            }
            None => self.overflow.retain(|&e| e != num),
        }

        debug!("Unlinked entity {}", num);
        Ok(())
    }

    /// Links an entity into every leaf its bounds touch, replacing any previous link.
    pub fn link_entity(
        &mut self,
        cm: &CollisionModel,
        num: usize,
        def: EntityDef,
    ) -> Result<(), WorldError> {
        self.check_entity(num)?;
        self.unlink_entity(num)?;

        let (model, mins, maxs) = match def.shape {
            EntityShape::Box { mins, maxs } => {
                (ModelHandle::temp_box(mins, maxs, false), mins, maxs)
            }
            EntityShape::Capsule { mins, maxs } => {
                (ModelHandle::temp_box(mins, maxs, true), mins, maxs)
            }
            EntityShape::Inline(i) => {
                let model = cm.inline_model(i).ok_or(WorldError::BadModel(i))?;
                let (mins, maxs) = cm.model_bounds(model);
                (model, mins, maxs)
            }
        };

        let (mut abs_min, mut abs_max) = match def.shape {
            // a rotated model may reach anywhere within its bounding sphere
            EntityShape::Inline(_) if !def.angles.is_zero() => {
                let r = math::radius_from_bounds(mins, maxs);
                let r = Vector3::new(r, r, r);
                (def.origin - r, def.origin + r)
            }
            _ => (def.origin + mins, def.origin + maxs),
        };

        // traces stop short of surfaces, so look a little further than the bounds
        let one = Vector3::new(1.0, 1.0, 1.0);
        abs_min -= one;
        abs_max += one;

        let found = cm.box_leafs(abs_min, abs_max, self.max_entity_leafs);
        let leafs = if found.truncated {
            debug!("Entity {} touches too many leaves, linking as overflow", num);
            self.overflow.push(num);
            None
        } else {
            debug!("Linking entity {} into {} leaves", num, found.leafs.len());
            for &leaf in found.leafs.iter() {
                self.leaf_entities[leaf].push(num);
            }
            Some(found.leafs)
        };

        self.slots[num] = EntitySlot::Linked(LinkedEntity {
            def,
            model,
            abs_min,
            abs_max,
            leafs,
        });

        Ok(())
    }

    /// Lists up to `max` linked entities whose bounds touch the given box.
    pub fn area_entities(
        &self,
        cm: &CollisionModel,
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
        max: usize,
    ) -> AreaEntities {
        let mut result = AreaEntities::default();
        let mut seen = BitSet::with_capacity(self.slots.len());

        let found = cm.box_leafs(mins, maxs, cm.leaves().len());
        let candidates = found
            .leafs
            .iter()
            .flat_map(|&leaf| self.leaf_entities[leaf].iter())
            .chain(self.overflow.iter());

        for &num in candidates {
            if !seen.insert(num) {
                continue;
            }

            let entity = match self.slots[num] {
                EntitySlot::Linked(ref e) => e,
                EntitySlot::Vacant => continue,
            };

            if !math::bounds_intersect(mins, maxs, entity.abs_min, entity.abs_max) {
                continue;
            }

            if result.entities.len() >= max {
                result.truncated = true;
                break;
            }

            result.entities.push(num);
        }

        result
    }

    /// Traces against the world and then against every linked entity in the way.
    ///
    /// `pass_entity` is the entity doing the moving. It is skipped along with its owner and
    /// anything it owns.
    pub fn trace(
        &self,
        cm: &CollisionModel,
        req: &TraceRequest,
        pass_entity: Option<usize>,
    ) -> TraceResult {
        let mut trace = cm.box_trace(&TraceRequest {
            model: ModelHandle::World,
            ..*req
        });
        if trace.is_hit() || trace.start_solid {
            trace.entity_num = Some(ENTITYNUM_WORLD);
        }

        // blocked immediately by the world
        if trace.fraction == 0.0 {
            return trace;
        }

        let mut move_min = Vector3::zero();
        let mut move_max = Vector3::zero();
        for i in 0..3 {
            move_min[i] = req.start[i].min(req.end[i]) + req.mins[i] - 1.0;
            move_max[i] = req.start[i].max(req.end[i]) + req.maxs[i] + 1.0;
        }

        let pass_owner = pass_entity.and_then(|p| match self.slots.get(p) {
            Some(EntitySlot::Linked(e)) => e.def.owner,
            _ => None,
        });

        let touched = self.area_entities(cm, move_min, move_max, MAX_GENTITIES);
        for &num in touched.entities.iter() {
            if trace.all_solid {
                break;
            }

            let entity = match self.slots[num] {
                EntitySlot::Linked(ref e) => e,
                EntitySlot::Vacant => continue,
            };

            if Some(num) == pass_entity || Some(num) == pass_owner {
                continue;
            }

            if pass_entity.is_some() && entity.def.owner == pass_entity {
                continue;
            }

            if !entity.def.contents.intersects(req.mask) {
                continue;
            }

            let angles = match entity.def.shape {
                EntityShape::Inline(_) => entity.def.angles,
                _ => Angles::zero(),
            };

            let mut clip = cm.transformed_box_trace(
                &TraceRequest {
                    model: entity.model,
                    ..*req
                },
                entity.def.origin,
                angles,
            );

            if clip.all_solid {
                trace.all_solid = true;
                clip.entity_num = Some(num);
            } else if clip.start_solid {
                trace.start_solid = true;
                clip.entity_num = Some(num);
            }

            if clip.fraction < trace.fraction {
                let start_solid = trace.start_solid;
                clip.entity_num = Some(num);
                trace = clip;
                trace.start_solid |= start_solid;
            }
        }

        trace
    }

    /// Returns the contents of the world and every linked entity at `point`.
    pub fn point_contents(
        &self,
        cm: &CollisionModel,
        point: Vector3<f32>,
        pass_entity: Option<usize>,
    ) -> ContentFlags {
        let all = ContentFlags::all();
        let mut contents = cm.point_contents(point, all, ModelHandle::World);

        let touched = self.area_entities(cm, point, point, MAX_GENTITIES);
        for &num in touched.entities.iter() {
            if Some(num) == pass_entity {
                continue;
            }

            if let EntitySlot::Linked(ref e) = self.slots[num] {
                let angles = match e.def.shape {
                    EntityShape::Inline(_) => e.def.angles,
                    _ => Angles::zero(),
                };

                if cm.transformed_point_contents(point, all, e.model, e.def.origin, angles)
                    != ContentFlags::empty()
                {
                    contents |= e.def.contents;
                }
            }
        }

        contents
    }
}
