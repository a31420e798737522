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

use crate::common::bsp::CollisionModel;

/// Largest number of areas a map may declare.
pub const MAX_MAP_AREAS: usize = 0x100;

/// Portal state between the areas of a map.
///
/// Each pair of areas keeps a count of the open portals between them. Areas reachable from one
/// another through open portals share a flood number, which is recomputed whenever a count changes.
#[derive(Clone, Debug)]
pub struct AreaPortals {
    num_areas: usize,
    portals: Vec<i32>,
    flood_nums: Vec<usize>,
}

impl AreaPortals {
    pub fn new(num_areas: usize) -> AreaPortals {
        let mut areas = AreaPortals {
            num_areas,
            portals: vec![0; num_areas * num_areas],
            flood_nums: vec![0; num_areas],
        };
        areas.flood();
        areas
    }

    pub fn num_areas(&self) -> usize {
        self.num_areas
    }

    /// Returns the number of open portals between two areas.
    pub fn portal_count(&self, a1: usize, a2: usize) -> i32 {
        self.portals[a1 * self.num_areas + a2]
    }

    /// Opens or closes one portal between two areas.
    pub fn adjust(&mut self, a1: usize, a2: usize, open: bool) {
        if a1 >= self.num_areas || a2 >= self.num_areas {
            warn!(
                "Area portal between {} and {} is out of range (have {} areas)",
                a1, a2, self.num_areas
            );
            return;
        }

        let delta = if open { 1 } else { -1 };
        for &(from, to) in &[(a1, a2), (a2, a1)] {
            let count = &mut self.portals[from * self.num_areas + to];
            *count += delta;
            if *count < 0 {
                warn!("Negative portal count between areas {} and {}", from, to);
                *count = 0;
            }
        }

        self.flood();
    }

    pub fn connected(&self, a1: usize, a2: usize) -> bool {
        if a1 >= self.num_areas || a2 >= self.num_areas {
            return false;
        }

        self.flood_nums[a1] == self.flood_nums[a2]
    }

    fn flood(&mut self) {
        const UNVISITED: usize = usize::max_value();

        for f in self.flood_nums.iter_mut() {
            *f = UNVISITED;
        }

        let mut flood_num = 0;
        let mut stack = Vec::new();
        for start in 0..self.num_areas {
            if self.flood_nums[start] != UNVISITED {
                continue;
            }

            self.flood_nums[start] = flood_num;
            stack.push(start);
            while let Some(area) = stack.pop() {
                for other in 0..self.num_areas {
                    if self.flood_nums[other] == UNVISITED && self.portal_count(area, other) > 0 {
                        self.flood_nums[other] = flood_num;
                        stack.push(other);
                    }
                }
            }

            flood_num += 1;
        }
    }
}

impl CollisionModel {
    pub fn num_areas(&self) -> usize {
        self.areas.num_areas()
    }

    pub fn area_portals(&self) -> &AreaPortals {
        &self.areas
    }

    /// Opens or closes a portal between two areas, as a door does when it moves.
    pub fn adjust_area_portal_state(&mut self, a1: usize, a2: usize, open: bool) {
        self.areas.adjust(a1, a2, open);
    }

    /// Returns true if the two areas are joined by open portals.
    ///
    /// Always true when area checks are disabled. An opaque area (`None`) is never connected.
    pub fn areas_connected(&self, a1: Option<usize>, a2: Option<usize>) -> bool {
        if self.config.no_areas {
            return true;
        }

        match (a1, a2) {
            (Some(a1), Some(a2)) => self.areas.connected(a1, a2),
            _ => false,
        }
    }

    /// Returns a bit vector with a set bit for every area connected to `area`.
    ///
    /// If area checks are disabled or `area` is `None`, every bit is set.
    pub fn write_area_bits(&self, area: Option<usize>) -> Vec<u8> {
        let num_areas = self.areas.num_areas();
        let bytes = (num_areas + 7) >> 3;

        let area = match area {
            Some(a) if !self.config.no_areas => a,
            _ => return vec![0xFF; bytes],
        };

        let mut bits = vec![0u8; bytes];
        for other in 0..num_areas {
            if self.areas.connected(area, other) {
                bits[other >> 3] |= 1 << (other & 7);
            }
        }

        bits
    }
}
