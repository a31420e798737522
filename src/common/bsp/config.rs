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

use crate::common::bsp::patch::DEFAULT_SUBDIVIDE_TOLERANCE;

/// Load- and query-time switches for a collision model.
///
/// Every field has a default, so a partial document deserializes cleanly.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollisionConfig {
    /// Skip patch surfaces entirely when tracing.
    pub no_curves: bool,

    /// Treat every pair of areas as connected regardless of portal state.
    pub no_areas: bool,

    /// When `false`, box traces against patches are performed as point traces.
    pub player_curve_clip: bool,

    /// Maximum distance between a bezier midpoint and its chord before the span is split.
    pub patch_subdivide_tolerance: f32,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        CollisionConfig {
            no_curves: false,
            no_areas: false,
            player_curve_clip: true,
            patch_subdivide_tolerance: DEFAULT_SUBDIVIDE_TOLERANCE,
        }
    }
}
