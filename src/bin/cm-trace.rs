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

extern crate cgmath;
extern crate docopt;
extern crate env_logger;
extern crate richter_cm;
#[macro_use]
extern crate serde_derive;

use std::{fs, process::exit};

use richter_cm::common::bsp::{CollisionConfig, CollisionModel, ContentFlags, TraceRequest};

use cgmath::Vector3;
use docopt::Docopt;

#[derive(Deserialize)]
struct Args {
    arg_map: String,
    arg_start: String,
    arg_end: String,
    flag_size: f32,
    flag_capsule: bool,
    flag_no_curves: bool,
    flag_point_curves: bool,
    flag_help: bool,
    flag_version: bool,
}

const USAGE: &'static str = "
Usage: cm-trace [options] <map> <start> <end>

Traces a box through a map and prints where it stopped. Points are given as x,y,z.

Options:
    --size <half>   Half the width of the traced box [default: 0].
    --capsule       Trace a capsule fitted to the box.
    --no-curves     Ignore patch surfaces.
    --point-curves  Clip boxes against patches as points.

    -h, --help      Show this message and exit.
        --version   Print version information and exit.
";

const VERSION: &'static str = "
cm-trace 0.1
Copyright © 2018 Cormac O'Brien
Released under the terms of the MIT License
";

fn parse_point(s: &str) -> Option<Vector3<f32>> {
    let coords = s
        .split(',')
        .map(|c| c.trim().parse::<f32>().ok())
        .collect::<Option<Vec<f32>>>()?;

    match coords.as_slice() {
        &[x, y, z] => Some(Vector3::new(x, y, z)),
        _ => None,
    }
}

fn main() {
    env_logger::init();

    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    if args.flag_help {
        println!("{}", USAGE);
        exit(0);
    }

    if args.flag_version {
        println!("{}", VERSION);
        exit(0);
    }

    let (start, end) = match (parse_point(&args.arg_start), parse_point(&args.arg_end)) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            println!("Points must be given as x,y,z");
            exit(1);
        }
    };

    let data = match fs::read(&args.arg_map) {
        Ok(d) => d,
        Err(why) => {
            println!("Couldn't read {}: {}", args.arg_map, why);
            exit(1);
        }
    };

    let config = CollisionConfig {
        no_curves: args.flag_no_curves,
        player_curve_clip: !args.flag_point_curves,
        ..CollisionConfig::default()
    };

    let cm = match CollisionModel::load(&args.arg_map, &data, &config) {
        Ok(cm) => cm,
        Err(why) => {
            println!("Couldn't load {}: {}", args.arg_map, why);
            exit(1);
        }
    };

    let half = Vector3::new(args.flag_size, args.flag_size, args.flag_size);
    let req = TraceRequest::new(start, end, -half, half, ContentFlags::MASK_PLAYERSOLID)
        .with_capsule(args.flag_capsule);
    let trace = cm.box_trace(&req);

    println!("fraction:    {}", trace.fraction);
    println!("end:         {:?}", trace.end_pos);
    println!("start solid: {}", trace.start_solid);
    println!("all solid:   {}", trace.all_solid);
    println!("contents:    {:?}", trace.contents);
    println!("surface:     {:?}", trace.surface_flags);
    match trace.plane {
        Some(p) => println!("plane:       {:?} {}", p.normal(), p.dist()),
        None => println!("plane:       none"),
    }
}
