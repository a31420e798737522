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

extern crate docopt;
extern crate env_logger;
extern crate richter_cm;
#[macro_use]
extern crate serde_derive;

use std::{fs, process::exit};

use richter_cm::common::bsp::{CollisionConfig, CollisionModel};

use docopt::Docopt;

#[derive(Deserialize)]
struct Args {
    arg_map: String,
    flag_help: bool,
    flag_version: bool,
}

const USAGE: &'static str = "
Usage: cm-dot <map>

Prints the node tree of a map as a Graphviz graph.

Options:
    -h, --help     Show this message and exit.
        --version  Print version information and exit.
";

const VERSION: &'static str = "
cm-dot 0.1
Copyright © 2018 Cormac O'Brien
Released under the terms of the MIT License
";

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

    let data = match fs::read(&args.arg_map) {
        Ok(d) => d,
        Err(why) => {
            println!("Couldn't read {}: {}", args.arg_map, why);
            exit(1);
        }
    };

    let cm = match CollisionModel::load(&args.arg_map, &data, &CollisionConfig::default()) {
        Ok(cm) => cm,
        Err(why) => {
            println!("Couldn't load {}: {}", args.arg_map, why);
            exit(1);
        }
    };

    println!("{}", cm.gen_dot_graph());
}
