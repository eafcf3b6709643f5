use std::env;
use std::io::Read;

use loopopt::analysis::{run_dataflow, AnalysisKind};
use loopopt::ir::Program;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        panic!("usage: df <defined|live|rd|cprop> [file]");
    }
    let kind: AnalysisKind = args[1].parse().unwrap_or_else(|e| panic!("{e}"));

    let input = read_input(args.get(2));
    let program: Program =
        serde_json::from_str(&input).expect("the input is not a valid IR program");
    let program = program.validate().unwrap_or_else(|e| panic!("{e}"));

    run_dataflow(program, kind);
}

fn read_input(path: Option<&String>) -> String {
    match path {
        Some(path) => String::from_utf8(
            std::fs::read(path).unwrap_or_else(|_| panic!("Could not read the input file {path}")),
        )
        .expect("The input file does not contain valid utf-8 text"),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .expect("could not read stdin");
            buf
        }
    }
}
