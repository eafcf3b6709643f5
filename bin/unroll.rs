use std::env;
use std::io::Read;

use loopopt::ir::Program;
use loopopt::loop_opt::unroll_loops;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let input = read_input(args.get(1));
    let program: Program =
        serde_json::from_str(&input).expect("the input is not a valid IR program");
    let program = program.validate().unwrap_or_else(|e| panic!("{e}"));

    let unrolled = unroll_loops(program);
    println!(
        "{}",
        serde_json::to_string(&unrolled.0).expect("the IR always serializes")
    );
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
