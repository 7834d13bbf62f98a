use shengloong::opts::Opts;
use shengloong::Error;

use colored::Colorize;
use structopt::StructOpt;

const EX_OK: i32 = 0;
const EX_DATAERR: i32 = 65;
const EX_SOFTWARE: i32 = 70;

fn exit_code(err: &Error) -> i32 {
    match err {
        Error::BadOpts { .. } => EX_DATAERR,
        Error::Walk { .. } => EX_SOFTWARE,
    }
}

fn run() -> Result<(), Error> {
    let opts = Opts::from_args();
    shengloong::run(opts)
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", format!("Error - {}", err).red());
        std::process::exit(exit_code(&err));
    }
}
