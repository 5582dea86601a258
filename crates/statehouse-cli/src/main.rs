#![forbid(unsafe_code)]

fn main() {
    statehouse_cli::init_tracing();
    if let Err(error) = statehouse_cli::run_from_env() {
        eprintln!("{error}");
        std::process::exit(error.exit_code());
    }
}
