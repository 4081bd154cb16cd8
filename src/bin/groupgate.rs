//! groupgate server and tooling entry point

fn main() {
    if let Err(e) = groupgate::cli::run() {
        eprintln!("error [{}]: {}", e.error_code(), e);
        std::process::exit(e.exit_code());
    }
}
