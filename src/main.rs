fn main() {
    let args = std::env::args();

    if let Err(err) = pgdelta::run(args) {
        eprintln!("pgdelta error: {err:#}");
        std::process::exit(1);
    }
}
