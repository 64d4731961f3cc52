fn main() {
    if let Err(err) = tabledit::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
