fn main() {
    if let Err(err) = customer_feeds::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
