fn main() {
    if let Err(e) = fittrck_lib::run() {
        eprintln!("fittrck: {:#}", e);
        std::process::exit(1);
    }
}
