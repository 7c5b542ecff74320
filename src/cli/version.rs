/// Display version information
pub fn execute() {
    println!("clipmesh {}", env!("CARGO_PKG_VERSION"));
    println!("End-to-end encrypted clipboard sync for small device groups");
}
