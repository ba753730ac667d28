use std::env;

fn main() {
    let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    match cbindgen::generate(&crate_dir) {
        Ok(bindings) => {
            bindings.write_to_file("include/glot.h");
        }
        Err(err) => println!("cargo:warning=skipping C header generation: {err}"),
    }
}
