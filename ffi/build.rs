use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=src/types.rs");

    let crate_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => return,
    };
    let include_dir = crate_dir.join("include");
    if let Err(err) = std::fs::create_dir_all(&include_dir) {
        println!("cargo:warning=could not create {}: {err}", include_dir.display());
        return;
    }

    let config = cbindgen::Config {
        language: cbindgen::Language::C,
        include_guard: Some("DEPOT_FFI_H".to_string()),
        cpp_compat: true,
        ..Default::default()
    };
    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(include_dir.join("depot.h"));
        }
        Err(err) => println!("cargo:warning=header generation skipped: {err}"),
    }
}
