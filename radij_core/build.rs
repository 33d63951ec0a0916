use std::env;
use std::path::PathBuf;

// Sources that contribute to the C header.
const ABI_SOURCES: [&str; 4] = [
    "src/public_api.rs",
    "src/errors.rs",
    "src/telemetry.rs",
    "cbindgen.toml",
];

fn main() {
    for src in ABI_SOURCES {
        println!("cargo:rerun-if-changed={src}");
    }

    let crate_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo"));
    let include_dir = crate_dir.join("include");
    std::fs::create_dir_all(&include_dir).expect("create include/");

    let config = cbindgen::Config::from_file(crate_dir.join("cbindgen.toml")).expect("read cbindgen.toml");

    match cbindgen::Builder::new()
        .with_config(config)
        .with_crate(&crate_dir)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(include_dir.join("radij.h"));
        }
        // previous header stays in place
        Err(e) => println!("cargo:warning=radij.h not regenerated: {e}"),
    }
}
