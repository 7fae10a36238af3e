// Build script that tries to generate a C header with `cbindgen`.
// If `cbindgen` is not available, it falls back to copying the
// checked-in `include/audiobench.h` to $OUT_DIR.
//
// Consumers can include the header from:
//   - <repo>/audiobench-ffi/include/audiobench.h   (checked-in)
//   - $OUT_DIR/audiobench.h

use std::{env, fs, path::PathBuf, process::Command};

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=include/audiobench.h");

    let crate_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let header_repo = crate_dir.join("include").join("audiobench.h");
    let header_out = out_dir.join("audiobench.h");

    let cbindgen_ok = Command::new("cbindgen")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);

    if cbindgen_ok {
        let generated = Command::new("cbindgen")
            .args(["--crate", "audiobench-ffi", "--lang", "C", "--output"])
            .arg(&header_out)
            .current_dir(&crate_dir)
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if generated {
            println!("cargo:warning=audiobench-ffi: generated header -> {}", header_out.display());
            return;
        }
        println!("cargo:warning=audiobench-ffi: cbindgen failed; using checked-in header");
    }

    // The checked-in header is the source of truth when cbindgen is absent.
    if header_repo.exists() {
        fs::copy(&header_repo, &header_out).expect("copy include/audiobench.h to OUT_DIR");
    }
}
