//! Link settings for the `python` feature.

fn main() {
    let building_extension = std::env::var_os("CARGO_FEATURE_PYTHON").is_some();
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    // `_headfit` is loaded into a running interpreter, which supplies the
    // libpython symbols; macOS refuses to link them as undefined otherwise.
    if building_extension && target_os == "macos" {
        println!("cargo:rustc-link-arg=-Wl,-undefined,dynamic_lookup");
    }
}
