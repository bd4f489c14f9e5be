use std::error::Error;
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn Error>> {
    // when git metadata is missing (e.g. building from a source tarball),
    // vergen emits its default values instead of failing the build
    EmitBuilder::builder()
        .all_git()
        .git_describe(true, false, Some("NoTagShouldEverMatchThis"))
        .emit()?;

    // the version string bakes in commit state, so track the manifest and sources too
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=src");

    Ok(())
}
