//! Build script for Audio Reset
//!
//! Embeds the Windows application manifest and links the Windows
//! libraries used for Core Audio, services and the tray.

fn main() {
    println!("cargo:rerun-if-changed=resources/app.rc");
    println!("cargo:rerun-if-changed=resources/app.manifest");

    // Only run on Windows
    if std::env::var("CARGO_CFG_TARGET_OS").unwrap() != "windows" {
        return;
    }

    embed_resource::compile("resources/app.rc", embed_resource::NONE);

    println!("cargo:rustc-link-lib=ole32");
    println!("cargo:rustc-link-lib=user32");
    println!("cargo:rustc-link-lib=shell32");
    println!("cargo:rustc-link-lib=advapi32");
}
