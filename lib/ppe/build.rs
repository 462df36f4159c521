fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo::rustc-check-cfg=cfg(usdt_stable_asm)");

    // The probes in `ppe_provider` need inline asm, which only became
    // stable in 1.59.
    if version_check::is_min_version("1.59").unwrap_or(false) {
        println!("cargo:rustc-cfg=usdt_stable_asm");
    }
}
