//! Build script for iplimit
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! shown by `iplimit --version`.

fn main() {
    // Re-run build if the default program paths are overridden at build time
    println!("cargo:rerun-if-env-changed=IPLIMIT_IPTABLES_PATH");
    println!("cargo:rerun-if-env-changed=IPLIMIT_IPTABLES_SAVE_PATH");

    // Embed git commit, build time, and dirty status
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
