//! cutout CLI
//!
//! Command-line frontend for the cutout background removal library.

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cutout::cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Rebuild with --features cli");
}
