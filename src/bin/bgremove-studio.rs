//! bgremove-studio command line tool
//!
//! Removes backgrounds from videos, images and image directories through an
//! external removal engine.

#[cfg(feature = "cli")]
use bgremove_studio::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
