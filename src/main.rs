/// Entry point for the CRI probe.
///
/// Polls the container runtime, publishes topology reports as JSON lines on
/// stdout and serves them over HTTP until interrupted.
///
/// # Examples
///
/// ```bash
/// CRI_PROBE_ENDPOINT=unix:///run/containerd/containerd.sock RUST_LOG=debug cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    cri_probe::run().await
}
