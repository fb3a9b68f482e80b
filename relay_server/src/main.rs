#[tokio::main]
async fn main() {
    // Bind and serve failures are already logged inside; the exit code
    // still has to reflect them.
    if relay_server::run_with_config().await.is_err() {
        std::process::exit(1);
    }
}
