//! Order Worker Service - Entry Point
//!
//! Demo worker that consumes order and notification messages from the
//! in-memory broker.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    order_worker::run().await
}
