//! Message consumer: greets every name published on the broker

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub fn greeting(message: &str) -> String {
    format!("Hi! {message}")
}

/// Log a greeting for each message until `shutdown` fires or the broker goes away
pub fn spawn(
    mut messages: broadcast::Receiver<String>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = messages.recv() => match received {
                    Ok(message) => info!("{}", greeting(&message)),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Consumer lagged behind the broker");
                    },
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}
