use tokio::sync::watch;

/// Resolves once the flag is raised, or once its sender is gone.
pub(crate) async fn raised(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|raised| *raised).await;
}
