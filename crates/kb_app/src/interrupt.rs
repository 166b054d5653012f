//! Ctrl-C handling. One token is cancelled on the first interrupt and every
//! command in flight watches it.

use std::future::Future;

use kb_engine::CancellationToken;
use kb_logging::kb_info;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupted")]
pub struct Interrupted;

/// Cancels `cancel` when the process receives Ctrl-C. Needs a Tokio runtime.
pub fn install_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            kb_info!("Interrupt received");
            cancel.cancel();
        }
    });
}

/// Runs `work` to completion unless `cancel` fires first. The work is
/// dropped on interrupt, so nothing it would have returned is applied.
pub async fn until_interrupted<F>(
    cancel: &CancellationToken,
    work: F,
) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted),
        output = work => Ok(output),
    }
}
