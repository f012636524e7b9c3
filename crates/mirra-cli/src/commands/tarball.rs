//! `mirra tarball`: download a tarball through the proxy

use std::path::PathBuf;

use futures::StreamExt;
use mirra_core::error::{MirraError, MirraResult};
use tokio::io::AsyncWriteExt;

use super::CommandContext;

/// Stream a tarball into `output` (default: `<cwd>/<filename>`).
///
/// A partially written file is removed if the download fails. The command
/// waits for the background cache copy before returning.
pub async fn execute(package: &str, filename: &str, output: Option<PathBuf>, ctx: &CommandContext) -> MirraResult<()> {
    let handler = ctx.handler().await?;
    let mut stream = handler.get_tarball(package, filename).await?;

    let target = output.unwrap_or_else(|| ctx.cwd.join(filename));
    let mut file = tokio::fs::File::create(&target)
        .await
        .map_err(|e| MirraError::io(format!("Failed to create {}", target.display()), e))?;

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let result = match chunk {
            Ok(chunk) => file
                .write_all(&chunk)
                .await
                .map(|()| chunk.len() as u64)
                .map_err(|e| MirraError::io(format!("Failed to write {}", target.display()), e)),
            Err(e) => Err(e),
        };
        match result {
            Ok(len) => written += len,
            Err(e) => {
                drop(file);
                // Nothing useful to report if the partial file is already gone
                let _ = tokio::fs::remove_file(&target).await;
                return Err(e);
            },
        }
    }
    file.flush()
        .await
        .map_err(|e| MirraError::io(format!("Failed to flush {}", target.display()), e))?;
    drop(stream);

    handler.shutdown().await;
    if handler.cache_write_failures() > 0 {
        ctx.output.warn("The tarball could not be stored in the local cache");
    }

    ctx.output
        .success(&format!("Saved {} ({} bytes) to {}", filename, written, target.display()));
    Ok(())
}
