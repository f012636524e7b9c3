//! `mirra metadata`: sync a package and print its merged document

use mirra_core::error::{MirraError, MirraResult};
use mirra_core::utils::validate_package_name;
use mirra_storage::SyncOptions;
use mirra_store::LocalStorage;

use super::CommandContext;

/// Sync `package` with its uplinks, print the merged document as JSON and
/// report every uplink that failed along the way.
pub async fn execute(package: &str, refresh: bool, offline: bool, ctx: &CommandContext) -> MirraResult<()> {
    validate_package_name(package)?;
    let handler = ctx.handler().await?;

    let local = handler.local_storage()?.read_metadata(package).await?;
    let options = SyncOptions {
        uplinks_look: !offline,
        force_refresh: refresh,
    };

    let outcome = match handler.sync_uplinks_metadata(package, local, options).await {
        Ok(outcome) => outcome,
        Err(err) => {
            for error in err.uplink_errors().iter().flatten() {
                ctx.output.error(&error.to_string());
            }
            return Err(err.into());
        },
    };

    for error in outcome.errors.iter().flatten() {
        ctx.output.warn(&error.to_string());
    }

    let json = serde_json::to_string_pretty(&outcome.metadata)
        .map_err(|e| MirraError::json(format!("Failed to serialize metadata of '{}'", package), e))?;
    println!("{}", json);

    if outcome.updated {
        ctx.output.success(&format!(
            "Stored {} versions of {} in {}",
            outcome.metadata.versions.len(),
            package,
            ctx.config.storage
        ));
    }
    Ok(())
}
