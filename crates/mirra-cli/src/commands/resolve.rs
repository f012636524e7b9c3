//! `mirra resolve`: show how a package is routed

use mirra_core::error::MirraResult;
use mirra_core::utils::validate_package_name;
use mirra_uplink::Uplink;

use super::CommandContext;

/// Print the rule matching `package` and its eligible uplinks in order
pub async fn execute(package: &str, ctx: &CommandContext) -> MirraResult<()> {
    validate_package_name(package)?;
    let handler = ctx.handler().await?;
    let router = handler.router()?;

    let Some((pattern, rule)) = router.rule_for(package) else {
        ctx.output.warn(&format!("No package rule matches {}", package));
        return Ok(());
    };
    ctx.output.info(&format!("{} matches rule '{}'", package, pattern));
    ctx.output.detail(&format!("  access: {}", rule.access.join(", ")));

    let uplinks = router.resolve(package);
    if uplinks.is_empty() {
        ctx.output.info("  served from local storage only");
        return Ok(());
    }

    for (position, uplink) in uplinks.iter().enumerate() {
        let descriptor = uplink.descriptor();
        let role = if position == 0 { "metadata + tarballs" } else { "metadata" };
        ctx.output.info(&format!(
            "  {}. {} ({}, cache: {}) [{}]",
            position + 1,
            descriptor.name,
            descriptor.base_url,
            descriptor.cache,
            role
        ));
    }
    Ok(())
}
