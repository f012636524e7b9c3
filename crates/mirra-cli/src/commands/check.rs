//! `mirra check`: validate configuration and summarize it

use mirra_core::error::MirraResult;

use super::CommandContext;

/// Print the storage root, uplinks and package rules of the loaded configuration.
///
/// Loading already validated the file; this reports rules that proxy to
/// uplinks which do not exist, since those are ignored at runtime.
pub async fn execute(ctx: &CommandContext) -> MirraResult<()> {
    let config = &ctx.config;
    ctx.output.step("🔍", &format!("Checking {}", ctx.config_path));
    ctx.output.detail(&format!("storage: {}", config.storage));

    ctx.output.info(&format!("Uplinks ({}):", config.uplinks.len()));
    for (name, uplink) in &config.uplinks {
        ctx.output.info(&format!("  {} -> {}", name, uplink.url));
        ctx.output.detail(&format!(
            "    cache: {}, timeout: {:?}, maxage: {:?}, max_fails: {}, fail_timeout: {:?}, retries: {}",
            uplink.cache, uplink.timeout, uplink.maxage, uplink.max_fails, uplink.fail_timeout, uplink.retries
        ));
    }

    ctx.output.info(&format!("Package rules ({}):", config.packages.len()));
    let mut unknown = 0;
    for (pattern, rule) in &config.packages {
        let proxy = if rule.proxy.is_empty() {
            "(local only)".to_string()
        } else {
            rule.proxy.join(", ")
        };
        ctx.output.info(&format!("  {} -> {}", pattern, proxy));

        for name in rule.proxy.iter().filter(|name| !config.uplinks.contains_key(name.as_str())) {
            unknown += 1;
            ctx.output
                .warn(&format!("Rule '{}' proxies to unknown uplink '{}', it will be ignored", pattern, name));
        }
    }

    if unknown == 0 {
        ctx.output.success("Configuration is valid");
    } else {
        ctx.output
            .success(&format!("Configuration is valid ({} unknown uplink references)", unknown));
    }
    Ok(())
}
