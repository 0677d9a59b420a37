//! Cache Command
//!
//! Usage:
//!   newsgist cache clear

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::types::Result;

/// Remove every entry from the configured summary cache
pub async fn clear() -> Result<()> {
    let mut ctx = CommandContext::load()?;
    let cache = ctx.cache().await?;
    let out = Output::new();

    let cleared = cache.clear().await?;
    if cleared > 0 {
        out.success(&format!(
            "Cleared {} cached summaries ({} backend)",
            cleared,
            cache.backend()
        ));
    } else {
        out.info("No cache entries to clear");
    }

    Ok(())
}
