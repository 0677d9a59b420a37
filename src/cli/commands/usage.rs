//! Usage Command
//!
//! Print the premium provider's running usage totals against the caps.

use crate::ai::quota::{UsageCaps, UsageState};
use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::config::QuotaBackend;
use crate::types::Result;

pub async fn run(format: &str) -> Result<()> {
    let mut ctx = CommandContext::load()?;
    let governor = ctx.governor().await?;
    let state = governor.usage().await;
    let caps = UsageCaps::from_config(&ctx.config.quota);

    if format == "json" {
        let report = serde_json::json!({
            "backend": governor.backend(),
            "tier": governor.tier().to_string(),
            "key": ctx.config.quota.usage_key,
            "usage": state,
            "usdSpent": state.usd_spent(),
            "caps": {
                "maxTokensPerRun": caps.max_tokens_per_run,
                "maxRequestsPerRun": caps.max_requests_per_run,
                "maxUsdPerRun": ctx.config.quota.max_usd_per_run,
            },
            "utilization": state.utilization(&caps),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let out = Output::new();
    out.header("Premium Usage");
    out.field("Backend", format!("{} ({})", governor.backend(), governor.tier()));
    out.field("Key", &ctx.config.quota.usage_key);
    out.field("Tokens", with_cap(state.tokens_used, caps.max_tokens_per_run));
    out.field("Requests", with_cap(state.requests_made, caps.max_requests_per_run));
    out.field("Spend", usd_line(&state, ctx.config.quota.max_usd_per_run));
    out.field(
        "Utilization",
        format!("{:.1}%", state.utilization(&caps) * 100.0),
    );
    if let Some(updated) = state.updated_at {
        out.field("Updated", updated.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if caps.is_unlimited() {
        out.warning("No usage caps configured for the premium provider");
    }
    if ctx.config.quota.backend == QuotaBackend::Memory {
        out.info("The memory backend only tracks usage within a single run");
    }

    Ok(())
}

fn with_cap(used: u64, cap: u64) -> String {
    if cap == 0 {
        format!("{} (unlimited)", used)
    } else {
        format!("{} / {}", used, cap)
    }
}

fn usd_line(state: &UsageState, cap: f64) -> String {
    if cap <= 0.0 {
        format!("${:.4} (unlimited)", state.usd_spent())
    } else {
        format!("${:.4} / ${:.2}", state.usd_spent(), cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_cap() {
        assert_eq!(with_cap(5, 0), "5 (unlimited)");
        assert_eq!(with_cap(5, 50), "5 / 50");
    }

    #[test]
    fn test_usd_line() {
        let state = UsageState {
            usd_micros: 1_500,
            ..Default::default()
        };
        assert_eq!(usd_line(&state, 0.0), "$0.0015 (unlimited)");
        assert_eq!(usd_line(&state, 2.0), "$0.0015 / $2.00");
    }
}
