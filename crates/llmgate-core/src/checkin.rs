//! Daily checkin (§4.G). Grounded on
//! `original_source/service/checkin.go` — including its exact
//! disabled/already-done message classification, since the upstream admin
//! API has no structured error code for either case.

use time::OffsetDateTime;
use tracing::{info, warn};

use llmgate_storage::{ProviderRow, Storage};
use llmgate_upstream::UpstreamAdminClient;

pub async fn checkin_provider(storage: &dyn Storage, provider: &ProviderRow, proxy: Option<&str>) {
    if let Err(err) = run_checkin(storage, provider, proxy).await {
        warn!(provider = %provider.name, error = %err, "checkin failed");
    }
}

async fn run_checkin(storage: &dyn Storage, provider: &ProviderRow, proxy: Option<&str>) -> anyhow::Result<()> {
    let admin_token = provider
        .admin_token
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("provider has no admin_token configured"))?;
    let user_id = provider.user_id.unwrap_or(0);
    let client = UpstreamAdminClient::new(&provider.base_url, admin_token, user_id, proxy)?;

    match client.checkin().await {
        Ok(result) => {
            storage
                .record_checkin_result(provider.id, None, Some(OffsetDateTime::now_utc()))
                .await?;
            info!(provider = %provider.name, quota_awarded = result.quota_awarded, "checkin success");
            Ok(())
        }
        Err(err) => {
            let message = err.to_string();
            if is_checkin_disabled_error(&message) {
                storage
                    .record_checkin_result(provider.id, Some(false), None)
                    .await?;
                info!(provider = %provider.name, %message, "checkin disabled by upstream, turning off");
                return Ok(());
            }
            if is_checkin_already_done_error(&message) {
                storage
                    .record_checkin_result(provider.id, None, Some(OffsetDateTime::now_utc()))
                    .await?;
                info!(provider = %provider.name, "already checked in today, synced checkin time");
                return Ok(());
            }
            Err(anyhow::Error::new(err))
        }
    }
}

fn is_checkin_disabled_error(message: &str) -> bool {
    let msg = message.to_lowercase();
    if msg.contains("checkin")
        && (msg.contains("disabled")
            || msg.contains("not enabled")
            || msg.contains("not open")
            || msg.contains("not allowed"))
    {
        return true;
    }
    message.contains("未开启签到")
        || message.contains("未启用签到")
        || message.contains("签到未开启")
        || message.contains("签到未启用")
        || message.contains("签到功能未开启")
        || message.contains("签到功能未启用")
        || msg.contains("cloudflare")
}

fn is_checkin_already_done_error(message: &str) -> bool {
    let msg = message.to_lowercase();
    if msg.contains("checkin") && (msg.contains("already") || msg.contains("today")) {
        return true;
    }
    message.contains("已签到")
        || message.contains("今日已签到")
        || message.contains("今天已签到")
        || message.contains("已经签到")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_checkin_disabled_variants() {
        assert!(is_checkin_disabled_error("checkin is not enabled for this account"));
        assert!(is_checkin_disabled_error("签到功能未开启"));
        assert!(is_checkin_disabled_error(
            "upstream is behind a cloudflare challenge"
        ));
        assert!(!is_checkin_disabled_error("ok"));
    }

    #[test]
    fn detects_already_checked_in_variants() {
        assert!(is_checkin_already_done_error("you have already checked in today"));
        assert!(is_checkin_already_done_error("今天已签到"));
        assert!(!is_checkin_already_done_error("checkin is not enabled"));
    }
}
