//! JSON bodies for the webhook-style channels.

use super::{format_timestamp, summary_line, SiteInfo};
use crate::types::Risk;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "X-Watchdog-Signature";
pub const EVENT_NAME: &str = "watchdog.risks_detected";

const DISCORD_MAX_FIELDS: usize = 25;
const DISCORD_FIELD_LIMIT: usize = 1024;
const SLACK_MAX_RISK_BLOCKS: usize = 40;

type HmacSha256 = Hmac<Sha256>;

/// `sha256=<hex hmac>` over the exact body bytes.
pub fn signature(body: &str, secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body.as_bytes());
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

fn truncate(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let mut out: String = value.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn version_line(risk: &Risk) -> String {
    match &risk.remote_version {
        Some(remote) => format!("{} -> {}", risk.local_version, remote),
        None => risk.local_version.clone(),
    }
}

fn headline(site: &SiteInfo, risks: &[Risk]) -> String {
    if risks.is_empty() {
        format!("{}: plugin watchdog test notification", site.name)
    } else {
        format!("{}: {}", site.name, summary_line(risks.len()))
    }
}

pub fn generic_body(site: &SiteInfo, risks: &[Risk], generated_at: i64) -> Value {
    json!({
        "event": EVENT_NAME,
        "site": {
            "name": site.name,
            "url": site.url,
        },
        "generated_at": generated_at,
        "risk_count": risks.len(),
        "risks": risks,
    })
}

pub fn discord_body(site: &SiteInfo, risks: &[Risk], generated_at: i64) -> Value {
    let fields: Vec<Value> = risks
        .iter()
        .take(DISCORD_MAX_FIELDS)
        .map(|risk| {
            let mut value = format!("**{}**\n", version_line(risk));
            value.push_str(
                &risk
                    .reasons
                    .iter()
                    .map(|r| format!("• {}", r))
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
            json!({
                "name": truncate(&risk.plugin_name, 256),
                "value": truncate(&value, DISCORD_FIELD_LIMIT),
                "inline": false,
            })
        })
        .collect();

    let color = risks
        .iter()
        .filter_map(|r| r.highest_severity())
        .max()
        .map(|s| s.color())
        .unwrap_or("#2271b1");
    let color = i64::from_str_radix(color.trim_start_matches('#'), 16).unwrap_or(0x2271b1);

    json!({
        "username": "Plugin Watchdog",
        "content": headline(site, risks),
        "embeds": [{
            "title": site.name,
            "url": site.url,
            "description": format!("Scan completed {}", format_timestamp(generated_at)),
            "color": color,
            "fields": fields,
        }],
    })
}

pub fn slack_body(site: &SiteInfo, risks: &[Risk], generated_at: i64) -> Value {
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": { "type": "plain_text", "text": truncate(&headline(site, risks), 150) },
        }),
        json!({
            "type": "context",
            "elements": [{
                "type": "mrkdwn",
                "text": format!("<{}|{}> · scan completed {}", site.url, site.name, format_timestamp(generated_at)),
            }],
        }),
    ];

    for risk in risks.iter().take(SLACK_MAX_RISK_BLOCKS) {
        let mut text = format!("*{}* `{}`\n", risk.plugin_name, version_line(risk));
        text.push_str(
            &risk
                .reasons
                .iter()
                .map(|r| format!("• {}", r))
                .collect::<Vec<_>>()
                .join("\n"),
        );
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": truncate(&text, 3000) },
        }));
    }

    json!({
        "text": headline(site, risks),
        "blocks": blocks,
    })
}

pub fn teams_body(site: &SiteInfo, risks: &[Risk], generated_at: i64) -> Value {
    let facts: Vec<Value> = risks
        .iter()
        .map(|risk| {
            json!({
                "name": format!("{} ({})", risk.plugin_name, version_line(risk)),
                "value": risk.reasons.join("; "),
            })
        })
        .collect();

    let theme = risks
        .iter()
        .filter_map(|r| r.highest_severity())
        .max()
        .map(|s| s.color())
        .unwrap_or("#2271b1")
        .trim_start_matches('#')
        .to_string();

    json!({
        "@type": "MessageCard",
        "@context": "https://schema.org/extensions",
        "summary": headline(site, risks),
        "themeColor": theme,
        "title": headline(site, risks),
        "sections": [{
            "activityTitle": site.name,
            "activitySubtitle": format!("Scan completed {}", format_timestamp(generated_at)),
            "facts": facts,
        }],
        "potentialAction": [{
            "@type": "OpenUri",
            "name": "Open site",
            "targets": [{ "os": "default", "uri": site.url }],
        }],
    })
}
