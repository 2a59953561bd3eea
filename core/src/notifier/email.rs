use super::{format_timestamp, summary_line, SiteInfo};
use crate::types::Risk;

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn subject(site: &SiteInfo, risks: &[Risk]) -> String {
    if risks.is_empty() {
        format!("[{}] Plugin watchdog test notification", site.name)
    } else {
        format!("[{}] {}", site.name, summary_line(risks.len()))
    }
}

fn badge(label: &str, color: &str) -> String {
    format!(
        "<span style=\"display:inline-block;padding:2px 8px;border-radius:10px;\
         background:{};color:#fff;font-size:12px;font-weight:600;\">{}</span>",
        color,
        escape_html(label)
    )
}

fn risk_card(risk: &Risk) -> String {
    let mut card = String::new();
    card.push_str(
        "<div style=\"border:1px solid #dcdcde;border-radius:6px;padding:16px;margin:0 0 16px;\">",
    );

    card.push_str(&format!(
        "<h3 style=\"margin:0 0 8px;font-size:16px;\">{} ",
        escape_html(&risk.plugin_name)
    ));
    if let Some(severity) = risk.highest_severity() {
        card.push_str(&badge(severity.label(), severity.color()));
    }
    card.push_str("</h3>");

    card.push_str(&format!(
        "<p style=\"margin:0 0 8px;color:#50575e;\">Installed <strong>{}</strong>",
        escape_html(&risk.local_version)
    ));
    if let Some(remote) = &risk.remote_version {
        card.push_str(&format!(", latest <strong>{}</strong>", escape_html(remote)));
    }
    card.push_str("</p>");

    card.push_str("<ul style=\"margin:0 0 8px;padding-left:20px;\">");
    for reason in &risk.reasons {
        card.push_str(&format!("<li>{}</li>", escape_html(reason)));
    }
    card.push_str("</ul>");

    for vuln in &risk.details.vulnerabilities {
        card.push_str("<div style=\"border-top:1px solid #f0f0f1;padding-top:8px;margin-top:8px;\">");
        if let Some(severity) = vuln.severity {
            card.push_str(&badge(severity.label(), severity.color()));
            card.push(' ');
        }
        card.push_str(&format!("<strong>{}</strong>", escape_html(&vuln.title)));

        let mut facts = Vec::new();
        if let Some(cve) = &vuln.cve {
            facts.push(escape_html(cve));
        }
        if let Some(score) = vuln.cvss_score {
            facts.push(format!("CVSS {:.1}", score));
        }
        if let Some(fixed) = &vuln.fixed_in {
            facts.push(format!("fixed in {}", escape_html(fixed)));
        }
        if !facts.is_empty() {
            card.push_str(&format!(
                "<div style=\"color:#50575e;font-size:13px;\">{}</div>",
                facts.join(" &middot; ")
            ));
        }

        for reference in vuln.references.iter().take(3) {
            let reference = escape_html(reference);
            card.push_str(&format!(
                "<div style=\"font-size:13px;\"><a href=\"{0}\">{0}</a></div>",
                reference
            ));
        }
        card.push_str("</div>");
    }

    card.push_str("</div>");
    card
}

pub fn render(site: &SiteInfo, risks: &[Risk], generated_at: i64) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html><html><body style=\"margin:0;padding:24px;background:#f6f7f7;\
                   font-family:-apple-system,Segoe UI,Roboto,sans-serif;color:#1d2327;\">");
    html.push_str("<div style=\"max-width:640px;margin:0 auto;background:#fff;padding:24px;border-radius:8px;\">");

    html.push_str(&format!(
        "<h2 style=\"margin:0 0 4px;\">{}</h2>",
        escape_html(&site.name)
    ));
    html.push_str(&format!(
        "<p style=\"margin:0 0 24px;color:#50575e;\">Scan completed {}</p>",
        escape_html(&format_timestamp(generated_at))
    ));

    if risks.is_empty() {
        html.push_str(
            "<p>No plugins currently need attention. This message confirms that \
             notifications are being delivered.</p>",
        );
    } else {
        html.push_str(&format!("<p>{}:</p>", escape_html(&summary_line(risks.len()))));
        for risk in risks {
            html.push_str(&risk_card(risk));
        }
    }

    html.push_str(&format!(
        "<p style=\"margin-top:24px;font-size:12px;color:#8c8f94;\">Sent by the plugin watchdog on \
         <a href=\"{0}\">{0}</a>.</p>",
        escape_html(&site.url)
    ));
    html.push_str("</div></body></html>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RiskDetails, VulnerabilityRecord};

    fn site() -> SiteInfo {
        SiteInfo {
            name: "Example <Blog>".to_string(),
            url: "https://example.com".to_string(),
            admin_email: None,
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&'</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;");
    }

    #[test]
    fn test_render_includes_cards_and_badges() {
        let risk = Risk {
            plugin_slug: "forms".to_string(),
            plugin_name: "Forms".to_string(),
            local_version: "1.0".to_string(),
            remote_version: Some("1.4".to_string()),
            reasons: vec!["Update available: 1.0 -> 1.4".to_string()],
            details: RiskDetails {
                vulnerabilities: vec![VulnerabilityRecord::new(
                    "Stored XSS",
                    vec!["https://example.org/advisory".to_string()],
                    Some("1.3".to_string()),
                    Some("CVE-2024-0001".to_string()),
                    Some(9.1),
                )],
            },
        };

        let html = render(&site(), &[risk], 0);

        assert!(html.contains("Example &lt;Blog&gt;"));
        assert!(html.contains("<h3"));
        assert!(html.contains("Severe"));
        assert!(html.contains("CVE-2024-0001"));
        assert!(html.contains("Update available: 1.0 -&gt; 1.4"));
        assert!(html.contains("1 plugin needs attention"));
    }

    #[test]
    fn test_subject() {
        assert_eq!(subject(&site(), &[]), "[Example <Blog>] Plugin watchdog test notification");
    }
}
