use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use watchdog_core::notifier::EmailPayload;
use watchdog_core::settings::is_plain_address;
use watchdog_core::Mailer;

/// Hands HTML mail to the local MTA through `sendmail -t -i`.
pub struct SendmailMailer {
    program: String,
    from: String,
}

impl SendmailMailer {
    pub fn new(program: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            from: from.into(),
        }
    }
}

// Raw bytes per encoded word; 45 bytes become 60 base64 characters,
// keeping each word under the 75 character limit.
const ENCODED_WORD_BYTES: usize = 45;

/// Builds the RFC 5322 message piped to sendmail. Recipients that are not a
/// single plain address are dropped.
pub fn compose_message(from: &str, payload: &EmailPayload) -> String {
    let recipients: Vec<&str> = payload
        .to
        .iter()
        .map(|r| r.trim())
        .filter(|r| {
            let keep = is_plain_address(r);
            if !keep && !r.is_empty() {
                tracing::warn!(recipient = %r.escape_debug(), "Skipping malformed recipient");
            }
            keep
        })
        .collect();

    let subject: String = payload.subject.chars().filter(|c| !c.is_control()).collect();

    format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/html; charset=UTF-8\r\n\r\n{}\r\n",
        from,
        recipients.join(", "),
        encode_header(&subject),
        payload.html
    )
}

/// RFC 2047 `B` encoding for header text outside ASCII; folded over several
/// lines when one encoded word is not enough.
fn encode_header(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in text.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_WORD_BYTES {
            words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(&chunk)));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(&chunk)));
    }
    words.join("\r\n ")
}

#[async_trait]
impl Mailer for SendmailMailer {
    async fn send(&self, message: &EmailPayload) -> Result<(), String> {
        let body = compose_message(&self.from, message);

        let mut child = Command::new(&self.program)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("Could not start {}: {}", self.program, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(body.as_bytes())
                .await
                .map_err(|e| format!("Could not write to {}: {}", self.program, e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("{} did not finish: {}", self.program, e))?;

        if output.status.success() {
            tracing::debug!(recipients = message.to.len(), "Mail handed to sendmail");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ))
        }
    }
}
