//! Signature validation and provider-specific event normalization.
//!
//! Every validator fails closed: an endpoint configured with an empty
//! secret rejects all requests.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use shannon_core::WebhookEvent;

type HmacSha256 = Hmac<Sha256>;

// ── Signature validation ───────────────────────────────────────

/// GitHub: `X-Hub-Signature-256` carries `sha256=<hex HMAC-SHA256>`.
pub fn validate_github_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        return false;
    }
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Sentry: `sentry-hook-signature` carries a bare hex HMAC-SHA256.
pub fn validate_sentry_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Generic: constant-time equality on the `X-Webhook-Secret` header.
pub fn validate_generic_secret(provided: &str, configured: &str) -> bool {
    if configured.is_empty() || provided.is_empty() {
        return false;
    }
    if provided.len() != configured.len() {
        return false;
    }
    provided
        .bytes()
        .zip(configured.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

// ── Normalization ──────────────────────────────────────────────

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str()
}

/// Normalize a GitHub webhook payload into a `WebhookEvent`.
pub fn normalize_github_event(event_type: &str, payload: Value, channel: &str) -> WebhookEvent {
    let repo = str_at(&payload, &["repository", "full_name"]).unwrap_or("unknown");

    let summary = match event_type {
        "push" => {
            let count = payload
                .get("commits")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            let branch = str_at(&payload, &["ref"])
                .unwrap_or("")
                .trim_start_matches("refs/heads/");
            let pusher = str_at(&payload, &["pusher", "name"]).unwrap_or("unknown");
            format!("{pusher} pushed {count} commit(s) to {repo}/{branch}")
        }
        "pull_request" => {
            let action = str_at(&payload, &["action"]).unwrap_or("");
            let number = payload
                .get("pull_request")
                .and_then(|pr| pr.get("number"))
                .and_then(Value::as_u64)
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".into());
            let title = str_at(&payload, &["pull_request", "title"]).unwrap_or("");
            let user = str_at(&payload, &["pull_request", "user", "login"]).unwrap_or("unknown");
            format!("{user} {action} PR #{number} on {repo}: {title}")
        }
        "issues" => {
            let action = str_at(&payload, &["action"]).unwrap_or("");
            let number = payload
                .get("issue")
                .and_then(|i| i.get("number"))
                .and_then(Value::as_u64)
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".into());
            let title = str_at(&payload, &["issue", "title"]).unwrap_or("");
            let user = str_at(&payload, &["issue", "user", "login"]).unwrap_or("unknown");
            format!("{user} {action} issue #{number} on {repo}: {title}")
        }
        "workflow_run" => {
            let action = str_at(&payload, &["action"]).unwrap_or("");
            let name = str_at(&payload, &["workflow_run", "name"]).unwrap_or("");
            let conclusion = str_at(&payload, &["workflow_run", "conclusion"]).unwrap_or("");
            format!("Workflow '{name}' {action} on {repo} — {conclusion}")
        }
        other => format!("GitHub {other} event on {repo}"),
    };

    WebhookEvent {
        source: "github".into(),
        event_type: event_type.to_string(),
        summary,
        payload,
        channel_target: channel.to_string(),
    }
}

/// Normalize a Sentry webhook payload into a `WebhookEvent`.
pub fn normalize_sentry_event(payload: Value, channel: &str) -> WebhookEvent {
    let data = payload.get("data").unwrap_or(&payload);
    let event = data.get("event").unwrap_or(data);

    let title = event
        .get("title")
        .and_then(Value::as_str)
        .or_else(|| str_at(&payload, &["message"]))
        .unwrap_or("Sentry alert")
        .to_string();
    let culprit = event
        .get("culprit")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let project = str_at(&payload, &["project_name"])
        .or_else(|| str_at(&payload, &["project"]))
        .unwrap_or("unknown");
    let level = event.get("level").and_then(Value::as_str).unwrap_or("error");

    let summary = if culprit.is_empty() {
        format!("[{level}] {project}: {title}")
    } else {
        format!("[{level}] {project}: {title} ({culprit})")
    };

    WebhookEvent {
        source: "sentry".into(),
        event_type: "alert".into(),
        summary,
        payload,
        channel_target: channel.to_string(),
    }
}

/// Normalize anything else: `message`, then `summary`, then a truncated
/// dump of the payload.
pub fn normalize_generic_event(payload: Value, channel: &str) -> WebhookEvent {
    let summary = str_at(&payload, &["message"])
        .or_else(|| str_at(&payload, &["summary"]))
        .map(str::to_string)
        .unwrap_or_else(|| {
            let dump = payload.to_string();
            dump.chars().take(140).collect()
        });
    let event_type = str_at(&payload, &["event_type"])
        .unwrap_or("generic")
        .to_string();

    WebhookEvent {
        source: "generic".into(),
        event_type,
        summary,
        payload,
        channel_target: channel.to_string(),
    }
}
