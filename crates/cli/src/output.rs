//! Output formatting: JSON mode writes machine-readable envelopes to
//! stdout; human mode prints to stdout and errors to stderr.

use mcport_common::Error;

/// Print a successful result.
pub fn emit(json: bool, value: &serde_json::Value, human: impl FnOnce(&serde_json::Value)) {
    if json {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    } else {
        human(value);
    }
}

/// Print an error in the requested mode. Returns the coded exit status.
pub fn fail(json: bool, err: &Error) -> u8 {
    if json {
        let envelope = serde_json::json!({
            "error": {
                "code": err.exit_code(),
                "message": err.to_string(),
            }
        });
        println!("{envelope}");
    } else {
        eprintln!("error: {err}");
    }
    err.exit_code()
}

/// Render a past unix timestamp as a compact age marker for listings.
#[must_use]
pub fn render_age(updated_at: u64) -> String {
    let now = mcport_common::paths::now_unix();
    let delta = now.saturating_sub(updated_at);
    match delta {
        0..=59 => format!("{delta}s ago"),
        60..=3599 => format!("{}m ago", delta / 60),
        3600..=86_399 => format!("{}h ago", delta / 3600),
        _ => format!("{}d ago", delta / 86_400),
    }
}

/// Render a future unix timestamp as a time-to-expiry marker.
#[must_use]
pub fn render_eta(expires_at: u64) -> String {
    let now = mcport_common::paths::now_unix();
    if expires_at <= now {
        return "expired".into();
    }
    let delta = expires_at - now;
    match delta {
        0..=59 => format!("in {delta}s"),
        60..=3599 => format!("in {}m", delta / 60),
        3600..=86_399 => format!("in {}h", delta / 3600),
        _ => format!("in {}d", delta / 86_400),
    }
}
