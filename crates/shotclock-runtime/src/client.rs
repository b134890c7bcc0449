//! One-shot HTTP clients for the `state` and `list` subcommands.

use std::net::SocketAddr;

use shotclock_core::{ClockListing, format_display, validate_session_key};

/// Issue a `GET` against the daemon's HTTP surface and return the body.
/// Non-success responses are errors carrying the status and body.
pub(crate) async fn http_get(addr: SocketAddr, path: &str) -> anyhow::Result<String> {
    let client = reqwest::Client::builder().no_proxy().build()?;
    let response = client
        .get(format!("http://{addr}{path}"))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {addr}: {e}"))?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        anyhow::bail!("{path}: {status}: {}", body.trim());
    }
    Ok(body)
}

/// `shotclock state <game_id>`: print the plain-text line for one session.
pub async fn cmd_state(addr: SocketAddr, game_id: &str) -> anyhow::Result<()> {
    if !validate_session_key(game_id) {
        anyhow::bail!("invalid session key {game_id:?}");
    }
    let body = http_get(addr, &format!("/api/clock/{game_id}/state.txt")).await?;
    println!("{}", body.trim_end());
    Ok(())
}

/// `shotclock list`: one line per live session, sorted by key.
pub async fn cmd_list(addr: SocketAddr) -> anyhow::Result<()> {
    let body = http_get(addr, "/api/clocks").await?;
    let listing: ClockListing = serde_json::from_str(&body)?;
    print!("{}", format_listing(&listing));
    Ok(())
}

/// Pure formatting logic for list output, separated for testability.
pub(crate) fn format_listing(listing: &ClockListing) -> String {
    if listing.clocks.is_empty() {
        return "no sessions\n".to_string();
    }
    let width = listing.clocks.keys().map(String::len).max().unwrap_or(0);
    let mut out = String::new();
    for (game_id, clock) in &listing.clocks {
        let status = if clock.running { "running" } else { "stopped" };
        out.push_str(&format!(
            "{game_id:<width$}  {}  {status:<7}  length {}\n",
            format_display(clock.remaining_ms),
            format_display(clock.length_ms),
        ));
    }
    out
}
