use reqwest::Client;
use uuid::Uuid;

use geotrail_logic::prelude::*;

use crate::LocationUpdate;

const fn server_host() -> &'static str {
    if let Some(host) = option_env!("GEOTRAIL_SERVER_HOST") {
        host
    } else {
        "localhost"
    }
}

const fn server_port() -> u16 {
    if let Some(port) = option_env!("GEOTRAIL_SERVER_PORT") {
        const_str::parse!(port, u16)
    } else {
        3537
    }
}

const fn server_secure() -> bool {
    if let Some(secure) = option_env!("GEOTRAIL_SERVER_SECURE") {
        const_str::eq_ignore_ascii_case!(secure, "true") || const_str::equal!(secure, "1")
    } else {
        false
    }
}

const fn server_http_proto() -> &'static str {
    if server_secure() { "https" } else { "http" }
}

const SERVER_HOST: &str = server_host();
const SERVER_PORT: u16 = server_port();
const SERVER_HTTP_PROTO: &str = server_http_proto();

const SERVER_SOCKET: &str = const_str::concat!(SERVER_HOST, ":", SERVER_PORT);

/// Base URL baked in at compile time
pub const DEFAULT_BASE_URL: &str = const_str::concat!(SERVER_HTTP_PROTO, "://", SERVER_SOCKET);

pub fn locations_url(base: &str, session: Uuid) -> String {
    let base = base.trim_end_matches('/');
    format!("{base}/sessions/{session}/locations")
}

pub async fn post_location(client: &Client, base: &str, update: &LocationUpdate) -> Result {
    let url = locations_url(base, update.session);
    client
        .post(url)
        .json(update)
        .send()
        .await
        .context("Could not send request")?
        .error_for_status()
        .context("Server returned error")?;
    Ok(())
}
