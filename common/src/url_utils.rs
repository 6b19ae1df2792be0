use anyhow::anyhow;
use std::net::SocketAddr;
use url::Url;

pub fn parse_socket_addr(listen: &str) -> anyhow::Result<SocketAddr> {
    let url = if listen.starts_with("http://") || listen.starts_with("https://") {
        Url::parse(listen)?
    } else {
        // Fallback: prepend scheme so url crate can handle it
        Url::parse(&format!("http://{}", listen))?
    };

    let host = url
        .host_str()
        .ok_or(anyhow!("missing host in listen address"))?
        .to_string();

    let port = url.port().unwrap_or(80);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    Ok(addr)
}

/// Base URL of a node's client API.
pub fn node_api_url(ip: &str, api_port: u16) -> String {
    format!("http://{}:{}", ip, api_port)
}
