//! Outbound dialing.
//!
//! Servers are given as `irc://host:port` or bare `host:port`. An optional
//! `socks5://host:port` proxy tunnels the connection with an unauthenticated
//! SOCKS5 CONNECT (RFC 1928).

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};
use url::Url;

use crate::error::TransportError;

/// Port used when an `irc://` URL omits one.
pub const DEFAULT_IRC_PORT: u16 = 6667;

const SOCKS_VERSION: u8 = 0x05;
const SOCKS_NO_AUTH: u8 = 0x00;
const SOCKS_CMD_CONNECT: u8 = 0x01;
const SOCKS_ATYP_V4: u8 = 0x01;
const SOCKS_ATYP_DOMAIN: u8 = 0x03;
const SOCKS_ATYP_V6: u8 = 0x04;

/// A resolved-enough `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parse a server address.
pub fn parse_server(addr: &str) -> Result<Endpoint, TransportError> {
    if addr.contains("://") {
        let url = Url::parse(addr).map_err(|_| TransportError::Address(addr.to_string()))?;
        if url.scheme() != "irc" {
            return Err(TransportError::Address(addr.to_string()));
        }
        return endpoint_from_url(&url, DEFAULT_IRC_PORT, addr);
    }
    parse_host_port(addr)
}

/// Parse a proxy URL. Only `socks5://` is supported.
pub fn parse_proxy(addr: &str) -> Result<Endpoint, TransportError> {
    let url = Url::parse(addr).map_err(|_| TransportError::Address(addr.to_string()))?;
    match url.scheme() {
        "socks5" | "socks5h" => endpoint_from_url(&url, 1080, addr),
        _ => Err(TransportError::Address(addr.to_string())),
    }
}

fn endpoint_from_url(url: &Url, default_port: u16, raw: &str) -> Result<Endpoint, TransportError> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TransportError::Address(raw.to_string()))?;
    Ok(Endpoint {
        host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
        port: url.port().unwrap_or(default_port),
    })
}

fn parse_host_port(addr: &str) -> Result<Endpoint, TransportError> {
    let bad = || TransportError::Address(addr.to_string());
    let (host, port) = addr.rsplit_once(':').ok_or_else(bad)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(bad());
    }
    let port = port.parse::<u16>().map_err(|_| bad())?;
    Ok(Endpoint {
        host: host.to_string(),
        port,
    })
}

/// Open a TCP connection to `server`, through `proxy` when given.
pub async fn dial(server: &str, proxy: Option<&str>) -> Result<TcpStream, TransportError> {
    let target = parse_server(server)?;
    match proxy.filter(|p| !p.is_empty()) {
        None => {
            let stream = connect_tcp(&target).await?;
            info!(server = %target, "connected");
            Ok(stream)
        }
        Some(proxy) => {
            let via = parse_proxy(proxy)?;
            let mut stream = connect_tcp(&via).await?;
            socks5_connect(&mut stream, &target).await?;
            info!(server = %target, proxy = %via, "connected through proxy");
            Ok(stream)
        }
    }
}

async fn connect_tcp(endpoint: &Endpoint) -> Result<TcpStream, TransportError> {
    TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|source| TransportError::Connect {
            addr: endpoint.to_string(),
            source,
        })
}

/// Run the SOCKS5 greeting and CONNECT exchange on an open stream.
pub async fn socks5_connect<S>(stream: &mut S, target: &Endpoint) -> Result<(), TransportError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let io = |e: std::io::Error| TransportError::Proxy(e.to_string());

    stream
        .write_all(&[SOCKS_VERSION, 1, SOCKS_NO_AUTH])
        .await
        .map_err(io)?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.map_err(io)?;
    if choice != [SOCKS_VERSION, SOCKS_NO_AUTH] {
        return Err(TransportError::Proxy(format!(
            "unsupported auth method {:#04x}",
            choice[1]
        )));
    }

    let mut request = vec![SOCKS_VERSION, SOCKS_CMD_CONNECT, 0x00];
    match target.host.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(ip)) => {
            request.push(SOCKS_ATYP_V4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(std::net::IpAddr::V6(ip)) => {
            request.push(SOCKS_ATYP_V6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let name = target.host.as_bytes();
            let len = u8::try_from(name.len())
                .map_err(|_| TransportError::Address(target.host.clone()))?;
            request.push(SOCKS_ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(name);
        }
    }
    request.extend_from_slice(&target.port.to_be_bytes());
    stream.write_all(&request).await.map_err(io)?;

    // VER REP RSV ATYP
    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.map_err(io)?;
    if reply[0] != SOCKS_VERSION {
        return Err(TransportError::Proxy("bad reply version".to_string()));
    }
    if reply[1] != 0x00 {
        return Err(TransportError::Proxy(format!(
            "connect rejected with code {:#04x}",
            reply[1]
        )));
    }

    // Drain BND.ADDR and BND.PORT
    let addr_len = match reply[3] {
        SOCKS_ATYP_V4 => 4,
        SOCKS_ATYP_V6 => 16,
        SOCKS_ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.map_err(io)?;
            len[0] as usize
        }
        other => {
            return Err(TransportError::Proxy(format!(
                "unknown address type {other:#04x}"
            )));
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await.map_err(io)?;
    debug!(dest = %target, "socks5 tunnel established");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_forms() {
        assert_eq!(
            parse_server("irc://irc.example.net:6697").unwrap(),
            Endpoint {
                host: "irc.example.net".into(),
                port: 6697
            }
        );
        assert_eq!(parse_server("irc://irc.example.net").unwrap().port, 6667);
        assert_eq!(parse_server("127.0.0.1:7000").unwrap().port, 7000);
        assert_eq!(parse_server("[::1]:7000").unwrap().host, "::1");
    }

    #[test]
    fn test_parse_server_rejects_garbage() {
        assert!(parse_server("no-port").is_err());
        assert!(parse_server(":6667").is_err());
        assert!(parse_server("http://example.net:80").is_err());
        assert!(parse_server("host:notaport").is_err());
    }

    #[test]
    fn test_parse_proxy() {
        let p = parse_proxy("socks5://127.0.0.1:9050").unwrap();
        assert_eq!(p.to_string(), "127.0.0.1:9050");
        assert!(parse_proxy("http://127.0.0.1:8080").is_err());
    }

    #[tokio::test]
    async fn test_socks5_domain_connect() {
        let (mut client, mut proxy) = tokio::io::duplex(256);
        let target = Endpoint {
            host: "irc.example.net".into(),
            port: 6667,
        };

        let server = tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            proxy.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [5, 1, 0]);
            proxy.write_all(&[5, 0]).await.unwrap();

            let mut head = [0u8; 5];
            proxy.read_exact(&mut head).await.unwrap();
            assert_eq!(&head[..4], &[5, 1, 0, 3]);
            let mut rest = vec![0u8; head[4] as usize + 2];
            proxy.read_exact(&mut rest).await.unwrap();
            assert_eq!(&rest[..rest.len() - 2], b"irc.example.net");
            assert_eq!(&rest[rest.len() - 2..], &6667u16.to_be_bytes());

            proxy
                .write_all(&[5, 0, 0, 1, 10, 0, 0, 1, 0x1a, 0x0b])
                .await
                .unwrap();
        });

        socks5_connect(&mut client, &target).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_socks5_rejection() {
        let (mut client, mut proxy) = tokio::io::duplex(256);
        let target = Endpoint {
            host: "10.0.0.2".into(),
            port: 6667,
        };

        tokio::spawn(async move {
            let mut buf = [0u8; 3];
            proxy.read_exact(&mut buf).await.unwrap();
            proxy.write_all(&[5, 0]).await.unwrap();
            let mut req = [0u8; 10];
            proxy.read_exact(&mut req).await.unwrap();
            proxy.write_all(&[5, 5, 0, 1, 0, 0, 0, 0, 0, 0]).await.unwrap();
        });

        let err = socks5_connect(&mut client, &target).await.unwrap_err();
        assert!(matches!(err, TransportError::Proxy(_)));
    }
}
