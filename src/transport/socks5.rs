//! # SOCKS5 Negotiation
//!
//! Standard method-negotiation and CONNECT framing (RFC 1928/1929),
//! run against an already-open proxy stream before any protocol bytes
//! flow. Supports the no-auth and username/password methods. Any
//! failure aborts the connection attempt; no partial state is kept.

use crate::config::Socks5Config;
use crate::error::{constants, ProtocolError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_REJECTED: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Drives the full SOCKS5 negotiation: method selection, optional
/// username/password sub-negotiation, then a CONNECT request for the
/// target host and port.
pub async fn negotiate<S>(
    stream: &mut S,
    config: &Socks5Config,
    target_host: &str,
    target_port: u16,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let credentials = match (&config.username, &config.password) {
        (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
        _ => None,
    };

    // Method selection: offer username/password only when configured.
    let greeting: &[u8] = if credentials.is_some() {
        &[VERSION, 2, METHOD_NO_AUTH, METHOD_USER_PASS]
    } else {
        &[VERSION, 1, METHOD_NO_AUTH]
    };
    stream.write_all(greeting).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != VERSION || choice[1] == METHOD_REJECTED {
        return Err(ProtocolError::ProxyError(
            constants::ERR_PROXY_METHOD_REJECTED.into(),
        ));
    }

    if choice[1] == METHOD_USER_PASS {
        let (user, pass) = credentials.ok_or_else(|| {
            ProtocolError::ProxyError(constants::ERR_PROXY_METHOD_REJECTED.into())
        })?;
        authenticate(stream, user, pass).await?;
    }

    connect_request(stream, target_host, target_port).await?;
    debug!(host = target_host, port = target_port, "SOCKS5 tunnel established");
    Ok(())
}

/// RFC 1929 username/password sub-negotiation.
async fn authenticate<S>(stream: &mut S, username: &str, password: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if username.len() > 255 || password.len() > 255 {
        return Err(ProtocolError::ProxyError(
            "SOCKS5 credentials exceed 255 bytes".into(),
        ));
    }

    let mut request = Vec::with_capacity(3 + username.len() + password.len());
    request.push(0x01); // sub-negotiation version
    request.push(username.len() as u8);
    request.extend_from_slice(username.as_bytes());
    request.push(password.len() as u8);
    request.extend_from_slice(password.as_bytes());
    stream.write_all(&request).await?;

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await?;
    if response[1] != 0x00 {
        return Err(ProtocolError::ProxyError(
            constants::ERR_PROXY_AUTH_FAILED.into(),
        ));
    }
    Ok(())
}

async fn connect_request<S>(stream: &mut S, host: &str, port: u16) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = vec![VERSION, CMD_CONNECT, 0x00];

    if let Ok(addr) = host.parse::<std::net::Ipv4Addr>() {
        request.push(ATYP_IPV4);
        request.extend_from_slice(&addr.octets());
    } else if let Ok(addr) = host.parse::<std::net::Ipv6Addr>() {
        request.push(ATYP_IPV6);
        request.extend_from_slice(&addr.octets());
    } else {
        if host.len() > 255 {
            return Err(ProtocolError::ProxyError("SOCKS5 hostname too long".into()));
        }
        request.push(ATYP_DOMAIN);
        request.push(host.len() as u8);
        request.extend_from_slice(host.as_bytes());
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    // Reply: VER REP RSV ATYP BND.ADDR BND.PORT
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != 0x00 {
        return Err(ProtocolError::ProxyError(
            constants::ERR_PROXY_CONNECT_FAILED.into(),
        ));
    }

    let addr_len = match head[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => {
            return Err(ProtocolError::ProxyError(format!(
                "SOCKS5 reply with unknown address type {other}"
            )))
        }
    };
    let mut remainder = vec![0u8; addr_len + 2];
    stream.read_exact(&mut remainder).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy_config(with_auth: bool) -> Socks5Config {
        Socks5Config {
            address: "127.0.0.1:1080".into(),
            username: with_auth.then(|| "user".to_string()),
            password: with_auth.then(|| "pass".to_string()),
        }
    }

    #[tokio::test]
    async fn no_auth_negotiation() {
        let (mut client, mut server) = tokio::io::duplex(512);

        let proxy = tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x01, 0x00]);
            server.write_all(&[0x05, 0x00]).await.unwrap();

            // CONNECT for a domain name
            let mut head = [0u8; 5];
            server.read_exact(&mut head).await.unwrap();
            assert_eq!(&head[..4], &[0x05, 0x01, 0x00, 0x03]);
            let mut rest = vec![0u8; head[4] as usize + 2];
            server.read_exact(&mut rest).await.unwrap();

            server
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        negotiate(&mut client, &proxy_config(false), "game.example.com", 30001)
            .await
            .unwrap();
        proxy.await.unwrap();
    }

    #[tokio::test]
    async fn username_password_subnegotiation() {
        let (mut client, mut server) = tokio::io::duplex(512);

        let proxy = tokio::spawn(async move {
            let mut greeting = [0u8; 4];
            server.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x02, 0x00, 0x02]);
            server.write_all(&[0x05, 0x02]).await.unwrap();

            // auth: ver, ulen, "user", plen, "pass"
            let mut auth = [0u8; 11];
            server.read_exact(&mut auth).await.unwrap();
            assert_eq!(&auth[..2], &[0x01, 4]);
            assert_eq!(&auth[2..6], b"user");
            server.write_all(&[0x01, 0x00]).await.unwrap();

            let mut head = [0u8; 4];
            server.read_exact(&mut head).await.unwrap();
            let mut addr = [0u8; 6]; // IPv4 + port
            server.read_exact(&mut addr).await.unwrap();
            server
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        negotiate(&mut client, &proxy_config(true), "10.0.0.1", 30001)
            .await
            .unwrap();
        proxy.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_method_aborts() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0xFF]).await.unwrap();
        });

        let err = negotiate(&mut client, &proxy_config(false), "h", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ProxyError(_)));
    }

    #[tokio::test]
    async fn refused_connect_aborts() {
        let (mut client, mut server) = tokio::io::duplex(512);
        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0x00]).await.unwrap();

            let mut head = [0u8; 4];
            server.read_exact(&mut head).await.unwrap();
            let mut rest = [0u8; 6];
            server.read_exact(&mut rest).await.unwrap();
            // REP = 0x05: connection refused
            server
                .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let err = negotiate(&mut client, &proxy_config(false), "10.0.0.1", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ProxyError(_)));
    }

    #[tokio::test]
    async fn failed_auth_aborts() {
        let (mut client, mut server) = tokio::io::duplex(512);
        tokio::spawn(async move {
            let mut greeting = [0u8; 4];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0x02]).await.unwrap();
            let mut auth = [0u8; 11];
            server.read_exact(&mut auth).await.unwrap();
            server.write_all(&[0x01, 0x01]).await.unwrap();
        });

        let err = negotiate(&mut client, &proxy_config(true), "h", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ProxyError(_)));
    }
}
