use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const SSH_PORT: u16 = 22;
const SSH_CLIENT_BANNER: &[u8] = b"SSH-2.0-topograph_probe\r\n";

/// Decides whether a single TCP port is open
#[async_trait]
pub trait PortProber: Send + Sync {
    async fn probe(&self, ip: IpAddr, port: u16, timeout: Duration) -> bool;
}

/// Plain TCP connect, plus an SSH banner exchange on port 22.
pub struct TcpConnectProber;

async fn tcp_connect(addr: SocketAddr, limit: Duration) -> bool {
    matches!(timeout(limit, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

/// Exchange identification strings with an SSH server
async fn ssh_banner(addr: SocketAddr, limit: Duration) -> bool {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(SSH_CLIENT_BANNER).await?;
        let mut buf = [0u8; 255];
        let n = stream.read(&mut buf).await?;
        Ok::<bool, std::io::Error>(is_ssh_banner(&buf[..n]))
    };
    matches!(timeout(limit, exchange).await, Ok(Ok(true)))
}

fn is_ssh_banner(data: &[u8]) -> bool {
    data.starts_with(b"SSH-")
}

#[async_trait]
impl PortProber for TcpConnectProber {
    async fn probe(&self, ip: IpAddr, port: u16, limit: Duration) -> bool {
        let addr = SocketAddr::new(ip, port);
        if port != SSH_PORT {
            return tcp_connect(addr, limit).await;
        }

        let connect = tcp_connect(addr, limit);
        let banner = ssh_banner(addr, limit);
        tokio::pin!(connect, banner);

        // Either path succeeding is enough
        tokio::select! {
            open = &mut connect => open || banner.await,
            open = &mut banner => open || connect.await,
        }
    }
}
