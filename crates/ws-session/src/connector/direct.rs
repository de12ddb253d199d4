//! Direct connector: resolve, then connect to the first reachable endpoint.

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::Resolver;
use tokio::net::TcpStream;

use crate::error::{ConnectError, Result};

use super::CONNECT_TIMEOUT;

/// Resolves a hostname and attempts each returned endpoint in order,
/// returning on first success.
pub(crate) struct DirectConnector;

impl DirectConnector {
    pub(crate) async fn connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        tokio::time::timeout(CONNECT_TIMEOUT, self.connect_inner(host, port))
            .await
            .map_err(|_| ConnectError::ConnectTimeout {
                host: host.to_string(),
                port,
            })?
    }

    async fn connect_inner(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs = resolve(host).await?;

        let mut last_err: Option<std::io::Error> = None;
        for addr in addrs {
            match TcpStream::connect((addr, port)).await {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }

        match last_err {
            Some(err) => Err(ConnectError::Socket(err)),
            None => Err(ConnectError::NoReachableEndpoint {
                host: host.to_string(),
            }),
        }
    }
}

async fn resolve(host: &str) -> Result<Vec<std::net::IpAddr>> {
    if let Ok(addr) = host.parse::<std::net::IpAddr>() {
        return Ok(vec![addr]);
    }

    let resolver = Resolver::builder_with_config(
        ResolverConfig::default(),
        TokioConnectionProvider::default(),
    )
    .with_options(ResolverOpts::default())
    .build();

    let response = resolver
        .lookup_ip(host)
        .await
        .map_err(|err| ConnectError::Dns {
            host: host.to_string(),
            source: err,
        })?;

    Ok(response.iter().collect())
}
