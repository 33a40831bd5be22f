use std::path::Path;

use adapters::control::client::{ClientError, ControlClient};
use anyhow::Context;
use application::control_service_impl::SetRequest;
use domain::virtualserver::entity::ServiceKey;
use infrastructure::constants::MAX_CONTROL_FRAME;
use ipvs_common::codec::{Reader, WireRecord, c_str};
use ipvs_common::control::{
    DaemonUser, GetInfo, IP_VS_SO_GET_DAEMON, IP_VS_SO_GET_DESTS, IP_VS_SO_GET_INFO,
    IP_VS_SO_GET_SERVICE, IP_VS_SO_GET_SERVICES, IP_VS_SO_GET_TIMEOUT, IP_VS_SO_GET_VERSION,
    TimeoutUser, VERSION_BUF_LEN,
};
use ipvs_common::dest::{DestEntry, GetDests};
use ipvs_common::service::{GetServices, ServiceEntry, ServiceUser};

/// Typed client for the daemon's control socket.
pub struct AdminClient {
    inner: ControlClient,
}

fn remote(err: ClientError, what: &str) -> anyhow::Error {
    match err {
        ClientError::Remote(e) => anyhow::anyhow!("{what}: {e}"),
        ClientError::Frame(e) => anyhow::anyhow!("{what}: control socket error: {e}"),
    }
}

/// Zero-filled request buffer of `len` bytes starting with `header`.
fn padded(header: &[u8], len: usize) -> Vec<u8> {
    let mut buf = header.to_vec();
    buf.resize(len, 0);
    buf
}

impl AdminClient {
    pub async fn connect(path: &Path) -> anyhow::Result<Self> {
        let inner = ControlClient::connect(path, MAX_CONTROL_FRAME)
            .await
            .with_context(|| {
                format!(
                    "cannot connect to control socket {}; is ipvsd running?",
                    path.display()
                )
            })?;
        Ok(Self { inner })
    }

    /// Send one set command.
    pub async fn execute(&mut self, req: &SetRequest) -> anyhow::Result<()> {
        let (cmd, arg) = req.encode();
        self.inner
            .set(cmd, &arg)
            .await
            .map_err(|e| remote(e, req.command().as_str()))
    }

    pub async fn version(&mut self) -> anyhow::Result<String> {
        let reply = self
            .inner
            .get(IP_VS_SO_GET_VERSION, &[0u8; VERSION_BUF_LEN])
            .await
            .map_err(|e| remote(e, "version"))?;
        Ok(c_str(&reply).to_string())
    }

    pub async fn info(&mut self) -> anyhow::Result<GetInfo> {
        let reply = self
            .inner
            .get(IP_VS_SO_GET_INFO, &[0u8; GetInfo::SIZE])
            .await
            .map_err(|e| remote(e, "info"))?;
        Ok(GetInfo::from_bytes(&reply)?)
    }

    /// Every service, sized from a preceding `INFO` call.
    pub async fn services(&mut self) -> anyhow::Result<Vec<ServiceEntry>> {
        let count = self.info().await?.num_services;
        let header = GetServices {
            num_services: count,
            _pad: 0,
        };
        let arg = padded(&header.to_bytes(), GetServices::reply_len(count as usize));
        let reply = self
            .inner
            .get(IP_VS_SO_GET_SERVICES, &arg)
            .await
            .map_err(|e| remote(e, "services"))?;

        let mut r = Reader::new(&reply);
        GetServices::read(&mut r)?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let entry = ServiceEntry::read(&mut r)?;
            // Unused trailing slots stay zeroed when services went away meanwhile.
            if !entry.service.sched_name().is_empty() {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub async fn service(&mut self, key: &ServiceKey) -> anyhow::Result<ServiceEntry> {
        let arg = ServiceEntry {
            service: ServiceUser {
                protocol: key.protocol.to_u16(),
                addr: key.addr,
                port: key.port,
                fwmark: key.fwmark,
                ..Default::default()
            },
            ..Default::default()
        };
        let reply = self
            .inner
            .get(IP_VS_SO_GET_SERVICE, &arg.to_bytes())
            .await
            .map_err(|e| remote(e, &format!("service {key}")))?;
        Ok(ServiceEntry::from_bytes(&reply)?)
    }

    /// Destinations of `key`, sized from the service's current count.
    pub async fn dests(&mut self, key: &ServiceKey) -> anyhow::Result<Vec<DestEntry>> {
        let count = self.service(key).await?.num_dests;
        let header = GetDests {
            protocol: key.protocol.to_u16(),
            addr: key.addr,
            port: key.port,
            fwmark: key.fwmark,
            num_dests: count,
            ..Default::default()
        };
        let arg = padded(&header.to_bytes(), GetDests::reply_len(count as usize));
        let reply = self
            .inner
            .get(IP_VS_SO_GET_DESTS, &arg)
            .await
            .map_err(|e| remote(e, &format!("dests of {key}")))?;

        let mut r = Reader::new(&reply);
        GetDests::read(&mut r)?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let entry = DestEntry::read(&mut r)?;
            if entry.dest.addr != 0 {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub async fn timeouts(&mut self) -> anyhow::Result<TimeoutUser> {
        let reply = self
            .inner
            .get(IP_VS_SO_GET_TIMEOUT, &[0u8; TimeoutUser::SIZE])
            .await
            .map_err(|e| remote(e, "timeout"))?;
        Ok(TimeoutUser::from_bytes(&reply)?)
    }

    /// Master and backup sync daemon descriptors, in that order.
    pub async fn daemons(&mut self) -> anyhow::Result<[DaemonUser; 2]> {
        let reply = self
            .inner
            .get(IP_VS_SO_GET_DAEMON, &[0u8; DaemonUser::SIZE * 2])
            .await
            .map_err(|e| remote(e, "daemon"))?;
        let mut r = Reader::new(&reply);
        Ok([DaemonUser::read(&mut r)?, DaemonUser::read(&mut r)?])
    }
}
