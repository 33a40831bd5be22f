use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use application::control_service_impl::{Caller, ControlAppService};
use domain::common::error::DomainError;
use ipvs_common::frame::{FrameKind, RequestHeader};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::io::{FrameError, read_request, write_response};

/// Uid reported when the peer's credentials cannot be read.
const UNKNOWN_UID: u32 = u32::MAX;

/// Serves the control protocol on a Unix socket.
///
/// Each peer's uid is read from the socket credentials; uids listed in
/// `admin_uids` carry the administrative capability.
pub struct ControlServer {
    service: Arc<ControlAppService>,
    admin_uids: HashSet<u32>,
    max_frame: usize,
}

impl ControlServer {
    pub fn new(service: Arc<ControlAppService>, admin_uids: &[u32], max_frame: usize) -> Self {
        Self {
            service,
            admin_uids: admin_uids.iter().copied().collect(),
            max_frame,
        }
    }

    fn caller_for(&self, uid: u32) -> Caller {
        if self.admin_uids.contains(&uid) {
            Caller::admin(uid)
        } else {
            Caller::unprivileged(uid)
        }
    }

    /// Bind `path` and serve until `cancel_token` fires. A stale socket
    /// file at `path` is replaced; the file is removed on exit.
    pub async fn run(
        self: Arc<Self>,
        path: &Path,
        cancel_token: CancellationToken,
    ) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        set_socket_mode(path)?;
        let _guard = SocketFile(path.to_path_buf());
        info!(path = %path.display(), "control socket listening");

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let server = Arc::clone(&self);
                            let cancel = cancel_token.clone();
                            tokio::spawn(async move { server.serve_stream(stream, cancel).await });
                        }
                        Err(e) => warn!(error = %e, "control socket accept failed"),
                    }
                }
            }
        }
        info!("control socket closed");
        Ok(())
    }

    async fn serve_stream(&self, stream: UnixStream, cancel_token: CancellationToken) {
        let uid = match stream.peer_cred() {
            Ok(cred) => cred.uid(),
            Err(e) => {
                warn!(error = %e, "failed to read peer credentials");
                UNKNOWN_UID
            }
        };
        let caller = self.caller_for(uid);
        debug!(uid, admin = caller.admin, "control client connected");
        tokio::select! {
            () = cancel_token.cancelled() => {}
            result = self.serve_connection(stream, caller) => {
                if let Err(e) = result {
                    debug!(uid, error = %e, "control connection closed with error");
                }
            }
        }
    }

    /// Answer requests on one connection until the peer hangs up.
    pub async fn serve_connection<S>(&self, mut stream: S, caller: Caller) -> Result<(), FrameError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let (header, arg) = match read_request(&mut stream, self.max_frame).await {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(()),
                Err(FrameError::TooLarge { len, max }) => {
                    let err = DomainError::InvalidArgument(format!("frame {len} > {max}"));
                    write_response(&mut stream, err.errno(), &[]).await?;
                    return Err(FrameError::TooLarge { len, max });
                }
                Err(e) => return Err(e),
            };
            match self.dispatch(caller, header, arg).await {
                Ok(reply) => write_response(&mut stream, 0, &reply).await?,
                Err(e) => write_response(&mut stream, e.errno(), &[]).await?,
            }
        }
    }

    /// Control commands may wait on in-flight lookups, so they run on the
    /// blocking pool.
    async fn dispatch(
        &self,
        caller: Caller,
        header: RequestHeader,
        arg: Vec<u8>,
    ) -> Result<Vec<u8>, DomainError> {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || match header.kind {
            FrameKind::Set => service.set_ctl(&caller, header.cmd, &arg).map(|()| Vec::new()),
            FrameKind::Get => service.get_ctl(&caller, header.cmd, &arg),
        })
        .await
        .map_err(|e| DomainError::EngineError(format!("control task failed: {e}")))?
    }
}

/// Removes the socket file when dropped.
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            debug!(path = %self.0.display(), error = %e, "socket file not removed");
        }
    }
}

/// Any local user may connect; the peer uid decides what it may do.
#[cfg(unix)]
fn set_socket_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
}

#[cfg(not(unix))]
fn set_socket_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::io::{read_response, write_request};
    use domain::common::error::{EPERM, ESRCH};
    use domain::stats::estimator::Estimator;
    use domain::syncd::engine::SyncDaemon;
    use domain::virtualserver::registry::Registry;
    use domain::virtualserver::scheduler::SchedulerRegistry;
    use ipvs_common::WireRecord;
    use ipvs_common::control::{
        GetInfo, IP_VS_SO_GET_INFO, IP_VS_SO_GET_VERSION, IP_VS_SO_SET_ADD, IP_VS_SO_SET_DEL,
        IP_VS_SO_SET_FLUSH,
    };
    use ipvs_common::service::ServiceUser;
    use ports::test_utils::{FirstScheduler, MemoryTimeouts, NoopMetrics, StaticRoutes};

    fn make_server(admin_uids: &[u32]) -> Arc<ControlServer> {
        let schedulers = Arc::new(SchedulerRegistry::new());
        schedulers.register(FirstScheduler::new("rr")).unwrap();
        let registry = Arc::new(Registry::new(schedulers, Arc::new(Estimator::new())));
        let service = Arc::new(ControlAppService::new(
            registry,
            Arc::new(SyncDaemon::new()),
            Arc::new(MemoryTimeouts::default()),
            Arc::new(StaticRoutes::default()),
            Arc::new(NoopMetrics),
        ));
        Arc::new(ControlServer::new(service, admin_uids, 1 << 16))
    }

    fn make_service_user() -> ServiceUser {
        let mut u = ServiceUser {
            protocol: 6,
            addr: 0x0A00_0001,
            port: 80,
            netmask: u32::MAX,
            ..Default::default()
        };
        u.set_sched_name("rr");
        u
    }

    async fn roundtrip(
        stream: &mut tokio::io::DuplexStream,
        kind: FrameKind,
        cmd: u32,
        arg: &[u8],
    ) -> (i32, Vec<u8>) {
        let len = u32::try_from(arg.len()).unwrap();
        write_request(stream, RequestHeader { kind, cmd, len }, arg)
            .await
            .unwrap();
        let (header, body) = read_response(stream, 1 << 16).await.unwrap();
        (header.errno, body)
    }

    #[test]
    fn caller_capability_from_uid() {
        let server = make_server(&[0, 1000]);
        assert!(server.caller_for(0).admin);
        assert!(server.caller_for(1000).admin);
        assert!(!server.caller_for(1001).admin);
    }

    #[tokio::test]
    async fn admin_add_then_info() {
        let server = make_server(&[0]);
        let (mut client, conn) = tokio::io::duplex(1 << 16);
        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve_connection(conn, Caller::admin(0)).await })
        };

        let add = make_service_user().to_bytes();
        let (errno, _) = roundtrip(&mut client, FrameKind::Set, IP_VS_SO_SET_ADD, &add).await;
        assert_eq!(errno, 0);

        let info_arg = [0u8; GetInfo::SIZE];
        let (errno, body) =
            roundtrip(&mut client, FrameKind::Get, IP_VS_SO_GET_INFO, &info_arg).await;
        assert_eq!(errno, 0);
        assert_eq!(GetInfo::from_bytes(&body).unwrap().num_services, 1);

        let (errno, _) = roundtrip(&mut client, FrameKind::Set, IP_VS_SO_SET_DEL, &add).await;
        assert_eq!(errno, 0);
        let (errno, _) = roundtrip(&mut client, FrameKind::Set, IP_VS_SO_SET_DEL, &add).await;
        assert_eq!(errno, ESRCH);

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unprivileged_caller_denied() {
        let server = make_server(&[0]);
        let (mut client, conn) = tokio::io::duplex(1 << 16);
        let server2 = Arc::clone(&server);
        tokio::spawn(async move { server2.serve_connection(conn, Caller::unprivileged(42)).await });

        let (errno, _) = roundtrip(&mut client, FrameKind::Set, IP_VS_SO_SET_FLUSH, &[]).await;
        assert_eq!(errno, EPERM);
        let (errno, body) =
            roundtrip(&mut client, FrameKind::Get, IP_VS_SO_GET_VERSION, &[0u8; 64]).await;
        assert_eq!(errno, EPERM);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn oversized_frame_answers_einval_and_closes() {
        let server = make_server(&[0]);
        let (mut client, conn) = tokio::io::duplex(1 << 16);
        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve_connection(conn, Caller::admin(0)).await })
        };
        let header = RequestHeader {
            kind: FrameKind::Set,
            cmd: IP_VS_SO_SET_ADD,
            len: 1 << 20,
        };
        tokio::io::AsyncWriteExt::write_all(&mut client, &header.encode())
            .await
            .unwrap();
        let (resp, _) = read_response(&mut client, 64).await.unwrap();
        assert_eq!(resp.errno, domain::common::error::EINVAL);
        assert!(matches!(
            task.await.unwrap(),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn listener_binds_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let server = make_server(&[]);
        let cancel = CancellationToken::new();
        let handle = {
            let path = path.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { server.run(&path, cancel).await })
        };

        let mut stream = loop {
            if let Ok(s) = UnixStream::connect(&path).await {
                break s;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        };
        write_request(
            &mut stream,
            RequestHeader {
                kind: FrameKind::Set,
                cmd: IP_VS_SO_SET_FLUSH,
                len: 0,
            },
            &[],
        )
        .await
        .unwrap();
        let (resp, _) = read_response(&mut stream, 64).await.unwrap();
        assert_eq!(resp.errno, EPERM);

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(!path.exists());
    }
}
