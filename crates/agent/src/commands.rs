use std::fmt::Write as _;
use std::net::Ipv4Addr;

use anyhow::{Result, bail};
use application::control_service_impl::SetRequest;
use domain::common::entity::{Protocol, fmt_addr_port};
use domain::timeout::entity::ProtocolTimeouts;
use domain::virtualserver::entity::{DestConfig, ForwardMethod, ServiceConfig, ServiceKey};
use ipvs_common::control::{
    DaemonUser, GetInfo, IP_VS_STATE_BACKUP, IP_VS_STATE_MASTER, IP_VS_SVC_F_PERSISTENT,
    TimeoutUser, version_triplet,
};
use ipvs_common::dest::DestEntry;
use ipvs_common::service::ServiceEntry;
use serde::Serialize;

use crate::api_client::{ApiClient, TunablesUpdate};
use crate::cli::{
    DestOptions, OutputFormat, ServiceOptions, ServiceTarget, SyncRoleArg, TunablesSet,
};
use crate::control_client::AdminClient;

// ── Views ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DestView {
    pub address: String,
    pub forward: &'static str,
    pub weight: i32,
    pub active_conns: u32,
    pub inactive_conns: u32,
    pub u_threshold: u32,
    pub l_threshold: u32,
}

impl DestView {
    fn from_entry(e: &DestEntry) -> Self {
        Self {
            address: fmt_addr_port(e.dest.addr, e.dest.port),
            forward: ForwardMethod::from_conn_flags(e.dest.conn_flags).report_name(),
            weight: e.dest.weight,
            active_conns: e.activeconns,
            inactive_conns: e.inactconns,
            u_threshold: e.dest.u_threshold,
            l_threshold: e.dest.l_threshold,
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ServiceView {
    pub protocol: &'static str,
    /// `a.b.c.d:port`, or the mark for fwmark services.
    pub address: String,
    pub fwmark: u32,
    pub scheduler: String,
    /// Persistence timeout in seconds when persistent.
    pub persistent: Option<u32>,
    pub netmask: String,
    pub conns: u32,
    pub inpkts: u32,
    pub outpkts: u32,
    pub inbytes: u64,
    pub outbytes: u64,
    pub dests: Vec<DestView>,
}

impl ServiceView {
    fn from_entry(e: &ServiceEntry, dests: &[DestEntry]) -> Self {
        let svc = &e.service;
        let (protocol, address) = if svc.fwmark != 0 {
            ("FWM", svc.fwmark.to_string())
        } else {
            (
                Protocol::from_u16(svc.protocol).as_str(),
                fmt_addr_port(svc.addr, svc.port),
            )
        };
        Self {
            protocol,
            address,
            fwmark: svc.fwmark,
            scheduler: svc.sched_name().to_string(),
            persistent: (svc.flags & IP_VS_SVC_F_PERSISTENT != 0).then_some(svc.timeout),
            netmask: Ipv4Addr::from(svc.netmask).to_string(),
            conns: e.stats.conns,
            inpkts: e.stats.inpkts,
            outpkts: e.stats.outpkts,
            inbytes: e.stats.inbytes,
            outbytes: e.stats.outbytes,
            dests: dests.iter().map(DestView::from_entry).collect(),
        }
    }

    fn key(&self, e: &ServiceEntry) -> ServiceKey {
        let svc = &e.service;
        if self.fwmark != 0 {
            ServiceKey::fwmark(Protocol::from_u16(svc.protocol), svc.fwmark)
        } else {
            ServiceKey::addr(Protocol::from_u16(svc.protocol), svc.addr, svc.port)
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DaemonView {
    pub role: &'static str,
    pub running: bool,
    pub mcast_interface: String,
    pub syncid: i32,
}

fn daemon_views(daemons: &[DaemonUser; 2]) -> Vec<DaemonView> {
    ["master", "backup"]
        .into_iter()
        .zip(daemons)
        .map(|(role, d)| DaemonView {
            role,
            running: d.state != 0,
            mcast_interface: d.mcast_ifn().to_string(),
            syncid: d.syncid,
        })
        .collect()
}

// ── Rendering ───────────────────────────────────────────────────────────

/// `ipvsadm -L -n` style listing.
pub fn render_services(banner: &str, services: &[ServiceView]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{banner}");
    let _ = writeln!(out, "Prot LocalAddress:Port Scheduler Flags");
    let _ = writeln!(
        out,
        "  -> RemoteAddress:Port           Forward Weight ActiveConn InActConn"
    );
    for svc in services {
        let _ = write!(out, "{}  {} {}", svc.protocol, svc.address, svc.scheduler);
        if let Some(timeout) = svc.persistent {
            let _ = write!(out, " persistent {timeout}");
            if svc.netmask != "255.255.255.255" {
                let _ = write!(out, " mask {}", svc.netmask);
            }
        }
        out.push('\n');
        for d in &svc.dests {
            let _ = writeln!(
                out,
                "  -> {:<28} {:<7} {:<6} {:<10} {:<10}",
                d.address, d.forward, d.weight, d.active_conns, d.inactive_conns
            );
        }
    }
    out
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn done(output: OutputFormat, what: &str) -> Result<()> {
    if output == OutputFormat::Json {
        return print_json(&serde_json::json!({ "result": "ok", "command": what }));
    }
    println!("{what}: ok");
    Ok(())
}

// ── Version / info ──────────────────────────────────────────────────────

pub async fn cmd_info(client: &mut AdminClient, output: OutputFormat) -> Result<()> {
    let banner = client.version().await?;
    let info: GetInfo = client.info().await?;
    let (major, minor, patch) = version_triplet(info.version);

    if output == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "version": format!("{major}.{minor}.{patch}"),
            "connection_table_size": info.size,
            "services": info.num_services,
            "banner": banner,
        }));
    }

    println!("{banner}");
    println!("  Version:          {major}.{minor}.{patch}");
    println!("  Connection table: {}", info.size);
    println!("  Services:         {}", info.num_services);
    Ok(())
}

// ── Services ────────────────────────────────────────────────────────────

pub fn service_config(opts: &ServiceOptions) -> Result<ServiceConfig> {
    let mut conf = ServiceConfig::new(opts.target.require_key()?, &opts.scheduler);
    if opts.persistent > 0 {
        conf = conf.persistent(opts.persistent);
    }
    if let Some(mask) = opts.netmask {
        conf.netmask = u32::from(mask);
    }
    Ok(conf)
}

pub async fn cmd_service_add(
    client: &mut AdminClient,
    opts: &ServiceOptions,
    output: OutputFormat,
) -> Result<()> {
    client.execute(&SetRequest::AddService(service_config(opts)?)).await?;
    done(output, "service add")
}

pub async fn cmd_service_edit(
    client: &mut AdminClient,
    opts: &ServiceOptions,
    output: OutputFormat,
) -> Result<()> {
    client.execute(&SetRequest::EditService(service_config(opts)?)).await?;
    done(output, "service edit")
}

pub async fn cmd_service_delete(
    client: &mut AdminClient,
    target: &ServiceTarget,
    output: OutputFormat,
) -> Result<()> {
    client.execute(&SetRequest::DelService(target.require_key()?)).await?;
    done(output, "service delete")
}

// ── Destinations ────────────────────────────────────────────────────────

pub fn dest_config(opts: &DestOptions) -> Result<DestConfig> {
    if opts.weight < 0 {
        bail!("weight must be >= 0");
    }
    let mut dest = DestConfig::new(
        u32::from(*opts.real_server.ip()),
        opts.real_server.port(),
        opts.weight,
    )
    .with_forward(opts.forward.into());
    dest.u_threshold = opts.u_threshold;
    dest.l_threshold = opts.l_threshold;
    Ok(dest)
}

pub async fn cmd_dest_add(
    client: &mut AdminClient,
    opts: &DestOptions,
    output: OutputFormat,
) -> Result<()> {
    let req = SetRequest::AddDest(opts.target.require_key()?, dest_config(opts)?);
    client.execute(&req).await?;
    done(output, "dest add")
}

pub async fn cmd_dest_edit(
    client: &mut AdminClient,
    opts: &DestOptions,
    output: OutputFormat,
) -> Result<()> {
    let req = SetRequest::EditDest(opts.target.require_key()?, dest_config(opts)?);
    client.execute(&req).await?;
    done(output, "dest edit")
}

pub async fn cmd_dest_delete(
    client: &mut AdminClient,
    target: &ServiceTarget,
    real_server: std::net::SocketAddrV4,
    output: OutputFormat,
) -> Result<()> {
    let req = SetRequest::DelDest {
        service: target.require_key()?,
        addr: u32::from(*real_server.ip()),
        port: real_server.port(),
    };
    client.execute(&req).await?;
    done(output, "dest delete")
}

// ── Listing ─────────────────────────────────────────────────────────────

pub async fn collect_services(
    client: &mut AdminClient,
    target: &ServiceTarget,
) -> Result<Vec<ServiceView>> {
    let entries = match target.key() {
        Some(key) => vec![client.service(&key).await?],
        None => client.services().await?,
    };
    let mut views = Vec::with_capacity(entries.len());
    for entry in &entries {
        let mut view = ServiceView::from_entry(entry, &[]);
        let dests = client.dests(&view.key(entry)).await?;
        view.dests = dests.iter().map(DestView::from_entry).collect();
        views.push(view);
    }
    Ok(views)
}

pub async fn cmd_list(
    client: &mut AdminClient,
    target: &ServiceTarget,
    output: OutputFormat,
) -> Result<()> {
    let views = collect_services(client, target).await?;
    if output == OutputFormat::Json {
        return print_json(&views);
    }
    let banner = client.version().await?;
    print!("{}", render_services(&banner, &views));
    Ok(())
}

pub async fn cmd_flush(client: &mut AdminClient, output: OutputFormat) -> Result<()> {
    client.execute(&SetRequest::Flush).await?;
    done(output, "flush")
}

pub async fn cmd_zero(
    client: &mut AdminClient,
    target: &ServiceTarget,
    output: OutputFormat,
) -> Result<()> {
    client.execute(&SetRequest::Zero(target.key())).await?;
    done(output, "zero")
}

// ── Timeouts ────────────────────────────────────────────────────────────

fn print_timeouts(t: &TimeoutUser, output: OutputFormat) -> Result<()> {
    if output == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "tcp": t.tcp_timeout,
            "tcp_fin": t.tcp_fin_timeout,
            "udp": t.udp_timeout,
        }));
    }
    println!(
        "Timeout (tcp tcpfin udp): {} {} {}",
        t.tcp_timeout, t.tcp_fin_timeout, t.udp_timeout
    );
    Ok(())
}

pub async fn cmd_timeout_get(client: &mut AdminClient, output: OutputFormat) -> Result<()> {
    let t = client.timeouts().await?;
    print_timeouts(&t, output)
}

pub async fn cmd_timeout_set(
    client: &mut AdminClient,
    update: ProtocolTimeouts,
    output: OutputFormat,
) -> Result<()> {
    client.execute(&SetRequest::SetTimeout(update)).await?;
    let t = client.timeouts().await?;
    print_timeouts(&t, output)
}

// ── Sync daemon ─────────────────────────────────────────────────────────

fn role_state(role: SyncRoleArg) -> i32 {
    match role {
        SyncRoleArg::Master => IP_VS_STATE_MASTER,
        SyncRoleArg::Backup => IP_VS_STATE_BACKUP,
    }
}

pub async fn cmd_daemon_start(
    client: &mut AdminClient,
    role: SyncRoleArg,
    mcast_interface: &str,
    syncid: u8,
    output: OutputFormat,
) -> Result<()> {
    if mcast_interface.len() >= ipvs_common::control::IP_VS_IFNAME_MAXLEN {
        bail!("multicast interface name must be at most 15 bytes");
    }
    let req = SetRequest::StartDaemon {
        state: role_state(role),
        mcast_ifn: mcast_interface.to_string(),
        syncid: i32::from(syncid),
    };
    client.execute(&req).await?;
    done(output, "daemon start")
}

pub async fn cmd_daemon_stop(
    client: &mut AdminClient,
    role: SyncRoleArg,
    output: OutputFormat,
) -> Result<()> {
    let req = SetRequest::StopDaemon {
        state: role_state(role),
    };
    client.execute(&req).await?;
    done(output, "daemon stop")
}

pub async fn cmd_daemon_status(client: &mut AdminClient, output: OutputFormat) -> Result<()> {
    let views = daemon_views(&client.daemons().await?);
    if output == OutputFormat::Json {
        return print_json(&views);
    }
    for v in &views {
        if v.running {
            println!(
                "{:<6} sync daemon (mcast={}, syncid={})",
                v.role, v.mcast_interface, v.syncid
            );
        } else {
            println!("{:<6} sync daemon stopped", v.role);
        }
    }
    Ok(())
}

// ── HTTP API ────────────────────────────────────────────────────────────

pub async fn cmd_status(client: &ApiClient, output: OutputFormat) -> Result<()> {
    let status = client.get_status().await?;

    if output == OutputFormat::Json {
        return print_json(&status);
    }

    println!("ipvsd status");
    println!("  Version:       {}", status.version);
    println!("  Uptime:        {}", format_uptime(status.uptime_seconds));
    println!("  Services:      {}", status.services);
    println!("  Destinations:  {}", status.destinations);
    println!("  Trash:         {}", status.trash);
    println!(
        "  Memory:        {} pages free{}",
        status.defense.available_pages,
        if status.defense.low_memory { " (low)" } else { "" }
    );
    println!("  Drop rate:     {}", status.defense.drop_rate);
    Ok(())
}

pub async fn cmd_tunables_get(client: &ApiClient, output: OutputFormat) -> Result<()> {
    let t = client.get_tunables().await?;
    print_tunables(&t, output)
}

pub fn tunables_update(set: &TunablesSet) -> Result<TunablesUpdate> {
    let sync_threshold = match set.sync_threshold.as_deref() {
        None => None,
        Some(&[threshold, period]) => Some([threshold, period]),
        Some(_) => bail!("--sync-threshold takes exactly two values: threshold,period"),
    };
    Ok(TunablesUpdate {
        amemthresh: set.amemthresh,
        am_droprate: set.am_droprate,
        drop_entry: set.drop_entry,
        drop_packet: set.drop_packet,
        secure_tcp: set.secure_tcp,
        cache_bypass: set.cache_bypass,
        expire_nodest_conn: set.expire_nodest_conn,
        nat_icmp_send: set.nat_icmp_send,
        sync_threshold,
    })
}

pub async fn cmd_tunables_set(
    client: &ApiClient,
    set: &TunablesSet,
    output: OutputFormat,
) -> Result<()> {
    let t = client.put_tunables(&tunables_update(set)?).await?;
    print_tunables(&t, output)
}

fn print_tunables(t: &crate::api_client::TunablesResponse, output: OutputFormat) -> Result<()> {
    if output == OutputFormat::Json {
        return print_json(t);
    }
    println!("amemthresh          {}", t.amemthresh);
    println!("am_droprate         {}", t.am_droprate);
    println!("drop_entry          {}", t.drop_entry);
    println!("drop_packet         {}", t.drop_packet);
    println!("secure_tcp          {}", t.secure_tcp);
    println!("cache_bypass        {}", yes_no(t.cache_bypass));
    println!("expire_nodest_conn  {}", yes_no(t.expire_nodest_conn));
    println!("nat_icmp_send       {}", yes_no(t.nat_icmp_send));
    println!(
        "sync_threshold      {} {}",
        t.sync_threshold[0], t.sync_threshold[1]
    );
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn yes_no(val: bool) -> &'static str {
    if val { "yes" } else { "no" }
}

fn format_uptime(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipvs_common::control::version_banner;
    use ipvs_common::dest::DestUser;
    use ipvs_common::service::ServiceUser;

    use crate::cli::Forward;
    use crate::control_client::tests::make_daemon;

    fn make_entry(flags: u32, timeout: u32) -> ServiceEntry {
        let mut service = ServiceUser {
            protocol: 6,
            addr: 0x0A00_0001,
            port: 80,
            flags,
            timeout,
            netmask: 0xFFFF_FF00,
            ..Default::default()
        };
        service.set_sched_name("rr");
        ServiceEntry {
            service,
            num_dests: 1,
            ..Default::default()
        }
    }

    fn make_dest_entry() -> DestEntry {
        DestEntry {
            dest: DestUser {
                addr: 0x0A00_0002,
                port: 8080,
                conn_flags: ForwardMethod::DirectRoute.to_conn_flags(),
                weight: 3,
                ..Default::default()
            },
            activeconns: 4,
            ..Default::default()
        }
    }

    #[test]
    fn service_view_from_entry() {
        let view = ServiceView::from_entry(&make_entry(IP_VS_SVC_F_PERSISTENT, 300), &[make_dest_entry()]);
        assert_eq!(view.protocol, "TCP");
        assert_eq!(view.address, "10.0.0.1:80");
        assert_eq!(view.persistent, Some(300));
        assert_eq!(view.netmask, "255.255.255.0");
        assert_eq!(view.dests[0].forward, "Route");
        assert_eq!(view.dests[0].active_conns, 4);
    }

    #[test]
    fn fwmark_view_uses_mark() {
        let mut entry = make_entry(0, 0);
        entry.service.fwmark = 7;
        let view = ServiceView::from_entry(&entry, &[]);
        assert_eq!(view.protocol, "FWM");
        assert_eq!(view.address, "7");
        assert!(view.key(&entry).is_fwmark());
    }

    #[test]
    fn render_lists_services_and_dests() {
        let views = vec![ServiceView::from_entry(
            &make_entry(IP_VS_SVC_F_PERSISTENT, 300),
            &[make_dest_entry()],
        )];
        let text = render_services(&version_banner(), &views);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "IP Virtual Server version 1.2.1 (size=4096)");
        assert_eq!(lines[3], "TCP  10.0.0.1:80 rr persistent 300 mask 255.255.255.0");
        assert!(lines[4].starts_with("  -> 10.0.0.2:8080"));
        assert!(lines[4].contains("Route   3"));
    }

    #[test]
    fn daemon_views_report_roles() {
        let views = daemon_views(&[DaemonUser::new(IP_VS_STATE_MASTER, "eth0", 2), DaemonUser::default()]);
        assert!(views[0].running);
        assert_eq!(views[0].mcast_interface, "eth0");
        assert_eq!(views[1].role, "backup");
        assert!(!views[1].running);
    }

    #[test]
    fn dest_config_rejects_negative_weight() {
        let opts = DestOptions {
            target: ServiceTarget::default(),
            real_server: "10.0.0.2:80".parse().unwrap(),
            weight: -1,
            forward: Forward::Masq,
            u_threshold: 0,
            l_threshold: 0,
        };
        assert!(dest_config(&opts).is_err());
    }

    #[test]
    fn tunables_update_checks_pair() {
        let set = TunablesSet {
            sync_threshold: Some(vec![1, 2, 3]),
            ..TunablesSet::default()
        };
        assert!(tunables_update(&set).is_err());
        let set = TunablesSet {
            sync_threshold: Some(vec![4, 40]),
            cache_bypass: Some(true),
            ..TunablesSet::default()
        };
        let update = tunables_update(&set).unwrap();
        assert_eq!(update.sync_threshold, Some([4, 40]));
        assert_eq!(update.cache_bypass, Some(true));
    }

    #[tokio::test]
    async fn collect_services_over_socket() {
        let daemon = make_daemon().await;
        let mut client = AdminClient::connect(&daemon.socket()).await.unwrap();
        let target = ServiceTarget {
            tcp_service: Some("10.0.0.1:80".parse().unwrap()),
            ..ServiceTarget::default()
        };
        let opts = ServiceOptions {
            target: target.clone(),
            scheduler: "rr".to_string(),
            persistent: 0,
            netmask: None,
        };
        client
            .execute(&SetRequest::AddService(service_config(&opts).unwrap()))
            .await
            .unwrap();
        let dest = DestOptions {
            target: target.clone(),
            real_server: "10.0.0.2:8080".parse().unwrap(),
            weight: 2,
            forward: Forward::Masq,
            u_threshold: 0,
            l_threshold: 0,
        };
        let req = SetRequest::AddDest(target.require_key().unwrap(), dest_config(&dest).unwrap());
        client.execute(&req).await.unwrap();

        let all = collect_services(&mut client, &ServiceTarget::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].dests.len(), 1);
        assert_eq!(all[0].dests[0].weight, 2);

        let one = collect_services(&mut client, &target).await.unwrap();
        assert_eq!(one, all);
    }

    #[test]
    fn format_uptime_variants() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(125), "2m 05s");
        assert_eq!(format_uptime(3723), "1h 02m 03s");
    }
}
