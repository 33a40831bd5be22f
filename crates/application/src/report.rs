//! Line-oriented text exports of the registry, read at a byte offset.

use std::fmt::Write as _;

use ipvs_common::control::version_banner;

use domain::stats::entity::StatsSnapshot;
use domain::virtualserver::entity::{DestSnapshot, ServiceSnapshot};

/// Every row is padded or cut to this width, plus a newline.
pub const ROW_WIDTH: usize = 63;

/// Total length of the statistics report.
pub const STATS_REPORT_LEN: usize = 320;

fn push_row(out: &mut String, row: &str) {
    let _ = writeln!(out, "{row:<ROW_WIDTH$.ROW_WIDTH$}");
}

fn persistence(svc: &ServiceSnapshot) -> String {
    if svc.is_persistent() {
        format!("persistent {} {:08X}", svc.timeout, svc.netmask)
    } else {
        String::new()
    }
}

fn dest_row(d: &DestSnapshot) -> String {
    format!(
        "  -> {:08X}:{:04X}      {:<7} {:<6} {:<10} {:<10}",
        d.addr,
        d.port,
        d.forward().report_name(),
        d.weight,
        d.activeconns,
        d.inactconns
    )
}

/// Render the service table report.
///
/// Address-keyed services come first, fwmark services after, each followed
/// by its destinations.
pub fn render_services(table: &[(ServiceSnapshot, Vec<DestSnapshot>)]) -> String {
    let rows: usize = table.iter().map(|(_, d)| d.len() + 1).sum();
    let mut out = String::with_capacity((rows + 3) * (ROW_WIDTH + 1));

    push_row(&mut out, &version_banner());
    push_row(&mut out, "Prot LocalAddress:Port Scheduler Flags");
    push_row(
        &mut out,
        "  -> RemoteAddress:Port Forward Weight ActiveConn InActConn",
    );

    for (svc, dests) in table {
        let row = if svc.key.is_fwmark() {
            format!(
                "FWM  {:08X} {} {}",
                svc.key.fwmark,
                svc.scheduler,
                persistence(svc)
            )
        } else {
            format!(
                "{}  {:08X}:{:04X} {} {}",
                svc.key.protocol.as_str(),
                svc.key.addr,
                svc.key.port,
                svc.scheduler,
                persistence(svc)
            )
        };
        push_row(&mut out, &row);
        for d in dests {
            push_row(&mut out, &dest_row(d));
        }
    }
    out
}

/// Render the fixed five-line global statistics report.
pub fn render_stats(s: &StatsSnapshot) -> String {
    let mut out = String::with_capacity(STATS_REPORT_LEN);
    push_row(
        &mut out,
        "   Total Incoming Outgoing         Incoming         Outgoing",
    );
    push_row(
        &mut out,
        "   Conns  Packets  Packets            Bytes            Bytes",
    );
    let totals = format!(
        "{:8X} {:8X} {:8X} {:8X}{:08X} {:8X}{:08X}",
        s.conns,
        s.inpkts,
        s.outpkts,
        s.inbytes >> 32,
        s.inbytes & 0xFFFF_FFFF,
        s.outbytes >> 32,
        s.outbytes & 0xFFFF_FFFF
    );
    let _ = write!(out, "{totals:<62.62}\n\n");
    push_row(
        &mut out,
        " Conns/s   Pkts/s   Pkts/s          Bytes/s          Bytes/s",
    );
    let rates = format!(
        "{:8X} {:8X} {:8X} {:16X} {:16X}",
        s.cps, s.inpps, s.outpps, s.inbps, s.outbps
    );
    push_row(&mut out, &rates);
    out
}

/// Slice `text` as a virtual file read of `length` bytes at `offset`.
pub fn read_at(text: &str, offset: usize, length: usize) -> &[u8] {
    let bytes = text.as_bytes();
    let start = offset.min(bytes.len());
    let end = start.saturating_add(length).min(bytes.len());
    &bytes[start..end]
}
