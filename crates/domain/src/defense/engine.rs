use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::common::error::DomainError;

use super::entity::{DefenseMode, DefenseOutcome, DefensePolicy, DefenseSettings, DefenseStatus};
use super::error::DefenseError;

#[derive(Debug)]
struct DropEntryState {
    mode: DefenseMode,
    active: bool,
}

#[derive(Debug)]
struct DropPacketState {
    mode: DefenseMode,
    rate: u32,
    counter: i64,
}

#[derive(Debug)]
struct SecureTcpState {
    mode: DefenseMode,
    last: DefenseMode,
}

/// Memory-pressure defense automaton.
///
/// Each policy sits behind its own lock so tuning one never blocks the
/// evaluation of the others.
#[derive(Debug)]
pub struct DefenseController {
    amemthresh: AtomicU64,
    am_droprate: AtomicU32,
    drop_entry: Mutex<DropEntryState>,
    drop_packet: Mutex<DropPacketState>,
    secure_tcp: Mutex<SecureTcpState>,
    available_pages: AtomicU64,
    low_memory: AtomicBool,
}

impl DefenseController {
    pub fn new(settings: &DefenseSettings) -> Result<Self, DomainError> {
        if settings.amemthresh == 0 {
            return Err(DefenseError::InvalidThreshold.into());
        }
        Ok(Self {
            amemthresh: AtomicU64::new(settings.amemthresh),
            am_droprate: AtomicU32::new(settings.am_droprate),
            drop_entry: Mutex::new(DropEntryState {
                mode: settings.drop_entry,
                active: false,
            }),
            drop_packet: Mutex::new(DropPacketState {
                mode: settings.drop_packet,
                rate: 0,
                counter: 0,
            }),
            secure_tcp: Mutex::new(SecureTcpState {
                mode: settings.secure_tcp,
                last: DefenseMode::Off,
            }),
            available_pages: AtomicU64::new(u64::MAX),
            low_memory: AtomicBool::new(false),
        })
    }

    /// Re-evaluate every policy against `available_pages` (free plus
    /// buffered memory).
    pub fn update(&self, available_pages: u64) -> DefenseOutcome {
        let amemthresh = self.amemthresh.load(Ordering::Acquire);
        let low_memory = available_pages < amemthresh;
        self.available_pages.store(available_pages, Ordering::Release);
        let was_low = self.low_memory.swap(low_memory, Ordering::AcqRel);
        if was_low != low_memory {
            info!(available_pages, amemthresh, low_memory, "memory pressure changed");
        }

        let drop_entry = {
            let mut st = lock(&self.drop_entry);
            let (next, on) = st.mode.step(low_memory);
            log_transition(DefensePolicy::DropEntry, st.mode, next);
            st.mode = next;
            st.active = on;
            on
        };

        let drop_rate = {
            let mut st = lock(&self.drop_packet);
            let (next, on) = st.mode.step(low_memory);
            log_transition(DefensePolicy::DropPacket, st.mode, next);
            st.mode = next;
            match next {
                DefenseMode::On => st.rate = self.am_droprate.load(Ordering::Acquire),
                _ if on => {
                    // low_memory implies available_pages < amemthresh
                    let rate = amemthresh / (amemthresh - available_pages);
                    st.rate = u32::try_from(rate).unwrap_or(u32::MAX);
                    st.counter = i64::from(st.rate);
                }
                _ => st.rate = 0,
            }
            st.rate
        };

        let secure_tcp_change = {
            let mut st = lock(&self.secure_tcp);
            let (next, _) = st.mode.step(low_memory);
            log_transition(DefensePolicy::SecureTcp, st.mode, next);
            st.mode = next;
            let change = (next.is_engaged() != st.last.is_engaged()).then(|| next.is_engaged());
            st.last = next;
            change
        };
        if let Some(on) = secure_tcp_change {
            info!(secure_tcp = on, "tcp timeout table switch");
        }

        DefenseOutcome {
            available_pages,
            low_memory,
            drop_entry,
            drop_rate,
            secure_tcp_change,
        }
    }

    /// Packet-drop probe: true once every `drop_rate` calls while dropping
    /// is engaged.
    pub fn should_drop_packet(&self) -> bool {
        let mut st = lock(&self.drop_packet);
        if st.rate == 0 {
            return false;
        }
        st.counter -= 1;
        if st.counter > 0 {
            return false;
        }
        st.counter = i64::from(st.rate);
        true
    }

    /// Whether the last evaluation left random entry dropping on.
    pub fn drop_entry_active(&self) -> bool {
        lock(&self.drop_entry).active
    }

    pub fn mode(&self, policy: DefensePolicy) -> DefenseMode {
        match policy {
            DefensePolicy::DropEntry => lock(&self.drop_entry).mode,
            DefensePolicy::DropPacket => lock(&self.drop_packet).mode,
            DefensePolicy::SecureTcp => lock(&self.secure_tcp).mode,
        }
    }

    /// Write a policy mode from the control plane.
    ///
    /// A value outside 0..=3 leaves the old mode in place and fails. Every
    /// valid write, including one of the current value, re-evaluates all
    /// policies against the last observed memory level.
    pub fn set_mode(
        &self,
        policy: DefensePolicy,
        value: i64,
    ) -> Result<DefenseOutcome, DomainError> {
        let mode = u8::try_from(value)
            .ok()
            .and_then(DefenseMode::from_u8)
            .ok_or(DefenseError::InvalidMode {
                policy: policy.as_str(),
                value,
            })?;

        let old = match policy {
            DefensePolicy::DropEntry => std::mem::replace(&mut lock(&self.drop_entry).mode, mode),
            DefensePolicy::DropPacket => std::mem::replace(&mut lock(&self.drop_packet).mode, mode),
            DefensePolicy::SecureTcp => std::mem::replace(&mut lock(&self.secure_tcp).mode, mode),
        };
        if old != mode {
            info!(%policy, from = %old, to = %mode, "defense mode set");
        }
        Ok(self.update(self.available_pages.load(Ordering::Acquire)))
    }

    pub fn amemthresh(&self) -> u64 {
        self.amemthresh.load(Ordering::Acquire)
    }

    pub fn set_amemthresh(&self, pages: u64) -> Result<(), DomainError> {
        if pages == 0 {
            return Err(DefenseError::InvalidThreshold.into());
        }
        self.amemthresh.store(pages, Ordering::Release);
        Ok(())
    }

    pub fn am_droprate(&self) -> u32 {
        self.am_droprate.load(Ordering::Acquire)
    }

    pub fn set_am_droprate(&self, rate: u32) {
        self.am_droprate.store(rate, Ordering::Release);
    }

    pub fn drop_rate(&self) -> u32 {
        lock(&self.drop_packet).rate
    }

    pub fn status(&self) -> DefenseStatus {
        DefenseStatus {
            amemthresh: self.amemthresh(),
            am_droprate: self.am_droprate(),
            drop_entry: self.mode(DefensePolicy::DropEntry),
            drop_packet: self.mode(DefensePolicy::DropPacket),
            secure_tcp: self.mode(DefensePolicy::SecureTcp),
            drop_rate: self.drop_rate(),
            low_memory: self.low_memory.load(Ordering::Acquire),
            available_pages: self.available_pages.load(Ordering::Acquire),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn log_transition(policy: DefensePolicy, from: DefenseMode, to: DefenseMode) {
    if from != to {
        info!(%policy, %from, %to, "defense state transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_controller(drop_entry: u8, drop_packet: u8, secure_tcp: u8) -> DefenseController {
        DefenseController::new(&DefenseSettings {
            drop_entry: DefenseMode::from_u8(drop_entry).unwrap(),
            drop_packet: DefenseMode::from_u8(drop_packet).unwrap(),
            secure_tcp: DefenseMode::from_u8(secure_tcp).unwrap(),
            ..DefenseSettings::default()
        })
        .unwrap()
    }

    const PLENTY: u64 = 100_000;

    // ── Automaton ─────────────────────────────────────────────────

    #[test]
    fn zero_threshold_rejected() {
        let settings = DefenseSettings {
            amemthresh: 0,
            ..DefenseSettings::default()
        };
        assert!(DefenseController::new(&settings).is_err());
    }

    #[test]
    fn auto_drop_entry_follows_pressure() {
        let ctl = make_controller(1, 0, 0);
        assert!(!ctl.update(PLENTY).drop_entry);
        assert_eq!(ctl.mode(DefensePolicy::DropEntry), DefenseMode::AutoOff);

        let out = ctl.update(100);
        assert!(out.low_memory);
        assert!(out.drop_entry);
        assert!(ctl.drop_entry_active());
        assert_eq!(ctl.mode(DefensePolicy::DropEntry), DefenseMode::AutoOn);

        assert!(!ctl.update(PLENTY).drop_entry);
        assert_eq!(ctl.mode(DefensePolicy::DropEntry), DefenseMode::AutoOff);
    }

    #[test]
    fn fixed_modes_ignore_pressure() {
        let off = make_controller(0, 0, 0);
        let on = make_controller(3, 3, 3);
        for avail in [PLENTY, 10, PLENTY] {
            assert!(!off.update(avail).drop_entry);
            assert!(on.update(avail).drop_entry);
        }
        assert_eq!(on.mode(DefensePolicy::DropEntry), DefenseMode::On);
        assert_eq!(off.mode(DefensePolicy::SecureTcp), DefenseMode::Off);
    }

    // ── Packet drop ───────────────────────────────────────────────

    #[test]
    fn drop_rate_scales_with_pressure() {
        let ctl = make_controller(0, 1, 0);
        // 1024 / (1024 - 512)
        assert_eq!(ctl.update(512).drop_rate, 2);
        // 1024 / (1024 - 1000)
        assert_eq!(ctl.update(1000).drop_rate, 42);
        assert_eq!(ctl.update(PLENTY).drop_rate, 0);
        assert_eq!(ctl.mode(DefensePolicy::DropPacket), DefenseMode::AutoOff);
    }

    #[test]
    fn forced_drop_uses_am_droprate() {
        let ctl = make_controller(0, 3, 0);
        assert_eq!(ctl.update(PLENTY).drop_rate, 10);
        ctl.set_am_droprate(25);
        assert_eq!(ctl.update(5).drop_rate, 25);
    }

    #[test]
    fn should_drop_counts_down() {
        let ctl = make_controller(0, 1, 0);
        assert!(!ctl.should_drop_packet());
        ctl.update(512);
        let drops: Vec<bool> = (0..6).map(|_| ctl.should_drop_packet()).collect();
        assert_eq!(drops, vec![false, true, false, true, false, true]);

        ctl.update(PLENTY);
        assert!(!ctl.should_drop_packet());
    }

    // ── Secure TCP ────────────────────────────────────────────────

    #[test]
    fn secure_tcp_reports_only_edges() {
        let ctl = make_controller(0, 0, 1);
        assert_eq!(ctl.update(PLENTY).secure_tcp_change, None);
        assert_eq!(ctl.update(10).secure_tcp_change, Some(true));
        assert_eq!(ctl.update(10).secure_tcp_change, None);
        assert_eq!(ctl.update(PLENTY).secure_tcp_change, Some(false));
        assert_eq!(ctl.update(PLENTY).secure_tcp_change, None);
    }

    #[test]
    fn forced_secure_tcp_engages_on_first_tick() {
        let ctl = make_controller(0, 0, 3);
        assert_eq!(ctl.update(PLENTY).secure_tcp_change, Some(true));
        assert_eq!(ctl.update(PLENTY).secure_tcp_change, None);
    }

    // ── Control-plane writes ──────────────────────────────────────

    #[test]
    fn out_of_range_write_keeps_old_mode() {
        let ctl = make_controller(1, 0, 0);
        for bad in [-1, 4, 300] {
            assert!(matches!(
                ctl.set_mode(DefensePolicy::DropEntry, bad),
                Err(DomainError::InvalidArgument(_))
            ));
        }
        assert_eq!(ctl.mode(DefensePolicy::DropEntry), DefenseMode::AutoOff);
    }

    #[test]
    fn valid_write_reevaluates_immediately() {
        let ctl = make_controller(0, 0, 0);
        ctl.update(10);
        let out = ctl.set_mode(DefensePolicy::SecureTcp, 1).unwrap();
        assert_eq!(out.secure_tcp_change, Some(true));
        assert_eq!(ctl.mode(DefensePolicy::SecureTcp), DefenseMode::AutoOn);
    }

    #[test]
    fn unchanged_write_still_reevaluates() {
        let ctl = make_controller(0, 0, 0);
        assert!(ctl.update(10).low_memory);
        ctl.set_amemthresh(5).unwrap();
        assert!(ctl.status().low_memory);

        let out = ctl.set_mode(DefensePolicy::DropEntry, 0).unwrap();
        assert!(!out.low_memory);
        assert!(!ctl.status().low_memory);
        assert_eq!(ctl.mode(DefensePolicy::DropEntry), DefenseMode::Off);
    }

    #[test]
    fn threshold_setter_validates() {
        let ctl = make_controller(0, 0, 0);
        assert!(ctl.set_amemthresh(0).is_err());
        ctl.set_amemthresh(50).unwrap();
        assert!(!ctl.update(60).low_memory);
        assert!(ctl.update(40).low_memory);
        assert!(ctl.status().low_memory);
        assert_eq!(ctl.status().available_pages, 40);
    }
}
