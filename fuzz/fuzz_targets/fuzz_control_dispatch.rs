#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;

use application::control_service_impl::{Caller, ControlAppService};
use domain::stats::estimator::Estimator;
use domain::syncd::engine::SyncDaemon;
use domain::virtualserver::registry::Registry;
use domain::virtualserver::scheduler::SchedulerRegistry;
use ipvs_common::control::{IP_VS_BASE_CTL, IP_VS_SO_GET_MAX, IP_VS_SO_SET_MAX};
use ports::test_utils::{FirstScheduler, MemoryTimeouts, NoopMetrics, StaticRoutes};

fn make_service() -> ControlAppService {
    let schedulers = Arc::new(SchedulerRegistry::new());
    schedulers.register(FirstScheduler::new("rr")).unwrap();
    ControlAppService::new(
        Arc::new(Registry::new(schedulers, Arc::new(Estimator::new()))),
        Arc::new(SyncDaemon::new()),
        Arc::new(MemoryTimeouts::default()),
        Arc::new(StaticRoutes::default()),
        Arc::new(NoopMetrics),
    )
}

// Drive a sequence of raw control commands against one service.
//
// Layout (repeated):
//   [0]    = flags: bit 0 = get/set, bit 1 = unprivileged caller
//   [1]    = command offset from IP_VS_BASE_CTL (wraps past MAX)
//   [2]    = argument length
//   [3..]  = argument bytes
fuzz_target!(|data: &[u8]| {
    let service = make_service();
    let admin = Caller::admin(0);
    let user = Caller::unprivileged(1000);
    let mut cursor = 0;

    while cursor + 3 <= data.len() {
        let flags = data[cursor];
        let is_get = flags & 1 != 0;
        let caller = if flags & 2 != 0 { &user } else { &admin };
        let span = if is_get { IP_VS_SO_GET_MAX } else { IP_VS_SO_SET_MAX } - IP_VS_BASE_CTL + 2;
        let cmd = IP_VS_BASE_CTL + u32::from(data[cursor + 1]) % span;
        let len = usize::from(data[cursor + 2]);
        cursor += 3;
        let end = (cursor + len).min(data.len());
        let arg = &data[cursor..end];
        cursor = end;

        if is_get {
            let _ = service.get_ctl(caller, cmd, arg);
        } else {
            let _ = service.set_ctl(caller, cmd, arg);
        }
    }

    // Counter invariants survive any sequence.
    let registry = service.registry();
    assert_eq!(registry.num_services(), registry.services().len());
    let _ = service.flush();
    registry.trash_cleanup();
    assert_eq!(registry.num_services(), 0);
    assert_eq!(registry.trash_len(), 0);
});
