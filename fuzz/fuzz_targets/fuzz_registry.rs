#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;

use domain::common::entity::Protocol;
use domain::stats::estimator::Estimator;
use domain::virtualserver::entity::{DestConfig, RouteType, ServiceConfig, ServiceKey};
use domain::virtualserver::registry::Registry;
use domain::virtualserver::scheduler::SchedulerRegistry;
use ports::test_utils::FirstScheduler;

// Apply a random sequence of registry operations on a small address
// space so that adds, deletes and trash reuse collide often.
//
// Layout: 4-byte chunks
//   [0] = op (0=add svc, 1=del svc, 2=add dest, 3=del dest, 4=lookup, 5=flush, 6=edit dest)
//   [1] = service selector (low 3 bits: port, bit 3: udp, bit 4: fwmark)
//   [2] = dest selector (low 2 bits: address, bits 2-3: port)
//   [3] = weight
fuzz_target!(|data: &[u8]| {
    let schedulers = Arc::new(SchedulerRegistry::new());
    schedulers.register(FirstScheduler::new("rr")).unwrap();
    let registry = Registry::new(schedulers, Arc::new(Estimator::new()));

    for chunk in data.chunks_exact(4) {
        let protocol = if chunk[1] & 0x08 != 0 { Protocol::Udp } else { Protocol::Tcp };
        let key = if chunk[1] & 0x10 != 0 {
            ServiceKey::fwmark(protocol, u32::from(chunk[1] & 0x07) + 1)
        } else {
            ServiceKey::addr(protocol, 0x0A00_0001, u16::from(chunk[1] & 0x07))
        };
        let daddr = 0x0A00_0100 | u32::from(chunk[2] & 0x03);
        let dport = 8080 + u16::from((chunk[2] >> 2) & 0x03);
        let weight = i32::from(chunk[3] % 16);

        match chunk[0] % 7 {
            0 => {
                let _ = registry.add_service(&ServiceConfig::new(key, "rr"));
            }
            1 => {
                if let Some(svc) = registry.find_service(&key) {
                    let _ = registry.del_service(&svc);
                }
            }
            2 => {
                if let Some(svc) = registry.find_service(&key) {
                    let _ = registry.add_dest(
                        &svc,
                        &DestConfig::new(daddr, dport, weight),
                        RouteType::Unicast,
                    );
                }
            }
            3 => {
                if let Some(svc) = registry.find_service(&key) {
                    let _ = registry.del_dest(&svc, daddr, dport);
                }
            }
            4 => {
                let _ = registry.lookup(key.fwmark, protocol, key.addr, key.port);
                let _ = registry.lookup_real_service(protocol, daddr, dport);
            }
            5 => registry.flush(),
            _ => {
                if let Some(svc) = registry.find_service(&key) {
                    let _ = registry.edit_dest(
                        &svc,
                        &DestConfig::new(daddr, dport, weight),
                        RouteType::Unicast,
                    );
                }
            }
        }

        assert_eq!(registry.num_services(), registry.services().len());
    }

    registry.flush();
    registry.trash_cleanup();
    assert_eq!(registry.num_services(), 0);
    assert_eq!(registry.trash_len(), 0);
});
