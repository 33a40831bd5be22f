#![no_main]

use libfuzzer_sys::fuzz_target;

use ipvs_common::codec::WireRecord;
use ipvs_common::control::{DaemonUser, GetInfo, TimeoutUser};
use ipvs_common::dest::{DestEntry, DestUser, GetDests};
use ipvs_common::frame::{REQUEST_HEADER_LEN, RESPONSE_HEADER_LEN, RequestHeader, ResponseHeader};
use ipvs_common::service::{GetServices, ServiceEntry, ServiceUser};
use ipvs_common::stats::StatsUser;

// Decoding any prefix must not panic. A record that decodes must
// re-encode to bytes that decode to the same encoding.
fn check<T: WireRecord>(data: &[u8]) {
    if let Ok(rec) = T::from_bytes(data) {
        let bytes = rec.to_bytes();
        assert_eq!(bytes.len(), T::SIZE);
        let again = T::from_bytes(&bytes).unwrap();
        assert_eq!(again.to_bytes(), bytes);
    }
}

// Layout:
//   [0]  = selector (which record type)
//   rest = record bytes
fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };

    match selector % 12 {
        0 => check::<ServiceUser>(rest),
        1 => check::<ServiceEntry>(rest),
        2 => check::<GetServices>(rest),
        3 => check::<DestUser>(rest),
        4 => check::<DestEntry>(rest),
        5 => check::<GetDests>(rest),
        6 => check::<TimeoutUser>(rest),
        7 => check::<DaemonUser>(rest),
        8 => check::<GetInfo>(rest),
        9 => check::<StatsUser>(rest),
        10 => {
            if let Some(head) = rest.first_chunk::<REQUEST_HEADER_LEN>()
                && let Ok(h) = RequestHeader::decode(head)
            {
                assert_eq!(RequestHeader::decode(&h.encode()).unwrap().encode(), h.encode());
            }
        }
        _ => {
            if let Some(head) = rest.first_chunk::<RESPONSE_HEADER_LEN>()
                && let Ok(h) = ResponseHeader::decode(head)
            {
                assert_eq!(ResponseHeader::decode(&h.encode()).unwrap().encode(), h.encode());
            }
        }
    }
});
