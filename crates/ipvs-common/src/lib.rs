#![forbid(unsafe_code)]

//! Wire records for the IPVS administrative protocol.
//!
//! Every record mirrors a fixed C layout. Structs are `#[repr(C)]` with
//! explicit padding so that `size_of` equals the on-wire size; encoding is
//! done field by field through [`codec`], never by transmuting memory.
//! Addresses, ports and netmasks travel in network byte order, all other
//! integers in little-endian.

pub mod codec;
pub mod control;
pub mod dest;
pub mod frame;
pub mod service;
pub mod stats;

pub use codec::{Reader, WireError, WireRecord, Writer};
