//! Upstream resolver transports (component E), one `Resolver`
//! implementer per mode.

pub mod doh;
pub mod dot;
pub mod udp;

pub use doh::{DohJsonResolver, DohPostResolver};
pub use dot::DotResolver;
pub use udp::UdpResolver;
