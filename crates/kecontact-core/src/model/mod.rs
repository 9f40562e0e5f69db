// ── Domain model ──

pub mod identity;

pub use identity::{Capability, DeviceIdentity, DeviceModel, Manufacturer};
