// CORESHIFT -- HYSTERESIS CPU HOTPLUG GOVERNOR
// PURE-RUST LIBRARY: DECISION ENGINE, SAMPLER, SELECTOR, PLATFORM GLUE
// THE BINARY (main.rs) WIRES THESE TO SYSFS AND THE COMMAND LINE

pub mod error;
pub mod event;
pub mod governor;
pub mod hysteresis;
pub mod knobfs;
pub mod platform;
pub mod sampler;
pub mod selector;
pub mod tuning;

// CORE IDS ARE KERNEL CPU NUMBERS. CPU 0 IS THE PRIMARY CORE.
pub type CoreId = u32;
pub const PRIMARY_CORE: CoreId = 0;
