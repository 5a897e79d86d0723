// CORESHIFT ERROR TAXONOMY
// MEASUREMENT ANOMALIES AND ACTUATION FAILURES ARE RECOVERED INSIDE THE LOOP.
// NONE OF THESE ARE FATAL: THE WORST OUTCOME IS "NO ACTION THIS CYCLE".

use std::io;

use thiserror::Error;

use crate::CoreId;

// FAILURE TO BRING A CORE ONLINE OR TAKE IT OFFLINE
#[derive(Debug, Error)]
pub enum HotplugError {
    #[error("cpu {0} is the primary core and cannot be hotplugged")]
    Primary(CoreId),

    #[error("cpu {0} does not exist or is not hotpluggable")]
    NoSuchCore(CoreId),

    #[error("cpu {core} is already {}", state_word(.online))]
    AlreadyInState { core: CoreId, online: bool },

    #[error("kernel refused to set cpu {core} {}: {source}", state_word(.online))]
    Rejected {
        core: CoreId,
        online: bool,
        #[source]
        source: io::Error,
    },
}

fn state_word(online: &bool) -> &'static str {
    if *online { "online" } else { "offline" }
}

// A SAMPLE THAT CANNOT BE TRUSTED. THE CYCLE'S DECISION IS SKIPPED
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("cpu {core}: zero wall time since last sample")]
    ZeroWall { core: CoreId },

    #[error("cpu {core}: idle delta {idle_us}us exceeds wall delta {wall_us}us")]
    ClockSkew {
        core: CoreId,
        idle_us: u64,
        wall_us: u64,
    },

    #[error("no online core produced a sample")]
    NoCores,

    #[error("reading cpu accounting: {0}")]
    Read(#[from] io::Error),
}

// REJECTED WRITE THROUGH THE CONFIGURATION SURFACE
#[derive(Debug, Error)]
pub enum KnobError {
    #[error("unknown knob '{0}'")]
    UnknownKnob(String),

    #[error("invalid value '{value}' for {knob}")]
    InvalidValue { knob: &'static str, value: String },
}
