pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod patterns;
pub mod spotlight;
pub mod topics;
pub mod types;
pub mod verify;
pub mod wire;
pub mod zone;

pub use config::{DiscoveryConfig, DriverSettings, NetworkConfig, RuntimeConfig, VerificationConfig};
pub use error::{CommandError, PatternError, TransportError, ValidationError};
pub use patterns::{Pattern, PatternStore};
pub use topics::*;
pub use types::{ParameterSet, SwitchState, ZoneAttributes, ZoneObservation, ZoneStatus};
pub use verify::VerificationState;
pub use wire::ResponseBody;
pub use zone::{FetchPurpose, TimerKey, ZoneAction, ZoneContext, ZoneEngine, DRIVER_VERSION};
