pub mod events;
pub mod monitor;
pub mod router;
pub mod scrollback;
pub mod state;
pub mod supervisor;
pub mod worker;

pub use events::{classify, DeathCause, LineEvent, ParseError};
pub use monitor::{info_message, Directive, Monitor, MonitorConfig, Outbound};
pub use router::{CommandError, CommandKind};
pub use scrollback::{Scrollback, ScrollbackError};
pub use state::{Diagnostics, Roster, ServerSnapshot, ServerState};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use worker::SpawnError;
