pub mod automation;
pub mod beans;
pub mod cancel;
pub mod config;
pub mod connections;
pub mod context;
pub mod errors;
pub mod executor;
pub mod needles;
pub mod queue;
pub mod registry;
pub mod session;
pub mod sink;
pub mod transport;
pub mod utils;

pub use automation::{
    ActionOutcome, ActionTable, AutomationController, AutomationLoop, BotContext, CommandTable,
    FindOptions, HandlerTable, LoopControls, LoopPlan, LoopStatus,
};
pub use beans::{AdbCommand, AdbDeviceInfo};
pub use cancel::CancellationToken;
pub use config::SessionConfig;
pub use context::SessionContext;
pub use errors::{SessionError, SessionResult};
pub use needles::{NeedleMatch, Region};
pub use queue::{CommandQueue, QueueInfo};
pub use session::{DeviceIdentity, DeviceSession, Gesture};
pub use sink::{LogSink, TracingSink};
pub use transport::{AdbTransport, DeviceHandle, Transport};
pub use utils::{adb_path, init_logger};
