pub mod display;
pub mod video;
pub mod session;
pub mod request;
pub mod parser;
pub mod decision;
pub mod watchdog;
pub mod recovery;
pub mod helper;
pub mod duration;
pub mod ipc;
pub mod error;

pub use display::{
    DevicePreparation, HdrState, Point, RefreshRate, Resolution, SingleDisplayConfiguration,
    VirtualDisplayArrangement,
};
pub use video::{StaticVideoConfig, VirtualDisplayMode};
pub use session::{AppMetadata, DisplayEnvironment, RunningAppEntry, SessionDescriptor};
pub use request::{ApplyRequestBuilder, DisplayApplyAction, DisplayApplyRequest, SessionOverrides, Topology};
pub use parser::{DisplayConfigParser, ParsedConfiguration, StaticConfigParser};
pub use decision::{build_request_from_session, SessionDisplayPolicy};
pub use watchdog::{HelperWatchdog, WatchdogHooks};
pub use recovery::{
    virtual_display_guid, RecoveryOutcome, VirtualDisplayCreationResult, VirtualDisplayDriver,
    VirtualDisplayRecoveryParams, VirtualDisplaySpec, VirtualDisplaySupervisor,
};
pub use helper::HelperProcess;
pub use duration::{format_duration, parse_duration};
pub use ipc::{
    ControlCommand, ControlResponse, DaemonStatus, HelperClient, HelperCommand, HelperResponse,
    IpcClient, IpcServer,
};
pub use error::{DisplaydError, Result, ErrorReporting};
