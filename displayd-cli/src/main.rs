use clap::{Args, Parser, Subcommand};
use displayd_common::{
    format_duration, AppMetadata, ControlCommand, ControlResponse, DaemonStatus, IpcClient,
    Resolution, RunningAppEntry, SessionDescriptor, VirtualDisplayArrangement,
};
use displayd_config::Config;
use std::path::PathBuf;
use std::time::Duration;

/// Session start may create a virtual display and apply a mode before replying.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "displayd-cli")]
#[command(about = "displayd-cli (streaming display orchestration control)")]
#[command(version = "0.1.0")]
struct Cli {
    /// Control socket of the daemon
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the displayd daemon
    Daemon,

    /// Announce a new streaming session
    Start(StartArgs),

    /// End the current session
    Stop {
        /// The launched app keeps running after the stream
        #[arg(long)]
        app_running: bool,
    },

    /// Show current status
    Status,
}

#[derive(Args)]
struct StartArgs {
    /// Client resolution, e.g. 2560x1440
    #[arg(long)]
    resolution: Resolution,

    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Refresh rate to use when frame generation is active
    #[arg(long)]
    framegen_refresh_rate: Option<u32>,

    #[arg(long)]
    hdr: bool,

    /// Stream from a virtual display
    #[arg(long)]
    virtual_display: bool,

    /// Device id of an already created virtual display
    #[arg(long)]
    virtual_display_device_id: Option<String>,

    /// extended, extended_primary, extended_isolated,
    /// extended_primary_isolated or exclusive
    #[arg(long, value_parser = parse_layout)]
    layout: Option<VirtualDisplayArrangement>,

    #[arg(long, default_value = "")]
    client_name: String,

    #[arg(long, default_value = "")]
    client_uuid: String,

    #[arg(long)]
    app_id: Option<String>,

    #[arg(long)]
    app_name: Option<String>,

    /// The app asks for its own virtual screen
    #[arg(long)]
    virtual_screen: bool,

    /// Pin a high refresh rate for in-game frame generation
    #[arg(long)]
    gen1_framegen_fix: bool,

    /// Pin a high refresh rate for driver frame generation
    #[arg(long)]
    gen2_framegen_fix: bool,

    /// Command line of the launched app; omit for the desktop
    #[arg(long)]
    command: Option<String>,

    /// Id of the external launcher that started the app
    #[arg(long)]
    launcher_id: Option<String>,
}

impl StartArgs {
    fn into_command(self) -> ControlCommand {
        let mut session = SessionDescriptor::new(self.resolution.width, self.resolution.height, self.fps);
        session.framegen_refresh_rate = self.framegen_refresh_rate;
        session.enable_hdr = self.hdr;
        session.virtual_display = self.virtual_display;
        session.virtual_display_device_id = self.virtual_display_device_id;
        session.virtual_display_layout = self.layout;
        session.client_name = self.client_name;
        session.client_uuid = self.client_uuid;
        session.app = AppMetadata {
            app_id: self.app_id.clone(),
            app_name: self.app_name,
            virtual_screen: self.virtual_screen,
            gen1_framegen_fix: self.gen1_framegen_fix,
            gen2_framegen_fix: self.gen2_framegen_fix,
        };

        let (command, launcher_id) = (self.command, self.launcher_id);
        let launch = self.app_id.map(|_| RunningAppEntry {
            command_line: command,
            launcher_id,
        });
        ControlCommand::SessionStart { session, launch }
    }
}

fn parse_layout(value: &str) -> Result<VirtualDisplayArrangement, String> {
    serde_json::from_value(serde_json::Value::String(value.replace('-', "_")))
        .map_err(|_| format!("unknown layout '{}'", value))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let socket_path = cli.socket.clone().unwrap_or_else(|| {
        Config::load()
            .map(|config| config.daemon.socket_path())
            .unwrap_or_else(|_| Config::default().daemon.socket_path())
    });
    let client = IpcClient::new(socket_path).with_timeout(CONTROL_TIMEOUT);

    let command = match cli.command {
        Commands::Daemon => {
            println!("To start the daemon, run: displayd-daemon");
            println!("Set RUST_LOG=info (or debug) for more output");
            return Ok(());
        }

        Commands::Start(args) => args.into_command(),

        Commands::Stop { app_running } => ControlCommand::SessionEnd { app_running },

        Commands::Status => ControlCommand::Status,
    };

    match client.send(&command) {
        Ok(response) => print_response(response),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_response(response: ControlResponse) {
    match response {
        ControlResponse::Success { message } => {
            println!("✓ {}", message);
        }

        ControlResponse::Error { message } => {
            eprintln!("✗ Error: {}", message);
            std::process::exit(1);
        }

        ControlResponse::Status(status) => print_status(&status),
    }
}

fn print_status(status: &DaemonStatus) {
    println!("displayd Status:");
    println!("================");
    println!("Helper: {}", if status.helper_ready { "READY" } else { "NOT READY" });

    match &status.session {
        Some(session) => {
            println!(
                "Session: {}x{}@{} | client {} | HDR {}",
                session.width,
                session.height,
                session.display_fps(),
                if session.client_name.is_empty() { "unknown" } else { session.client_name.as_str() },
                if session.enable_hdr { "on" } else { "off" }
            );
        }
        None if status.app_running => println!("Session: none (app still running)"),
        None => println!("Session: none"),
    }

    if let Some(action) = status.last_action {
        println!("Last action: {:?}", action);
    }

    if let Some(guid) = status.virtual_display_guid {
        let device = status.virtual_display_device_id.as_deref().unwrap_or("pending");
        let state = if status.recovering { " (recovering)" } else { "" };
        println!("Virtual display: {} -> {}{}", guid, device, state);
    }

    if status.virtual_display_lost {
        println!("Virtual display: lost (recovery gave up, restart the session)");
    }

    let interval = if status.session.is_none() && status.app_running {
        displayd_common::watchdog::SUSPENDED_INTERVAL
    } else {
        displayd_common::watchdog::ACTIVE_INTERVAL
    };
    println!("Helper check every {}", format_duration(interval));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_command(args: &[&str]) -> ControlCommand {
        let mut argv = vec!["displayd-cli", "start", "--resolution", "2560x1440"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Start(args) => args.into_command(),
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_start_carries_app_flags() {
        let command = start_command(&[
            "--app-id", "42",
            "--virtual-screen",
            "--gen1-framegen-fix",
            "--gen2-framegen-fix",
            "--launcher-id", "steam",
            "--layout", "extended-isolated",
        ]);
        let ControlCommand::SessionStart { session, launch } = command else {
            panic!("expected session start");
        };

        assert_eq!((session.width, session.height, session.fps), (2560, 1440, 60));
        assert!(session.app.virtual_screen);
        assert!(session.app.gen1_framegen_fix);
        assert!(session.app.gen2_framegen_fix);
        assert_eq!(session.virtual_display_layout, Some(VirtualDisplayArrangement::ExtendedIsolated));
        assert_eq!(
            launch,
            Some(RunningAppEntry {
                command_line: None,
                launcher_id: Some("steam".to_string()),
            })
        );
    }

    #[test]
    fn test_start_defaults_to_desktop() {
        let ControlCommand::SessionStart { session, launch } = start_command(&[]) else {
            panic!("expected session start");
        };
        assert_eq!(session.app, AppMetadata::default());
        assert_eq!(launch, None);
    }

    #[test]
    fn test_unknown_layout_is_rejected() {
        let result = Cli::try_parse_from(["displayd-cli", "start", "--resolution", "1920x1080", "--layout", "sideways"]);
        assert!(result.is_err());
    }
}
