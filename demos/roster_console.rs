use clap::Parser;
use clap_derive::Parser;
use rostersync::controller::controller_config::{ControllerConfig, StaticSettings};
use rostersync::controller::controller_state::RosterSnapshot;
use rostersync::controller::roster_controller::RosterController;
use rostersync::roster::player::PlayerNumber;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::select;
use tokio::sync::watch;
use tracing::{info, warn, Level};

#[derive(Parser)]
struct Args {
    #[clap(long)]
    host: Option<String>,

    #[clap(long)]
    port: Option<u16>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let settings = StaticSettings {
        host: args.host,
        port: args.port,
    };
    let controller = RosterController::with_websockets(Arc::new(ControllerConfig::new()), Arc::new(settings));

    if let Err(e) = controller.connect().await {
        warn!("initial connect failed, use 'reconnect' to try again: {:#}", e);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut snapshots = controller.subscribe();

    loop {
        select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break; };
                if !handle_command(&controller, line.trim()).await {
                    break;
                }
            }
            _ = log_changes(&mut snapshots) => {}
        }
    }

    controller.disconnect().await;
    Ok(())
}

async fn log_changes(snapshots: &mut watch::Receiver<RosterSnapshot>) {
    if snapshots.changed().await.is_err() {
        // the controller outlives this loop, so this is unreachable in practice
        std::future::pending::<()>().await;
    }
    let snapshot = snapshots.borrow_and_update().clone();
    info!("v{} {:?}: {} alive, eliminated {:?}",
        snapshot.version,
        snapshot.connection,
        snapshot.alive_players().len(),
        snapshot.eliminated_players().iter().map(|p| p.number).collect::<Vec<_>>(),
    );
}

/// returns false to terminate
async fn handle_command(controller: &RosterController, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let result = match parts.next() {
        None => Ok(()),
        Some("arm") => controller.arm().await,
        Some("disarm") => controller.disarm().await,
        Some("toggle") => {
            let numbers = parts
                .filter_map(|s| match s.parse::<PlayerNumber>() {
                    Ok(n) => Some(n),
                    Err(_) => {
                        warn!("not a player number: {:?}", s);
                        None
                    }
                })
                .collect::<Vec<_>>();

            let players = controller.snapshot().players_by_number(&numbers);
            for n in numbers.iter().filter(|&&n| !players.iter().any(|p| p.number == n)) {
                warn!("player {} is not in the roster - skipping", n);
            }
            controller.toggle_player_aliveness(&players).await
        }
        Some("reconnect") => controller.connect().await,
        Some("disconnect") => {
            controller.disconnect().await;
            Ok(())
        }
        Some("quit") => return false,
        Some(other) => {
            warn!("unknown command {:?} - commands are arm, disarm, toggle <n>..., reconnect, disconnect, quit", other);
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!("{:#}", e);
    }
    true
}
