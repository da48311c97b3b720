use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use unipi_evok::{
    BridgeConfig, ChangeNotifier, ControllerId, ControllerSession, DeviceAddress, EvokError,
    SessionConfig,
};

/// Print every device change on one or more UniPi controllers
#[derive(Parser)]
struct Args {
    /// TOML file with one [[controller]] table per UniPi
    #[arg(short, long, env = "UNIPI_CONFIG", conflicts_with = "host")]
    config: Option<PathBuf>,

    /// Single controller to watch instead of a config file
    #[arg(long)]
    host: Option<String>,

    /// Skip the /rest/all enrichment
    #[arg(long)]
    no_rest: bool,

    /// Toggle this relay (e.g. relay/1_01) once the sessions are up
    #[arg(long)]
    toggle: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("unipi_evok=info")),
        )
        .init();

    let args = Args::parse();

    let mut controllers = match (&args.config, &args.host) {
        (Some(path), _) => BridgeConfig::load(path)?.controllers,
        (None, Some(host)) => vec![SessionConfig::new(host.clone())],
        (None, None) => return Err("pass --config or --host".into()),
    };
    if args.no_rest {
        for controller in &mut controllers {
            controller.fetch_rest = false;
        }
    }

    let notifier = ChangeNotifier::new();
    let mut everything = notifier.subscribe_all();

    let mut sessions = Vec::new();
    for config in controllers {
        let host = config.host.clone();
        match ControllerSession::connect(config, notifier.clone()).await {
            Ok(session) => {
                println!(
                    "{} ({}, {}): {} devices, inputs reported as {:?}",
                    session.name(),
                    session.model(),
                    host,
                    session.cache().len(),
                    session.cache().input_device_types()
                );
                sessions.push(session);
            }
            Err(e) => eprintln!("Could not start session for {}: {}", host, e),
        }
    }
    if sessions.is_empty() {
        return Err("no controller reachable".into());
    }

    if let Some(target) = &args.toggle {
        toggle(&sessions[0], target).await?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notification = everything.recv() => {
                let notification = match notification {
                    Ok(notification) => notification,
                    Err(EvokError::ChannelError(e)) => {
                        eprintln!("Missed changes: {}", e);
                        continue;
                    }
                    Err(_) => break,
                };
                print_change(&sessions, &notification.key.controller, &notification.key.address);
            }
        }
    }

    for session in &mut sessions {
        session.shutdown().await;
    }
    Ok(())
}

fn print_change(sessions: &[ControllerSession], controller: &ControllerId, address: &DeviceAddress) {
    let Some(session) = sessions.iter().find(|s| s.id() == controller) else {
        return;
    };
    match session.get(address) {
        Some(state) => println!(
            "[{}] {} {} = {}",
            controller,
            address,
            state.display_name().unwrap_or(""),
            state.value().map(|v| v.to_string()).unwrap_or_default()
        ),
        None => println!("[{}] {} (unknown)", controller, address),
    }
}

async fn toggle(session: &ControllerSession, target: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (dev, circuit) = target
        .split_once('/')
        .ok_or("expected <dev>/<circuit>")?;
    let address = DeviceAddress::new(dev, circuit);

    let on = session
        .get(&address)
        .and_then(|state| state.value().cloned())
        .is_some_and(|value| value == 1 || value == "1");
    let next = if on { "0" } else { "1" };

    session.send(address.clone(), next).await?;
    println!("Sent {} to {}", next, address);
    Ok(())
}
