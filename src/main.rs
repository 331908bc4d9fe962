use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use parlance::config::Config;
use parlance::kernel::event::TurnEvent;
use parlance::kernel::state::{NoiseLevel, Privacy};
use parlance::outputs::realizer::{realize_outcome, realize_progress};
use parlance::services::package_manager::SimulatedPackageManager;
use parlance::Reactor;

const SESSION: &str = "cli";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("installing tracing subscriber")?;

    // 2. Config
    let config = match std::env::var("PARLANCE_CONFIG") {
        Ok(path) => Config::load(&path).with_context(|| format!("loading config from {}", path))?,
        Err(_) => Config::default(),
    };

    // 3. Reactor over the in-memory package manager
    let capability = Arc::new(SimulatedPackageManager::new().with_latency(Duration::from_millis(150)));
    let reactor = Reactor::new(config, capability).context("building reactor")?;
    let shutdown = CancellationToken::new();
    let sweeper = reactor.spawn_sweeper(Duration::from_secs(60), shutdown.clone());

    println!("parlance: talk to your package manager. Try \"install firefox\", \"help\", or :quit.");

    // 4. Read-eval loop. Lines typed while a turn runs are read alongside it:
    // :cancel and :quit act at once, anything else waits for the turn.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut queued: VecDeque<String> = VecDeque::new();
    let mut quitting = false;
    while !quitting {
        let line = match queued.pop_front() {
            Some(line) => line,
            None => match lines.next_line().await? {
                Some(line) => line,
                None => break,
            },
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            ":quit" | ":q" => break,
            ":cancel" => {
                println!("cancelled: {}", reactor.cancel(SESSION));
                continue;
            }
            ":focus" => {
                for (i, entry) in reactor.focus_snapshot(SESSION).await.iter().enumerate() {
                    println!("  {}. {} ({:?})", i + 1, entry.id, entry.kind);
                }
                continue;
            }
            ":stats" => {
                println!("{}", serde_json::to_string_pretty(&reactor.telemetry())?);
                continue;
            }
            ":private" | ":quiet" => {
                let mut env = reactor.environment(SESSION).await;
                if line == ":private" {
                    env.privacy = Privacy::Private;
                } else {
                    env.noise_level = NoiseLevel::Quiet;
                }
                reactor.set_environment(SESSION, env).await;
                continue;
            }
            _ => {}
        }

        let quiet = reactor.environment(SESSION).await.noise_level == NoiseLevel::Quiet;
        let mut turn = reactor.submit_utterance(SESSION, line, None);
        let mut stdin_open = true;
        loop {
            tokio::select! {
                event = turn.next() => match event {
                    Some(TurnEvent::Progress(progress)) if !quiet => {
                        println!("{}", realize_progress(&progress))
                    }
                    Some(TurnEvent::Completed(outcome)) => {
                        for text in realize_outcome(&outcome) {
                            println!("{}", text);
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
                input = lines.next_line(), if stdin_open => match input? {
                    Some(input) => match input.trim() {
                        "" => {}
                        ":cancel" => println!("cancelled: {}", reactor.cancel(SESSION)),
                        ":quit" | ":q" => {
                            reactor.cancel(SESSION);
                            quitting = true;
                        }
                        _ => queued.push_back(input),
                    },
                    None => stdin_open = false,
                },
            }
        }
    }

    shutdown.cancel();
    sweeper.await.context("joining sweeper")?;
    Ok(())
}
