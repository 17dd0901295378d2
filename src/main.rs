use std::time::Duration;

use anyhow::{Context, Result};
use cadenza_power::{
    BenchmarkKind, PowerContext,
    battery::{BatteryEstimate, BatteryLife},
    settings::ConfigManager,
    worker::stop_pair,
};

/// How often brightness and CPU state are fed into the battery model.
const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

fn parse_args() -> Result<Option<BenchmarkKind>> {
    let mut args = std::env::args().skip(1);
    let mut benchmark = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--benchmark" | "-b" => {
                let kind = args.next().context("--benchmark needs brightness or cpu")?;
                benchmark = Some(kind.parse()?);
            }
            "--help" | "-h" => {
                println!("usage: cadenza-power [--benchmark brightness|cpu]");
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other:?}"),
        }
    }

    Ok(benchmark)
}

fn log_estimate(estimate: &BatteryEstimate) {
    let power = estimate.power.map_or("?".to_string(), |p| format!("{p:.0} mW"));
    match estimate.life {
        BatteryLife::Minutes(minutes) => {
            let minutes = minutes.round() as u64;
            let what = if estimate.charging { "until full" } else { "remaining" };
            log::info!("{power}, {}h {:02}m {what}", minutes / 60, minutes % 60);
        }
        BatteryLife::Unknown => log::info!("{power}, battery life unknown"),
        BatteryLife::InsufficientCharging => {
            log::warn!("{power}, charger can't keep up with the current draw")
        }
    }
}

async fn run_daemon(ctx: &PowerContext) {
    let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted, shutting down");
                break;
            }
            _ = refresh.tick() => {
                if let Some(estimate) = ctx.refresh() {
                    log_estimate(&estimate);
                }
            }
        }
    }
}

async fn run_benchmark(ctx: &PowerContext, kind: BenchmarkKind) -> Result<()> {
    let benchmark = ctx.benchmark(kind)?;
    let (handle, signal) = stop_pair();

    let run = benchmark.run(signal);
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted, stopping benchmark");
            handle.stop();
            run.await
        }
    };

    let model = result?;
    log::info!("stored {} model: {model}", benchmark.config().kind);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let benchmark = parse_args()?;

    let config = match ConfigManager::new() {
        Ok(manager) => manager.config().clone(),
        Err(e) => {
            log::error!("failed to load configuration: {}", e);
            log::info!("using default configuration");
            Default::default()
        }
    };

    let ctx = PowerContext::from_config(config)?;
    ctx.start();

    let result = match benchmark {
        Some(kind) => run_benchmark(&ctx, kind).await,
        None => {
            run_daemon(&ctx).await;
            Ok(())
        }
    };

    ctx.stop().await;
    result
}
