// aggregate.rs — Run the exemption aggregator over the denial log.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use ishield_exemption::{
    parse_interval, Aggregator, DirectoryResourceLookup, FileTail, JsonDirExemptionStore,
    ReconcileReport, StartAt,
};
use tokio::sync::mpsc;

use crate::settings::ShieldSettings;

const TAIL_POLL: Duration = Duration::from_millis(500);

#[derive(Args)]
pub struct AggregateArgs {
    /// Denial log to read (defaults to the settings entry).
    #[arg(long)]
    events_file: Option<PathBuf>,
    /// Seconds between reconcile passes.
    #[arg(long, env = "INTERVAL_SECONDS")]
    interval: Option<String>,
    /// Read the whole log, reconcile once, and exit.
    #[arg(long)]
    once: bool,
    /// Ignore lines already in the log when following.
    #[arg(long)]
    from_end: bool,
}

pub fn execute(args: &AggregateArgs, settings: &ShieldSettings) -> anyhow::Result<()> {
    let events_file = args
        .events_file
        .clone()
        .unwrap_or_else(|| settings.events_file.clone());
    let store = Arc::new(JsonDirExemptionStore::new(&settings.exemption_dir)?);
    let lookup = Arc::new(DirectoryResourceLookup::new(&settings.resource_dir));
    let mut aggregator = Aggregator::new(store, lookup);

    let rt = tokio::runtime::Runtime::new()?;
    if args.once {
        let report = rt.block_on(async {
            let mut tail = FileTail::new(&events_file, StartAt::Beginning);
            for line in tail.poll_lines().await? {
                aggregator.enqueue(line);
            }
            Ok::<_, anyhow::Error>(aggregator.reconcile())
        })?;
        print_report(&report);
        return Ok(());
    }

    let interval = parse_interval(
        args.interval
            .as_deref()
            .or(settings.interval_seconds.as_deref()),
    );
    let start = if args.from_end {
        StartAt::End
    } else {
        StartAt::Beginning
    };
    tracing::info!(
        events_file = %events_file.display(),
        interval_secs = interval.as_secs(),
        "starting exemption aggregator"
    );

    rt.block_on(async move {
        let (tx, rx) = mpsc::channel(1024);
        let tail = tokio::spawn(FileTail::new(&events_file, start).follow(tx, TAIL_POLL));
        let mut run = tokio::spawn(aggregator.run(rx, interval));
        tokio::select! {
            result = &mut run => return result.map_err(anyhow::Error::from),
            signal = tokio::signal::ctrl_c() => signal?,
        }
        tracing::info!("interrupted; flushing pending events");
        // Dropping the tail's sender makes the aggregator do a final pass.
        tail.abort();
        run.await?;
        Ok(())
    })
}

fn print_report(report: &ReconcileReport) {
    println!(
        "Accepted {} result(s), {} malformed line(s), {} without a constraint name.",
        report.accepted, report.malformed, report.unnamed
    );
    for (label, names) in [
        ("Created", &report.created),
        ("Updated", &report.updated),
        ("Pruned", &report.pruned),
        ("Deleted", &report.deleted),
        ("Failed", &report.failed),
    ] {
        if !names.is_empty() {
            println!("{}: {}", label, names.join(", "));
        }
    }
}
