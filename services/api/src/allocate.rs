use crate::infra::build_distribution;
use clap::Args;
use cv_distribution::config::AppConfig;
use cv_distribution::distribution::{
    AllocationReport, AllocationRequest, DistributionStats, Strategy, WorkItemImporter,
};
use cv_distribution::error::AppError;
use cv_distribution::telemetry;
use std::fmt;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct AllocateArgs {
    /// CSV of pending candidate records (id,nationality,position)
    #[arg(long)]
    pub(crate) items: PathBuf,
    /// JSON channel rules; defaults to DISTRIBUTION_RULES_PATH or the built-in sales channels
    #[arg(long)]
    pub(crate) rules: Option<PathBuf>,
    /// EQUAL, RANDOM, PRIORITY, BALANCED or WEIGHTED
    #[arg(long)]
    pub(crate) strategy: Option<Strategy>,
    /// Maximum number of records to distribute
    #[arg(long)]
    pub(crate) batch_size: Option<usize>,
    /// Traffic source whose weights apply (e.g. google, other)
    #[arg(long)]
    pub(crate) source: Option<String>,
    /// Seed for a reproducible shuffle
    #[arg(long)]
    pub(crate) seed: Option<u64>,
}

pub(crate) fn run_allocate(args: AllocateArgs) -> Result<(), AppError> {
    let AllocateArgs {
        items,
        rules,
        strategy,
        batch_size,
        source,
        seed,
    } = args;

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let mut settings = config.distribution;
    if rules.is_some() {
        settings.rules_path = rules;
    }
    if seed.is_some() {
        settings.service.seed = seed;
    }

    let pending = WorkItemImporter::from_path(&items)?;
    let stack = build_distribution(&settings, pending)?;

    let report = stack.service.run(AllocationRequest {
        strategy,
        batch_size,
        traffic_source: source,
    })?;
    let stats = stack.service.stats()?;

    print!(
        "{}",
        RunSummary {
            report: &report,
            stats: &stats,
        }
    );
    Ok(())
}

/// Plain-text summary of a run followed by the current channel load.
pub(crate) struct RunSummary<'a> {
    pub(crate) report: &'a AllocationReport,
    pub(crate) stats: &'a DistributionStats,
}

impl fmt::Display for RunSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        writeln!(f, "Distribution run ({} / {})", report.strategy, report.traffic_source)?;
        writeln!(f, "- {}", report.message)?;

        if let Some(entries) = &report.apportionment {
            writeln!(f, "Apportionment:")?;
            for entry in entries {
                writeln!(
                    f,
                    "  - {}: weight {:.2} | expected {:.2} | actual {} ({:.1}%)",
                    entry.channel_id,
                    entry.weight,
                    entry.expected_count,
                    entry.actual_count,
                    entry.percentage
                )?;
            }
        }

        if !report.distributed.is_empty() {
            writeln!(f, "Recorded per channel:")?;
            for (channel, count) in &report.distributed {
                writeln!(f, "  - {channel}: {count}")?;
            }
        }

        if !report.failed.is_empty() {
            writeln!(f, "Failed writes:")?;
            for failure in &report.failed {
                writeln!(
                    f,
                    "  - {} -> {}: {}",
                    failure.item_id, failure.channel_id, failure.reason
                )?;
            }
        }

        if !report.unassigned.is_empty() {
            let ids: Vec<String> = report.unassigned.iter().map(ToString::to_string).collect();
            writeln!(f, "Unassigned: {}", ids.join(", "))?;
        }

        writeln!(f, "Channel load:")?;
        for channel in self.stats.channels.iter().filter(|channel| channel.active_count > 0) {
            let limit = channel
                .daily_limit
                .map(|limit| limit.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "  - {}: {} active | {} today (daily limit {})",
                channel.channel_id, channel.active_count, channel.today_count, limit
            )?;
        }
        Ok(())
    }
}
