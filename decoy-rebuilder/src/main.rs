use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use decoy_rebuilder::features::read_feature_file;
use decoy_rebuilder::pcap_reader::PcapReader;
use decoy_rebuilder::pipeline::{RebuildOptions, rebuild_capture};

#[derive(Parser, Debug)]
#[command(name = "decoy-rebuilder")]
#[command(about = "Rebuild captured packets into decoy-augmented sequences from an optimizer's decision table")]
#[command(version = "1.0.0")]
struct Args {
    /// Verbose logging (default: false)
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inject decoys in front of each anchor packet and write the result
    Rebuild {
        /// PCAP file holding the anchor packets
        #[arg(short, long)]
        input: String,

        /// Decision table CSV (group,anchor_time,decoy_count,time_delta,truncation_level,payload_length)
        #[arg(short, long)]
        decision: String,

        /// Output PCAP file path
        #[arg(short, long)]
        output: String,

        /// Number of groups to rebuild (default: every group the decision covers)
        #[arg(short, long)]
        groups: Option<usize>,

        /// Consecutive packets per group; the first one is the anchor
        #[arg(long, default_value = "1")]
        group_size: usize,

        /// Worker threads (0 = one per CPU core)
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Seed for synthetic payload bytes (default: OS entropy)
        #[arg(long)]
        seed: Option<u64>,

        /// Recompute IP/UDP lengths and checksums in the written packets
        #[arg(long)]
        repair_lengths: bool,
    },
    /// Summarise the layer stacks found in a capture
    Inspect {
        /// Path to PCAP file
        #[arg(short, long)]
        input: String,
    },
    /// Check that a feature matrix CSV has the 100-value per-packet layout
    CheckFeatures {
        /// Header-less CSV, one row per packet
        #[arg(short, long)]
        input: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .init();

    match args.command {
        Commands::Rebuild {
            input,
            decision,
            output,
            groups,
            group_size,
            workers,
            seed,
            repair_lengths,
        } => {
            info!("Starting decoy rebuild");
            info!("Anchors: {}", input);
            info!("Decision table: {}", decision);

            let options = RebuildOptions {
                group_count: groups,
                group_size,
                workers,
                seed,
                repair_lengths,
            };
            let report = rebuild_capture(&input, &decision, &output, &options)?;

            info!("======= REBUILD SUMMARY =======");
            info!("Packets read: {}", report.anchors_read);
            info!("Groups rebuilt: {}", report.groups);
            info!("Packets written: {}", report.packets_written);
            info!("Total time: {:.2} seconds", report.elapsed_seconds);
            info!("===============================");
        }
        Commands::Inspect { input } => {
            let reader = PcapReader::new(&input)?;
            let analysis = reader.analyze()?;

            info!("Capture summary for {}:", input);
            info!("  Link type: {:?}", analysis.link);
            info!("  Total packets: {}", analysis.total_packets);
            info!("  Duration: {:.3} seconds", analysis.duration_seconds);
            for (stack, count) in &analysis.stacks {
                info!("  {:>8}  {}", count, stack);
            }
        }
        Commands::CheckFeatures { input } => {
            let features = read_feature_file(&input)?;
            info!("{}: {} feature rows, layout OK", input, features.len());
        }
    }

    Ok(())
}
