mod config;
mod confirm;
mod error;
mod instance;
mod job;
mod pipeline;
mod resource;
mod submit;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use crate::config::*;
use crate::confirm::ConfirmationGate;
use crate::instance::InstanceCatalog;
use crate::job::Market;
use crate::pipeline::{SubmissionOutcome, SubmitRequest};
use crate::resource::{CostAssumptions, SizingBounds};
use crate::submit::EmrSubmitter;

/// Submit an LDBC SNB Datagen job to AWS EMR.
///
/// The cluster is sized from the scale factor alone: the number of worker
/// nodes and of Spark partitions are derived from how much scale factor one
/// worker and one partition can absorb, unless given explicitly.
/// The full job description is shown for review before anything is submitted.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// the job name, the submission timestamp is appended to it
    #[arg(long)]
    name: String,

    /// the scale factor of the generated dataset
    #[arg(long)]
    scale_factor: f64,

    /// the datagen jar, looked up under jars/ of the bucket
    #[arg(long)]
    jar: String,

    /// the bucket holding jars, logs and results
    #[arg(long, default_value_t = String::from(DEFAULT_BUCKET))]
    bucket: String,

    /// the entry point of the datagen jar
    #[arg(long, default_value_t = String::from(DEFAULT_MAIN_CLASS))]
    main_class: String,

    /// the instance type of the worker nodes
    #[arg(long, default_value_t = String::from(DEFAULT_INSTANCE_TYPE))]
    instance_type: String,

    /// the instance type of the driver node
    #[arg(long, default_value_t = String::from(DEFAULT_MASTER_INSTANCE_TYPE))]
    master_instance_type: String,

    /// the total number of worker nodes, computed from the scale factor if absent
    #[arg(long, conflicts_with = "sf_per_worker")]
    workers: Option<u32>,

    /// the scale factor one worker node absorbs
    #[arg(long, default_value_t = DEFAULT_SF_PER_WORKER)]
    sf_per_worker: f64,

    /// the total number of Spark partitions, computed from the scale factor if absent
    #[arg(long, conflicts_with = "sf_per_partition")]
    partitions: Option<u32>,

    /// the scale factor one Spark partition absorbs
    #[arg(long, default_value_t = DEFAULT_SF_PER_PARTITION)]
    sf_per_partition: f64,

    #[arg(long, default_value_t = DEFAULT_MIN_WORKERS)]
    min_workers: u32,

    #[arg(long, default_value_t = DEFAULT_MAX_WORKERS)]
    max_workers: u32,

    #[arg(long, default_value_t = DEFAULT_MIN_PARTITIONS)]
    min_partitions: u32,

    /// request on-demand instead of spot capacity for the worker nodes
    #[arg(long, default_value_t = false)]
    on_demand: bool,

    /// the availability zone of the cluster
    #[arg(long, default_value_t = String::from(DEFAULT_AZ))]
    az: String,

    /// the AWS region, derived from the availability zone if absent
    #[arg(long)]
    region: Option<String>,

    /// the EC2 key pair for ssh access to the nodes
    #[arg(long)]
    ec2_key: Option<String>,

    /// the EMR release, e.g. emr-6.6.0
    #[arg(long, default_value_t = String::from(DEFAULT_EMR_RELEASE))]
    emr_release: String,

    /// only export the files matching this pattern
    #[arg(long)]
    copy_filter: Option<String>,

    /// extra Spark properties for the datagen step, as key=value
    #[arg(long, value_parser = parse_key_val, num_args = 1..)]
    conf: Vec<(String, String)>,

    /// the instance type reference table, exported from ec2instances.info.
    /// Defaults to "Amazon EC2 Instance Comparison.csv" next to the executable
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// assume yes to the confirmation prompt
    #[arg(short = 'y', long, default_value_t = false)]
    yes: bool,

    /// there is nobody to answer the prompt, requires --yes to submit
    #[arg(long, default_value_t = false)]
    non_interactive: bool,

    /// if set, the job is only printed, this is for debugging
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// more logging, repeat for even more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn to_request(&self) -> SubmitRequest {
        SubmitRequest {
            name: self.name.clone(),
            scale_factor: self.scale_factor,
            bucket: self.bucket.clone(),
            jar: self.jar.clone(),
            main_class: self.main_class.clone(),
            worker_instance_type: self.instance_type.clone(),
            master_instance_type: self.master_instance_type.clone(),
            workers: self.workers,
            partitions: self.partitions,
            cost: CostAssumptions {
                scale_per_worker: self.sf_per_worker,
                scale_per_partition: self.sf_per_partition,
            },
            bounds: SizingBounds {
                min_workers: self.min_workers,
                max_workers: self.max_workers,
                min_partitions: self.min_partitions,
            },
            market: if self.on_demand {
                Market::OnDemand
            } else {
                Market::Spot
            },
            availability_zone: self.az.clone(),
            release_label: self.emr_release.clone(),
            ec2_key: self.ec2_key.clone(),
            copy_filter: self.copy_filter.clone(),
            spark_conf: self.conf.iter().cloned().collect(),
            auto_approve: self.yes,
            dry_run: self.dry_run,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match submit(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn submit(args: &Args) -> Result<()> {
    let catalog_path = args.catalog.clone().unwrap_or_else(default_catalog_path);
    let catalog = InstanceCatalog::load(&catalog_path).context("startup")?;
    let request = args.to_request();
    let submitter = EmrSubmitter::from_env(args.region.clone(), &args.az).await;
    let mut gate = ConfirmationGate::stdio(!args.non_interactive);

    match pipeline::run(&request, &catalog, &mut gate, &submitter).await? {
        SubmissionOutcome::Submitted(handle) => println!("Submitted job flow {}", handle),
        SubmissionOutcome::Declined => println!("Declined, nothing was submitted"),
        SubmissionOutcome::DryRun { description, .. } => println!("{}", description),
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,datagen_submitter={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_writer(std::io::stderr)
        .init();
}
