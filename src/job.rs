use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{DEFAULT_AZ, DEFAULT_EMR_RELEASE, DEFAULT_MAIN_CLASS};
use crate::error::{Error, Result};
use crate::instance::InstanceSpec;
use crate::resource::ResourcePlan;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const COMMAND_RUNNER_JAR: &str = "command-runner.jar";
const JOB_FLOW_ROLE: &str = "EMR_EC2_DefaultRole";
const SERVICE_ROLE: &str = "EMR_DefaultRole";
const GENERATE_STEP_NAME: &str = "Run LDBC SNB Datagen";
const EXPORT_STEP_NAME: &str = "Save output";

/// Pricing of the requested capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Market {
    /// preemptible, low-cost capacity
    Spot,
    /// guaranteed capacity
    OnDemand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceRole {
    Master,
    Core,
}

/// Only tearing the whole cluster down is supported, a failed step never
/// lets the following steps run on partial output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionOnFailure {
    TerminateCluster,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceGroup {
    pub name: String,
    pub market: Market,
    pub instance_role: InstanceRole,
    pub instance_type: String,
    pub instance_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Placement {
    pub availability_zone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instances {
    pub instance_groups: Vec<InstanceGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ec2_key_name: Option<String>,
    pub placement: Placement,
    pub keep_job_flow_alive_when_no_steps: bool,
    pub termination_protected: bool,
}

impl Instances {
    pub fn group(&self, role: InstanceRole) -> impl Iterator<Item = &InstanceGroup> {
        self.instance_groups
            .iter()
            .filter(move |g| g.instance_role == role)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HadoopJarStep {
    pub jar: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Step {
    pub name: String,
    pub action_on_failure: ActionOnFailure,
    pub hadoop_jar_step: HadoopJarStep,
}

impl Step {
    /// The value following `flag` in the step arguments
    pub fn arg(&self, flag: &str) -> Option<&str> {
        let args = &self.hadoop_jar_step.args;
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Application {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Configuration {
    pub classification: String,
    pub properties: BTreeMap<String, String>,
}

/// What the cluster adds up to, shown to the operator but never submitted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterCapacity {
    pub master: InstanceSpec,
    pub worker: InstanceSpec,
    pub worker_vcpu: u64,
    pub worker_mem_gb: u64,
}

/// A complete job flow description, ready for the cluster service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobSpec {
    pub name: String,
    pub log_uri: String,
    pub release_label: String,
    pub applications: Vec<Application>,
    pub configurations: Vec<Configuration>,
    pub instances: Instances,
    pub job_flow_role: String,
    pub service_role: String,
    pub visible_to_all_users: bool,
    pub steps: Vec<Step>,
    pub tags: BTreeMap<String, String>,

    #[serde(skip)]
    pub submitted_at: DateTime<Utc>,
    /// where the dataset of this run ends up
    #[serde(skip)]
    pub run_url: String,
    #[serde(skip)]
    pub capacity: ClusterCapacity,
}

impl JobSpec {
    /// Human readable description for the review prompt
    pub fn render(&self) -> serde_json::Result<String> {
        let body = serde_json::to_string_pretty(self)?;
        let workers = self.instances.group(InstanceRole::Core).map(|g| g.instance_count).sum::<u32>();

        Ok(format!(
            "Job parameters:\n{}\n\nCluster: 1 x {} driver, {} x {} workers ({} vCPU, {} GiB in total)\nOutput: {}",
            body,
            self.capacity.master.type_name,
            workers,
            self.capacity.worker.type_name,
            self.capacity.worker_vcpu,
            self.capacity.worker_mem_gb,
            self.run_url,
        ))
    }
}

#[derive(Debug, Default)]
pub struct JobSpecBuilder {
    /// The logical job name, suffixed with the submission timestamp
    name: Option<String>,
    /// The bucket holding artifacts, logs and results
    bucket: Option<String>,
    /// The generator artifact under `jars/` of the bucket
    jar: Option<String>,
    /// The generator entry point
    main_class: Option<String>,
    /// The scale factor handed to the generator
    scale_factor: Option<f64>,
    /// The cluster shape
    plan: Option<ResourcePlan>,
    worker_instance: Option<InstanceSpec>,
    master_instance: Option<InstanceSpec>,
    /// The pricing of the worker nodes, the driver is always on demand
    market: Option<Market>,
    availability_zone: Option<String>,
    release_label: Option<String>,
    /// The key pair allowing ssh into the nodes
    ec2_key: Option<String>,
    /// Only files matching this pattern are exported
    copy_filter: Option<String>,
    /// Extra spark properties for the generation step
    spark_conf: BTreeMap<String, String>,
}

impl JobSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn jar(mut self, jar: impl Into<String>) -> Self {
        self.jar = Some(jar.into());
        self
    }

    pub fn main_class(mut self, main_class: impl Into<String>) -> Self {
        self.main_class = Some(main_class.into());
        self
    }

    pub fn scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = Some(scale_factor);
        self
    }

    pub fn plan(mut self, plan: ResourcePlan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn worker_instance(mut self, spec: InstanceSpec) -> Self {
        self.worker_instance = Some(spec);
        self
    }

    pub fn master_instance(mut self, spec: InstanceSpec) -> Self {
        self.master_instance = Some(spec);
        self
    }

    pub fn market(mut self, market: Market) -> Self {
        self.market = Some(market);
        self
    }

    pub fn availability_zone(mut self, az: impl Into<String>) -> Self {
        self.availability_zone = Some(az.into());
        self
    }

    pub fn release_label(mut self, release_label: impl Into<String>) -> Self {
        self.release_label = Some(release_label.into());
        self
    }

    pub fn ec2_key(mut self, ec2_key: Option<String>) -> Self {
        self.ec2_key = ec2_key;
        self
    }

    pub fn copy_filter(mut self, copy_filter: Option<String>) -> Self {
        self.copy_filter = copy_filter;
        self
    }

    pub fn spark_conf(mut self, spark_conf: BTreeMap<String, String>) -> Self {
        self.spark_conf = spark_conf;
        self
    }

    pub fn build(self) -> Result<JobSpec> {
        self.build_at(Utc::now())
    }

    /// Build the description as if submitted at `submitted_at`
    pub fn build_at(self, submitted_at: DateTime<Utc>) -> Result<JobSpec> {
        let name = required("job name", self.name)?;
        let bucket = required("bucket", self.bucket)?;
        let jar = required("jar", self.jar)?;
        let scale_factor = self
            .scale_factor
            .ok_or_else(|| Error::validation("scale factor is required"))?;
        let plan = self
            .plan
            .ok_or_else(|| Error::validation("resource plan is required"))?;
        let worker = self
            .worker_instance
            .ok_or_else(|| Error::validation("worker instance type is required"))?;
        let master = self
            .master_instance
            .ok_or_else(|| Error::validation("master instance type is required"))?;
        let main_class = non_blank(self.main_class).unwrap_or_else(|| DEFAULT_MAIN_CLASS.to_string());
        let availability_zone =
            non_blank(self.availability_zone).unwrap_or_else(|| DEFAULT_AZ.to_string());
        let release_label =
            non_blank(self.release_label).unwrap_or_else(|| DEFAULT_EMR_RELEASE.to_string());
        let market = self.market.unwrap_or(Market::Spot);

        let ts = submitted_at.format(TIMESTAMP_FORMAT).to_string();
        let job_name = format!("{}_{}", name, ts);

        let jar_url = format!("s3://{}/jars/{}", bucket, jar);
        let results_url = format!("s3://{}/results/{}", bucket, name);
        let run_url = format!("{}/runs/{}", results_url, ts);
        // cluster local, written by the generator and read back by the export
        let build_dir = format!("hdfs:///datagen/{}", job_name);

        let mut generate_args = vec!["spark-submit".to_string()];
        for (key, value) in &self.spark_conf {
            generate_args.push("--conf".to_string());
            generate_args.push(format!("{}={}", key, value));
        }
        generate_args.extend([
            "--class".to_string(),
            main_class,
            jar_url,
            "--output-dir".to_string(),
            build_dir.clone(),
            "--scale-factor".to_string(),
            scale_factor.to_string(),
            "--num-threads".to_string(),
            plan.partition_count().to_string(),
        ]);

        let mut export_args = vec![
            "s3-dist-cp".to_string(),
            "--src".to_string(),
            build_dir,
            "--dest".to_string(),
            format!("{}/social_network", run_url),
        ];
        if let Some(filter) = non_blank(self.copy_filter) {
            export_args.push("--srcPattern".to_string());
            export_args.push(filter);
        }

        let steps = vec![
            command_runner_step(GENERATE_STEP_NAME, generate_args),
            command_runner_step(EXPORT_STEP_NAME, export_args),
        ];

        let instances = Instances {
            instance_groups: vec![
                InstanceGroup {
                    name: "Driver node".to_string(),
                    market: Market::OnDemand,
                    instance_role: InstanceRole::Master,
                    instance_type: master.type_name.clone(),
                    instance_count: 1,
                },
                InstanceGroup {
                    name: "Worker nodes".to_string(),
                    market,
                    instance_role: InstanceRole::Core,
                    instance_type: worker.type_name.clone(),
                    instance_count: plan.worker_count(),
                },
            ],
            ec2_key_name: non_blank(self.ec2_key),
            placement: Placement { availability_zone },
            keep_job_flow_alive_when_no_steps: false,
            termination_protected: false,
        };

        let worker_vcpu = worker.vcpu as u64 * plan.worker_count() as u64;
        if (plan.partition_count() as u64) < worker_vcpu {
            warn!(
                "{} partitions cannot keep {} worker vCPUs busy",
                plan.partition_count(),
                worker_vcpu
            );
        }
        let capacity = ClusterCapacity {
            worker_vcpu,
            worker_mem_gb: worker.mem_gb as u64 * plan.worker_count() as u64,
            master,
            worker,
        };

        let mut tags = BTreeMap::new();
        tags.insert("datagen:name".to_string(), name);
        tags.insert("datagen:scale-factor".to_string(), scale_factor.to_string());

        let spec = JobSpec {
            name: job_name,
            log_uri: format!("s3://{}/logs/emr", bucket),
            release_label,
            applications: ["Hadoop", "Spark", "Ganglia"]
                .into_iter()
                .map(|name| Application {
                    name: name.to_string(),
                })
                .collect(),
            configurations: vec![Configuration {
                classification: "spark".to_string(),
                properties: BTreeMap::from([(
                    "maximizeResourceAllocation".to_string(),
                    "true".to_string(),
                )]),
            }],
            instances,
            job_flow_role: JOB_FLOW_ROLE.to_string(),
            service_role: SERVICE_ROLE.to_string(),
            visible_to_all_users: true,
            steps,
            tags,
            submitted_at,
            run_url,
            capacity,
        };
        debug!("Built job spec {}", spec.name);
        Ok(spec)
    }
}

fn command_runner_step(name: &str, args: Vec<String>) -> Step {
    Step {
        name: name.to_string(),
        action_on_failure: ActionOnFailure::TerminateCluster,
        hadoop_jar_step: HadoopJarStep {
            jar: COMMAND_RUNNER_JAR.to_string(),
            args,
        },
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    non_blank(value).ok_or_else(|| Error::validation(format!("{} must not be empty", field)))
}
