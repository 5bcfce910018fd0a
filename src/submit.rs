use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use aws_sdk_emr::error::DisplayErrorContext;
use aws_sdk_emr::types::{
    ActionOnFailure as EmrActionOnFailure, Application, Configuration, HadoopJarStepConfig,
    InstanceGroupConfig, InstanceRoleType, JobFlowInstancesConfig, MarketType, PlacementType,
    StepConfig, Tag,
};
use aws_sdk_emr::Client;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::job::{ActionOnFailure, InstanceRole, Instances, JobSpec, Market, Step};

/// Identifies the submitted job flow at the cluster service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_flow_id: String,
    pub cluster_arn: Option<String>,
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cluster_arn {
            Some(arn) => write!(f, "{} ({})", self.job_flow_id, arn),
            None => write!(f, "{}", self.job_flow_id),
        }
    }
}

/// The one capability needed from the cluster service
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    /// Submit the job in a single call. Implementations never retry.
    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle>;
}

/// Submits job flows to AWS EMR through `RunJobFlow`
pub struct EmrSubmitter {
    client: Client,
}

impl EmrSubmitter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the default credential chain. Without an explicit
    /// region, the one containing `availability_zone` is used.
    pub async fn from_env(region: Option<String>, availability_zone: &str) -> Self {
        let region = region.or_else(|| region_of(availability_zone));
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            info!("Using region {}", region);
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;
        Self::new(Client::new(&config))
    }
}

#[async_trait]
impl JobSubmitter for EmrSubmitter {
    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle> {
        // shape the whole request first, nothing is sent unless all of it is valid
        let instances = instances_config(&spec.instances)?;
        let steps = step_configs(&spec.steps);
        let configurations = spec
            .configurations
            .iter()
            .map(|c| {
                Configuration::builder()
                    .classification(&c.classification)
                    .set_properties(Some(
                        c.properties
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect::<HashMap<_, _>>(),
                    ))
                    .build()
            })
            .collect::<Vec<_>>();
        let applications = spec
            .applications
            .iter()
            .map(|a| Application::builder().name(&a.name).build())
            .collect::<Vec<_>>();
        let tags = spec
            .tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect::<Vec<_>>();

        debug!("Sending RunJobFlow for {}", spec.name);
        let output = self
            .client
            .run_job_flow()
            .name(&spec.name)
            .log_uri(&spec.log_uri)
            .release_label(&spec.release_label)
            .set_applications(Some(applications))
            .set_configurations(Some(configurations))
            .instances(instances)
            .job_flow_role(&spec.job_flow_role)
            .service_role(&spec.service_role)
            .visible_to_all_users(spec.visible_to_all_users)
            .set_steps(Some(steps))
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| {
                Error::submission(format!(
                    "EMR rejected job flow `{}`: {}",
                    spec.name,
                    DisplayErrorContext(&e)
                ))
            })?;

        let job_flow_id = output
            .job_flow_id()
            .ok_or_else(|| {
                Error::submission(format!(
                    "EMR accepted job flow `{}` but returned no id",
                    spec.name
                ))
            })?
            .to_string();

        Ok(JobHandle {
            job_flow_id,
            cluster_arn: output.cluster_arn().map(str::to_string),
        })
    }
}

fn instances_config(instances: &Instances) -> Result<JobFlowInstancesConfig> {
    let groups = instances
        .instance_groups
        .iter()
        .map(|g| {
            let count = i32::try_from(g.instance_count).map_err(|_| {
                Error::submission(format!(
                    "instance count {} of `{}` is out of range",
                    g.instance_count, g.name
                ))
            })?;
            Ok(InstanceGroupConfig::builder()
                .name(&g.name)
                .market(match g.market {
                    Market::Spot => MarketType::Spot,
                    Market::OnDemand => MarketType::OnDemand,
                })
                .instance_role(match g.instance_role {
                    InstanceRole::Master => InstanceRoleType::Master,
                    InstanceRole::Core => InstanceRoleType::Core,
                })
                .instance_type(&g.instance_type)
                .instance_count(count)
                .build())
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(JobFlowInstancesConfig::builder()
        .set_instance_groups(Some(groups))
        .set_ec2_key_name(instances.ec2_key_name.clone())
        .placement(
            PlacementType::builder()
                .availability_zone(&instances.placement.availability_zone)
                .build(),
        )
        .keep_job_flow_alive_when_no_steps(instances.keep_job_flow_alive_when_no_steps)
        .termination_protected(instances.termination_protected)
        .build())
}

fn step_configs(steps: &[Step]) -> Vec<StepConfig> {
    steps
        .iter()
        .map(|s| {
            let jar_step = HadoopJarStepConfig::builder()
                .jar(&s.hadoop_jar_step.jar)
                .set_args(Some(s.hadoop_jar_step.args.clone()))
                .build();
            StepConfig::builder()
                .name(&s.name)
                .action_on_failure(match s.action_on_failure {
                    ActionOnFailure::TerminateCluster => EmrActionOnFailure::TerminateCluster,
                })
                .hadoop_jar_step(jar_step)
                .build()
        })
        .collect()
}

/// `us-east-2c` -> `us-east-2`
pub fn region_of(availability_zone: &str) -> Option<String> {
    let az = availability_zone.trim();
    let region = az.strip_suffix(|c: char| c.is_ascii_lowercase())?;
    if region.ends_with(|c: char| c.is_ascii_digit()) {
        Some(region.to_string())
    } else {
        None
    }
}
