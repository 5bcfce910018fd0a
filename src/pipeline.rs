use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::confirm::ConfirmationGate;
use crate::instance::InstanceCatalog;
use crate::job::{JobSpec, JobSpecBuilder, Market};
use crate::resource::{self, CostAssumptions, SizingBounds};
use crate::submit::{JobHandle, JobSubmitter};

/// Everything one invocation asks for
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub name: String,
    pub scale_factor: f64,
    pub bucket: String,
    pub jar: String,
    pub main_class: String,
    pub worker_instance_type: String,
    pub master_instance_type: String,
    pub workers: Option<u32>,
    pub partitions: Option<u32>,
    pub cost: CostAssumptions,
    pub bounds: SizingBounds,
    pub market: Market,
    pub availability_zone: String,
    pub release_label: String,
    pub ec2_key: Option<String>,
    pub copy_filter: Option<String>,
    pub spark_conf: BTreeMap<String, String>,
    pub auto_approve: bool,
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum SubmissionOutcome {
    Submitted(JobHandle),
    /// the operator answered no, nothing was sent
    Declined,
    /// nothing was sent, the description is only to be shown
    DryRun {
        spec: Box<JobSpec>,
        description: String,
    },
}

/// Plan, build, confirm, submit. The first failing stage aborts the rest.
pub async fn run<R, W>(
    request: &SubmitRequest,
    catalog: &InstanceCatalog,
    gate: &mut ConfirmationGate<R, W>,
    submitter: &dyn JobSubmitter,
) -> Result<SubmissionOutcome>
where
    R: BufRead,
    W: Write,
{
    let spec = prepare(request, catalog)?;
    let description = spec
        .render()
        .context("stage `build`: unable to render the job description")?;
    debug!(
        "Dataset is generated in {:?} and exported to {}",
        spec.steps.first().and_then(|s| s.arg("--output-dir")),
        spec.run_url
    );

    if request.dry_run {
        info!("Dry run, not submitting {}", spec.name);
        return Ok(SubmissionOutcome::DryRun {
            spec: Box::new(spec),
            description,
        });
    }

    if !gate
        .confirm(&description, request.auto_approve)
        .context("stage `confirm`")?
    {
        info!("Submission of {} declined", spec.name);
        return Ok(SubmissionOutcome::Declined);
    }

    info!(
        "Submitting {} prepared at {}",
        spec.name,
        spec.submitted_at.to_rfc3339()
    );
    let handle = submitter
        .submit(&spec)
        .await
        .with_context(|| format!("stage `submit` of job flow `{}`", spec.name))?;
    info!("Submitted {} as {}", spec.name, handle);
    Ok(SubmissionOutcome::Submitted(handle))
}

/// The pure part of the pipeline: size the cluster and describe the job
pub fn prepare(request: &SubmitRequest, catalog: &InstanceCatalog) -> Result<JobSpec> {
    let plan = resource::plan(
        request.scale_factor,
        &request.cost,
        &request.bounds,
        request.workers,
        request.partitions,
    )
    .with_context(|| format!("stage `plan` for scale factor {}", request.scale_factor))?;
    info!(
        "Scale factor {} needs {} workers and {} partitions",
        request.scale_factor,
        plan.worker_count(),
        plan.partition_count()
    );

    let worker = catalog
        .lookup(&request.worker_instance_type)
        .context("stage `catalog` for worker instance type")?;
    let master = catalog
        .lookup(&request.master_instance_type)
        .context("stage `catalog` for master instance type")?;

    JobSpecBuilder::new()
        .name(&request.name)
        .bucket(&request.bucket)
        .jar(&request.jar)
        .main_class(&request.main_class)
        .scale_factor(request.scale_factor)
        .plan(plan)
        .worker_instance(worker)
        .master_instance(master)
        .market(request.market)
        .availability_zone(&request.availability_zone)
        .release_label(&request.release_label)
        .ec2_key(request.ec2_key.clone())
        .copy_filter(request.copy_filter.clone())
        .spark_conf(request.spark_conf.clone())
        .build()
        .with_context(|| format!("stage `build` for job `{}`", request.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::error::Error;
    use crate::job::InstanceRole;
    use async_trait::async_trait;
    use std::io::Cursor;
    use std::sync::Mutex;

    const TABLE: &str = "\
API Name,vCPUs,Memory
r6gd.2xlarge,8 vCPUs,64 GiB
m5.xlarge,4 vCPUs,16 GiB
";

    /// Records what it was asked to submit
    #[derive(Default)]
    struct RecordingSubmitter {
        submitted: Mutex<Vec<String>>,
        reject: bool,
    }

    #[async_trait]
    impl JobSubmitter for RecordingSubmitter {
        async fn submit(&self, spec: &JobSpec) -> crate::error::Result<JobHandle> {
            self.submitted.lock().unwrap().push(spec.name.clone());
            if self.reject {
                return Err(Error::submission("ValidationException: quota exceeded"));
            }
            Ok(JobHandle {
                job_flow_id: "j-2AXXXXXXGAPLF".to_string(),
                cluster_arn: None,
            })
        }
    }

    impl RecordingSubmitter {
        fn calls(&self) -> usize {
            self.submitted.lock().unwrap().len()
        }
    }

    fn request() -> SubmitRequest {
        SubmitRequest {
            name: "sf30000".to_string(),
            scale_factor: 30000.0,
            bucket: DEFAULT_BUCKET.to_string(),
            jar: "datagen.jar".to_string(),
            main_class: DEFAULT_MAIN_CLASS.to_string(),
            worker_instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            master_instance_type: "m5.xlarge".to_string(),
            workers: None,
            partitions: None,
            cost: CostAssumptions::default(),
            bounds: SizingBounds::default(),
            market: Market::Spot,
            availability_zone: DEFAULT_AZ.to_string(),
            release_label: DEFAULT_EMR_RELEASE.to_string(),
            ec2_key: None,
            copy_filter: None,
            spark_conf: BTreeMap::new(),
            auto_approve: false,
            dry_run: false,
        }
    }

    fn catalog() -> InstanceCatalog {
        InstanceCatalog::from_reader(TABLE.as_bytes(), "test.csv").unwrap()
    }

    fn gate(interactive: bool, answers: &str) -> ConfirmationGate<Cursor<String>, Vec<u8>> {
        ConfirmationGate::new(interactive, Cursor::new(answers.to_string()), Vec::new())
    }

    fn error_kind(err: &anyhow::Error) -> Option<&Error> {
        err.downcast_ref::<Error>()
    }

    #[test]
    fn test_prepare_reference_job() {
        let spec = prepare(&request(), &catalog()).unwrap();

        let workers: Vec<_> = spec.instances.group(InstanceRole::Core).collect();
        assert_eq!(spec.instances.group(InstanceRole::Master).count(), 1);
        assert_eq!(workers[0].instance_count, 10);
        assert_eq!(spec.steps[0].arg("--num-threads"), Some("3000"));
        assert_eq!(
            spec.steps[1].arg("--src"),
            spec.steps[0].arg("--output-dir")
        );
        assert_eq!(spec.capacity.worker_vcpu, 80);
    }

    #[tokio::test]
    async fn test_auto_approve_submits_without_prompt() {
        let mut request = request();
        request.auto_approve = true;
        let submitter = RecordingSubmitter::default();
        let mut gate = gate(false, "");

        let outcome = run(&request, &catalog(), &mut gate, &submitter).await.unwrap();

        assert!(matches!(outcome, SubmissionOutcome::Submitted(h) if h.job_flow_id == "j-2AXXXXXXGAPLF"));
        assert_eq!(submitter.calls(), 1);
        assert!(gate_output(gate).is_empty());
    }

    #[tokio::test]
    async fn test_declined_never_submits() {
        let submitter = RecordingSubmitter::default();
        let mut gate = gate(true, "nope\nno\n");

        let outcome = run(&request(), &catalog(), &mut gate, &submitter).await.unwrap();

        assert!(matches!(outcome, SubmissionOutcome::Declined));
        assert_eq!(submitter.calls(), 0);
        assert!(gate_output(gate).contains("Job parameters:"));
    }

    #[tokio::test]
    async fn test_confirmed_submits_once() {
        let submitter = RecordingSubmitter::default();
        let mut gate = gate(true, "Y\n");

        let outcome = run(&request(), &catalog(), &mut gate, &submitter).await.unwrap();

        assert!(matches!(outcome, SubmissionOutcome::Submitted(_)));
        let submitted = submitter.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].starts_with("sf30000_"));
    }

    #[tokio::test]
    async fn test_non_positive_scale_factor_stops_at_plan() {
        let mut request = request();
        request.scale_factor = 0.0;
        request.auto_approve = true;
        let submitter = RecordingSubmitter::default();

        let err = run(&request, &catalog(), &mut gate(true, "y\n"), &submitter)
            .await
            .unwrap_err();

        assert!(matches!(error_kind(&err), Some(Error::Validation(_))));
        assert!(format!("{:#}", err).contains("stage `plan`"));
        assert_eq!(submitter.calls(), 0);
    }

    #[tokio::test]
    async fn test_worker_count_beyond_service_limit_stops_before_prompt() {
        let mut request = request();
        request.workers = Some(3_000_000_000);
        let submitter = RecordingSubmitter::default();
        let mut gate = gate(true, "y\n");

        let err = run(&request, &catalog(), &mut gate, &submitter)
            .await
            .unwrap_err();

        assert!(matches!(error_kind(&err), Some(Error::Validation(_))));
        assert!(format!("{:#}", err).contains("stage `plan`"));
        assert!(gate_output(gate).is_empty());
        assert_eq!(submitter.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_instance_type_never_submits() {
        let mut request = request();
        request.worker_instance_type = "z9.huge".to_string();
        request.auto_approve = true;
        let submitter = RecordingSubmitter::default();

        let err = run(&request, &catalog(), &mut gate(true, ""), &submitter)
            .await
            .unwrap_err();

        assert!(matches!(error_kind(&err), Some(Error::Configuration(msg)) if msg.contains("z9.huge")));
        assert!(format!("{:#}", err).contains("stage `catalog`"));
        assert_eq!(submitter.calls(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_skips_confirmation_and_submission() {
        let mut request = request();
        request.dry_run = true;
        let submitter = RecordingSubmitter::default();
        let mut gate = gate(false, "");

        let outcome = run(&request, &catalog(), &mut gate, &submitter).await.unwrap();

        match outcome {
            SubmissionOutcome::DryRun { spec, description } => {
                assert_eq!(spec.steps.len(), 2);
                assert!(description.contains(&spec.name));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(submitter.calls(), 0);
    }

    #[tokio::test]
    async fn test_submission_error_is_propagated() {
        let mut request = request();
        request.auto_approve = true;
        let submitter = RecordingSubmitter {
            reject: true,
            ..Default::default()
        };

        let err = run(&request, &catalog(), &mut gate(false, ""), &submitter)
            .await
            .unwrap_err();

        assert!(matches!(error_kind(&err), Some(Error::Submission(msg)) if msg.contains("quota")));
        assert!(format!("{:#}", err).contains("stage `submit`"));
        assert_eq!(submitter.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_interactive_without_approval_fails_closed() {
        let submitter = RecordingSubmitter::default();

        let err = run(&request(), &catalog(), &mut gate(false, "y\n"), &submitter)
            .await
            .unwrap_err();

        assert!(matches!(error_kind(&err), Some(Error::Validation(_))));
        assert_eq!(submitter.calls(), 0);
    }

    fn gate_output(gate: ConfirmationGate<Cursor<String>, Vec<u8>>) -> String {
        String::from_utf8(gate.into_output()).unwrap()
    }
}
