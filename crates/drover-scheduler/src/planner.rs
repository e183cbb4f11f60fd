//! Expands a compiled plan into persisted build, service and step rows.

use drover_core::{Build, ExecutablePlan, Log, Repo, ScmClient, Service, Step, User};
use drover_db::Store;
use tracing::{debug, warn};

use crate::error::{DbContext, SchedulerError};

/// Rows created for a fully planned build.
#[derive(Debug, Clone)]
pub struct Planned {
    pub build: Build,
    pub services: Vec<Service>,
    pub steps: Vec<Step>,
}

/// A planning failure together with whatever was already created, so the
/// caller can clean it up.
#[derive(Debug)]
pub struct PlanError {
    pub build: Option<Build>,
    pub services: Vec<Service>,
    pub steps: Vec<Step>,
    pub source: SchedulerError,
}

impl PlanError {
    fn new(partial: Partial, source: SchedulerError) -> Self {
        Self {
            build: partial.build,
            services: partial.services,
            steps: partial.steps,
            source,
        }
    }
}

#[derive(Default)]
struct Partial {
    build: Option<Build>,
    services: Vec<Service>,
    steps: Vec<Step>,
}

/// Create the build row followed by one row per service and step, in
/// declaration order.
///
/// The environment each row exposes is merged into the matching plan
/// container, which is why the plan is borrowed mutably. Nothing is rolled
/// back on failure.
pub async fn plan_build(
    store: &Store,
    scm: &dyn ScmClient,
    plan: &mut ExecutablePlan,
    build: &Build,
    repo: &Repo,
    owner: &User,
) -> Result<Planned, PlanError> {
    let mut partial = Partial::default();

    let created = match store
        .builds
        .create(build)
        .await
        .context(|| format!("unable to create build {}/{}", repo.full_name, build.number))
    {
        Ok(b) => b,
        Err(e) => return Err(PlanError::new(partial, e)),
    };
    partial.build = Some(created.clone());

    for container in plan.services.iter_mut() {
        let mut service = Service::from_container(container, &created);
        container.environment.extend(service.environment());
        service.environment = container.environment.clone();

        if let Err(e) = store
            .services
            .create(&service)
            .await
            .context(|| format!("unable to create service {} for build {}/{}", service.name, repo.full_name, created.number))
        {
            return Err(PlanError::new(partial, e));
        }
        partial.services.push(service.clone());

        if let Err(e) = store
            .logs
            .create(&Log::for_service(&service))
            .await
            .context(|| format!("unable to create log for service {}", service.name))
        {
            return Err(PlanError::new(partial, e));
        }
    }

    let stages: Vec<(String, &mut Vec<_>)> = plan
        .stages
        .iter_mut()
        .map(|stage| (stage.name.clone(), &mut stage.steps))
        .chain(std::iter::once((String::new(), &mut plan.steps)))
        .collect();

    for (stage, containers) in stages {
        for container in containers.iter_mut() {
            let mut step = Step::from_container(container, &created, &stage);

            if let Some(context) = step.report_as.clone() {
                match scm.create_check(owner, &created, &context, repo).await {
                    Ok(id) => step.check_id = Some(id),
                    Err(e) => {
                        warn!(step = %step.name, context = %context, error = %e, "Unable to create check");
                    }
                }
            }

            container.environment.extend(step.environment());
            step.environment = container.environment.clone();

            if let Err(e) = store
                .steps
                .create(&step)
                .await
                .context(|| format!("unable to create step {} for build {}/{}", step.name, repo.full_name, created.number))
            {
                return Err(PlanError::new(partial, e));
            }
            partial.steps.push(step.clone());

            if let Err(e) = store
                .logs
                .create(&Log::for_step(&step))
                .await
                .context(|| format!("unable to create log for step {}", step.name))
            {
                return Err(PlanError::new(partial, e));
            }
        }
    }

    debug!(
        repo = %repo.full_name,
        build = created.number,
        services = partial.services.len(),
        steps = partial.steps.len(),
        "Planned build"
    );

    Ok(Planned {
        build: created,
        services: partial.services,
        steps: partial.steps,
    })
}
