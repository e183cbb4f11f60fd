//! Forced termination of a build that failed before or during enqueue.

use chrono::Utc;
use drover_core::{Build, BuildStatus, Service, Step};
use drover_db::Store;
use tracing::{error, warn};

/// Rows after cleanup, whether or not they could be persisted.
#[derive(Debug, Clone, Default)]
pub struct Cleaned {
    pub build: Option<Build>,
    pub services: Vec<Service>,
    pub steps: Vec<Step>,
}

/// Mark the build `error` and every step and service `killed`.
///
/// Runs from an already failing context, so persistence failures are
/// logged and the remaining rows are still processed.
pub async fn clean_build(
    store: &Store,
    build: Option<&Build>,
    services: &[Service],
    steps: &[Step],
    err: &(dyn std::fmt::Display + Sync),
) -> Cleaned {
    let now = Utc::now();
    let mut cleaned = Cleaned::default();

    if let Some(build) = build {
        let mut build = build.clone();
        build.status = BuildStatus::Error;
        build.error = Some(err.to_string());
        build.finished = Some(now);
        error!(build_id = %build.id, number = build.number, error = %err, "Cleaning failed build");

        if let Err(e) = store.builds.update(&build).await {
            warn!(build_id = %build.id, error = %e, "Unable to persist cleaned build");
        }
        cleaned.build = Some(build);
    }

    for service in services {
        let mut service = service.clone();
        service.status = BuildStatus::Killed;
        service.finished = Some(now);
        if let Err(e) = store.services.update(&service).await {
            warn!(service = %service.name, error = %e, "Unable to kill service");
        }
        cleaned.services.push(service);
    }

    for step in steps {
        let mut step = step.clone();
        step.status = BuildStatus::Killed;
        step.finished = Some(now);
        if let Err(e) = store.steps.update(&step).await {
            warn!(step = %step.name, error = %e, "Unable to kill step");
        }
        cleaned.steps.push(step);
    }

    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use crate::testing::{FailingStore, memory_store};
    use drover_core::{Container, ResourceId};

    fn rows(build: &Build) -> (Vec<Service>, Vec<Step>) {
        let services = (1..=2)
            .map(|n| {
                Service::from_container(
                    &Container {
                        number: n,
                        name: format!("svc-{}", n),
                        ..Default::default()
                    },
                    build,
                )
            })
            .collect();
        let steps = (1..=3)
            .map(|n| {
                Step::from_container(
                    &Container {
                        number: n,
                        name: format!("step-{}", n),
                        ..Default::default()
                    },
                    build,
                    "",
                )
            })
            .collect();
        (services, steps)
    }

    #[tokio::test]
    async fn test_clean_persists_terminal_states() {
        let store = memory_store();
        let build = Build {
            repo_id: ResourceId::new(),
            number: 1,
            ..Default::default()
        };
        store.builds.create(&build).await.unwrap();
        let (services, steps) = rows(&build);
        for s in &services {
            store.services.create(s).await.unwrap();
        }
        for s in &steps {
            store.steps.create(s).await.unwrap();
        }

        clean_build(&store, Some(&build), &services, &steps, &"queue unavailable").await;

        let stored = store.builds.get(build.id).await.unwrap();
        assert_eq!(stored.status, BuildStatus::Error);
        assert_eq!(stored.error.as_deref(), Some("queue unavailable"));
        assert!(stored.finished.is_some());
        for step in store.steps.list_for_build(build.id).await.unwrap() {
            assert_eq!(step.status, BuildStatus::Killed);
            assert!(step.finished.is_some());
        }
        for service in store.services.list_for_build(build.id).await.unwrap() {
            assert_eq!(service.status, BuildStatus::Killed);
        }
    }

    #[tokio::test]
    async fn test_clean_survives_every_update_failing() {
        let store = FailingStore::store();
        let build = Build::default();
        let (services, steps) = rows(&build);

        let cleaned = clean_build(&store, Some(&build), &services, &steps, &"boom").await;

        let cleaned_build = cleaned.build.unwrap();
        assert_eq!(cleaned_build.status, BuildStatus::Error);
        assert!(cleaned_build.finished.is_some());
        assert_eq!(cleaned.services.len(), 2);
        assert_eq!(cleaned.steps.len(), 3);
        assert!(
            cleaned
                .services
                .iter()
                .all(|s| s.status == BuildStatus::Killed && s.finished.is_some())
        );
        assert!(
            cleaned
                .steps
                .iter()
                .all(|s| s.status == BuildStatus::Killed && s.finished.is_some())
        );
    }

    #[tokio::test]
    async fn test_clean_runs_on_a_spawned_task() {
        let store = memory_store();
        let build = Build {
            repo_id: ResourceId::new(),
            number: 1,
            ..Default::default()
        };
        store.builds.create(&build).await.unwrap();
        let (services, steps) = rows(&build);
        let err = SchedulerError::Internal("route missing".to_string());
        let reason = err.to_string();

        let task = tokio::spawn({
            let store = store.clone();
            async move { clean_build(&store, Some(&build), &services, &steps, &err).await }
        });
        let cleaned = task.await.unwrap();

        let cleaned_build = cleaned.build.unwrap();
        assert_eq!(cleaned_build.status, BuildStatus::Error);
        let stored = store.builds.get(cleaned_build.id).await.unwrap();
        assert_eq!(stored.error, Some(reason));
    }
}
