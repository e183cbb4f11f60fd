//! In-memory store with the same uniqueness rules as the PostgreSQL schema.

use async_trait::async_trait;
use drover_core::{Build, BuildExecutable, Log, Pipeline, Repo, ResourceId, Service, Step, User, Worker};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::repo::{
    BuildFilter, BuildRepo, ExecutableRepo, LogRepo, PipelineRepo, RepoRepo, ServiceRepo, StepRepo,
    UserRepo, WorkerRepo,
};
use crate::{DbError, DbResult};

#[derive(Default)]
struct Tables {
    builds: HashMap<ResourceId, Build>,
    steps: HashMap<ResourceId, Step>,
    services: HashMap<ResourceId, Service>,
    logs: HashMap<ResourceId, Log>,
    pipelines: HashMap<ResourceId, Pipeline>,
    executables: HashMap<ResourceId, BuildExecutable>,
    repos: HashMap<ResourceId, Repo>,
    users: HashMap<ResourceId, User>,
    workers: HashMap<String, Worker>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T>(items: Vec<T>, page: i64, per_page: i64) -> Vec<T> {
    let skip = ((page.max(1) - 1) * per_page).max(0) as usize;
    items.into_iter().skip(skip).take(per_page.max(0) as usize).collect()
}

#[async_trait]
impl BuildRepo for MemoryStore {
    async fn create(&self, build: &Build) -> DbResult<Build> {
        let mut t = self.tables.write().await;
        if t.builds.contains_key(&build.id)
            || t
                .builds
                .values()
                .any(|b| b.repo_id == build.repo_id && b.number == build.number)
        {
            return Err(DbError::Duplicate(format!(
                "build {} for repo {}",
                build.number, build.repo_id
            )));
        }
        t.builds.insert(build.id, build.clone());
        Ok(build.clone())
    }

    async fn update(&self, build: &Build) -> DbResult<Build> {
        let mut t = self.tables.write().await;
        let Some(existing) = t.builds.get_mut(&build.id) else {
            return Err(DbError::NotFound(format!("build {}", build.id)));
        };
        *existing = build.clone();
        Ok(build.clone())
    }

    async fn get(&self, id: ResourceId) -> DbResult<Build> {
        self.tables
            .read()
            .await
            .builds
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))
    }

    async fn get_for_repo(&self, repo_id: ResourceId, number: i64) -> DbResult<Build> {
        self.tables
            .read()
            .await
            .builds
            .values()
            .find(|b| b.repo_id == repo_id && b.number == number)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("build {} for repo {}", number, repo_id)))
    }

    async fn delete(&self, id: ResourceId) -> DbResult<()> {
        let mut t = self.tables.write().await;
        t.builds.remove(&id);
        t.steps.retain(|_, s| s.build_id != id);
        t.services.retain(|_, s| s.build_id != id);
        t.logs.retain(|_, l| l.build_id != id);
        t.executables.retain(|_, e| e.build_id != id);
        Ok(())
    }

    async fn count_for_repo(&self, repo_id: ResourceId, filter: &BuildFilter) -> DbResult<i64> {
        let t = self.tables.read().await;
        let count = t
            .builds
            .values()
            .filter(|b| b.repo_id == repo_id && filter.matches(b))
            .count();
        Ok(count as i64)
    }

    async fn list_for_repo(
        &self,
        repo_id: ResourceId,
        filter: &BuildFilter,
        page_no: i64,
        per_page: i64,
    ) -> DbResult<Vec<Build>> {
        let t = self.tables.read().await;
        let mut builds: Vec<Build> = t
            .builds
            .values()
            .filter(|b| b.repo_id == repo_id && filter.matches(b))
            .cloned()
            .collect();
        builds.sort_by(|a, b| b.number.cmp(&a.number));
        Ok(page(builds, page_no, per_page))
    }

    async fn list_for_org(
        &self,
        org: &str,
        filter: &BuildFilter,
        page_no: i64,
        per_page: i64,
    ) -> DbResult<Vec<Build>> {
        let t = self.tables.read().await;
        let mut builds: Vec<Build> = t
            .builds
            .values()
            .filter(|b| {
                t.repos.get(&b.repo_id).is_some_and(|r| r.org == org) && filter.matches(b)
            })
            .cloned()
            .collect();
        builds.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));
        Ok(page(builds, page_no, per_page))
    }
}

#[async_trait]
impl StepRepo for MemoryStore {
    async fn create(&self, step: &Step) -> DbResult<Step> {
        let mut t = self.tables.write().await;
        if t
            .steps
            .values()
            .any(|s| s.build_id == step.build_id && s.number == step.number)
        {
            return Err(DbError::Duplicate(format!(
                "step {} for build {}",
                step.number, step.build_id
            )));
        }
        t.steps.insert(step.id, step.clone());
        Ok(step.clone())
    }

    async fn update(&self, step: &Step) -> DbResult<Step> {
        let mut t = self.tables.write().await;
        let Some(existing) = t.steps.get_mut(&step.id) else {
            return Err(DbError::NotFound(format!("step {}", step.id)));
        };
        *existing = step.clone();
        Ok(step.clone())
    }

    async fn list_for_build(&self, build_id: ResourceId) -> DbResult<Vec<Step>> {
        let t = self.tables.read().await;
        let mut steps: Vec<Step> = t
            .steps
            .values()
            .filter(|s| s.build_id == build_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.number);
        Ok(steps)
    }
}

#[async_trait]
impl ServiceRepo for MemoryStore {
    async fn create(&self, service: &Service) -> DbResult<Service> {
        let mut t = self.tables.write().await;
        if t
            .services
            .values()
            .any(|s| s.build_id == service.build_id && s.number == service.number)
        {
            return Err(DbError::Duplicate(format!(
                "service {} for build {}",
                service.number, service.build_id
            )));
        }
        t.services.insert(service.id, service.clone());
        Ok(service.clone())
    }

    async fn update(&self, service: &Service) -> DbResult<Service> {
        let mut t = self.tables.write().await;
        let Some(existing) = t.services.get_mut(&service.id) else {
            return Err(DbError::NotFound(format!("service {}", service.id)));
        };
        *existing = service.clone();
        Ok(service.clone())
    }

    async fn list_for_build(&self, build_id: ResourceId) -> DbResult<Vec<Service>> {
        let t = self.tables.read().await;
        let mut services: Vec<Service> = t
            .services
            .values()
            .filter(|s| s.build_id == build_id)
            .cloned()
            .collect();
        services.sort_by_key(|s| s.number);
        Ok(services)
    }
}

#[async_trait]
impl LogRepo for MemoryStore {
    async fn create(&self, log: &Log) -> DbResult<Log> {
        self.tables.write().await.logs.insert(log.id, log.clone());
        Ok(log.clone())
    }

    async fn get_for_step(&self, step_id: ResourceId) -> DbResult<Log> {
        self.tables
            .read()
            .await
            .logs
            .values()
            .find(|l| l.step_id == Some(step_id))
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("log for step {}", step_id)))
    }

    async fn get_for_service(&self, service_id: ResourceId) -> DbResult<Log> {
        self.tables
            .read()
            .await
            .logs
            .values()
            .find(|l| l.service_id == Some(service_id))
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("log for service {}", service_id)))
    }
}

#[async_trait]
impl PipelineRepo for MemoryStore {
    async fn create(&self, pipeline: &Pipeline) -> DbResult<Pipeline> {
        let mut t = self.tables.write().await;
        if t
            .pipelines
            .values()
            .any(|p| p.repo_id == pipeline.repo_id && p.commit == pipeline.commit)
        {
            return Err(DbError::Duplicate(format!(
                "pipeline for commit {}",
                pipeline.commit
            )));
        }
        t.pipelines.insert(pipeline.id, pipeline.clone());
        Ok(pipeline.clone())
    }

    async fn get_for_repo(&self, repo_id: ResourceId, commit: &str) -> DbResult<Pipeline> {
        self.tables
            .read()
            .await
            .pipelines
            .values()
            .find(|p| p.repo_id == repo_id && p.commit == commit)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("pipeline for commit {}", commit)))
    }
}

#[async_trait]
impl ExecutableRepo for MemoryStore {
    async fn create(&self, executable: &BuildExecutable) -> DbResult<()> {
        let mut t = self.tables.write().await;
        if t.executables.contains_key(&executable.build_id) {
            return Err(DbError::Duplicate(format!(
                "executable for build {}",
                executable.build_id
            )));
        }
        t.executables.insert(executable.build_id, executable.clone());
        Ok(())
    }

    async fn pop(&self, build_id: ResourceId) -> DbResult<BuildExecutable> {
        self.tables
            .write()
            .await
            .executables
            .remove(&build_id)
            .ok_or_else(|| DbError::NotFound(format!("executable for build {}", build_id)))
    }
}

#[async_trait]
impl RepoRepo for MemoryStore {
    async fn create(&self, repo: &Repo) -> DbResult<Repo> {
        let mut t = self.tables.write().await;
        if t
            .repos
            .values()
            .any(|r| r.org == repo.org && r.name == repo.name)
        {
            return Err(DbError::Duplicate(format!("repo {}", repo.full_name)));
        }
        t.repos.insert(repo.id, repo.clone());
        Ok(repo.clone())
    }

    async fn get(&self, id: ResourceId) -> DbResult<Repo> {
        self.tables
            .read()
            .await
            .repos
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("repo {}", id)))
    }

    async fn get_for_org(&self, org: &str, name: &str) -> DbResult<Repo> {
        self.tables
            .read()
            .await
            .repos
            .values()
            .find(|r| r.org == org && r.name == name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("repo {}/{}", org, name)))
    }

    async fn update(&self, repo: &Repo) -> DbResult<Repo> {
        let mut t = self.tables.write().await;
        let Some(existing) = t.repos.get_mut(&repo.id) else {
            return Err(DbError::NotFound(format!("repo {}", repo.id)));
        };
        let counter = existing.counter;
        *existing = repo.clone();
        existing.counter = counter;
        Ok(existing.clone())
    }

    async fn increment_counter(&self, id: ResourceId, expected: i64) -> DbResult<Repo> {
        let mut t = self.tables.write().await;
        let Some(repo) = t.repos.get_mut(&id) else {
            return Err(DbError::NotFound(format!("repo {}", id)));
        };
        if repo.counter != expected {
            return Err(DbError::Conflict(format!(
                "counter of repo {} moved past {}",
                id, expected
            )));
        }
        repo.counter += 1;
        Ok(repo.clone())
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn create(&self, user: &User) -> DbResult<User> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.name == user.name) {
            return Err(DbError::Duplicate(format!("user {}", user.name)));
        }
        t.users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn get(&self, id: ResourceId) -> DbResult<User> {
        self.tables
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("user {}", id)))
    }

    async fn get_by_name(&self, name: &str) -> DbResult<User> {
        self.tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.name == name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("user {}", name)))
    }
}

#[async_trait]
impl WorkerRepo for MemoryStore {
    async fn upsert(&self, worker: &Worker) -> DbResult<Worker> {
        self.tables
            .write()
            .await
            .workers
            .insert(worker.hostname.clone(), worker.clone());
        Ok(worker.clone())
    }

    async fn get_by_hostname(&self, hostname: &str) -> DbResult<Worker> {
        self.tables
            .read()
            .await
            .workers
            .get(hostname)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("worker {}", hostname)))
    }

    async fn list(&self) -> DbResult<Vec<Worker>> {
        let t = self.tables.read().await;
        let mut workers: Vec<Worker> = t.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        Ok(workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::BuildStatus;

    fn build(repo_id: ResourceId, number: i64, status: BuildStatus) -> Build {
        Build {
            repo_id,
            number,
            status,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_build_number_unique_per_repo() {
        let store = MemoryStore::new();
        let repo_id = ResourceId::new();

        BuildRepo::create(&store, &build(repo_id, 1, BuildStatus::Pending))
            .await
            .unwrap();
        let err = BuildRepo::create(&store, &build(repo_id, 1, BuildStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Duplicate(_)));

        BuildRepo::create(&store, &build(ResourceId::new(), 1, BuildStatus::Pending))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let store = MemoryStore::new();
        let repo_id = ResourceId::new();
        for (n, status) in [
            BuildStatus::Pending,
            BuildStatus::Running,
            BuildStatus::Success,
            BuildStatus::PendingApproval,
        ]
        .into_iter()
        .enumerate()
        {
            BuildRepo::create(&store, &build(repo_id, n as i64 + 1, status))
                .await
                .unwrap();
        }

        let active = BuildFilter::with_statuses(&[BuildStatus::Pending, BuildStatus::Running]);
        assert_eq!(store.count_for_repo(repo_id, &active).await.unwrap(), 2);
        assert_eq!(
            store
                .count_for_repo(repo_id, &BuildFilter::default())
                .await
                .unwrap(),
            4
        );

        let listed = store
            .list_for_repo(repo_id, &BuildFilter::default(), 1, 3)
            .await
            .unwrap();
        assert_eq!(
            listed.iter().map(|b| b.number).collect::<Vec<_>>(),
            vec![4, 3, 2]
        );
    }

    #[tokio::test]
    async fn test_counter_compare_and_swap() {
        let store = MemoryStore::new();
        let repo = Repo::new(ResourceId::new(), "octo", "widgets");
        RepoRepo::create(&store, &repo).await.unwrap();

        let bumped = store.increment_counter(repo.id, 0).await.unwrap();
        assert_eq!(bumped.counter, 1);

        let err = store.increment_counter(repo.id, 0).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_executable_pops_once() {
        let store = MemoryStore::new();
        let build_id = ResourceId::new();
        ExecutableRepo::create(
            &store,
            &BuildExecutable {
                id: ResourceId::new(),
                build_id,
                data: b"{}".to_vec(),
            },
        )
        .await
        .unwrap();

        assert_eq!(store.pop(build_id).await.unwrap().data, b"{}");
        assert!(store.pop(build_id).await.unwrap_err().is_not_found());
    }
}
