//! Compiler turning `.drover.kdl` definitions into executable plans.

use chrono::Utc;
use drover_core::{
    CompileContext, Compiled, Compiler, Container, Error, ExecutablePlan, Pipeline, PipelineType,
    PlanStage, ResourceId,
};
use std::collections::HashMap;

use crate::pipeline::{PipelineDefinition, StepDef, parse_pipeline};
use crate::rules::RuleData;
use crate::ConfigResult;

const INIT: &str = "init";
const CLONE: &str = "clone";

/// Compiles KDL pipelines, injecting `init` and `clone` ahead of user steps.
#[derive(Debug, Clone)]
pub struct KdlCompiler {
    clone_image: String,
}

impl KdlCompiler {
    pub fn new(clone_image: impl Into<String>) -> Self {
        Self {
            clone_image: clone_image.into(),
        }
    }

    fn build_plan(&self, def: &PipelineDefinition, ctx: &CompileContext) -> ConfigResult<ExecutablePlan> {
        let build = &ctx.build;
        let (org, name) = ctx
            .repo
            .as_ref()
            .map(|r| (r.org.as_str(), r.name.as_str()))
            .unwrap_or(("", ""));
        let prefix = format!("{}_{}_{}", org, name, build.number);

        let mut environment = def.env.clone();
        environment.extend(build_environment(ctx));

        let rules = RuleData {
            event: build.event,
            action: build.event_action,
            branch: &build.branch,
            files: &ctx.files,
        };

        let mut plan = ExecutablePlan {
            id: prefix.clone(),
            version: def.version.clone(),
            worker: def.worker.clone(),
            environment: environment.clone(),
            ..Default::default()
        };

        for (idx, service) in def.services.iter().enumerate() {
            let mut env = environment.clone();
            env.extend(service.env.clone());
            plan.services.push(Container {
                id: format!("service_{}_{}", prefix, service.name),
                number: idx as i64 + 1,
                name: service.name.clone(),
                image: service.image.clone(),
                commands: Vec::new(),
                environment: env,
                report_as: None,
                detach: true,
            });
        }

        let mut number = 0;
        let mut next = |def: &StepDef| {
            number += 1;
            let mut env = environment.clone();
            env.extend(def.env.clone());
            Container {
                id: format!("step_{}_{}", prefix, def.name),
                number,
                name: def.name.clone(),
                image: def.image.clone(),
                commands: def.commands.clone(),
                environment: env,
                report_as: def.report_as.clone(),
                detach: false,
            }
        };

        let init = next(&StepDef {
            name: INIT.to_string(),
            image: "#init".to_string(),
            ..Default::default()
        });
        let clone = next(&StepDef {
            name: CLONE.to_string(),
            image: self.clone_image.clone(),
            ..Default::default()
        });

        if def.stages.is_empty() {
            plan.steps.push(init);
            plan.steps.push(clone);
            for step in &def.steps {
                if step.when.matches(&rules)? {
                    plan.steps.push(next(step));
                }
            }
            return Ok(plan);
        }

        plan.stages.push(PlanStage {
            name: INIT.to_string(),
            needs: Vec::new(),
            steps: vec![init],
        });
        plan.stages.push(PlanStage {
            name: CLONE.to_string(),
            needs: vec![INIT.to_string()],
            steps: vec![clone],
        });
        for stage in &def.stages {
            let mut steps = Vec::new();
            for step in &stage.steps {
                if step.when.matches(&rules)? {
                    steps.push(next(step));
                }
            }
            if steps.is_empty() {
                continue;
            }
            let needs = if stage.needs.is_empty() {
                vec![CLONE.to_string()]
            } else {
                stage.needs.clone()
            };
            plan.stages.push(PlanStage {
                name: stage.name.clone(),
                needs,
                steps,
            });
        }

        Ok(plan)
    }
}

impl Default for KdlCompiler {
    fn default() -> Self {
        Self::new("alpine/git:latest")
    }
}

impl Compiler for KdlCompiler {
    fn compile(&self, raw: &[u8], ctx: &CompileContext) -> drover_core::Result<Compiled> {
        let pipeline_type = ctx
            .build
            .pipeline_type
            .or_else(|| ctx.repo.as_ref().map(|r| r.pipeline_type))
            .unwrap_or_default();
        if pipeline_type != PipelineType::Kdl {
            return Err(Error::Compile(format!(
                "unsupported pipeline type: {}",
                pipeline_type
            )));
        }

        let text = std::str::from_utf8(raw)
            .map_err(|e| Error::Compile(format!("pipeline is not valid UTF-8: {}", e)))?;
        let def = parse_pipeline(text).map_err(|e| Error::Compile(e.to_string()))?;
        let plan = self
            .build_plan(&def, ctx)
            .map_err(|e| Error::Compile(e.to_string()))?;

        let pipeline = Pipeline {
            id: ResourceId::new(),
            repo_id: ctx.build.repo_id,
            commit: ctx.commit.clone(),
            git_ref: ctx.build.git_ref.clone(),
            pipeline_type,
            version: def.version.clone(),
            data: raw.to_vec(),
            created: Utc::now(),
        };

        Ok(Compiled { plan, pipeline })
    }
}

fn build_environment(ctx: &CompileContext) -> HashMap<String, String> {
    let build = &ctx.build;
    let mut env = HashMap::from([
        ("CI".to_string(), "true".to_string()),
        ("DROVER".to_string(), "true".to_string()),
        ("DROVER_BUILD_NUMBER".to_string(), build.number.to_string()),
        ("DROVER_BUILD_COMMIT".to_string(), ctx.commit.clone()),
        ("DROVER_BUILD_BRANCH".to_string(), build.branch.clone()),
        ("DROVER_BUILD_REF".to_string(), build.git_ref.clone()),
        ("DROVER_BUILD_EVENT".to_string(), build.event.to_string()),
        ("DROVER_BUILD_SENDER".to_string(), build.sender.clone()),
        ("DROVER_ADDR".to_string(), ctx.metadata.server_address.clone()),
    ]);
    if let Some(action) = build.event_action {
        env.insert("DROVER_BUILD_EVENT_ACTION".to_string(), action.to_string());
    }
    if let Some(repo) = &ctx.repo {
        env.insert("DROVER_REPO_FULL_NAME".to_string(), repo.full_name.clone());
        env.insert("DROVER_REPO_CLONE".to_string(), repo.clone_url.clone());
    }
    if !ctx.comment.is_empty() {
        env.insert("DROVER_BUILD_COMMENT".to_string(), ctx.comment.clone());
    }
    env
}
