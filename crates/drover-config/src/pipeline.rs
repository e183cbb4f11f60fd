//! Pipeline definition parsing (`.drover.kdl`).

use drover_core::{Action, Event, WorkerAffinity};
use kdl::{KdlDocument, KdlNode};
use std::collections::{HashMap, HashSet};

use crate::kdl_ext::{all_string_args, env_block, first_string_arg, string_list_prop, string_prop};
use crate::rules::Ruleset;
use crate::{ConfigError, ConfigResult};

/// A parsed pipeline before rules are evaluated for a build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineDefinition {
    pub version: String,
    pub worker: WorkerAffinity,
    pub env: HashMap<String, String>,
    pub services: Vec<ServiceDef>,
    pub stages: Vec<StageDef>,
    pub steps: Vec<StepDef>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDef {
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageDef {
    pub name: String,
    pub needs: Vec<String>,
    pub steps: Vec<StepDef>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepDef {
    pub name: String,
    pub image: String,
    pub commands: Vec<String>,
    pub env: HashMap<String, String>,
    pub report_as: Option<String>,
    pub when: Ruleset,
}

/// Parse a pipeline definition from KDL text.
pub fn parse_pipeline(kdl: &str) -> ConfigResult<PipelineDefinition> {
    let doc: KdlDocument = kdl.parse()?;
    let mut def = PipelineDefinition {
        version: "1".to_string(),
        ..Default::default()
    };

    for node in doc.nodes() {
        match node.name().value() {
            "version" => {
                def.version = first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("version".to_string()))?;
            }
            "worker" => {
                def.worker = WorkerAffinity {
                    flavor: string_prop(node, "flavor"),
                    platform: string_prop(node, "platform"),
                };
            }
            "env" => def.env.extend(env_block(node)),
            "service" => def.services.push(parse_service(node)?),
            "stage" => def.stages.push(parse_stage(node)?),
            "step" => def.steps.push(parse_step(node)?),
            _ => {} // Ignore unknown nodes
        }
    }

    if !def.stages.is_empty() && !def.steps.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "pipeline".to_string(),
            message: "stages and steps cannot both be declared at the top level".to_string(),
        });
    }
    if def.stages.is_empty() && def.steps.is_empty() {
        return Err(ConfigError::MissingField("stages or steps".to_string()));
    }

    check_unique(def.services.iter().map(|s| s.name.as_str()), "service")?;
    check_unique(def.stages.iter().map(|s| s.name.as_str()), "stage")?;
    check_unique(def.steps.iter().map(|s| s.name.as_str()), "step")?;
    for stage in &def.stages {
        check_unique(stage.steps.iter().map(|s| s.name.as_str()), "step")?;
    }

    check_needs(&def.stages)?;

    Ok(def)
}

fn check_unique<'a>(names: impl Iterator<Item = &'a str>, kind: &str) -> ConfigResult<()> {
    let mut seen = Vec::new();
    for name in names {
        if matches!(name, "init" | "clone") {
            return Err(ConfigError::InvalidValue {
                field: format!("{} name", kind),
                message: format!("'{}' is reserved", name),
            });
        }
        if seen.contains(&name) {
            return Err(ConfigError::Duplicate(format!("{} '{}'", kind, name)));
        }
        seen.push(name);
    }
    Ok(())
}

fn parse_service(node: &KdlNode) -> ConfigResult<ServiceDef> {
    let name = first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("service name".to_string()))?;

    let mut image = String::new();
    let mut env = HashMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "image" => image = first_string_arg(child).unwrap_or_default(),
                "env" => env.extend(env_block(child)),
                _ => {}
            }
        }
    }

    if image.is_empty() {
        return Err(ConfigError::MissingField(format!("image for service '{}'", name)));
    }

    Ok(ServiceDef { name, image, env })
}

fn parse_stage(node: &KdlNode) -> ConfigResult<StageDef> {
    let name = first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("stage name".to_string()))?;
    let needs = string_list_prop(node, "needs");

    let mut steps = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "step" {
                steps.push(parse_step(child)?);
            }
        }
    }

    if steps.is_empty() {
        return Err(ConfigError::MissingField(format!("steps for stage '{}'", name)));
    }

    Ok(StageDef { name, needs, steps })
}

fn parse_step(node: &KdlNode) -> ConfigResult<StepDef> {
    let name = first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("step name".to_string()))?;

    let mut step = StepDef {
        name,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "image" => step.image = first_string_arg(child).unwrap_or_default(),
                "run" => {
                    if let Some(cmd) = first_string_arg(child) {
                        step.commands.push(cmd);
                    }
                }
                "env" => step.env.extend(env_block(child)),
                "report-as" => step.report_as = first_string_arg(child),
                "when" => step.when = parse_ruleset(child)?,
                _ => {}
            }
        }
    }

    if step.image.is_empty() {
        return Err(ConfigError::MissingField(format!("image for step '{}'", step.name)));
    }

    Ok(step)
}

fn parse_ruleset(node: &KdlNode) -> ConfigResult<Ruleset> {
    let mut rules = Ruleset::default();
    let Some(children) = node.children() else {
        return Ok(rules);
    };

    for child in children.nodes() {
        let values = all_string_args(child);
        match child.name().value() {
            "event" => {
                for value in values {
                    rules.events.push(value.parse::<Event>().map_err(|message| {
                        ConfigError::InvalidValue {
                            field: "when.event".to_string(),
                            message,
                        }
                    })?);
                }
            }
            "action" => {
                for value in values {
                    rules.actions.push(value.parse::<Action>().map_err(|message| {
                        ConfigError::InvalidValue {
                            field: "when.action".to_string(),
                            message,
                        }
                    })?);
                }
            }
            "branch" => rules.branches.extend(values),
            "path" => rules.paths.extend(values),
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "when".to_string(),
                    message: format!("unknown rule '{}'", other),
                });
            }
        }
    }

    Ok(rules)
}

/// Every `needs` entry names a stage, and the stages can be ordered so each
/// runs after the ones it needs.
fn check_needs(stages: &[StageDef]) -> ConfigResult<()> {
    let known: HashSet<&str> = stages.iter().map(|s| s.name.as_str()).collect();
    if let Some((stage, dep)) = stages
        .iter()
        .flat_map(|s| s.needs.iter().map(move |n| (s, n)))
        .find(|(_, n)| !known.contains(n.as_str()))
    {
        return Err(ConfigError::InvalidReference(format!(
            "stage '{}' needs unknown stage '{}'",
            stage.name, dep
        )));
    }

    // Peel off stages whose needs are already placed; whatever remains waits on itself.
    let mut placed: HashSet<&str> = HashSet::with_capacity(stages.len());
    let mut remaining: Vec<&StageDef> = stages.iter().collect();
    loop {
        let before = remaining.len();
        remaining.retain(|&stage| {
            if stage.needs.iter().all(|n| placed.contains(n.as_str())) {
                placed.insert(stage.name.as_str());
                false
            } else {
                true
            }
        });
        if remaining.is_empty() {
            return Ok(());
        }
        if remaining.len() == before {
            let names: Vec<&str> = remaining.iter().map(|s| s.name.as_str()).collect();
            return Err(ConfigError::CycleDetected(names.join(", ")));
        }
    }
}
