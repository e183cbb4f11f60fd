//! Detection of builds whose pipeline left nothing but scaffolding.

use drover_core::ExecutablePlan;

/// Returns a message when no user-defined stage or step survived
/// compilation, meaning the build should be skipped.
pub fn skip_empty_build(plan: &ExecutablePlan) -> Option<String> {
    if !plan.stages.is_empty() {
        return scaffolding_only(&plan.stage_names())
            .map(|only| format!("skipping build since only {} stage found", only));
    }
    if !plan.steps.is_empty() {
        return scaffolding_only(&plan.step_names())
            .map(|only| format!("skipping build since only {} step found", only));
    }
    None
}

fn scaffolding_only(names: &[&str]) -> Option<&'static str> {
    match names {
        ["init"] => Some("init"),
        ["init", "clone"] => Some("init and clone"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::{Container, PlanStage};

    fn stages(names: &[&str]) -> ExecutablePlan {
        ExecutablePlan {
            stages: names
                .iter()
                .map(|n| PlanStage {
                    name: n.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn steps(names: &[&str]) -> ExecutablePlan {
        ExecutablePlan {
            steps: names
                .iter()
                .map(|n| Container {
                    name: n.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_only_init_stage() {
        assert_eq!(
            skip_empty_build(&stages(&["init"])).as_deref(),
            Some("skipping build since only init stage found")
        );
    }

    #[test]
    fn test_init_and_clone_stages() {
        assert_eq!(
            skip_empty_build(&stages(&["init", "clone"])).as_deref(),
            Some("skipping build since only init and clone stage found")
        );
    }

    #[test]
    fn test_user_stage_is_not_skipped() {
        assert!(skip_empty_build(&stages(&["init", "clone", "foo"])).is_none());
        assert!(skip_empty_build(&stages(&["clone", "init"])).is_none());
    }

    #[test]
    fn test_steps() {
        assert_eq!(
            skip_empty_build(&steps(&["init"])).as_deref(),
            Some("skipping build since only init step found")
        );
        assert_eq!(
            skip_empty_build(&steps(&["init", "clone"])).as_deref(),
            Some("skipping build since only init and clone step found")
        );
        assert!(skip_empty_build(&steps(&["init", "clone", "test"])).is_none());
    }

    #[test]
    fn test_empty_plan_is_not_skipped() {
        assert!(skip_empty_build(&ExecutablePlan::default()).is_none());
    }
}
