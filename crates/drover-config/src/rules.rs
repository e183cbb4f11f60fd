//! `when` rulesets deciding whether a step runs for a given build.

use drover_core::{Action, Event};
use regex::Regex;

use crate::ConfigResult;

/// Conditions attached to a step. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ruleset {
    pub events: Vec<Event>,
    pub actions: Vec<Action>,
    pub branches: Vec<String>,
    pub paths: Vec<String>,
}

/// Facts about the build a ruleset is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct RuleData<'a> {
    pub event: Event,
    pub action: Option<Action>,
    pub branch: &'a str,
    pub files: &'a [String],
}

impl Ruleset {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.actions.is_empty()
            && self.branches.is_empty()
            && self.paths.is_empty()
    }

    pub fn matches(&self, data: &RuleData<'_>) -> ConfigResult<bool> {
        if !self.events.is_empty() && !self.events.contains(&data.event) {
            return Ok(false);
        }

        if !self.actions.is_empty() && !data.action.is_some_and(|a| self.actions.contains(&a)) {
            return Ok(false);
        }

        if !self.branches.is_empty() && !any_glob_matches(&self.branches, data.branch)? {
            return Ok(false);
        }

        if !self.paths.is_empty() {
            let mut hit = false;
            for file in data.files {
                if any_glob_matches(&self.paths, file)? {
                    hit = true;
                    break;
                }
            }
            if !hit {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

fn any_glob_matches(patterns: &[String], value: &str) -> ConfigResult<bool> {
    for pattern in patterns {
        if glob_to_regex(pattern)?.is_match(value) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Translate a glob into an anchored regex: `**` spans directories, `*`
/// stays within one path segment and `?` matches a single character.
pub fn glob_to_regex(pattern: &str) -> ConfigResult<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                re.push_str(".*");
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }

    re.push('$');
    Ok(Regex::new(&re)?)
}
