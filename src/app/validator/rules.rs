//! Checks that span several fields of one resource and run after the walk.

use std::collections::{BTreeMap, HashSet};

use crate::domain::resource::Resource;
use crate::domain::schema::Fields;
use crate::domain::{Feedback, SqlValue, TableTree};
use crate::error::EngineError;

/// Mode-specific rules over a resource whose fields are individually valid.
///
/// `tree` is the projection the walk produced, so values the walk derives
/// (media kinds, formats) are visible here.
pub trait ResourceRules: Send + Sync {
    fn check(&self, resource: &Resource, tree: &TableTree, editor: &Fields) -> Result<Feedback, EngineError>;
}

/// Talent profiles: each advertised skill appears once, its examples are of
/// the kind the skill allows and there are exactly as many as the example
/// field repeats.
#[derive(Debug, Clone, Copy, Default)]
pub struct TalentRules;

const SKILL_KEY: &str = "advertised.skill";
const EXAMPLE_KEY: &str = "advertised.example";

impl ResourceRules for TalentRules {
    fn check(&self, resource: &Resource, tree: &TableTree, editor: &Fields) -> Result<Feedback, EngineError> {
        let mut fb = Feedback::new();
        let skills = editor.field("project.role.skill")?;
        let examples = editor.field(EXAMPLE_KEY)?;

        let resource_name = resource.name.to_lowercase();
        let advertised_table = format!("{resource_name}_advertised");
        let example_table = format!("{advertised_table}_example");

        let mut seen = HashSet::new();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();

        for ad in tree.children.iter().filter(|c| c.name == advertised_table) {
            let skill = ad.get("skill").and_then(SqlValue::as_str).unwrap_or_default();
            if !seen.insert(skill.to_string()) {
                fb.add(SKILL_KEY, format!("Skill {skill:?} has duplicate(s)."));
                return Ok(fb);
            }
            let allowed = match skills.value_by_name(skill) {
                Ok(v) => v.data.as_str(),
                Err(_) => {
                    fb.add(SKILL_KEY, format!("Skill {skill:?} is not a known skill."));
                    return Ok(fb);
                }
            };

            let n = counts.entry(skill.to_string()).or_default();
            for ex in ad.children.iter().filter(|c| c.name == example_table) {
                *n += 1;
                let kind = ex.get("kind").and_then(SqlValue::as_str).unwrap_or_default();
                if kind != allowed {
                    fb.add(
                        EXAMPLE_KEY,
                        format!("Skill {skill:?} only allows kind {allowed:?}, got {kind:?}."),
                    );
                    return Ok(fb);
                }
            }
        }

        for (skill, n) in counts {
            if n != examples.add {
                fb.add(
                    EXAMPLE_KEY,
                    format!("Example {skill:?} expected {} instances, got {n}.", examples.add),
                );
                return Ok(fb);
            }
        }
        Ok(fb)
    }
}
