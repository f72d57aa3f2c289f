use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use crate::definition::{DefinitionSet, Profile, RawDefinition};
use crate::dynamo_definition_store::Item;
use crate::error::ReconcilerError;
use crate::event::ResourceProperties;

static DEFAULT_CATALOG: Lazy<Result<DefinitionSet, String>> = Lazy::new(|| {
    serde_json::from_str::<BTreeMap<String, RawDefinition>>(include_str!(
        "../resources/default_alarms.json"
    ))
    .map(DefinitionSet::from_raw)
    .map_err(|error| error.to_string())
});

/// The alarm definitions bundled with the function.
pub fn default_catalog() -> Result<&'static DefinitionSet, ReconcilerError> {
    DEFAULT_CATALOG
        .as_ref()
        .map_err(|error| ReconcilerError::Config(format!("default alarm catalog: {}", error)))
}

/// Profile to seed: the configured default, overridden per resource property.
pub fn seed_profile(default: &Profile, properties: &ResourceProperties) -> Profile {
    let pick = |value: &Option<String>, fallback: &str| {
        value
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(fallback)
            .to_string()
    };
    Profile::new(
        pick(&properties.application_name, &default.name),
        pick(&properties.application_type, &default.kind),
    )
}

/// The table item seeding `profile` with `catalog`.
///
/// Rendering is deterministic, so seeding the same profile twice writes the
/// same item to the same key.
pub fn seed_item(profile: &Profile, catalog: &DefinitionSet) -> Item {
    catalog.to_item(profile)
}

/// Stable resource id, so CloudFormation never sees a replacement on re-runs.
pub fn physical_resource_id(profile: &Profile) -> String {
    format!("default-alarms-{}", profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ComparisonOperator, Statistic};

    #[test]
    fn test_default_catalog_is_valid() {
        let catalog = default_catalog().unwrap();

        assert!(catalog.malformed.is_empty());
        assert_eq!(catalog.len(), 3);

        let cpu = &catalog.definitions[0];
        assert_eq!(cpu.key, "cpu_util");
        assert_eq!(cpu.metric_name, "CPUUtilization");
        assert_eq!(cpu.comparison_operator, ComparisonOperator::GreaterThanThreshold);
        assert_eq!(cpu.threshold, 20.0);
        assert_eq!(cpu.period, 300);
        assert_eq!(cpu.evaluation_periods, 1);
        assert_eq!(cpu.statistic, Statistic::Average);
        assert!(cpu.actions_enabled);
    }

    #[test]
    fn test_seed_profile_overrides() {
        let default = Profile::new("app", "dev");

        assert_eq!(seed_profile(&default, &ResourceProperties::default()), default);
        assert_eq!(
            seed_profile(
                &default,
                &ResourceProperties {
                    application_name: Some("web".to_string()),
                    application_type: Some(" ".to_string()),
                }
            ),
            Profile::new("web", "dev")
        );
    }

    #[test]
    fn test_seed_item_is_deterministic() {
        let profile = Profile::new("app", "dev");
        let catalog = default_catalog().unwrap();

        let first = seed_item(&profile, catalog);
        assert_eq!(first, seed_item(&profile, catalog));
        assert_eq!(DefinitionSet::from_item(&first).unwrap(), *catalog);
    }

    #[test]
    fn test_physical_resource_id() {
        assert_eq!(
            physical_resource_id(&Profile::new("app", "dev")),
            "default-alarms-app-dev"
        );
    }
}
