use std::collections::BTreeMap;

use crate::definition::{AlarmDefinition, ComparisonOperator, DefinitionSet, Profile, Statistic};

/// Everything PutMetricAlarm needs for one instance/definition pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmSpec {
    pub alarm_name: String,
    pub instance_id: String,
    pub metric_name: String,
    pub namespace: String,
    pub comparison_operator: ComparisonOperator,
    pub threshold: f64,
    pub period: i64,
    pub evaluation_periods: i64,
    pub statistic: Statistic,
    pub actions_enabled: bool,
    pub description: Option<String>,
    pub alarm_actions: Vec<String>,
}

impl AlarmSpec {
    pub fn new(
        profile: &Profile,
        instance_id: &str,
        definition: &AlarmDefinition,
        alarm_actions: &[String],
    ) -> Self {
        AlarmSpec {
            alarm_name: profile.alarm_name(instance_id, &definition.metric_name),
            instance_id: instance_id.to_string(),
            metric_name: definition.metric_name.clone(),
            namespace: definition.namespace.clone(),
            comparison_operator: definition.comparison_operator,
            threshold: definition.threshold,
            period: definition.period,
            evaluation_periods: definition.evaluation_periods,
            statistic: definition.statistic,
            actions_enabled: definition.actions_enabled,
            description: definition.description.clone(),
            alarm_actions: alarm_actions.to_vec(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AlarmPlan {
    pub puts: Vec<AlarmSpec>,
    pub deletes: Vec<String>,
}

impl AlarmPlan {
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }
}

/// Converges one instance towards `desired`.
///
/// Every desired alarm is put (an upsert), and alarms of this instance whose
/// metric is no longer defined are deleted. Names that do not follow the
/// naming convention are left alone.
pub fn plan_instance(
    profile: &Profile,
    instance_id: &str,
    desired: &DefinitionSet,
    existing: &[String],
    alarm_actions: &[String],
) -> AlarmPlan {
    let puts = desired
        .definitions
        .iter()
        .map(|definition| AlarmSpec::new(profile, instance_id, definition, alarm_actions))
        .collect();

    let metrics = desired.retained_metrics();
    let deletes = existing
        .iter()
        .filter(|name| match profile.parse_alarm_name(name) {
            Some((instance, metric)) => {
                instance == instance_id && !metrics.contains(metric.as_str())
            }
            None => false,
        })
        .cloned()
        .collect();

    AlarmPlan { puts, deletes }
}

/// Groups a profile's alarm names by the instance encoded in them.
pub fn group_by_instance(
    profile: &Profile,
    existing: &[String],
) -> BTreeMap<String, Vec<String>> {
    let mut instances: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for name in existing {
        if let Some((instance_id, _)) = profile.parse_alarm_name(name) {
            instances.entry(instance_id).or_default().push(name.clone());
        }
    }
    instances
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::tests::{cpu_util_attributes, map, profile_item, s};

    fn desired() -> DefinitionSet {
        DefinitionSet::from_item(&profile_item(vec![
            ("cpu_util", cpu_util_attributes()),
            (
                "status_check",
                map(vec![
                    ("MetricName", s("StatusCheckFailed")),
                    ("ComparisonOperator", s("GreaterThanOrEqualToThreshold")),
                    ("Threshold", s("1")),
                    ("EvaluationPeriods", s("2")),
                    ("Period", s("60")),
                    ("Statistic", s("Maximum")),
                ]),
            ),
        ]))
        .unwrap()
    }

    #[test]
    fn test_plan_launch_puts_every_definition() {
        let profile = Profile::new("app", "dev");
        let topic = vec!["arn:aws:sns:ap-northeast-1:123456789012:alarms".to_string()];
        let plan = plan_instance(&profile, "i-abc123", &desired(), &[], &topic);

        assert!(plan.deletes.is_empty());
        assert_eq!(
            plan.puts[0],
            AlarmSpec {
                alarm_name: "app-dev-i-abc123-CPUUtilization".to_string(),
                instance_id: "i-abc123".to_string(),
                metric_name: "CPUUtilization".to_string(),
                namespace: "AWS/EC2".to_string(),
                comparison_operator: ComparisonOperator::GreaterThanThreshold,
                threshold: 20.0,
                period: 300,
                evaluation_periods: 1,
                statistic: Statistic::Average,
                actions_enabled: true,
                description: Some("CPU above 20%".to_string()),
                alarm_actions: topic.clone(),
            }
        );
        assert_eq!(plan.puts[1].alarm_name, "app-dev-i-abc123-StatusCheckFailed");
        assert_eq!(plan.puts[1].evaluation_periods, 2);
        assert!(!plan.puts[1].actions_enabled);
    }

    #[test]
    fn test_plan_deletes_only_undefined_metrics_of_the_instance() {
        let profile = Profile::new("app", "dev");
        let existing = vec![
            "app-dev-i-abc123-CPUUtilization".to_string(),
            "app-dev-i-abc123-NetworkIn".to_string(),
            "app-dev-i-def456-NetworkIn".to_string(),
            "app-dev-manual-alarm".to_string(),
        ];
        let plan = plan_instance(&profile, "i-abc123", &desired(), &existing, &[]);

        assert_eq!(plan.deletes, vec!["app-dev-i-abc123-NetworkIn".to_string()]);
        assert_eq!(plan.puts.len(), 2);
    }

    #[test]
    fn test_empty_desired_set_deletes_everything_owned() {
        let profile = Profile::new("app", "dev");
        let existing = vec![
            "app-dev-i-abc123-CPUUtilization".to_string(),
            "app-dev-i-abc123-StatusCheckFailed".to_string(),
        ];
        let plan = plan_instance(&profile, "i-abc123", &DefinitionSet::default(), &existing, &[]);

        assert!(plan.puts.is_empty());
        assert_eq!(plan.deletes, existing);
    }

    #[test]
    fn test_malformed_definition_keeps_its_alarm() {
        let profile = Profile::new("app", "dev");
        let desired = DefinitionSet::from_item(&profile_item(vec![
            ("cpu_util", cpu_util_attributes()),
            (
                "network_in",
                map(vec![("MetricName", s("NetworkIn")), ("Threshold", s("high"))]),
            ),
        ]))
        .unwrap();
        let existing = vec!["app-dev-i-abc123-NetworkIn".to_string()];
        let plan = plan_instance(&profile, "i-abc123", &desired, &existing, &[]);

        assert_eq!(plan.puts.len(), 1);
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_group_by_instance() {
        let profile = Profile::new("app", "dev");
        let grouped = group_by_instance(
            &profile,
            &[
                "app-dev-i-def456-CPUUtilization".to_string(),
                "app-dev-i-abc123-CPUUtilization".to_string(),
                "app-dev-i-abc123-NetworkIn".to_string(),
                "app-dev-not-an-instance".to_string(),
                "app-dev-i-abc-i-0123456789abcdef0-CPUUtilization".to_string(),
            ],
        );

        assert_eq!(grouped.len(), 2);
        assert_eq!(
            grouped["i-abc123"],
            vec![
                "app-dev-i-abc123-CPUUtilization".to_string(),
                "app-dev-i-abc123-NetworkIn".to_string()
            ]
        );
        assert_eq!(grouped["i-def456"], vec!["app-dev-i-def456-CPUUtilization".to_string()]);
    }
}
