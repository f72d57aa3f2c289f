use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::TryFrom;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rusoto_dynamodb::AttributeValue;
use serde::{Deserialize, Serialize};

pub const NAME_KEY: &str = "Name";
pub const TYPE_KEY: &str = "Type";
pub const ALARMS_KEY: &str = "Alarms";
pub const DEFAULT_NAMESPACE: &str = "AWS/EC2";

/// The (Name, Type) pair selecting which definitions apply to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Profile {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Profile {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Profile {
            name: name.into(),
            kind: kind.into(),
        }
    }

    /// Prefix shared by every alarm of this profile.
    pub fn prefix(&self) -> String {
        format!("{}-{}-", self.name, self.kind)
    }

    /// Prefix shared by every alarm of one instance of this profile.
    pub fn instance_prefix(&self, instance_id: &str) -> String {
        format!("{}{}-", self.prefix(), instance_id)
    }

    pub fn alarm_name(&self, instance_id: &str, metric_name: &str) -> String {
        format!("{}{}", self.instance_prefix(instance_id), metric_name)
    }

    /// Splits an alarm name of this profile into (instance id, metric name).
    ///
    /// Returns `None` for names that do not follow the naming convention, so
    /// alarms that merely share the prefix are never touched. A metric part
    /// that itself starts with an instance id means the name belongs to a
    /// profile whose type ends in `-i-<hex>`, and is rejected as well.
    pub fn parse_alarm_name(&self, alarm_name: &str) -> Option<(String, String)> {
        let rest = alarm_name.strip_prefix(&self.prefix())?;
        let (instance_id, metric) = split_instance_id(rest)?;
        if metric.is_empty() || split_instance_id(metric).is_some() {
            return None;
        }
        Some((instance_id.to_string(), metric.to_string()))
    }

    /// Primary key of the profile's item in the definition table.
    pub fn key(&self) -> HashMap<String, AttributeValue> {
        let mut key = HashMap::new();
        key.insert(NAME_KEY.to_string(), string_attribute(&self.name));
        key.insert(TYPE_KEY.to_string(), string_attribute(&self.kind));
        key
    }

    pub fn from_key(key: &HashMap<String, AttributeValue>) -> Option<Self> {
        let name = key.get(NAME_KEY)?.s.clone()?;
        let kind = key.get(TYPE_KEY)?.s.clone()?;
        Some(Profile { name, kind })
    }
}

/// Splits `i-<hex>-<rest>` into (`i-<hex>`, `<rest>`).
fn split_instance_id(name: &str) -> Option<(&str, &str)> {
    let hex = name.strip_prefix("i-")?;
    let end = hex.find('-')?;
    if end == 0 || !hex[..end].chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some((&name[..end + 2], &name[end + 3..]))
}

impl Display for Profile {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    GreaterThanOrEqualToThreshold,
    GreaterThanThreshold,
    LessThanThreshold,
    LessThanOrEqualToThreshold,
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOperator::GreaterThanOrEqualToThreshold => "GreaterThanOrEqualToThreshold",
            ComparisonOperator::GreaterThanThreshold => "GreaterThanThreshold",
            ComparisonOperator::LessThanThreshold => "LessThanThreshold",
            ComparisonOperator::LessThanOrEqualToThreshold => "LessThanOrEqualToThreshold",
        }
    }
}

impl FromStr for ComparisonOperator {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "GreaterThanOrEqualToThreshold" => Ok(ComparisonOperator::GreaterThanOrEqualToThreshold),
            "GreaterThanThreshold" => Ok(ComparisonOperator::GreaterThanThreshold),
            "LessThanThreshold" => Ok(ComparisonOperator::LessThanThreshold),
            "LessThanOrEqualToThreshold" => Ok(ComparisonOperator::LessThanOrEqualToThreshold),
            other => Err(format!("unknown comparison operator {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    SampleCount,
    Average,
    Sum,
    Minimum,
    Maximum,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::SampleCount => "SampleCount",
            Statistic::Average => "Average",
            Statistic::Sum => "Sum",
            Statistic::Minimum => "Minimum",
            Statistic::Maximum => "Maximum",
        }
    }
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SampleCount" => Ok(Statistic::SampleCount),
            "Average" => Ok(Statistic::Average),
            "Sum" => Ok(Statistic::Sum),
            "Minimum" => Ok(Statistic::Minimum),
            "Maximum" => Ok(Statistic::Maximum),
            other => Err(format!("unknown statistic {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlarmDefinition {
    pub key: String,
    pub alarm_name: String,
    pub metric_name: String,
    pub namespace: String,
    pub comparison_operator: ComparisonOperator,
    pub threshold: f64,
    pub evaluation_periods: i64,
    pub period: i64,
    pub statistic: Statistic,
    pub actions_enabled: bool,
    pub description: Option<String>,
}

/// A definition that could not be used, with the reason it was rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MalformedDefinition {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    pub reason: String,
}

impl Display for MalformedDefinition {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "definition {:?}: {}", self.key, self.reason)
    }
}

/// Definition attributes as they are stored, before validation.
///
/// The table keeps every value as a string, the same shape as the bundled
/// default catalog.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawDefinition {
    pub alarm_name: Option<String>,
    pub metric_name: Option<String>,
    pub namespace: Option<String>,
    pub comparison_operator: Option<String>,
    pub threshold: Option<String>,
    pub evaluation_periods: Option<String>,
    pub period: Option<String>,
    pub statistic: Option<String>,
    pub actions_enabled: Option<String>,
    pub alarm_description: Option<String>,
}

impl RawDefinition {
    pub fn from_attributes(attributes: &HashMap<String, AttributeValue>) -> Self {
        let field = |name: &str| attributes.get(name).and_then(scalar_string);
        RawDefinition {
            alarm_name: field("AlarmName"),
            metric_name: field("MetricName"),
            namespace: field("Namespace"),
            comparison_operator: field("ComparisonOperator"),
            threshold: field("Threshold"),
            evaluation_periods: field("EvaluationPeriods"),
            period: field("Period"),
            statistic: field("Statistic"),
            actions_enabled: field("ActionsEnabled"),
            alarm_description: field("AlarmDescription"),
        }
    }
}

fn scalar_string(value: &AttributeValue) -> Option<String> {
    if let Some(s) = &value.s {
        return Some(s.clone());
    }
    if let Some(n) = &value.n {
        return Some(n.clone());
    }
    value.bool.map(|b| if b { "True" } else { "False" }.to_string())
}

fn string_attribute(value: &str) -> AttributeValue {
    AttributeValue {
        s: Some(value.to_string()),
        ..Default::default()
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing {}", field))
}

fn parse_period(value: &str) -> Result<i64, String> {
    let period: i64 = value
        .parse()
        .map_err(|_| format!("Period {:?} is not an integer", value))?;
    match period {
        10 | 30 => Ok(period),
        p if p >= 60 && p % 60 == 0 => Ok(period),
        p => Err(format!("Period {} must be 10, 30 or a multiple of 60", p)),
    }
}

impl TryFrom<(&str, RawDefinition)> for AlarmDefinition {
    type Error = MalformedDefinition;

    fn try_from((key, raw): (&str, RawDefinition)) -> Result<Self, Self::Error> {
        let metric = raw.metric_name.clone().filter(|m| !m.trim().is_empty());
        let malformed = |reason: String| MalformedDefinition {
            key: key.to_string(),
            metric_name: metric.clone(),
            reason,
        };

        let metric_name = required(&raw.metric_name, "MetricName").map_err(malformed)?;
        let comparison_operator = required(&raw.comparison_operator, "ComparisonOperator")
            .and_then(ComparisonOperator::from_str)
            .map_err(malformed)?;
        let threshold = required(&raw.threshold, "Threshold")
            .and_then(|v| {
                v.parse::<f64>()
                    .ok()
                    .filter(|t| t.is_finite())
                    .ok_or_else(|| format!("Threshold {:?} is not a number", v))
            })
            .map_err(malformed)?;
        let period = required(&raw.period, "Period")
            .and_then(parse_period)
            .map_err(malformed)?;
        let statistic = required(&raw.statistic, "Statistic")
            .and_then(Statistic::from_str)
            .map_err(malformed)?;
        let evaluation_periods = match raw.evaluation_periods.as_deref().map(str::trim) {
            None | Some("") => 1,
            Some(v) => v
                .parse::<i64>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| malformed(format!("EvaluationPeriods {:?} must be >= 1", v)))?,
        };
        let actions_enabled = raw
            .actions_enabled
            .as_deref()
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(AlarmDefinition {
            key: key.to_string(),
            alarm_name: raw
                .alarm_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| key.to_string()),
            metric_name: metric_name.to_string(),
            namespace: raw
                .namespace
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            comparison_operator,
            threshold,
            evaluation_periods,
            period,
            statistic,
            actions_enabled,
            description: raw.alarm_description.filter(|d| !d.is_empty()),
        })
    }
}

impl AlarmDefinition {
    pub fn to_attributes(&self) -> HashMap<String, AttributeValue> {
        let mut map = HashMap::new();
        map.insert("AlarmName".to_string(), string_attribute(&self.alarm_name));
        map.insert("MetricName".to_string(), string_attribute(&self.metric_name));
        map.insert("Namespace".to_string(), string_attribute(&self.namespace));
        map.insert(
            "ComparisonOperator".to_string(),
            string_attribute(self.comparison_operator.as_str()),
        );
        map.insert(
            "Threshold".to_string(),
            string_attribute(&self.threshold.to_string()),
        );
        map.insert(
            "EvaluationPeriods".to_string(),
            string_attribute(&self.evaluation_periods.to_string()),
        );
        map.insert("Period".to_string(), string_attribute(&self.period.to_string()));
        map.insert("Statistic".to_string(), string_attribute(self.statistic.as_str()));
        map.insert(
            "ActionsEnabled".to_string(),
            string_attribute(if self.actions_enabled { "True" } else { "False" }),
        );
        if let Some(description) = &self.description {
            map.insert("AlarmDescription".to_string(), string_attribute(description));
        }
        map
    }
}

/// Definitions of one profile, ordered by key, plus whatever was rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefinitionSet {
    pub definitions: Vec<AlarmDefinition>,
    pub malformed: Vec<MalformedDefinition>,
}

impl DefinitionSet {
    /// Validates raw definitions in key order; a metric may appear only once.
    pub fn from_raw(raw: BTreeMap<String, RawDefinition>) -> Self {
        let mut set = DefinitionSet::default();
        let mut metrics = HashSet::new();
        for (key, raw) in raw {
            match AlarmDefinition::try_from((key.as_str(), raw)) {
                Ok(definition) => {
                    if metrics.insert(definition.metric_name.clone()) {
                        set.definitions.push(definition);
                    } else {
                        set.malformed.push(MalformedDefinition {
                            reason: format!(
                                "metric {} is already used by another definition",
                                definition.metric_name
                            ),
                            metric_name: Some(definition.metric_name),
                            key,
                        });
                    }
                }
                Err(malformed) => set.malformed.push(malformed),
            }
        }
        set
    }

    /// Reads the `Alarms` map of a profile item (a table row or a stream image).
    ///
    /// Fails only when the item has no `Alarms` map at all; single broken
    /// definitions end up in `malformed`.
    pub fn from_item(
        item: &HashMap<String, AttributeValue>,
    ) -> Result<Self, MalformedDefinition> {
        let alarms = item
            .get(ALARMS_KEY)
            .and_then(|value| value.m.as_ref())
            .ok_or_else(|| MalformedDefinition {
                key: ALARMS_KEY.to_string(),
                metric_name: None,
                reason: "item has no Alarms map".to_string(),
            })?;

        let mut raw = BTreeMap::new();
        let mut not_maps = vec![];
        for (key, value) in alarms {
            match &value.m {
                Some(attributes) => {
                    raw.insert(key.clone(), RawDefinition::from_attributes(attributes));
                }
                None => not_maps.push(MalformedDefinition {
                    key: key.clone(),
                    metric_name: None,
                    reason: "definition is not a map".to_string(),
                }),
            }
        }
        let mut set = Self::from_raw(raw);
        not_maps.sort_by(|a, b| a.key.cmp(&b.key));
        set.malformed.extend(not_maps);
        Ok(set)
    }

    /// Renders the table item holding these definitions under `profile`.
    pub fn to_item(&self, profile: &Profile) -> HashMap<String, AttributeValue> {
        let alarms = self
            .definitions
            .iter()
            .map(|definition| {
                (
                    definition.key.clone(),
                    AttributeValue {
                        m: Some(definition.to_attributes()),
                        ..Default::default()
                    },
                )
            })
            .collect();
        let mut item = profile.key();
        item.insert(
            ALARMS_KEY.to_string(),
            AttributeValue {
                m: Some(alarms),
                ..Default::default()
            },
        );
        item
    }

    /// Metrics whose alarms must be kept: the valid definitions plus the
    /// ones that failed validation, so a bad edit never deletes a live alarm.
    pub fn retained_metrics(&self) -> HashSet<&str> {
        self.definitions
            .iter()
            .map(|definition| definition.metric_name.as_str())
            .chain(
                self.malformed
                    .iter()
                    .filter_map(|malformed| malformed.metric_name.as_deref()),
            )
            .collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
