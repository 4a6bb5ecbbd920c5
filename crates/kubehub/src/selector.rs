use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::ClusterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelectorOp {
    Equals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Requirement {
    key: String,
    op: SelectorOp,
    values: Vec<String>,
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let got = labels.get(&self.key);
        match self.op {
            SelectorOp::Equals | SelectorOp::In => got.is_some_and(|v| self.values.contains(v)),
            SelectorOp::NotIn => got.map_or(true, |v| !self.values.contains(v)),
            SelectorOp::Exists => got.is_some(),
            SelectorOp::DoesNotExist => got.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            SelectorOp::Equals => write!(f, "{}={}", self.key, self.values.join(",")),
            SelectorOp::In => write!(f, "{} in ({})", self.key, self.values.join(",")),
            SelectorOp::NotIn => write!(f, "{} notin ({})", self.key, self.values.join(",")),
            SelectorOp::Exists => f.write_str(&self.key),
            SelectorOp::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// Conjunction of label requirements, renderable to the API's `labelSelector` form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSelector {
    requirements: Vec<Requirement>,
}

impl PodSelector {
    /// Convert a workload's `spec.selector`. An empty selector matches every Pod.
    pub fn from_label_selector(sel: &LabelSelector) -> Result<Self, ClusterError> {
        let mut requirements = Vec::new();
        for (k, v) in sel.match_labels.iter().flatten() {
            requirements.push(Requirement { key: k.clone(), op: SelectorOp::Equals, values: vec![v.clone()] });
        }
        for expr in sel.match_expressions.iter().flatten() {
            let values = expr.values.clone().unwrap_or_default();
            let op = match expr.operator.as_str() {
                "In" => SelectorOp::In,
                "NotIn" => SelectorOp::NotIn,
                "Exists" => SelectorOp::Exists,
                "DoesNotExist" => SelectorOp::DoesNotExist,
                other => {
                    return Err(ClusterError::InvalidSelector(format!(
                        "unsupported operator {:?} for key {}",
                        other, expr.key
                    )))
                }
            };
            match op {
                SelectorOp::In | SelectorOp::NotIn if values.is_empty() => {
                    return Err(ClusterError::InvalidSelector(format!(
                        "operator {} on key {} requires values",
                        expr.operator, expr.key
                    )));
                }
                SelectorOp::Exists | SelectorOp::DoesNotExist if !values.is_empty() => {
                    return Err(ClusterError::InvalidSelector(format!(
                        "operator {} on key {} takes no values",
                        expr.operator, expr.key
                    )));
                }
                _ => {}
            }
            requirements.push(Requirement { key: expr.key.clone(), op, values });
        }
        Ok(Self { requirements })
    }

    /// Conjoin `key == value`.
    pub fn and_equals(mut self, key: &str, value: &str) -> Self {
        self.requirements.push(Requirement {
            key: key.to_string(),
            op: SelectorOp::Equals,
            values: vec![value.to_string()],
        });
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn render(&self) -> String {
        self.requirements.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(",")
    }
}

impl fmt::Display for PodSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
