use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::Error;

/// A CloudFormation template in its JSON form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Template {
    #[serde(rename = "Resources", default)]
    pub(crate) resources: BTreeMap<String, Resource>,
    /// Every other top level section (`Parameters`, `Outputs`, ...).
    #[serde(flatten)]
    pub(crate) sections: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Resource {
    #[serde(rename = "Type")]
    pub(crate) resource_type: String,
    #[serde(rename = "Properties", default)]
    pub(crate) properties: Map<String, Value>,
    #[serde(rename = "Metadata", default, skip_serializing_if = "Option::is_none")]
    pub(crate) metadata: Option<Value>,
    /// `DependsOn`, `Condition`, `DeletionPolicy` and friends.
    #[serde(flatten)]
    pub(crate) attributes: BTreeMap<String, Value>,
}

impl Template {
    pub(crate) fn from_value(value: Value) -> Result<Self, Error> {
        Ok(serde_json::from_value(value)?)
    }

    #[cfg(test)]
    pub(crate) fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    /// The `Default` of a declared parameter, rendered as a string.
    pub(crate) fn parameter_default(&self, name: &str) -> Option<String> {
        match self.sections.get("Parameters")?.get(name)?.get("Default")? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl FromStr for Template {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}
