use crate::template::{Resource, Template};
use std::collections::{BTreeMap, BTreeSet};

/// Top level sections that never affect deployed resources.
const IGNORED_SECTIONS: &[&str] = &["Metadata", "Description"];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ResourceDifference {
    Added(Resource),
    Removed(Resource),
    Modified {
        old: Resource,
        new: Resource,
        changed_properties: BTreeSet<String>,
        /// Resource attributes other than `Properties` and `Metadata`, `Type` included.
        changed_attributes: BTreeSet<String>,
    },
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct TemplateDiff {
    pub(crate) changed_sections: BTreeSet<String>,
    pub(crate) resources: BTreeMap<String, ResourceDifference>,
}

impl TemplateDiff {
    pub(crate) fn is_empty(&self) -> bool {
        self.changed_sections.is_empty() && self.resources.is_empty()
    }
}

pub(crate) fn diff_templates(old: &Template, new: &Template) -> TemplateDiff {
    let changed_sections = changed_keys(&old.sections, &new.sections)
        .into_iter()
        .filter(|k| !IGNORED_SECTIONS.contains(&k.as_str()))
        .collect();

    let mut resources = BTreeMap::new();
    for (logical_id, old_resource) in &old.resources {
        match new.resources.get(logical_id) {
            None => {
                resources.insert(
                    logical_id.clone(),
                    ResourceDifference::Removed(old_resource.clone()),
                );
            }
            Some(new_resource) => {
                if let Some(difference) = diff_resource(old_resource, new_resource) {
                    resources.insert(logical_id.clone(), difference);
                }
            }
        }
    }
    for (logical_id, new_resource) in &new.resources {
        if !old.resources.contains_key(logical_id) {
            resources.insert(
                logical_id.clone(),
                ResourceDifference::Added(new_resource.clone()),
            );
        }
    }

    TemplateDiff {
        changed_sections,
        resources,
    }
}

fn diff_resource(old: &Resource, new: &Resource) -> Option<ResourceDifference> {
    let changed_properties: BTreeSet<String> = old
        .properties
        .keys()
        .chain(new.properties.keys())
        .filter(|k| old.properties.get(*k) != new.properties.get(*k))
        .cloned()
        .collect();

    let mut changed_attributes = changed_keys(&old.attributes, &new.attributes);
    if old.resource_type != new.resource_type {
        changed_attributes.insert("Type".to_string());
    }

    if changed_properties.is_empty() && changed_attributes.is_empty() {
        return None;
    }

    Some(ResourceDifference::Modified {
        old: old.clone(),
        new: new.clone(),
        changed_properties,
        changed_attributes,
    })
}

fn changed_keys<V: PartialEq>(
    old: &BTreeMap<String, V>,
    new: &BTreeMap<String, V>,
) -> BTreeSet<String> {
    old.keys()
        .chain(new.keys())
        .filter(|k| old.get(*k) != new.get(*k))
        .cloned()
        .collect()
}
