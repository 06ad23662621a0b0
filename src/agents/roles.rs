// SPDX-License-Identifier: MIT

//! Persona catalog for the reviewed-answer agent
//!
//! The selection step asks the model to pick one persona by its
//! numeric key; catalogs can be customized from a YAML file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A single answering persona
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Role {
    pub name: String,
    pub description: String,
    pub details: String,
}

/// Numbered personas the selection step chooses between
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoleCatalog {
    roles: BTreeMap<String, Role>,
}

impl RoleCatalog {
    /// The default three-persona catalog
    pub fn builtin() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(
            "1".to_string(),
            Role {
                name: "Generalist".to_string(),
                description: "answers a broad range of everyday questions".to_string(),
                details: "Give balanced, practical answers in plain language, \
                          covering the main considerations without jargon."
                    .to_string(),
            },
        );
        roles.insert(
            "2".to_string(),
            Role {
                name: "Technical expert".to_string(),
                description: "answers software and engineering questions".to_string(),
                details: "Answer precisely with concrete examples, name the \
                          relevant tools and standards, and call out trade-offs."
                    .to_string(),
            },
        );
        roles.insert(
            "3".to_string(),
            Role {
                name: "Counselor".to_string(),
                description: "answers personal and interpersonal questions".to_string(),
                details: "Respond with empathy first, then offer gentle, \
                          actionable suggestions the person can choose from."
                    .to_string(),
            },
        );
        Self { roles }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let roles: BTreeMap<String, Role> = serde_yaml::from_str(yaml)?;
        Ok(Self { roles })
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_yaml(&text)?)
    }

    pub fn get(&self, key: &str) -> Option<&Role> {
        self.roles.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// "1. name: description" lines for the selection prompt
    pub fn options_text(&self) -> String {
        self.roles
            .iter()
            .map(|(key, role)| format!("{}. {}: {}", key, role.name, role.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// "- name: details" lines for the answering prompt
    pub fn details_text(&self) -> String {
        self.roles
            .values()
            .map(|role| format!("- {}: {}", role.name, role.details))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_has_three_numbered_roles() {
        let catalog = RoleCatalog::builtin();
        assert!(catalog.get("1").is_some());
        assert!(catalog.get("2").is_some());
        assert!(catalog.get("3").is_some());
        assert!(catalog.get("4").is_none());
    }

    #[test]
    fn test_options_text_lists_keys_in_order() {
        let catalog = RoleCatalog::builtin();
        let options = catalog.options_text();
        let lines: Vec<&str> = options.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("1. Generalist:"));
        assert!(lines[2].starts_with("3. Counselor:"));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
            "1":
              name: Historian
              description: answers questions about the past
              details: Cite periods and sources.
            "2":
              name: Chef
              description: answers cooking questions
              details: Give step by step instructions.
        "#;
        let catalog = RoleCatalog::from_yaml(yaml).unwrap();
        assert_eq!(catalog.get("1").unwrap().name, "Historian");
        assert!(catalog.details_text().contains("step by step"));
    }

    #[test]
    fn test_from_yaml_rejects_malformed_input() {
        assert!(RoleCatalog::from_yaml("- just\n- a\n- list").is_err());
    }
}
