//! Child workflow bindings
//!
//! Each entry binds a child workflow kind to the engine namespace, task queue
//! and workflow name that run it. Entries are read from a TOML file:
//!
//! ```toml
//! [[child_workflows]]
//! type = "preprocessing"
//! namespace = "default"
//! taskQueue = "preprocessing"
//! workflowName = "preprocessing"
//! sharedPath = "/home/sipflow/preprocessing"
//! ```

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::models::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildWorkflowType {
    Preprocessing,
    Poststorage,
    Postbatch,
}

impl ChildWorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildWorkflowType::Preprocessing => "preprocessing",
            ChildWorkflowType::Poststorage => "poststorage",
            ChildWorkflowType::Postbatch => "postbatch",
        }
    }
}

impl fmt::Display for ChildWorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChildWorkflowType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preprocessing" => Ok(ChildWorkflowType::Preprocessing),
            "poststorage" => Ok(ChildWorkflowType::Poststorage),
            "postbatch" => Ok(ChildWorkflowType::Postbatch),
            _ => Err(ParseEnumError {
                kind: "child workflow type",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChildWorkflowConfig {
    /// Kept as written so invalid values can be reported.
    #[serde(rename = "type")]
    pub kind: String,
    pub namespace: String,
    pub task_queue: String,
    pub workflow_name: String,
    /// Filesystem path shared with the host; preprocessing only.
    pub shared_path: String,
    /// Extract the SIP in the child workflow; preprocessing only.
    pub extract: bool,
}

impl ChildWorkflowConfig {
    pub fn workflow_type(&self) -> Option<ChildWorkflowType> {
        self.kind.parse().ok()
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errs = Vec::new();

        let mut missing = Vec::new();
        if self.kind.is_empty() {
            missing.push("type");
        }
        if self.namespace.is_empty() {
            missing.push("namespace");
        }
        if self.task_queue.is_empty() {
            missing.push("taskQueue");
        }
        if self.workflow_name.is_empty() {
            missing.push("workflowName");
        }
        if self.workflow_type() == Some(ChildWorkflowType::Preprocessing)
            && self.shared_path.is_empty()
        {
            missing.push("sharedPath");
        }
        if !missing.is_empty() {
            errs.push(format!("missing required value(s): {}", missing.join(", ")));
        }

        if !self.kind.is_empty() && self.workflow_type().is_none() {
            errs.push(format!("invalid type: {}", self.kind));
        }

        errs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildWorkflows {
    #[serde(default)]
    pub child_workflows: Vec<ChildWorkflowConfig>,
}

impl ChildWorkflows {
    /// Load from a TOML file, with `SIPFLOW_CHILDWF_` variables merged on top.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let configs: ChildWorkflows = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SIPFLOW_CHILDWF_").split("__"))
            .extract()?;
        Ok(configs)
    }

    pub fn by_type(&self, kind: ChildWorkflowType) -> Option<&ChildWorkflowConfig> {
        self.child_workflows
            .iter()
            .find(|c| c.workflow_type() == Some(kind))
    }

    /// One message per problem, prefixed with the entry index.
    pub fn validate(&self) -> Vec<String> {
        let mut errs = Vec::new();
        let mut seen = Vec::new();

        for (i, cfg) in self.child_workflows.iter().enumerate() {
            errs.extend(
                cfg.validate()
                    .into_iter()
                    .map(|e| format!("child workflow[{i}]: {e}")),
            );

            if cfg.kind.is_empty() {
                continue;
            }
            if seen.contains(&cfg.kind.as_str()) {
                errs.push(format!("child workflow[{i}]: duplicate type: {}", cfg.kind));
            } else {
                seen.push(cfg.kind.as_str());
            }
        }

        errs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(kind: &str) -> ChildWorkflowConfig {
        ChildWorkflowConfig {
            kind: kind.into(),
            namespace: "default".into(),
            task_queue: "q".into(),
            workflow_name: "wf".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_fields() {
        let errs = ChildWorkflowConfig::default().validate();
        assert_eq!(
            errs,
            ["missing required value(s): type, namespace, taskQueue, workflowName"]
        );

        let errs = config("preprocessing").validate();
        assert_eq!(errs, ["missing required value(s): sharedPath"]);
    }

    #[test]
    fn test_invalid_and_duplicate_types() {
        let configs = ChildWorkflows {
            child_workflows: vec![config("poststorage"), config("bogus"), config("poststorage")],
        };
        assert_eq!(
            configs.validate(),
            [
                "child workflow[1]: invalid type: bogus",
                "child workflow[2]: duplicate type: poststorage",
            ]
        );
    }

    #[test]
    fn test_by_type() {
        let configs = ChildWorkflows {
            child_workflows: vec![config("postbatch"), config("poststorage")],
        };
        assert_eq!(
            configs
                .by_type(ChildWorkflowType::Poststorage)
                .map(|c| c.kind.as_str()),
            Some("poststorage")
        );
        assert!(configs.by_type(ChildWorkflowType::Preprocessing).is_none());
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[child_workflows]]
type = "preprocessing"
namespace = "default"
taskQueue = "preprocessing"
workflowName = "preprocessing"
sharedPath = "/shared"
extract = true
"#
        )
        .unwrap();

        let configs = ChildWorkflows::load(file.path()).unwrap();
        assert!(configs.validate().is_empty());
        let pre = configs.by_type(ChildWorkflowType::Preprocessing).unwrap();
        assert_eq!(pre.shared_path, "/shared");
        assert!(pre.extract);
    }
}
