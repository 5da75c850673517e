//! Pipeline config validation
//!
//! Turns a submitted [`PipelineConfig`] into a [`PipelineDraft`]. Every
//! problem found is collected, and a config with any problem is rejected
//! as a whole with a single [`ValidationError`].

use thiserror::Error;

use crate::domain::pipeline::PipelineDraft;
use crate::domain::plugin::{PackageRef, PluginBinding, PluginRole, canonical_params};
use crate::dto::pipeline::PipelineConfig;

const MAX_NAME_LENGTH: usize = 255;

/// Aggregated validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid pipeline config: {}", .issues.join("; "))]
pub struct ValidationError {
    pub issues: Vec<String>,
}

impl ValidationError {
    pub fn new(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
        }
    }
}

/// Validates a config and produces a storable draft
///
/// `name_override` takes precedence over `config.name`.
pub fn validate_config(
    config: &PipelineConfig,
    name_override: Option<&str>,
) -> Result<PipelineDraft, ValidationError> {
    let mut issues = Vec::new();

    let name = name_override
        .or(config.name.as_deref())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    if let Some(name) = &name
        && name.len() > MAX_NAME_LENGTH
    {
        issues.push(format!(
            "name is too long (max {} characters)",
            MAX_NAME_LENGTH
        ));
    }

    let Some(plugins) = &config.plugins else {
        issues.push("missing plugins section".to_string());
        return Err(ValidationError { issues });
    };

    let mut bindings = Vec::with_capacity(PluginRole::ALL.len());

    for role in PluginRole::ALL {
        let Some(plugin) = plugins.get(role) else {
            issues.push(format!("missing plugin for role {}", role));
            continue;
        };

        let package = plugin.package.as_deref().map(str::trim).unwrap_or_default();
        if package.is_empty() {
            issues.push(format!("{}: package cannot be empty", role));
        } else if let Err(e) = PackageRef::parse(package) {
            issues.push(format!("{}: {}", role, e));
        }

        match canonical_params(plugin.params.as_ref()) {
            Ok(params) => bindings.push(PluginBinding {
                package: package.to_string(),
                params,
            }),
            Err(e) => issues.push(format!("{}: {}", role, e)),
        }
    }

    if !issues.is_empty() {
        return Err(ValidationError { issues });
    }

    let mut bindings = bindings.into_iter();
    match (
        bindings.next(),
        bindings.next(),
        bindings.next(),
        bindings.next(),
    ) {
        (Some(data_collect), Some(data_access), Some(model_define), Some(model_evaluate)) => {
            Ok(PipelineDraft {
                name,
                data_collect,
                data_access,
                model_define,
                model_evaluate,
            })
        }
        _ => Err(ValidationError::new("incomplete plugin set")),
    }
}
