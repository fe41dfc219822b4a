//! Rewrite plans: how a resolved reference is carried over to its replacement.
//!
//! A plan is built without touching the document. Applying it hands the
//! mutation to [`ProjectDocument::apply`] and returns a [`ChangeEntry`] for
//! the report.

use crate::document::{LinkKind, LinkRef, ParameterRef, PluginReference, ProjectDocument};
use crate::error::Result;
use crate::plugin::PluginFormat;
use crate::resolver::{MatchCandidate, MatchKind};
use serde::Serialize;
use std::collections::HashSet;

/// How an old parameter found its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignedBy {
    Name,
    Position,
    /// The replacement publishes no layout; the parameter keeps its slot.
    Identity,
}

/// Destination slot on the replacement plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterKey {
    pub index: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ParameterMove {
    pub from: ParameterRef,
    pub to: ParameterKey,
    pub aligned_by: AlignedBy,
}

#[derive(Debug, Clone)]
pub struct RewritePlan {
    pub reference: PluginReference,
    pub candidate: MatchCandidate,
    pub parameter_mapping: Vec<ParameterMove>,
    pub unresolved_parameters: Vec<ParameterRef>,
    /// Links whose parameter has no destination; redirected to the orphan
    /// sentinel on apply.
    pub orphaned_links: Vec<LinkRef>,
}

impl RewritePlan {
    pub fn is_lossless(&self) -> bool {
        self.unresolved_parameters.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MovedParameter {
    pub from: ParameterKey,
    pub to: ParameterKey,
    pub aligned_by: AlignedBy,
}

/// One rewritten device, as it appears in the report.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEntry {
    pub device: String,
    pub old_format: PluginFormat,
    pub old_name: String,
    pub old_id: Option<String>,
    pub new_format: PluginFormat,
    pub new_name: String,
    pub new_id: String,
    pub new_version: String,
    pub match_kind: MatchKind,
    pub score: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tied_with: Vec<String>,
    pub parameters: Vec<MovedParameter>,
    pub orphaned_parameters: Vec<String>,
    pub orphaned_automation: usize,
    pub orphaned_mappings: usize,
}

impl ChangeEntry {
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}: {} {} -> {} {} ({:?}, score {:.2})",
            self.device,
            self.old_format,
            self.old_name,
            self.new_format,
            self.new_name,
            self.match_kind,
            self.score
        );
        if !self.orphaned_parameters.is_empty() {
            line.push_str(&format!(
                "; orphaned {} ({} automation, {} mapping links)",
                self.orphaned_parameters.join(", "),
                self.orphaned_automation,
                self.orphaned_mappings
            ));
        }
        line
    }
}

/// Align the reference's parameters with the candidate's layout.
pub fn build_plan(reference: &PluginReference, candidate: &MatchCandidate) -> RewritePlan {
    let device = reference.device();
    let destinations = &candidate.plugin.parameters;

    if destinations.is_empty() {
        let parameter_mapping = device
            .parameters
            .iter()
            .map(|parameter| ParameterMove {
                from: parameter.clone(),
                to: ParameterKey {
                    index: parameter.index,
                    name: parameter.name.clone(),
                },
                aligned_by: AlignedBy::Identity,
            })
            .collect();
        return RewritePlan {
            reference: reference.clone(),
            candidate: candidate.clone(),
            parameter_mapping,
            unresolved_parameters: Vec::new(),
            orphaned_links: Vec::new(),
        };
    }

    let mut taken = vec![false; destinations.len()];
    let mut assigned: Vec<Option<(usize, AlignedBy)>> = vec![None; device.parameters.len()];

    for (slot, parameter) in assigned.iter_mut().zip(&device.parameters) {
        let wanted = parameter_key(&parameter.name);
        if wanted.is_empty() {
            continue;
        }
        let found = destinations
            .iter()
            .enumerate()
            .find(|(i, name)| !taken[*i] && parameter_key(name) == wanted);
        if let Some((i, _)) = found {
            taken[i] = true;
            *slot = Some((i, AlignedBy::Name));
        }
    }

    for (slot, parameter) in assigned.iter_mut().zip(&device.parameters) {
        if slot.is_some() {
            continue;
        }
        let Ok(position) = usize::try_from(parameter.index) else {
            continue;
        };
        let Some(destination) = destinations.get(position) else {
            continue;
        };
        if taken[position] {
            continue;
        }
        if is_anonymous(&parameter.name) || is_anonymous(destination) {
            taken[position] = true;
            *slot = Some((position, AlignedBy::Position));
        }
    }

    let mut parameter_mapping = Vec::new();
    let mut unresolved_parameters = Vec::new();
    for (slot, parameter) in assigned.into_iter().zip(&device.parameters) {
        match slot {
            Some((i, aligned_by)) => parameter_mapping.push(ParameterMove {
                from: parameter.clone(),
                to: ParameterKey {
                    index: i as i64,
                    name: destinations[i].clone(),
                },
                aligned_by,
            }),
            None => unresolved_parameters.push(parameter.clone()),
        }
    }

    let orphan_targets: HashSet<&str> = unresolved_parameters
        .iter()
        .flat_map(|p| p.targets.iter().map(String::as_str))
        .collect();
    let orphaned_links = device
        .links()
        .filter(|link| orphan_targets.contains(link.target_id.as_str()))
        .cloned()
        .collect();

    RewritePlan {
        reference: reference.clone(),
        candidate: candidate.clone(),
        parameter_mapping,
        unresolved_parameters,
        orphaned_links,
    }
}

/// Apply `plan` to `document` and describe what changed.
pub fn apply(plan: &RewritePlan, document: &mut ProjectDocument) -> Result<ChangeEntry> {
    document.apply(plan)?;

    let device = plan.reference.device();
    let record = &plan.candidate.plugin;
    let entry = ChangeEntry {
        device: device.location.path.clone(),
        old_format: plan.reference.format(),
        old_name: device.declared_name.clone(),
        old_id: device.declared_id.clone(),
        new_format: record.format,
        new_name: record.display_name.clone(),
        new_id: record.unique_id.clone(),
        new_version: record.version.to_string(),
        match_kind: plan.candidate.match_kind,
        score: plan.candidate.score,
        tied_with: plan.candidate.tied_with.clone(),
        parameters: plan
            .parameter_mapping
            .iter()
            .map(|moved| MovedParameter {
                from: ParameterKey {
                    index: moved.from.index,
                    name: moved.from.name.clone(),
                },
                to: moved.to.clone(),
                aligned_by: moved.aligned_by,
            })
            .collect(),
        orphaned_parameters: plan
            .unresolved_parameters
            .iter()
            .map(|p| p.name.clone())
            .collect(),
        orphaned_automation: count_links(&plan.orphaned_links, LinkKind::Automation),
        orphaned_mappings: count_links(&plan.orphaned_links, LinkKind::Mapping),
    };

    if !plan.is_lossless() {
        tracing::warn!(
            path = %document.path().display(),
            device = %entry.device,
            orphaned = ?entry.orphaned_parameters,
            links = plan.orphaned_links.len(),
            "Parameters without a destination were removed"
        );
    }
    tracing::debug!(path = %document.path().display(), "{}", entry.summary());
    Ok(entry)
}

fn count_links(links: &[LinkRef], kind: LinkKind) -> usize {
    links.iter().filter(|link| link.kind == kind).count()
}

/// Case- and whitespace-insensitive parameter name.
fn parameter_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Empty names and host placeholders such as `Param 7`, `Parameter 7`, `#7`.
fn is_anonymous(name: &str) -> bool {
    let key = parameter_key(name);
    if key.is_empty() {
        return true;
    }
    let rest = ["parameter", "param", "#"]
        .iter()
        .find_map(|prefix| key.strip_prefix(prefix));
    match rest {
        Some(number) => {
            let number = number.trim_start_matches([' ', '_', '.']);
            !number.is_empty() && number.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
