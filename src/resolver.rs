//! Replacement resolution for missing plugin references.
//!
//! `resolve` is a pure function of the reference, the catalog and the match
//! settings. Ties are broken by the declared rank key and then by unique id
//! and display name, never by catalog order.

use crate::config::MatchSettings;
use crate::document::PluginReference;
use crate::plugin::{PluginFormat, PluginRecord, Version};
use crate::registry::{normalize_plugin_name, PluginCatalog};
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchKind {
    ExactId,
    FuzzyName,
}

/// Ordering key for surviving candidates; "greater" ranks first.
#[derive(Debug, Clone)]
pub struct RankKey {
    pub version: Version,
    pub score: f64,
    pub prefer_newer_version: bool,
}

impl RankKey {
    fn compare(&self, other: &RankKey) -> Ordering {
        let by_version = self.version.cmp(&other.version);
        let by_score = self.score.total_cmp(&other.score);
        if self.prefer_newer_version {
            by_version.then(by_score)
        } else {
            by_score.then(by_version)
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub plugin: PluginRecord,
    pub match_kind: MatchKind,
    pub score: f64,
    pub rank_key: RankKey,
    /// Unique ids of other candidates that tied exactly on the rank key.
    pub tied_with: Vec<String>,
}

impl MatchCandidate {
    pub fn is_ambiguous(&self) -> bool {
        !self.tied_with.is_empty()
    }
}

/// Format a missing reference gets replaced with.
fn replacement_format(reference: &PluginReference) -> PluginFormat {
    match reference {
        PluginReference::Legacy(_) | PluginReference::Modern(_) => PluginFormat::Modern,
    }
}

/// Pick the best installed replacement for `reference`, if any.
pub fn resolve(
    reference: &PluginReference,
    catalog: &PluginCatalog,
    settings: &MatchSettings,
) -> Option<MatchCandidate> {
    let device = reference.device();
    let target = replacement_format(reference);

    if settings.use_unique_id {
        if let Some(id) = &device.declared_id {
            if let Some(record) = catalog.lookup_by_id(id, target) {
                tracing::debug!(
                    device = %device.declared_name,
                    replacement = %record.display_name,
                    unique_id = %id,
                    "Matched by unique id"
                );
                return Some(MatchCandidate {
                    plugin: record.clone(),
                    match_kind: MatchKind::ExactId,
                    score: 1.0,
                    rank_key: RankKey {
                        version: record.version.clone(),
                        score: 1.0,
                        prefer_newer_version: settings.prefer_newer_version,
                    },
                    tied_with: Vec::new(),
                });
            }
        }
    }

    let mut survivors: Vec<(&PluginRecord, RankKey)> = catalog
        .plugins_of(target)
        .filter_map(|record| {
            let score = name_similarity(&device.declared_name, &record.display_name);
            if score < settings.fuzzy_name_threshold {
                return None;
            }
            let key = RankKey {
                version: record.version.clone(),
                score,
                prefer_newer_version: settings.prefer_newer_version,
            };
            Some((record, key))
        })
        .collect();

    survivors.sort_by(|(a, key_a), (b, key_b)| {
        key_b
            .compare(key_a)
            .then_with(|| a.unique_id.cmp(&b.unique_id))
            .then_with(|| a.display_name.cmp(&b.display_name))
    });

    let Some((best, best_key)) = survivors.first() else {
        tracing::debug!(
            device = %device.declared_name,
            threshold = settings.fuzzy_name_threshold,
            "No replacement above threshold"
        );
        return None;
    };

    let tied_with: Vec<String> = survivors[1..]
        .iter()
        .filter(|(_, key)| key.compare(best_key) == Ordering::Equal)
        .map(|(record, _)| record.unique_id.clone())
        .collect();
    if !tied_with.is_empty() {
        tracing::warn!(
            device = %device.declared_name,
            chosen = %best.unique_id,
            tied = ?tied_with,
            "Ambiguous replacement; picked the lowest unique id"
        );
    }

    tracing::debug!(
        device = %device.declared_name,
        replacement = %best.display_name,
        score = best_key.score,
        version = %best.version,
        "Matched by name"
    );
    Some(MatchCandidate {
        plugin: (*best).clone(),
        match_kind: MatchKind::FuzzyName,
        score: best_key.score,
        rank_key: best_key.clone(),
        tied_with,
    })
}

/// Similarity of two plugin names in `[0, 1]`.
///
/// Both names go through [`normalize_plugin_name`]; the score is the
/// normalized Levenshtein similarity of the results. Two names that normalize
/// to nothing score 0.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_plugin_name(a);
    let b = normalize_plugin_name(b);
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&a, &b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DeviceReference, LegacyReference, Location, ModernReference};
    use crate::xml::XmlTree;

    fn legacy(name: &str, id: Option<&str>) -> PluginReference {
        PluginReference::Legacy(LegacyReference {
            device: device(name, id),
            binary_path: None,
            state_buffer: None,
        })
    }

    fn device(name: &str, id: Option<&str>) -> DeviceReference {
        let tree = XmlTree::parse("<A/>").unwrap();
        DeviceReference {
            location: Location {
                node: tree.document(),
                path: "A".into(),
            },
            info_node: tree.document(),
            declared_id: id.map(str::to_string),
            declared_name: name.to_string(),
            parameters: Vec::new(),
            automation_links: Vec::new(),
            mapping_links: Vec::new(),
        }
    }

    fn settings(threshold: f64, prefer_newer_version: bool) -> MatchSettings {
        MatchSettings {
            use_unique_id: true,
            fuzzy_name_threshold: threshold,
            prefer_newer_version,
        }
    }

    fn catalog(records: Vec<PluginRecord>) -> PluginCatalog {
        PluginCatalog::from_records(records).unwrap()
    }

    #[test]
    fn exact_id_wins_even_when_names_disagree() {
        let catalog = catalog(vec![
            PluginRecord::new("1483109208", "Totally Different", PluginFormat::Modern, "1.0"),
            PluginRecord::new("other", "Serum", PluginFormat::Modern, "9.0"),
        ]);
        let reference = legacy("Serum", Some("1483109208"));
        for threshold in [0.0, 0.5, 1.0] {
            let candidate = resolve(&reference, &catalog, &settings(threshold, true)).unwrap();
            assert_eq!(candidate.plugin.unique_id, "1483109208");
            assert_eq!(candidate.match_kind, MatchKind::ExactId);
            assert_eq!(candidate.score, 1.0);
        }
    }

    #[test]
    fn exact_id_is_restricted_to_modern_records() {
        let catalog = catalog(vec![
            PluginRecord::new("1483109208", "Serum", PluginFormat::Legacy, "1.0"),
            PluginRecord::new("serum-vst3", "Serum", PluginFormat::Modern, "1.0"),
        ]);
        let reference = legacy("Serum", Some("1483109208"));
        let candidate = resolve(&reference, &catalog, &settings(0.9, false)).unwrap();
        assert_eq!(candidate.plugin.unique_id, "serum-vst3");
        assert_eq!(candidate.match_kind, MatchKind::FuzzyName);
    }

    #[test]
    fn unique_id_lookup_can_be_disabled() {
        let catalog = catalog(vec![PluginRecord::new(
            "1483109208",
            "Totally Different",
            PluginFormat::Modern,
            "1.0",
        )]);
        let mut no_ids = settings(0.9, false);
        no_ids.use_unique_id = false;
        assert!(resolve(&legacy("Serum", Some("1483109208")), &catalog, &no_ids).is_none());
    }

    #[test]
    fn threshold_is_inclusive() {
        // "abcdefghij" vs "abcdefghxy": 2 edits over 10 chars = 0.8
        // "abcdefghijklmn" vs "abcdefghijkxyz": 3 edits over 14 chars ~ 0.786
        assert!((name_similarity("abcdefghij", "abcdefghxy") - 0.8).abs() < 1e-9);
        assert!(name_similarity("abcdefghijklmn", "abcdefghijkxyz") < 0.79);

        let at = catalog(vec![PluginRecord::new("at", "abcdefghxy", PluginFormat::Modern, "1")]);
        assert!(resolve(&legacy("abcdefghij", None), &at, &settings(0.8, false)).is_some());

        let below = catalog(vec![PluginRecord::new(
            "below",
            "abcdefghijkxyz",
            PluginFormat::Modern,
            "1",
        )]);
        let reference = legacy("abcdefghijklmn", None);
        assert!(resolve(&reference, &below, &settings(0.79, false)).is_none());
    }

    #[test]
    fn packaging_suffixes_do_not_count_against_a_match() {
        assert_eq!(name_similarity("Serum_x64", "Serum"), 1.0);
        assert_eq!(name_similarity("The Legend", "Legend VST3"), 1.0);
        assert_eq!(name_similarity("", "---"), 0.0);
    }

    #[test]
    fn prefer_newer_version_orders_version_first() {
        let records = vec![
            PluginRecord::new("exact-old", "Diva", PluginFormat::Modern, "1.4"),
            PluginRecord::new("close-new", "Diva 2", PluginFormat::Modern, "2.0"),
        ];
        let reference = legacy("Diva", None);
        let newer = resolve(&reference, &catalog(records.clone()), &settings(0.5, true)).unwrap();
        assert_eq!(newer.plugin.unique_id, "close-new");

        let closer = resolve(&reference, &catalog(records), &settings(0.5, false)).unwrap();
        assert_eq!(closer.plugin.unique_id, "exact-old");
    }

    #[test]
    fn ties_resolve_independently_of_catalog_order() {
        let a = PluginRecord::new("b-id", "Vital", PluginFormat::Modern, "1.5");
        let b = PluginRecord::new("a-id", "Vital", PluginFormat::Modern, "1.5.0");
        let forward = catalog(vec![a.clone(), b.clone()]);
        let backward = catalog(vec![b, a]);

        let reference = legacy("Vital", None);
        let first = resolve(&reference, &forward, &settings(0.9, true)).unwrap();
        let second = resolve(&reference, &backward, &settings(0.9, true)).unwrap();
        assert_eq!(first.plugin.unique_id, "a-id");
        assert_eq!(second.plugin.unique_id, "a-id");
        assert_eq!(first.tied_with, vec!["b-id".to_string()]);
        assert!(first.is_ambiguous());

        let again = resolve(&reference, &forward, &settings(0.9, true)).unwrap();
        assert_eq!(again.plugin.unique_id, first.plugin.unique_id);
    }

    #[test]
    fn nothing_above_threshold_is_unresolved() {
        let catalog = catalog(vec![PluginRecord::new("x", "Massive X", PluginFormat::Modern, "1")]);
        assert!(resolve(&legacy("Sylenth1", None), &catalog, &settings(0.8, false)).is_none());
    }

    #[test]
    fn modern_references_resolve_to_modern_records() {
        let catalog = catalog(vec![
            PluginRecord::new("old", "Pro-Q 3", PluginFormat::Legacy, "3.0"),
            PluginRecord::new("new", "Pro-Q 3", PluginFormat::Modern, "3.2"),
        ]);
        let reference = PluginReference::Modern(ModernReference {
            device: device("Pro-Q 3", None),
            processor_state: None,
        });
        let candidate = resolve(&reference, &catalog, &settings(0.9, false)).unwrap();
        assert_eq!(candidate.plugin.unique_id, "new");
    }
}
