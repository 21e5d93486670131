//! Contact reconciliation
//!
//! Provider address books carry several entries per person (old number
//! formats, deleted-then-recreated contacts). Reconciliation keeps one canonical
//! number per display name without operator intervention.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::address::{is_international, is_valid_number, normalize_number, strip_international_prefix};

/// A contact record as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContact {
    /// Name saved in the phone's address book
    #[serde(default)]
    pub name: Option<String>,
    /// Number as the provider formats it
    pub number: String,
    /// Provider-side serialized id (`51974672423@c.us`)
    pub id: String,
    /// Saved in the address book, as opposed to an unknown sender
    #[serde(default)]
    pub is_my_contact: bool,
    #[serde(default)]
    pub is_group: bool,
}

/// A reconciled contact, one per display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub name: String,
    /// Display form: international numbers always carry a leading `+`
    pub number: String,
    pub normalized_number: String,
    pub id: String,
    pub is_international: bool,
    /// False only when no valid number exists for this name
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
}

struct Candidate<'a> {
    name: &'a str,
    normalized: String,
    valid: bool,
    raw: &'a RawContact,
}

/// Deduplicate and validate raw provider contacts.
///
/// Segment tags are looked up by provider id first, then by normalized number.
pub fn reconcile(raw: &[RawContact], segments: &HashMap<String, String>) -> Vec<Contact> {
    let mut candidates: Vec<Candidate<'_>> = raw
        .iter()
        .filter(|c| c.is_my_contact && !c.is_group)
        .filter_map(|c| {
            let name = c.name.as_deref().map(str::trim).filter(|n| !n.is_empty())?;
            let normalized = normalize_number(&c.number);
            let valid = is_valid_number(&normalized);
            Some(Candidate {
                name,
                normalized,
                valid,
                raw: c,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.name
            .cmp(b.name)
            .then(a.normalized.len().cmp(&b.normalized.len()))
    });

    let mut by_name: BTreeMap<&str, Candidate<'_>> = BTreeMap::new();
    for candidate in candidates {
        match by_name.get(candidate.name) {
            None => {
                by_name.insert(candidate.name, candidate);
            }
            Some(existing) => {
                let replace = (!existing.valid && candidate.valid)
                    || (existing.valid
                        && candidate.valid
                        && candidate.normalized.len() < existing.normalized.len());
                if replace {
                    tracing::debug!(
                        "Replacing number for {}: {} -> {}",
                        candidate.name,
                        existing.normalized,
                        candidate.normalized
                    );
                    by_name.insert(candidate.name, candidate);
                } else if !candidate.valid {
                    tracing::debug!(
                        "Dropping invalid duplicate for {}: {}",
                        candidate.name,
                        candidate.normalized
                    );
                }
            }
        }
    }

    by_name
        .into_values()
        .map(|c| {
            if !c.valid {
                tracing::warn!(
                    "Keeping contact with potentially invalid number: {} ({})",
                    c.name,
                    c.normalized
                );
            }
            let international = is_international(&c.normalized);
            let number = if international && !c.normalized.starts_with('+') {
                format!("+{}", strip_international_prefix(&c.normalized))
            } else {
                c.normalized.clone()
            };
            let segment = segments
                .get(&c.raw.id)
                .or_else(|| segments.get(&c.normalized))
                .cloned();
            Contact {
                name: c.name.to_string(),
                number,
                normalized_number: c.normalized,
                id: c.raw.id.clone(),
                is_international: international,
                valid: c.valid,
                segment,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn saved(name: &str, number: &str) -> RawContact {
        RawContact {
            name: Some(name.to_string()),
            number: number.to_string(),
            id: format!("{}@c.us", normalize_number(number).trim_start_matches('+')),
            is_my_contact: true,
            is_group: false,
        }
    }

    #[test]
    fn test_valid_number_beats_invalid_duplicate() {
        let raw = vec![
            saved("Ana", "12345678901234567890"),
            saved("Ana", "51974672423"),
        ];
        let contacts = reconcile(&raw, &HashMap::new());
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].normalized_number, "51974672423");
        assert!(contacts[0].valid);
    }

    #[test]
    fn test_shorter_valid_number_wins() {
        let raw = vec![saved("Luis", "519746724231"), saved("Luis", "9746724231")];
        let contacts = reconcile(&raw, &HashMap::new());
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].normalized_number, "9746724231");
    }

    #[test]
    fn test_invalid_only_name_is_kept_and_flagged() {
        let raw = vec![saved("Desk", "123")];
        let contacts = reconcile(&raw, &HashMap::new());
        assert_eq!(contacts.len(), 1);
        assert!(!contacts[0].valid);
    }

    #[test]
    fn test_filters_groups_unsaved_and_nameless() {
        let mut group = saved("Family", "51974672423");
        group.is_group = true;
        let mut stranger = saved("Stranger", "51974672424");
        stranger.is_my_contact = false;
        let mut nameless = saved("", "51974672425");
        nameless.name = None;
        let blank = saved("   ", "51974672426");

        let contacts = reconcile(&[group, stranger, nameless, blank], &HashMap::new());
        assert!(contacts.is_empty());
    }

    #[test]
    fn test_double_zero_prefix_displays_with_plus() {
        let contacts = reconcile(&[saved("Marta", "0034 600 112 233")], &HashMap::new());
        assert_eq!(contacts[0].normalized_number, "0034600112233");
        assert_eq!(contacts[0].number, "+34600112233");
        assert!(contacts[0].is_international);
    }

    #[test]
    fn test_segment_lookup_by_id_then_number() {
        let raw = vec![saved("Ana", "+51 974-672423"), saved("Bea", "+51 974-672424")];
        let mut segments = HashMap::new();
        segments.insert("51974672423@c.us".to_string(), "vip".to_string());
        segments.insert("+51974672424".to_string(), "lead".to_string());

        let contacts = reconcile(&raw, &segments);
        assert_eq!(contacts[0].segment.as_deref(), Some("vip"));
        assert_eq!(contacts[1].segment.as_deref(), Some("lead"));
    }

    #[test]
    fn test_output_sorted_by_name() {
        let raw = vec![saved("Zoe", "51974672423"), saved("Ana", "51974672424")];
        let names: Vec<_> = reconcile(&raw, &HashMap::new())
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Ana", "Zoe"]);
    }

    proptest! {
        #[test]
        fn prop_names_are_unique_and_valid_when_possible(
            entries in prop::collection::vec(("[A-C]", "[+0-9 ()-]{0,22}"), 0..24)
        ) {
            let raw: Vec<RawContact> = entries.iter().map(|(n, num)| saved(n, num)).collect();
            let contacts = reconcile(&raw, &HashMap::new());

            let names: HashSet<_> = contacts.iter().map(|c| c.name.clone()).collect();
            prop_assert_eq!(names.len(), contacts.len());

            for contact in &contacts {
                let any_valid = raw.iter().any(|r| {
                    r.name.as_deref() == Some(contact.name.as_str())
                        && is_valid_number(&normalize_number(&r.number))
                });
                prop_assert_eq!(contact.valid, any_valid);
            }
        }
    }
}
