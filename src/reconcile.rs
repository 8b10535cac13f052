use crate::model::{DuplicateGroup, EntitySnapshot};
use crate::utils::path::{normalize_root, same_root};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Output of [`reconcile`]: one snapshot per entity plus the groups of
/// entities found under more than one root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub unique: Vec<EntitySnapshot>,
    pub duplicates: Vec<DuplicateGroup>,
}

impl Reconciled {
    /// Replace the default "most recent" winner for `entity_id` with the
    /// member under `root`. Returns false when no such member exists.
    pub fn select(&mut self, entity_id: &str, root: &Path) -> bool {
        let Some(chosen) = select_source(&self.duplicates, entity_id, root).cloned() else {
            return false;
        };
        match self.unique.iter_mut().find(|s| s.entity_id == entity_id) {
            Some(slot) => *slot = chosen,
            None => self.unique.push(chosen),
        }
        true
    }

    pub fn duplicate(&self, entity_id: &str) -> Option<&DuplicateGroup> {
        self.duplicates.iter().find(|g| g.entity_id == entity_id)
    }
}

/// Newest first; equal times fall back to root path order.
fn newest_first(a: &EntitySnapshot, b: &EntitySnapshot) -> Ordering {
    b.last_modified
        .cmp(&a.last_modified)
        .then_with(|| a.root_path.to_string_lossy().cmp(&b.root_path.to_string_lossy()))
}

/// Partition a raw snapshot into unique entities and duplicate groups.
///
/// Stateless: the result depends only on the input set, never on its order
/// or on earlier calls.
pub fn reconcile(snapshots: &[EntitySnapshot]) -> Reconciled {
    reconcile_with_names(snapshots, |_| None)
}

/// Like [`reconcile`], with a lookup for duplicate group display names.
/// Groups fall back to the entity id.
pub fn reconcile_with_names<F>(snapshots: &[EntitySnapshot], display_name: F) -> Reconciled
where
    F: Fn(&str) -> Option<String>,
{
    let mut by_entity: BTreeMap<&str, Vec<&EntitySnapshot>> = BTreeMap::new();
    for snapshot in snapshots {
        by_entity.entry(snapshot.entity_id.as_str()).or_default().push(snapshot);
    }

    let mut result = Reconciled::default();
    for (entity_id, mut members) in by_entity {
        members.sort_by(|a, b| newest_first(a, b));
        // Two spellings of one root are one member, not a duplicate.
        let mut seen_roots = HashSet::new();
        members.retain(|m| seen_roots.insert(normalize_root(&m.root_path)));
        result.unique.push(members[0].clone());

        if members.len() > 1 {
            debug!(
                "Entity {} found under {} roots, defaulting to {}",
                entity_id,
                members.len(),
                members[0].root_path.display()
            );
            result.duplicates.push(DuplicateGroup {
                entity_id: entity_id.to_string(),
                display_name: display_name(entity_id).unwrap_or_else(|| entity_id.to_string()),
                members: members.into_iter().cloned().collect(),
            });
        }
    }
    result
}

/// Member of `entity_id`'s duplicate group that lives under `root`.
pub fn select_source<'a>(
    groups: &'a [DuplicateGroup],
    entity_id: &str,
    root: &Path,
) -> Option<&'a EntitySnapshot> {
    groups
        .iter()
        .find(|g| g.entity_id == entity_id)?
        .members
        .iter()
        .find(|m| same_root(&m.root_path, root))
}

/// The `limit` most recently modified snapshots, newest first.
pub fn recent(unique: &[EntitySnapshot], limit: usize) -> Vec<EntitySnapshot> {
    let mut sorted: Vec<&EntitySnapshot> = unique.iter().collect();
    sorted.sort_by(|a, b| newest_first(a, b).then_with(|| a.entity_id.cmp(&b.entity_id)));
    sorted.into_iter().take(limit).cloned().collect()
}
