//! Cached source-to-target column mapping.

use std::collections::HashMap;
use std::sync::Arc;
use sync_model::event::Cell;
use sync_model::Table;

/// Per target-column ordinal, the source-column ordinal feeding it.
pub type Mapping = Arc<Vec<Option<usize>>>;

/// Computes and caches positional column mappings between a source and
/// a target table definition.
///
/// Target columns are authoritative: a source column with no
/// same-named target column is dropped, a target column with no
/// same-named source column stays unset (NULL). Matching is
/// case-insensitive. The cache key is the concatenation of the two
/// qualified names; [`ColumnMapper::clear`] and
/// [`ColumnMapper::refresh`] exist because table definitions can change
/// mid-session (a re-declared table on the wire, DDL applied between
/// batches) and a stale mapping would scramble values silently.
#[derive(Default)]
pub struct ColumnMapper {
    cache: HashMap<String, Mapping>,
}

impl ColumnMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mapping for a (source, target) pair, computed on first use.
    pub fn mapping(&mut self, source: &Table, target: &Table) -> Mapping {
        let key = cache_key(source, target);
        if let Some(mapping) = self.cache.get(&key) {
            return mapping.clone();
        }
        let mapping: Mapping = Arc::new(
            target
                .columns
                .iter()
                .map(|t| source.column_index(&t.name))
                .collect(),
        );
        self.cache.insert(key, mapping.clone());
        mapping
    }

    /// Map source-ordered values onto the target column order.
    pub fn map_values(mapping: &Mapping, source_values: &[Cell]) -> Vec<Cell> {
        mapping
            .iter()
            .map(|source_index| {
                source_index
                    .and_then(|i| source_values.get(i))
                    .cloned()
                    .flatten()
            })
            .collect()
    }

    /// Drop every cached mapping.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Drop the cached mapping for one (source, target) pair.
    pub fn refresh(&mut self, source: &Table, target: &Table) {
        self.cache.remove(&cache_key(source, target));
    }
}

fn cache_key(source: &Table, target: &Table) -> String {
    format!("{}>{}", source.qualified_name(), target.qualified_name())
}

/// Map values carried for one named column list onto another
/// (used for key values, whose positional order follows the source
/// key columns rather than the full row).
pub fn map_by_names(
    source_names: &[&str],
    source_values: &[Cell],
    target_names: &[&str],
) -> Vec<Cell> {
    target_names
        .iter()
        .map(|target| {
            source_names
                .iter()
                .position(|source| source.eq_ignore_ascii_case(target))
                .and_then(|i| source_values.get(i))
                .cloned()
                .flatten()
        })
        .collect()
}
