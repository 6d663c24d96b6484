//! The transform pipeline: applies configured [`TransformTable`]s to one
//! source change event, producing zero or more target change events.

use crate::functions::{TransformContext, TransformRegistry};
use crate::{DeleteAction, TransformColumn, TransformError, TransformPoint, TransformTable, TransformedValue};
use std::collections::HashMap;
use std::sync::Arc;
use sync_model::event::Cell;
use sync_model::{Column, ColumnTypeCode, EventType, RowEvent, Table};
use tracing::warn;

/// What the pipeline produced for one source event.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutput {
    /// No transform is configured for the source table at this point;
    /// the caller applies the original event unchanged.
    Unmatched,
    /// Transforms matched; apply these target events instead (possibly
    /// none, when every target row was suppressed).
    Events(Vec<(Table, RowEvent)>),
}

/// Applies a read-only set of transform configurations using functions
/// resolved from an injected registry.
pub struct TransformPipeline {
    registry: Arc<TransformRegistry>,
    transforms: Vec<TransformTable>,
}

impl TransformPipeline {
    pub fn new(registry: Arc<TransformRegistry>, transforms: Vec<TransformTable>) -> Self {
        Self {
            registry,
            transforms,
        }
    }

    /// True when at least one transform is configured for the table at
    /// the given point.
    pub fn matches(&self, point: TransformPoint, source_qualified_name: &str) -> bool {
        self.transforms
            .iter()
            .any(|t| t.point == point && t.source_qualified_name() == source_qualified_name)
    }

    /// Transform one source event.
    ///
    /// Non-DML events (sql/create/script payloads) pass through
    /// untransformed. For DML, every configured transform for the
    /// source table contributes its target events in declaration order.
    pub fn transform(
        &self,
        point: TransformPoint,
        source_table: &Table,
        event: &RowEvent,
        source_node_id: &str,
        target_node_id: &str,
    ) -> Result<TransformOutput, TransformError> {
        if !event.event_type.is_dml() {
            return Ok(TransformOutput::Unmatched);
        }
        let source_name = source_table.qualified_name();
        let matching: Vec<&TransformTable> = self
            .transforms
            .iter()
            .filter(|t| t.point == point && t.source_qualified_name() == source_name)
            .collect();
        if matching.is_empty() {
            return Ok(TransformOutput::Unmatched);
        }

        let (source_values, old_values) = build_value_maps(source_table, event);
        let mut output = Vec::new();
        for transform in matching {
            self.apply_table_transform(
                transform,
                event,
                &source_values,
                &old_values,
                source_node_id,
                target_node_id,
                &mut output,
            )?;
        }
        Ok(TransformOutput::Events(output))
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_table_transform(
        &self,
        transform: &TransformTable,
        event: &RowEvent,
        source_values: &HashMap<String, Cell>,
        old_values: &HashMap<String, Cell>,
        source_node_id: &str,
        target_node_id: &str,
        output: &mut Vec<(Table, RowEvent)>,
    ) -> Result<(), TransformError> {
        let target_type = match event.event_type {
            EventType::Insert if transform.update_first => EventType::Update,
            EventType::Insert => EventType::Insert,
            EventType::Update => EventType::Update,
            EventType::Delete => match transform.delete_action {
                DeleteAction::DelRow => EventType::Delete,
                DeleteAction::UpdateCol => EventType::Update,
                DeleteAction::None => return Ok(()),
            },
            other => other,
        };

        let evaluate = |column: &TransformColumn| -> Result<TransformedValue, TransformError> {
            let source_value = match &column.source_name {
                Some(name) => match source_values.get(&name.to_lowercase()) {
                    Some(cell) => cell.clone(),
                    None => {
                        warn!(
                            source_column = name.as_str(),
                            target_table = transform.target_table.as_str(),
                            "transform source column not present on event; using NULL"
                        );
                        None
                    }
                },
                None => None,
            };
            let ctx = TransformContext {
                event_type: event.event_type,
                source_values,
                old_values,
                source_value,
                expression: column.expression.as_deref(),
                source_node_id,
                target_node_id,
            };
            self.registry.get(&column.transform_type)?.apply(&ctx)
        };

        // primary-key columns first; each extra candidate value clones
        // the in-progress draft (cartesian expansion)
        let mut drafts: Vec<Vec<(TransformColumn, Cell)>> = vec![Vec::new()];
        for column in transform.pk_columns() {
            match evaluate(column) {
                Ok(TransformedValue::Single(value)) => {
                    for draft in &mut drafts {
                        draft.push((column.clone(), value.clone()));
                    }
                }
                Ok(TransformedValue::Multiple(candidates)) => {
                    if candidates.is_empty() {
                        return Ok(());
                    }
                    let mut expanded = Vec::with_capacity(drafts.len() * candidates.len());
                    for draft in &drafts {
                        for candidate in &candidates {
                            let mut clone = draft.clone();
                            clone.push((column.clone(), candidate.clone()));
                            expanded.push(clone);
                        }
                    }
                    drafts = expanded;
                }
                Err(TransformError::IgnoreColumn) => {}
                Err(TransformError::IgnoreRow) => return Ok(()),
                Err(other) => return Err(other),
            }
        }

        let wants_values = target_type != EventType::Delete;
        let mut completed: Vec<Vec<(TransformColumn, Cell)>> = Vec::with_capacity(drafts.len());
        'draft: for mut draft in drafts {
            if wants_values {
                for column in transform.value_columns() {
                    match evaluate(column) {
                        Ok(TransformedValue::Single(value)) => draft.push((column.clone(), value)),
                        Ok(TransformedValue::Multiple(mut candidates)) => {
                            // only key columns expand; elsewhere the first
                            // candidate wins
                            warn!(
                                target_column = column.target_name.as_str(),
                                "multi-valued transform on non-key column; using first candidate"
                            );
                            draft.push((column.clone(), candidates.drain(..).next().flatten()));
                        }
                        Err(TransformError::IgnoreColumn) => continue,
                        Err(TransformError::IgnoreRow) => {
                            completed.clear();
                            break 'draft;
                        }
                        Err(other) => return Err(other),
                    }
                }
            }
            completed.push(draft);
        }

        for draft in completed {
            output.push(build_target_event(transform, target_type, draft));
        }
        Ok(())
    }
}

/// Lower-cased name -> value maps for the event's current and before
/// images. Deletes expose their before image (or key) as the current
/// values, since that is all a delete carries.
fn build_value_maps(
    table: &Table,
    event: &RowEvent,
) -> (HashMap<String, Cell>, HashMap<String, Cell>) {
    let zip = |names: Vec<&str>, cells: &Vec<Cell>| -> HashMap<String, Cell> {
        names
            .iter()
            .zip(cells.iter())
            .map(|(name, cell)| (name.to_lowercase(), cell.clone()))
            .collect()
    };
    let old_values = match &event.old_data {
        Some(cells) => zip(table.column_names(), cells),
        None => HashMap::new(),
    };
    let source_values = match event.event_type {
        EventType::Delete => {
            if !old_values.is_empty() {
                old_values.clone()
            } else if let Some(pk) = &event.pk_data {
                zip(table.primary_key_names(), pk)
            } else {
                HashMap::new()
            }
        }
        _ => match &event.row_data {
            Some(cells) => zip(table.column_names(), cells),
            None => HashMap::new(),
        },
    };
    (source_values, old_values)
}

fn build_target_event(
    transform: &TransformTable,
    target_type: EventType,
    draft: Vec<(TransformColumn, Cell)>,
) -> (Table, RowEvent) {
    let columns: Vec<Column> = draft
        .iter()
        .map(|(tc, _)| {
            let mut column = Column::new(tc.target_name.clone(), ColumnTypeCode::Other);
            column.primary_key = tc.pk;
            column
        })
        .collect();
    let table = Table::qualified(
        transform.target_catalog.clone(),
        transform.target_schema.clone(),
        transform.target_table.clone(),
        columns,
    );

    let pk_cells: Vec<Cell> = draft
        .iter()
        .filter(|(tc, _)| tc.pk)
        .map(|(_, cell)| cell.clone())
        .collect();
    let all_cells: Vec<Cell> = draft.iter().map(|(_, cell)| cell.clone()).collect();

    let event = match target_type {
        EventType::Insert => RowEvent::insert(all_cells),
        EventType::Update => RowEvent::update(all_cells, pk_cells),
        EventType::Delete => RowEvent::delete(pk_cells),
        other => RowEvent {
            event_type: other,
            row_data: Some(all_cells),
            old_data: None,
            pk_data: Some(pk_cells),
        },
    };
    (table, event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_table() -> Table {
        Table::new(
            "orders",
            vec![
                Column::primary_key("id", ColumnTypeCode::BigInt),
                Column::new("region", ColumnTypeCode::Varchar),
                Column::new("total", ColumnTypeCode::Decimal),
            ],
        )
    }

    fn pipeline(transforms: Vec<TransformTable>) -> TransformPipeline {
        TransformPipeline::new(Arc::new(TransformRegistry::with_builtins()), transforms)
    }

    #[test]
    fn test_unmatched_table_passes_through() {
        let p = pipeline(vec![]);
        let event = RowEvent::insert(vec![Some("1".into()), Some("us".into()), Some("10".into())]);
        let out = p
            .transform(TransformPoint::Load, &source_table(), &event, "a", "b")
            .unwrap();
        assert_eq!(out, TransformOutput::Unmatched);
    }

    #[test]
    fn test_simple_rename_and_constant() {
        let p = pipeline(vec![TransformTable::new(
            "orders",
            "order_mirror",
            TransformPoint::Load,
            vec![
                TransformColumn::copy("id", "order_id").as_pk(),
                TransformColumn::copy("total", "amount"),
                TransformColumn {
                    source_name: None,
                    target_name: "source".to_string(),
                    pk: false,
                    transform_type: "const".to_string(),
                    expression: Some("replicated".to_string()),
                },
            ],
        )]);
        let event = RowEvent::insert(vec![Some("1".into()), Some("us".into()), Some("10".into())]);
        let out = p
            .transform(TransformPoint::Load, &source_table(), &event, "a", "b")
            .unwrap();
        let TransformOutput::Events(events) = out else {
            panic!("expected events");
        };
        assert_eq!(events.len(), 1);
        let (table, event) = &events[0];
        assert_eq!(table.name, "order_mirror");
        assert_eq!(table.column_names(), vec!["order_id", "amount", "source"]);
        assert_eq!(table.primary_key_names(), vec!["order_id"]);
        assert_eq!(
            event.row_data,
            Some(vec![
                Some("1".into()),
                Some("10".into()),
                Some("replicated".into())
            ])
        );
    }

    #[test]
    fn test_pk_fanout_produces_one_event_per_candidate() {
        let p = pipeline(vec![TransformTable::new(
            "orders",
            "order_shard",
            TransformPoint::Load,
            vec![
                TransformColumn::copy("id", "shard_key")
                    .as_pk()
                    .with_transform("multiply")
                    .with_expression("east-:VALUE|west-:VALUE"),
                TransformColumn::copy("total", "amount"),
            ],
        )]);
        let event = RowEvent::insert(vec![Some("9".into()), Some("us".into()), Some("5".into())]);
        let out = p
            .transform(TransformPoint::Load, &source_table(), &event, "a", "b")
            .unwrap();
        let TransformOutput::Events(events) = out else {
            panic!("expected events");
        };
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].1.row_data,
            Some(vec![Some("east-9".into()), Some("5".into())])
        );
        assert_eq!(
            events[1].1.row_data,
            Some(vec![Some("west-9".into()), Some("5".into())])
        );
    }

    #[test]
    fn test_delete_actions() {
        let del_row = TransformTable::new(
            "orders",
            "order_mirror",
            TransformPoint::Load,
            vec![
                TransformColumn::copy("id", "order_id").as_pk(),
                TransformColumn::copy("total", "amount"),
            ],
        );
        let p = pipeline(vec![del_row.clone()]);
        let event = RowEvent::delete(vec![Some("3".into())]);
        let TransformOutput::Events(events) = p
            .transform(TransformPoint::Load, &source_table(), &event, "a", "b")
            .unwrap()
        else {
            panic!("expected events");
        };
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.event_type, EventType::Delete);
        assert_eq!(events[0].1.pk_data, Some(vec![Some("3".into())]));

        let p = pipeline(vec![del_row.clone().with_delete_action(DeleteAction::None)]);
        let TransformOutput::Events(events) = p
            .transform(TransformPoint::Load, &source_table(), &event, "a", "b")
            .unwrap()
        else {
            panic!("expected events");
        };
        assert!(events.is_empty());

        let soft = TransformTable::new(
            "orders",
            "order_mirror",
            TransformPoint::Load,
            vec![
                TransformColumn::copy("id", "order_id").as_pk(),
                TransformColumn {
                    source_name: None,
                    target_name: "deleted".to_string(),
                    pk: false,
                    transform_type: "const".to_string(),
                    expression: Some("1".to_string()),
                },
            ],
        )
        .with_delete_action(DeleteAction::UpdateCol);
        let p = pipeline(vec![soft]);
        let TransformOutput::Events(events) = p
            .transform(TransformPoint::Load, &source_table(), &event, "a", "b")
            .unwrap()
        else {
            panic!("expected events");
        };
        assert_eq!(events[0].1.event_type, EventType::Update);
        assert_eq!(
            events[0].1.row_data,
            Some(vec![Some("3".into()), Some("1".into())])
        );
    }

    #[test]
    fn test_update_first_demotes_insert() {
        let p = pipeline(vec![TransformTable::new(
            "orders",
            "order_mirror",
            TransformPoint::Load,
            vec![
                TransformColumn::copy("id", "order_id").as_pk(),
                TransformColumn::copy("total", "amount"),
            ],
        )
        .with_update_first()]);
        let event = RowEvent::insert(vec![Some("1".into()), Some("us".into()), Some("10".into())]);
        let TransformOutput::Events(events) = p
            .transform(TransformPoint::Load, &source_table(), &event, "a", "b")
            .unwrap()
        else {
            panic!("expected events");
        };
        assert_eq!(events[0].1.event_type, EventType::Update);
    }

    #[test]
    fn test_missing_source_column_becomes_null() {
        let p = pipeline(vec![TransformTable::new(
            "orders",
            "order_mirror",
            TransformPoint::Load,
            vec![
                TransformColumn::copy("id", "order_id").as_pk(),
                TransformColumn::copy("no_such_column", "mystery"),
            ],
        )]);
        let event = RowEvent::insert(vec![Some("1".into()), Some("us".into()), Some("10".into())]);
        let TransformOutput::Events(events) = p
            .transform(TransformPoint::Load, &source_table(), &event, "a", "b")
            .unwrap()
        else {
            panic!("expected events");
        };
        assert_eq!(events[0].1.row_data, Some(vec![Some("1".into()), None]));
    }

    #[test]
    fn test_extract_point_filtering() {
        let p = pipeline(vec![TransformTable::new(
            "orders",
            "order_mirror",
            TransformPoint::Extract,
            vec![TransformColumn::copy("id", "order_id").as_pk()],
        )]);
        let event = RowEvent::insert(vec![Some("1".into()), Some("us".into()), Some("10".into())]);
        let out = p
            .transform(TransformPoint::Load, &source_table(), &event, "a", "b")
            .unwrap();
        assert_eq!(out, TransformOutput::Unmatched);
        assert!(p.matches(TransformPoint::Extract, "orders"));
    }
}
