//! Pluggable routing policies.

use crate::change::ChangeRow;
use std::collections::BTreeSet;
use tracing::warn;

/// Topology information available to every routing decision.
#[derive(Debug, Clone, Default)]
pub struct RoutingContext {
    /// The node doing the routing
    pub source_node_id: String,
    /// Enabled target node ids (the source node itself excluded)
    pub target_nodes: Vec<String>,
}

/// Where one change row should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Every enabled target node
    All,
    /// A specific node subset (intersected with the enabled targets)
    Nodes(BTreeSet<String>),
    /// No node; the row is recorded as unrouted, never silently lost
    Drop,
}

impl RouteDecision {
    /// Convenience constructor for a single node.
    pub fn node(node_id: impl Into<String>) -> Self {
        let mut nodes = BTreeSet::new();
        nodes.insert(node_id.into());
        Self::Nodes(nodes)
    }

    /// Resolve the decision against the known target set.
    pub fn resolve(&self, ctx: &RoutingContext) -> Vec<String> {
        match self {
            RouteDecision::All => ctx.target_nodes.clone(),
            RouteDecision::Nodes(nodes) => ctx
                .target_nodes
                .iter()
                .filter(|n| nodes.contains(*n))
                .cloned()
                .collect(),
            RouteDecision::Drop => Vec::new(),
        }
    }
}

/// Maps one change row to the set of destination nodes.
///
/// Routers are pure decisions over (context, row); anything stateful
/// (node registries, subscription tables) is captured at construction.
pub trait Router: Send + Sync {
    fn route(&self, ctx: &RoutingContext, row: &ChangeRow) -> RouteDecision;

    /// Identifier used in configuration.
    fn name(&self) -> &'static str;
}

/// Routes every row to every enabled target node.
#[derive(Default)]
pub struct DefaultRouter;

impl Router for DefaultRouter {
    fn route(&self, _ctx: &RoutingContext, _row: &ChangeRow) -> RouteDecision {
        RouteDecision::All
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Routes by comparing one captured column against an expression.
///
/// Two expression forms:
/// - `COLUMN=:NODE_ID` — the row goes to the node whose id equals the
///   column value (per-row addressing, e.g. a `store_id` column);
/// - `COLUMN=literal` — the row goes to all targets when the column
///   equals the literal, nowhere otherwise (subset filtering).
pub struct ColumnMatchRouter {
    column: String,
    match_node_id: bool,
    literal: Option<String>,
}

impl ColumnMatchRouter {
    /// Parse an expression of the two supported forms.
    pub fn from_expression(expression: &str) -> anyhow::Result<Self> {
        let (column, value) = expression
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("column match expression '{expression}' is not COLUMN=value"))?;
        let column = column.trim().to_string();
        let value = value.trim();
        if value == ":NODE_ID" {
            Ok(Self {
                column,
                match_node_id: true,
                literal: None,
            })
        } else {
            Ok(Self {
                column,
                match_node_id: false,
                literal: Some(value.to_string()),
            })
        }
    }
}

impl Router for ColumnMatchRouter {
    fn route(&self, _ctx: &RoutingContext, row: &ChangeRow) -> RouteDecision {
        let value = match row.column_value(&self.column) {
            Some(value) => value,
            None => {
                warn!(
                    column = self.column.as_str(),
                    table = row.table.as_str(),
                    "column match router found no value; dropping row from routing"
                );
                return RouteDecision::Drop;
            }
        };
        if self.match_node_id {
            RouteDecision::node(value)
        } else if self.literal.as_deref() == Some(value.as_str()) {
            RouteDecision::All
        } else {
            RouteDecision::Drop
        }
    }

    fn name(&self) -> &'static str {
        "column"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sync_model::EventType;

    fn row(column_names: &[&str], values: &[Option<&str>]) -> ChangeRow {
        ChangeRow {
            data_id: 1,
            transaction_id: None,
            trigger_id: "t".to_string(),
            channel_id: "default".to_string(),
            catalog: None,
            schema: None,
            table: "customer".to_string(),
            column_names: column_names.iter().map(|c| c.to_string()).collect(),
            pk_column_names: vec!["id".to_string()],
            event_type: EventType::Insert,
            row_data: Some(values.iter().map(|v| v.map(|s| s.to_string())).collect()),
            old_data: None,
            pk_data: None,
            create_time: Utc::now(),
        }
    }

    fn ctx() -> RoutingContext {
        RoutingContext {
            source_node_id: "root".to_string(),
            target_nodes: vec!["store-1".to_string(), "store-2".to_string()],
        }
    }

    #[test]
    fn test_default_router_hits_all_targets() {
        let decision = DefaultRouter.route(&ctx(), &row(&["id"], &[Some("1")]));
        assert_eq!(decision.resolve(&ctx()), vec!["store-1", "store-2"]);
    }

    #[test]
    fn test_node_id_addressing() {
        let router = ColumnMatchRouter::from_expression("STORE_ID=:NODE_ID").unwrap();
        let decision = router.route(&ctx(), &row(&["id", "store_id"], &[Some("1"), Some("store-2")]));
        assert_eq!(decision.resolve(&ctx()), vec!["store-2"]);

        // a node id outside the enabled target set resolves to nothing
        let decision = router.route(&ctx(), &row(&["id", "store_id"], &[Some("1"), Some("store-9")]));
        assert!(decision.resolve(&ctx()).is_empty());
    }

    #[test]
    fn test_literal_filtering() {
        let router = ColumnMatchRouter::from_expression("region=east").unwrap();
        let east = router.route(&ctx(), &row(&["region"], &[Some("east")]));
        assert_eq!(east, RouteDecision::All);
        let west = router.route(&ctx(), &row(&["region"], &[Some("west")]));
        assert_eq!(west, RouteDecision::Drop);
    }

    #[test]
    fn test_missing_column_drops() {
        let router = ColumnMatchRouter::from_expression("region=east").unwrap();
        let decision = router.route(&ctx(), &row(&["id"], &[Some("1")]));
        assert_eq!(decision, RouteDecision::Drop);
    }
}
