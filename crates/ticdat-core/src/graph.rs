use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::schema::Schema;

/// Summary of FK graph structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FkGraphSummary {
    pub nodes: usize,
    pub edges: usize,
}

/// Report for FK dependency ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FkGraphReport {
    pub summary: FkGraphSummary,
    pub topo_order: Option<Vec<String>>,
    pub cycle: Option<Vec<String>>,
}

/// Build a deterministic FK dependency report for a schema.
///
/// Parents come before the tables that reference them. Self references do
/// not constrain the order.
pub fn build_fk_graph_report(schema: &Schema) -> FkGraphReport {
    let graph = build_adjacency(schema);
    let nodes = graph.len();
    let edges = graph.values().map(|targets| targets.len()).sum();
    let summary = FkGraphSummary { nodes, edges };

    match toposort(&graph) {
        Ok(order) => FkGraphReport {
            summary,
            topo_order: Some(order),
            cycle: None,
        },
        Err(cycle) => FkGraphReport {
            summary,
            topo_order: None,
            cycle: Some(cycle),
        },
    }
}

fn build_adjacency(schema: &Schema) -> BTreeMap<String, BTreeSet<String>> {
    let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for table in schema.table_names() {
        graph.entry(table.to_string()).or_default();
    }

    for fk in schema.foreign_keys() {
        if fk.native_table == fk.foreign_table {
            continue;
        }
        graph
            .entry(fk.foreign_table.clone())
            .or_default()
            .insert(fk.native_table.clone());
    }

    graph
}

fn toposort(graph: &BTreeMap<String, BTreeSet<String>>) -> Result<Vec<String>, Vec<String>> {
    let mut indegree: BTreeMap<String, usize> = BTreeMap::new();

    for node in graph.keys() {
        indegree.entry(node.clone()).or_insert(0);
    }

    for targets in graph.values() {
        for target in targets {
            *indegree.entry(target.clone()).or_insert(0) += 1;
        }
    }

    let mut ready: BTreeSet<String> = indegree
        .iter()
        .filter_map(|(node, count)| if *count == 0 { Some(node.clone()) } else { None })
        .collect();

    let mut order = Vec::with_capacity(graph.len());

    while let Some(node) = ready.pop_first() {
        order.push(node.clone());

        if let Some(targets) = graph.get(&node) {
            for target in targets {
                if let Some(count) = indegree.get_mut(target) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(target.clone());
                    }
                }
            }
        }
    }

    if order.len() == graph.len() {
        Ok(order)
    } else {
        let cycle_nodes: Vec<String> = indegree
            .into_iter()
            .filter_map(|(node, count)| if count > 0 { Some(node) } else { None })
            .collect();
        Err(cycle_nodes)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::schema::SchemaBuilder;

    #[test]
    fn orders_parents_first() {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("nutritionQuantities", &["food", "category"], &["qty"])
            .unwrap()
            .declare_table("foods", &["name"], &["cost"])
            .unwrap()
            .declare_table("categories", &["name"], &["minNutrition"])
            .unwrap()
            .add_foreign_key("nutritionQuantities", "foods", ("food", "name"))
            .unwrap()
            .add_foreign_key("nutritionQuantities", "categories", ("category", "name"))
            .unwrap();
        let schema = builder.build().unwrap();

        let order = schema.table_order().expect("acyclic");
        let position = |name: &str| order.iter().position(|item| item == name).unwrap();
        assert!(position("foods") < position("nutritionQuantities"));
        assert!(position("categories") < position("nutritionQuantities"));
    }

    #[test]
    fn reports_cycle() {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("left", &["id"], &["right_id"])
            .unwrap()
            .declare_table("right", &["id"], &["left_id"])
            .unwrap()
            .add_foreign_key("left", "right", ("right_id", "id"))
            .unwrap()
            .add_foreign_key("right", "left", ("left_id", "id"))
            .unwrap();
        let schema = builder.build().unwrap();

        let report = schema.fk_graph_report();
        assert!(report.topo_order.is_none());
        assert_eq!(
            report.cycle,
            Some(vec!["left".to_string(), "right".to_string()])
        );
        match schema.table_order() {
            Err(Error::CyclicForeignKeys(tables)) => assert_eq!(tables.len(), 2),
            other => panic!("expected a cycle error, got {other:?}"),
        }
    }

    #[test]
    fn self_reference_does_not_block_ordering() {
        let mut builder = SchemaBuilder::new();
        builder
            .declare_table("employees", &["id"], &["manager"])
            .unwrap()
            .add_foreign_key("employees", "employees", ("manager", "id"))
            .unwrap();
        let schema = builder.build().unwrap();
        assert_eq!(schema.table_order().unwrap(), vec!["employees".to_string()]);
    }
}
