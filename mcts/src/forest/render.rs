use std::{
  collections::{HashSet, VecDeque},
  io::{self, Write},
};

use graphviz_rust::{
  attributes::{EdgeAttributes, NodeAttributes},
  dot_structures::{Edge as GEdge, EdgeTy, Graph, Id, Node as GNode, NodeId as GNid, Stmt, Vertex},
  printer::{DotPrinter, PrinterContext},
};

use super::{Forest, Node, NodeId, Plan};

fn dot_id(node_id: NodeId) -> GNid {
  GNid(Id::Plain(format!("n{}", node_id.0)), None)
}

/// The statistics graph, cut below `depth` levels and at nodes visited at
/// most `theta` times. A position shared by several parents is drawn once.
pub fn render_forest(forest: &Forest, theta: u32, depth: u32) -> Graph {
  let mut g = Graph::DiGraph {
    id: Id::Plain("forest".to_string()),
    strict: false,
    stmts: vec![],
  };
  let mut drawn = HashSet::from([forest.root()]);
  let mut queue = VecDeque::from([(forest.root(), depth)]);
  while let Some((node_id, depth)) = queue.pop_front() {
    let node = forest.node(node_id);
    g.add_stmt(Stmt::Node(GNode::new(
      dot_id(node_id),
      vec![NodeAttributes::label(label(node))],
    )));
    if depth == 0 || node.select_count() <= theta {
      continue;
    }
    for (&feature, &(left, right)) in &node.children {
      for (side, child) in [(0, left), (1, right)] {
        g.add_stmt(Stmt::Edge(GEdge {
          ty: EdgeTy::Pair(Vertex::N(dot_id(node_id)), Vertex::N(dot_id(child))),
          attributes: vec![EdgeAttributes::label(format!("\"x{feature}={side}\""))],
        }));
        if drawn.insert(child) {
          queue.push_back((child, depth - 1));
        }
      }
    }
  }
  g
}

pub fn save<W: Write>(forest: &Forest, mut w: W, theta: u32, depth: u32) -> io::Result<()> {
  let g = render_forest(forest, theta, depth);
  let mut ctx = PrinterContext::default();
  write!(w, "{}", g.print(&mut ctx))
}

fn label(node: &Node) -> String {
  let plan = match node.best_plan() {
    Plan::Stop => "leaf".to_string(),
    Plan::Split(feature) => format!("x{feature}"),
    Plan::Rollout(tree) => format!("playout of size {}", tree.size()),
  };
  let mut text = format!(
    "{} rows, {} visits\\nmean {:.4} over {}\\nbest {:.4} by {plan}",
    node.position().rows.len(),
    node.select_count(),
    node.value.value(),
    node.value.count(),
    node.best_value(),
  );
  if node.parents().len() > 1 {
    text.push_str(&format!("\\n{} parents", node.parents().len()));
  }
  format!("\"{text}\"")
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use bctree::{Dataset, Objective};

  use super::*;
  use crate::problem::TreeProblem;

  fn plain(id: &GNid) -> &str {
    match &id.0 {
      Id::Plain(s) => s,
      _ => "",
    }
  }

  #[test]
  fn shared_positions_are_drawn_once() {
    let data = Dataset::new(
      vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]],
      vec![0, 1, 1, 1],
    )
    .unwrap();
    let objective = Objective::new(&data, 0.001);
    let p = TreeProblem::new(Arc::new(data), objective, 1, None);
    let mut forest = Forest::new(16, &p);
    let root = forest.root();
    let (zero, _) = forest.get_ids_of_children(root, 0, &p);
    let (one, _) = forest.get_ids_of_children(root, 1, &p);
    let (shared, _) = forest.get_ids_of_children(zero, 1, &p);
    forest.get_ids_of_children(one, 0, &p);
    for id in [root, zero, one] {
      forest.node_mut(id).increment_select_count();
    }

    let Graph::DiGraph { stmts, .. } = render_forest(&forest, 0, 5) else {
      panic!("not a digraph");
    };
    let name = format!("n{}", shared.0);
    let nodes = stmts
      .iter()
      .filter(|s| matches!(s, Stmt::Node(n) if plain(&n.id) == name))
      .count();
    let incoming = stmts
      .iter()
      .filter(|s| match s {
        Stmt::Edge(GEdge {
          ty: EdgeTy::Pair(_, Vertex::N(to)),
          ..
        }) => plain(to) == name,
        _ => false,
      })
      .count();
    assert_eq!(nodes, 1);
    assert_eq!(incoming, 2);
    assert_eq!(
      stmts.iter().filter(|s| matches!(s, Stmt::Node(_))).count(),
      forest.len()
    );
  }

  #[test]
  fn unvisited_nodes_are_not_expanded() {
    let data = Dataset::new(vec![vec![0], vec![1]], vec![0, 1]).unwrap();
    let objective = Objective::new(&data, 0.0);
    let p = TreeProblem::new(Arc::new(data), objective, 1, None);
    let mut forest = Forest::new(4, &p);
    let root = forest.root();
    forest.get_ids_of_children(root, 0, &p);
    forest.node_mut(root).increment_select_count();

    let mut out = vec![];
    save(&forest, &mut out, 1, 5).unwrap();
    let dot = String::from_utf8(out).unwrap();
    assert!(dot.contains("digraph"));
    assert!(dot.contains("2 rows, 1 visits"));
    assert!(!dot.contains("x0=0"));

    let mut out = vec![];
    save(&forest, &mut out, 0, 5).unwrap();
    let dot = String::from_utf8(out).unwrap();
    assert!(dot.contains("x0=0"));
    assert!(dot.contains("1 rows, 0 visits"));
  }
}
