use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{data::Dataset, errors::TreeError};

// an arena based binary tree, nodes are stored in pre-order
// the root is always at index 0

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
  /// `None` until the tree is fitted.
  Leaf { prediction: Option<u8> },
  /// Rows with the feature unset go left, set go right.
  Split {
    feature: usize,
    left: usize,
    right: usize,
  },
}

/// Binary classification tree over binary features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTree")]
pub struct Tree {
  nodes: Vec<Node>,
}

// unchecked arena as read by serde
#[derive(Deserialize)]
struct RawTree {
  nodes: Vec<Node>,
}

impl TryFrom<RawTree> for Tree {
  type Error = TreeError;

  /// Accepts only a non-empty arena whose nodes appear exactly once, in
  /// pre-order, with every child index in range.
  fn try_from(raw: RawTree) -> Result<Self, Self::Error> {
    let nodes = raw.nodes;
    if nodes.is_empty() {
      return Err(TreeError::MalformedTree {
        node: 0,
        reason: "no nodes",
      });
    }
    let mut next = 0;
    let mut stack = vec![0];
    while let Some(ix) = stack.pop() {
      if ix != next {
        return Err(TreeError::MalformedTree {
          node: ix,
          reason: "nodes are not in pre-order",
        });
      }
      next += 1;
      match nodes[ix] {
        Node::Split { left, right, .. } => {
          if left >= nodes.len() || right >= nodes.len() {
            return Err(TreeError::MalformedTree {
              node: ix,
              reason: "child index out of range",
            });
          }
          stack.push(right);
          stack.push(left);
        }
        Node::Leaf {
          prediction: Some(p),
        } if p > 1 => {
          return Err(TreeError::MalformedTree {
            node: ix,
            reason: "prediction is not binary",
          })
        }
        Node::Leaf { .. } => {}
      }
    }
    if next != nodes.len() {
      return Err(TreeError::MalformedTree {
        node: next,
        reason: "node not reachable from the root",
      });
    }
    Ok(Tree { nodes })
  }
}

/// Majority label of a `[negatives, positives]` count, ties go to 0.
pub fn majority(counts: [usize; 2]) -> u8 {
  (counts[1] > counts[0]) as u8
}

impl Default for Tree {
  fn default() -> Self {
    Tree::leaf()
  }
}

impl Tree {
  pub fn leaf() -> Self {
    Tree {
      nodes: vec![Node::Leaf { prediction: None }],
    }
  }

  pub fn split(feature: usize, left: Tree, right: Tree) -> Self {
    let left_offset = 1;
    let right_offset = 1 + left.nodes.len();
    let mut nodes = Vec::with_capacity(right_offset + right.nodes.len());
    nodes.push(Node::Split {
      feature,
      left: left_offset,
      right: right_offset,
    });
    nodes.extend(left.nodes.into_iter().map(|n| n.shifted(left_offset)));
    nodes.extend(right.nodes.into_iter().map(|n| n.shifted(right_offset)));
    Tree { nodes }
  }

  pub fn nodes(&self) -> &[Node] {
    &self.nodes
  }

  pub fn root(&self) -> &Node {
    &self.nodes[0]
  }

  /// Total node count, internal and leaves.
  pub fn size(&self) -> usize {
    self.nodes.len()
  }

  pub fn leaf_count(&self) -> usize {
    self.nodes.iter().filter(|n| n.is_leaf()).count()
  }

  /// Number of splits on the longest root to leaf path.
  pub fn depth(&self) -> usize {
    let mut deepest = 0;
    let mut stack = vec![(0, 0)];
    while let Some((ix, depth)) = stack.pop() {
      match self.nodes[ix] {
        Node::Leaf { .. } => deepest = deepest.max(depth),
        Node::Split { left, right, .. } => {
          stack.push((left, depth + 1));
          stack.push((right, depth + 1));
        }
      }
    }
    deepest
  }

  pub fn is_fitted(&self) -> bool {
    self.nodes.iter().all(|n| match n {
      Node::Leaf { prediction } => prediction.is_some(),
      Node::Split { .. } => true,
    })
  }

  /// Same shape and features, ignoring leaf predictions.
  pub fn same_structure(&self, other: &Tree) -> bool {
    self.nodes.len() == other.nodes.len()
      && self.nodes.iter().zip(other.nodes.iter()).all(|p| match p {
        (Node::Leaf { .. }, Node::Leaf { .. }) => true,
        (a @ Node::Split { .. }, b @ Node::Split { .. }) => a == b,
        _ => false,
      })
  }

  /// Assigns every leaf the majority label of the rows reaching it.
  ///
  /// The tree is left untouched if a split refers to a feature the data
  /// doesn't have.
  pub fn fit(&mut self, data: &Dataset) -> Result<(), TreeError> {
    self.check_features(data.n_features())?;
    let mut counts = vec![[0usize; 2]; self.nodes.len()];
    for row in 0..data.n_rows() {
      let leaf = self.route(data, row);
      counts[leaf][data.label(row) as usize] += 1;
    }
    for (node, c) in self.nodes.iter_mut().zip(counts) {
      if let Node::Leaf { prediction } = node {
        *prediction = Some(majority(c));
      }
    }
    Ok(())
  }

  pub fn predict(&self, data: &Dataset, row: usize) -> Result<u8, TreeError> {
    self.check_features(data.n_features())?;
    match self.nodes[self.route(data, row)] {
      Node::Leaf {
        prediction: Some(p),
      } => Ok(p),
      _ => Err(TreeError::NotFitted),
    }
  }

  /// Mean of the true positive and true negative rates on `data`, using the
  /// predictions of the last `fit`. A class missing from `data` is left out
  /// of the mean.
  pub fn balanced_accuracy(&self, data: &Dataset) -> Result<f64, TreeError> {
    self.check_features(data.n_features())?;
    if !self.is_fitted() {
      return Err(TreeError::NotFitted);
    }
    // confusion[label][prediction]
    let mut confusion = [[0usize; 2]; 2];
    for row in 0..data.n_rows() {
      if let Node::Leaf {
        prediction: Some(p),
      } = self.nodes[self.route(data, row)]
      {
        confusion[data.label(row) as usize][p as usize] += 1;
      }
    }
    let mut total = 0.0;
    let mut classes = 0;
    for (label, row) in confusion.iter().enumerate() {
      let n = row[0] + row[1];
      if n > 0 {
        total += row[label] as f64 / n as f64;
        classes += 1;
      }
    }
    Ok(if classes == 0 { 0.0 } else { total / classes as f64 })
  }

  fn route(&self, data: &Dataset, row: usize) -> usize {
    let mut ix = 0;
    loop {
      match self.nodes[ix] {
        Node::Leaf { .. } => return ix,
        Node::Split {
          feature,
          left,
          right,
        } => ix = if data.value(row, feature) { right } else { left },
      }
    }
  }

  fn check_features(&self, n_features: usize) -> Result<(), TreeError> {
    for node in self.nodes.iter() {
      if let Node::Split { feature, .. } = node {
        if *feature >= n_features {
          return Err(TreeError::FeatureOutOfRange {
            feature: *feature,
            n_features,
          });
        }
      }
    }
    Ok(())
  }
}

impl Node {
  pub fn is_leaf(&self) -> bool {
    matches!(self, Node::Leaf { .. })
  }

  fn shifted(self, offset: usize) -> Node {
    match self {
      Node::Split {
        feature,
        left,
        right,
      } => Node::Split {
        feature,
        left: left + offset,
        right: right + offset,
      },
      leaf => leaf,
    }
  }
}

enum Emit {
  Node(usize),
  Close,
}

// `leaf` or `(feature left right)`, predictions are not written
impl Display for Tree {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut stack = vec![Emit::Node(0)];
    let mut separate = false;
    while let Some(item) = stack.pop() {
      match item {
        Emit::Close => {
          write!(f, ")")?;
          separate = true;
        }
        Emit::Node(ix) => {
          if separate {
            write!(f, " ")?;
          }
          match self.nodes[ix] {
            Node::Leaf { .. } => write!(f, "leaf")?,
            Node::Split {
              feature,
              left,
              right,
            } => {
              write!(f, "({feature}")?;
              stack.push(Emit::Close);
              stack.push(Emit::Node(right));
              stack.push(Emit::Node(left));
            }
          }
          separate = true;
        }
      }
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
  Open,
  Close,
  Word(&'a str),
}

fn tokenize(s: &str) -> Vec<(usize, Token<'_>)> {
  let mut tokens = vec![];
  let mut word_start = None;
  for (ix, c) in s.char_indices() {
    if c == '(' || c == ')' || c.is_whitespace() {
      if let Some(start) = word_start.take() {
        tokens.push((start, Token::Word(&s[start..ix])));
      }
      match c {
        '(' => tokens.push((ix, Token::Open)),
        ')' => tokens.push((ix, Token::Close)),
        _ => {}
      }
    } else if word_start.is_none() {
      word_start = Some(ix);
    }
  }
  if let Some(start) = word_start {
    tokens.push((start, Token::Word(&s[start..])));
  }
  tokens
}

fn parse_error(position: usize, token: Option<Token<'_>>, reason: &'static str) -> TreeError {
  let token = match token {
    Some(Token::Open) => "(".to_string(),
    Some(Token::Close) => ")".to_string(),
    Some(Token::Word(w)) => w.to_string(),
    None => String::new(),
  };
  TreeError::Parse {
    position,
    token,
    reason,
  }
}

// an open split waiting for its subtrees
struct Frame {
  node: usize,
  filled: u8,
}

fn attach(
  nodes: &mut [Node],
  stack: &mut [Frame],
  child: usize,
  position: usize,
  token: Token<'_>,
) -> Result<(), TreeError> {
  if let Some(frame) = stack.last_mut() {
    if let Node::Split { left, right, .. } = &mut nodes[frame.node] {
      match frame.filled {
        0 => *left = child,
        1 => *right = child,
        _ => return Err(parse_error(position, Some(token), "expected ')' after two subtrees")),
      }
    }
    frame.filled += 1;
  }
  Ok(())
}

impl FromStr for Tree {
  type Err = TreeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let tokens = tokenize(s);
    let mut nodes: Vec<Node> = vec![];
    let mut stack: Vec<Frame> = vec![];
    let mut complete = false;
    let mut ix = 0;
    while ix < tokens.len() {
      let (position, token) = tokens[ix];
      if complete {
        return Err(parse_error(position, Some(token), "unexpected token after a complete tree"));
      }
      match token {
        Token::Open => {
          ix += 1;
          let feature = match tokens.get(ix) {
            Some(&(p, t @ Token::Word(w))) => w
              .parse::<usize>()
              .map_err(|_| parse_error(p, Some(t), "expected a feature index"))?,
            Some(&(p, t)) => return Err(parse_error(p, Some(t), "expected a feature index")),
            None => return Err(parse_error(s.len(), None, "unexpected end of input")),
          };
          let id = nodes.len();
          nodes.push(Node::Split {
            feature,
            left: 0,
            right: 0,
          });
          attach(&mut nodes, &mut stack, id, position, token)?;
          stack.push(Frame { node: id, filled: 0 });
        }
        Token::Word("leaf") => {
          let id = nodes.len();
          nodes.push(Node::Leaf { prediction: None });
          attach(&mut nodes, &mut stack, id, position, token)?;
          complete = stack.is_empty();
        }
        Token::Word(_) => return Err(parse_error(position, Some(token), "unexpected token")),
        Token::Close => match stack.pop() {
          None => return Err(parse_error(position, Some(token), "unbalanced ')'")),
          Some(frame) if frame.filled < 2 => {
            return Err(parse_error(position, Some(token), "a split needs two subtrees"))
          }
          Some(_) => complete = stack.is_empty(),
        },
      }
      ix += 1;
    }
    if !stack.is_empty() {
      return Err(parse_error(s.len(), None, "unexpected end of input, missing ')'"));
    }
    if nodes.is_empty() {
      return Err(parse_error(0, None, "empty input"));
    }
    Ok(Tree { nodes })
  }
}
