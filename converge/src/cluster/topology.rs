use crate::core::PeerId;
use im::{OrdMap, OrdSet};
use std::collections::VecDeque;

/// An undirected spanning tree over the peers of a cluster, with a bound on
/// the number of neighbors of each node.
///
/// Edges are stored in both directions. Every member computes the tree from
/// the same sorted peer list, so all members agree on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
  rows: OrdMap<PeerId, OrdSet<PeerId>>,
}
impl Topology {
  /// Builds the tree breadth-first from the lowest peer id. Each node takes
  /// unplaced peers, in sorted order, as children until its neighbor count
  /// (parent edge included) reaches `fanout`. A `fanout` below 2 is raised to
  /// 2, the smallest bound that still spans a path.
  pub fn spanning_tree<'a, I>(peers: I, fanout: usize) -> Topology
  where
    I: IntoIterator<Item = &'a PeerId>,
  {
    let fanout = fanout.max(2);
    let sorted = peers.into_iter().cloned().collect::<OrdSet<PeerId>>();
    let order = sorted.iter().cloned().collect::<Vec<PeerId>>();
    let mut rows = order
      .iter()
      .map(|p| (p.clone(), OrdSet::<PeerId>::new()))
      .collect::<OrdMap<PeerId, OrdSet<PeerId>>>();
    let mut next = 1;
    let mut frontier = order.first().cloned().into_iter().collect::<VecDeque<_>>();
    while next < order.len() {
      let head = match frontier.pop_front() {
        Some(head) => head,
        None => break,
      };
      while next < order.len() && rows[&head].len() < fanout {
        let child = &order[next];
        next += 1;
        rows[&head].insert(child.clone());
        rows[child].insert(head.clone());
        frontier.push_back(child.clone());
      }
    }
    Topology { rows: rows }
  }

  /// A topology where only `peer`'s row is known, as handed out by a client.
  pub fn from_row<'a, I>(peer: &str, row: I) -> Topology
  where
    I: IntoIterator<Item = &'a PeerId>,
  {
    let row = row.into_iter().filter(|p| *p != peer).cloned().collect();
    Topology {
      rows: OrdMap::unit(peer.to_string(), row),
    }
  }

  /// The neighbors of `peer` in ascending order. Unknown peers have none.
  pub fn neighbors(&self, peer: &str) -> Vec<PeerId> {
    self
      .rows
      .get(peer)
      .map(|row| row.iter().cloned().collect())
      .unwrap_or_default()
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  pub fn max_degree(&self) -> usize {
    self.rows.values().map(OrdSet::len).max().unwrap_or(0)
  }

  pub fn is_symmetric(&self) -> bool {
    self.rows.iter().all(|(peer, row)| {
      row
        .iter()
        .all(|n| self.rows.get(n).map_or(false, |r| r.contains(peer)))
    })
  }

  /// Whether every peer can reach every other peer.
  pub fn is_connected(&self) -> bool {
    let start = match self.rows.keys().next() {
      Some(start) => start.clone(),
      None => return true,
    };
    let mut reached = OrdSet::unit(start.clone());
    let mut frontier = vec![start];
    while let Some(peer) = frontier.pop() {
      for n in self.neighbors(&peer) {
        if reached.insert(n.clone()).is_none() {
          frontier.push(n);
        }
      }
    }
    reached.len() == self.rows.len()
  }

  /// The number of edges. A tree over `n` peers has `n - 1`.
  pub fn edges(&self) -> usize {
    self.rows.values().map(OrdSet::len).sum::<usize>() / 2
  }
}

#[cfg(test)]
use rand::seq::SliceRandom;

#[cfg(test)]
fn peers(n: usize) -> Vec<PeerId> {
  (0..n).map(|i| format!("n{}", i)).collect()
}

#[test]
fn test_spanning_tree_is_valid() {
  for n in 1..=30 {
    let peers = peers(n);
    let topo = Topology::spanning_tree(&peers, 5);
    assert_eq!(topo.len(), n);
    assert!(topo.is_connected(), "{} peers disconnected", n);
    assert!(topo.is_symmetric(), "{} peers asymmetric", n);
    assert!(topo.max_degree() <= 5, "{} peers over fanout", n);
    assert_eq!(topo.edges(), n - 1);
  }
}

#[test]
fn test_spanning_tree_ignores_input_order() {
  let mut rng = rand::thread_rng();
  let mut shuffled = peers(17);
  let expected = Topology::spanning_tree(&shuffled, 5);
  for _ in 0..20 {
    shuffled.shuffle(&mut rng);
    let mut input = shuffled.clone();
    input.push(shuffled[0].clone());
    assert_eq!(Topology::spanning_tree(&input, 5), expected);
  }
}

#[test]
fn test_spanning_tree_shape() {
  let topo = Topology::spanning_tree(&peers(7), 5);
  // n0 is the root and takes five children, n1 has a parent and takes one.
  assert_eq!(topo.neighbors("n0"), vec!["n1", "n2", "n3", "n4", "n5"]);
  assert_eq!(topo.neighbors("n1"), vec!["n0", "n6"]);
  assert_eq!(topo.neighbors("n6"), vec!["n1"]);
  assert!(Topology::spanning_tree(&peers(1), 5).neighbors("n0").is_empty());
  assert!(topo.neighbors("n9").is_empty());
}

#[test]
fn test_small_fanout_is_clamped() {
  let topo = Topology::spanning_tree(&peers(10), 0);
  assert!(topo.is_connected());
  assert_eq!(topo.max_degree(), 2);
}

#[test]
fn test_row_excludes_self() {
  let row = vec!["n1".to_string(), "n0".to_string(), "n2".to_string()];
  let topo = Topology::from_row("n0", &row);
  assert_eq!(topo.neighbors("n0"), vec!["n1", "n2"]);
}
