use parking_lot::Mutex;
use std::collections::HashSet;
use std::hash::Hash;

/// The values a node has already accepted. Only additions are possible.
///
/// Every mutation driven by gossip is gated on [`observe`](SeenSet::observe)
/// returning `true`, which makes applying a delivery more than once harmless.
pub struct SeenSet<V> {
  values: Mutex<HashSet<V>>,
}
impl<V: Hash + Eq + Ord + Clone> SeenSet<V> {
  pub fn new() -> SeenSet<V> {
    SeenSet {
      values: Mutex::new(HashSet::new()),
    }
  }

  /// Inserts `value`, returning whether it was new.
  pub fn observe(&self, value: V) -> bool {
    self.values.lock().insert(value)
  }

  /// Observes a batch under one lock acquisition. Returns the values that
  /// were new, in input order and without repeats.
  pub fn observe_all<I: IntoIterator<Item = V>>(&self, values: I) -> Vec<V> {
    let mut seen = self.values.lock();
    values
      .into_iter()
      .filter(|v| seen.insert(v.clone()))
      .collect()
  }

  pub fn contains(&self, value: &V) -> bool {
    self.values.lock().contains(value)
  }

  /// A sorted copy of every value observed.
  pub fn snapshot(&self) -> Vec<V> {
    let mut values = self.values.lock().iter().cloned().collect::<Vec<_>>();
    values.sort();
    values
  }

  pub fn len(&self) -> usize {
    self.values.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.lock().is_empty()
  }
}
impl<V: Hash + Eq + Ord + Clone> Default for SeenSet<V> {
  fn default() -> Self {
    SeenSet::new()
  }
}

#[test]
fn test_observe_is_idempotent() {
  let seen = SeenSet::new();
  assert!(seen.observe(3));
  assert!(!seen.observe(3));
  assert!(seen.observe(1));
  assert_eq!(seen.len(), 2);
  assert!(seen.contains(&1));
  assert!(!seen.contains(&2));
  assert_eq!(seen.snapshot(), vec![1, 3]);
}

#[test]
fn test_observe_all_keeps_input_order() {
  let seen = SeenSet::new();
  seen.observe(5);
  assert_eq!(seen.observe_all(vec![9, 5, 2, 9, 7]), vec![9, 2, 7]);
  assert!(seen.observe_all(vec![2, 7]).is_empty());
  assert_eq!(seen.snapshot(), vec![2, 5, 7, 9]);
}

#[test]
fn test_concurrent_observers_agree() {
  use std::sync::Arc;
  let seen = Arc::new(SeenSet::new());
  let (tx, rx) = crossbeam::channel::unbounded();
  let handles = (0..4)
    .map(|_| {
      let seen = seen.clone();
      let tx = tx.clone();
      std::thread::spawn(move || {
        for v in 0..1000u32 {
          if seen.observe(v) {
            tx.send(v).unwrap();
          }
        }
      })
    })
    .collect::<Vec<_>>();
  for h in handles {
    h.join().unwrap();
  }
  drop(tx);
  let mut firsts = rx.iter().collect::<Vec<_>>();
  firsts.sort();
  assert_eq!(firsts, (0..1000).collect::<Vec<_>>());
}
