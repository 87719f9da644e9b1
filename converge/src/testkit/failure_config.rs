use crate::core::PeerId;
use im::HashMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which leg of an exchange between two members failures apply to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureMode {
  /// Requests may be lost before the receiver sees them.
  Request,
  /// Requests are handled, but replies may be lost.
  Response,
  /// Both legs.
  Message,
  None,
}
impl FailureMode {
  pub fn requests(&self) -> bool {
    matches!(self, FailureMode::Request | FailureMode::Message)
  }

  pub fn responses(&self) -> bool {
    matches!(self, FailureMode::Response | FailureMode::Message)
  }
}

#[derive(Default, Serialize, Deserialize, Clone, Copy, Debug)]
pub struct FailureConfig {
  pub drop_prob: f64,
  pub delay: Option<(Duration, Duration)>,
}
impl FailureConfig {
  pub fn lossy(drop_prob: f64) -> FailureConfig {
    FailureConfig {
      drop_prob: drop_prob,
      delay: None,
    }
  }

  /// Whether a message should be lost.
  pub fn drops(&self) -> bool {
    self.drop_prob > 0.0 && rand::random::<f64>() < self.drop_prob
  }

  /// A random delay within the configured bounds, if any.
  pub fn sample_delay(&self) -> Option<Duration> {
    self.delay.map(|(min, max)| {
      let range = min.as_millis()..=max.as_millis().max(min.as_millis());
      Duration::from_millis(SmallRng::from_entropy().gen_range(range) as u64)
    })
  }
}

/// Failure settings for the whole cluster, overridable per receiving member.
#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct FailureConfigMap {
  pub cluster_wide: FailureConfig,
  pub node_wide: HashMap<PeerId, FailureConfig>,
}
impl FailureConfigMap {
  pub fn get(&self, peer: &str) -> &FailureConfig {
    self.node_wide.get(peer).unwrap_or(&self.cluster_wide)
  }
}

#[test]
fn test_node_wide_overrides_cluster_wide() {
  let mut map = FailureConfigMap::default();
  map.cluster_wide = FailureConfig::lossy(0.5);
  map.node_wide.insert("n2".to_string(), FailureConfig::default());
  assert_eq!(map.get("n1").drop_prob, 0.5);
  assert_eq!(map.get("n2").drop_prob, 0.0);
  assert!(!map.get("n2").drops());
  assert!(map.get("n2").sample_delay().is_none());

  let slow = FailureConfig {
    drop_prob: 0.0,
    delay: Some((Duration::from_millis(5), Duration::from_millis(10))),
  };
  for _ in 0..50 {
    let d = slow.sample_delay().unwrap();
    assert!(d >= Duration::from_millis(5) && d <= Duration::from_millis(10));
  }
}
