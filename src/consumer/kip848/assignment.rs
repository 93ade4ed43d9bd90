//! KIP-848 Assignment Types
//!
//! Topic-partition sets exchanged with the coordinator and the delta the
//! member reconciles towards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A single (topic, partition) pair
pub type TopicPartition = (String, i32);

/// Topic-partitions organized by topic
///
/// Ordered so that events and requests list partitions deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPartitions {
    /// Map from topic name to partition indices
    partitions: BTreeMap<String, BTreeSet<i32>>,
}

impl TopicPartitions {
    /// Create empty topic partitions
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create from a list of (topic, partition) pairs
    pub fn from_partitions(partitions: impl IntoIterator<Item = TopicPartition>) -> Self {
        let mut tp = Self::empty();
        for (topic, partition) in partitions {
            tp.add((topic, partition));
        }
        tp
    }

    /// Add a partition
    pub fn add(&mut self, tp: TopicPartition) {
        self.partitions.entry(tp.0).or_default().insert(tp.1);
    }

    /// Remove a partition
    pub fn remove(&mut self, tp: &TopicPartition) {
        if let Some(parts) = self.partitions.get_mut(&tp.0) {
            parts.remove(&tp.1);
            if parts.is_empty() {
                self.partitions.remove(&tp.0);
            }
        }
    }

    /// Check if contains a partition
    pub fn contains(&self, tp: &TopicPartition) -> bool {
        self.partitions
            .get(&tp.0)
            .map(|parts| parts.contains(&tp.1))
            .unwrap_or(false)
    }

    /// Get all topics
    pub fn topics(&self) -> impl Iterator<Item = &String> {
        self.partitions.keys()
    }

    /// Get partitions for a topic
    pub fn partitions_for_topic(&self, topic: &str) -> Option<&BTreeSet<i32>> {
        self.partitions.get(topic)
    }

    /// Iterate over (topic, partition) pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> + '_ {
        self.partitions
            .iter()
            .flat_map(|(topic, parts)| parts.iter().map(move |p| (topic.as_str(), *p)))
    }

    /// Convert to a flat list of (topic, partition) pairs
    pub fn as_list(&self) -> Vec<TopicPartition> {
        self.iter().map(|(t, p)| (t.to_string(), p)).collect()
    }

    /// Partitions present in `self` but not in `other`
    pub fn difference(&self, other: &TopicPartitions) -> TopicPartitions {
        let mut diff = TopicPartitions::empty();
        for (topic, partition) in self.iter() {
            let tp = (topic.to_string(), partition);
            if !other.contains(&tp) {
                diff.add(tp);
            }
        }
        diff
    }

    /// Check whether the two sets share any partition
    pub fn intersects(&self, other: &TopicPartitions) -> bool {
        self.iter()
            .any(|(topic, partition)| other.contains(&(topic.to_string(), partition)))
    }

    /// Add every partition of `other`
    pub fn extend(&mut self, other: &TopicPartitions) {
        for (topic, partition) in other.iter() {
            self.add((topic.to_string(), partition));
        }
    }

    /// Remove every partition of `other`
    pub fn subtract(&mut self, other: &TopicPartitions) {
        for (topic, partition) in other.iter() {
            self.remove(&(topic.to_string(), partition));
        }
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Get total partition count
    pub fn len(&self) -> usize {
        self.partitions.values().map(|s| s.len()).sum()
    }
}

impl fmt::Display for TopicPartitions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (topic, partition)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}-{}", topic, partition)?;
        }
        write!(f, "]")
    }
}

impl FromIterator<TopicPartition> for TopicPartitions {
    fn from_iter<T: IntoIterator<Item = TopicPartition>>(iter: T) -> Self {
        Self::from_partitions(iter)
    }
}

/// Delta between owned and target assignments for incremental reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentDelta {
    /// Partitions to revoke (owned but not in target)
    pub to_revoke: TopicPartitions,

    /// Partitions to assign (in target but not owned)
    pub to_assign: TopicPartitions,
}

impl AssignmentDelta {
    /// Compute delta between owned and target assignments
    pub fn compute(owned: &TopicPartitions, target: &TopicPartitions) -> Self {
        Self {
            to_revoke: owned.difference(target),
            to_assign: target.difference(owned),
        }
    }

    /// Check if there are any changes
    pub fn is_empty(&self) -> bool {
        self.to_revoke.is_empty() && self.to_assign.is_empty()
    }
}
