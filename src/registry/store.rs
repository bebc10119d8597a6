//! Subject registry implementation
//!
//! The single piece of state shared between source adapters (writers) and
//! broadcast cycles (readers).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::RwLock;

use super::subject::{Marker, Segment, Snapshot, Subject};

struct Inner {
    /// Subject name to slot in `order`
    index: HashMap<String, usize>,
    /// Subjects in creation order
    order: Vec<Arc<Subject>>,
}

/// Thread-safe store of current subject state
///
/// Each subject is held behind an `Arc` that is replaced wholesale on update,
/// so a snapshot only copies pointers under the read lock and can never
/// observe a half-written subject.
pub struct SubjectRegistry {
    inner: RwLock<Inner>,
}

impl SubjectRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                index: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Replace a subject's data
    ///
    /// Creates the subject on first sight. If the previous entry came from the
    /// same source with the same marker and segment counts, occluded markers
    /// keep their last known position. Otherwise the entry is re-established
    /// from this update. Two sources writing the same name: last write wins.
    pub async fn apply_update(
        &self,
        name: &str,
        mut markers: Vec<Marker>,
        segments: Vec<Segment>,
        source: &str,
    ) {
        let mut inner = self.inner.write().await;

        let slot = inner.index.get(name).copied();
        if let Some(slot) = slot {
            let previous = &inner.order[slot];

            if previous.layout_matches(&markers, &segments, source) {
                for (marker, old) in markers.iter_mut().zip(previous.markers.iter()) {
                    if marker.occluded {
                        marker.position = old.position;
                    }
                }
            } else {
                tracing::debug!(
                    subject = name,
                    source = source,
                    previous_source = %previous.source,
                    markers = markers.len(),
                    segments = segments.len(),
                    "Subject layout re-established"
                );
            }

            inner.order[slot] = Arc::new(Subject {
                name: name.to_string(),
                markers,
                segments,
                updated_at: SystemTime::now(),
                source: source.to_string(),
            });
        } else {
            let subject = Arc::new(Subject {
                name: name.to_string(),
                markers,
                segments,
                updated_at: SystemTime::now(),
                source: source.to_string(),
            });

            let slot = inner.order.len();
            inner.order.push(subject);
            inner.index.insert(name.to_string(), slot);

            tracing::info!(subject = name, source = source, "Subject registered");
        }
    }

    /// Consistent copy of every subject, in creation order
    pub async fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read().await;
        Snapshot::new(inner.order.clone())
    }

    /// Current state of one subject
    pub async fn get(&self, name: &str) -> Option<Arc<Subject>> {
        let inner = self.inner.read().await;
        inner.index.get(name).map(|&slot| Arc::clone(&inner.order[slot]))
    }

    /// Remove a subject. Returns whether it existed.
    pub async fn remove(&self, name: &str) -> bool {
        let mut inner = self.inner.write().await;

        let Some(slot) = inner.index.remove(name) else {
            return false;
        };
        inner.order.remove(slot);

        // Shift the slots of everything created after the removed subject
        for idx in inner.index.values_mut() {
            if *idx > slot {
                *idx -= 1;
            }
        }

        tracing::info!(subject = name, "Subject removed");
        true
    }

    /// Remove every subject
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.index.clear();
        inner.order.clear();
    }

    /// Number of subjects
    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for SubjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
