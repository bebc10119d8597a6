//! Tracked-subject data model
//!
//! A [`Subject`] is immutable once published to the registry; updates build a
//! new one and swap the `Arc`. Readers holding an older `Arc` keep a complete,
//! consistent copy.

use std::sync::Arc;
use std::time::SystemTime;

/// A single tracked 3D point
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    /// Marker label
    pub name: String,
    /// Position (x, y, z)
    pub position: [f64; 3],
    /// Marker is currently not visible; `position` is the last known value
    pub occluded: bool,
}

impl Marker {
    /// Create a visible marker
    pub fn new(name: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            name: name.into(),
            position: [x, y, z],
            occluded: false,
        }
    }

    /// Create an occluded marker. The position is replaced by the last known
    /// one when applied to an established subject.
    pub fn occluded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: [0.0; 3],
            occluded: true,
        }
    }
}

/// Rigid body / bone with position and orientation
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Segment label
    pub name: String,
    /// Translation (x, y, z)
    pub translation: [f64; 3],
    /// Rotation quaternion (x, y, z, w)
    pub rotation: [f64; 4],
}

impl Segment {
    pub fn new(name: impl Into<String>, translation: [f64; 3], rotation: [f64; 4]) -> Self {
        Self {
            name: name.into(),
            translation,
            rotation,
        }
    }
}

/// One tracked entity
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    /// Unique name (registry key)
    pub name: String,
    /// Markers in fixed slot order
    pub markers: Vec<Marker>,
    /// Segments in fixed slot order
    pub segments: Vec<Segment>,
    /// When this state was written
    pub updated_at: SystemTime,
    /// Tag of the adapter that last wrote this subject
    pub source: String,
}

impl Subject {
    /// Whether `markers`/`segments` fit the slot layout of this subject
    pub(super) fn layout_matches(&self, markers: &[Marker], segments: &[Segment], source: &str) -> bool {
        self.source == source
            && self.markers.len() == markers.len()
            && self.segments.len() == segments.len()
    }

    /// Look up a marker by name
    pub fn marker(&self, name: &str) -> Option<&Marker> {
        self.markers.iter().find(|m| m.name == name)
    }

    /// Look up a segment by name
    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }
}

/// Point-in-time copy of the registry, in subject creation order
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    subjects: Vec<Arc<Subject>>,
}

impl Snapshot {
    pub(crate) fn new(subjects: Vec<Arc<Subject>>) -> Self {
        Self { subjects }
    }

    /// Number of subjects
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Iterate subjects in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Subject> {
        self.subjects.iter().map(|s| s.as_ref())
    }

    /// Find a subject by name
    pub fn get(&self, name: &str) -> Option<&Subject> {
        self.iter().find(|s| s.name == name)
    }

    /// Subject names in order
    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|s| s.name.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Arc<Subject>;
    type IntoIter = std::slice::Iter<'a, Arc<Subject>>;

    fn into_iter(self) -> Self::IntoIter {
        self.subjects.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(source: &str, markers: usize, segments: usize) -> Subject {
        Subject {
            name: "Bob".into(),
            markers: (0..markers)
                .map(|i| Marker::new(format!("m{}", i), 0.0, 0.0, 0.0))
                .collect(),
            segments: (0..segments)
                .map(|i| Segment::new(format!("s{}", i), [0.0; 3], [0.0, 0.0, 0.0, 1.0]))
                .collect(),
            updated_at: SystemTime::UNIX_EPOCH,
            source: source.into(),
        }
    }

    #[test]
    fn test_layout_matches() {
        let s = subject("vicon", 2, 1);

        assert!(s.layout_matches(&s.markers.clone(), &s.segments.clone(), "vicon"));
        assert!(!s.layout_matches(&s.markers.clone(), &s.segments.clone(), "natnet"));
        assert!(!s.layout_matches(&s.markers[..1], &s.segments.clone(), "vicon"));
        assert!(!s.layout_matches(&s.markers.clone(), &[], "vicon"));
    }

    #[test]
    fn test_lookup_by_name() {
        let s = subject("vicon", 3, 2);

        assert!(s.marker("m2").is_some());
        assert!(s.marker("m3").is_none());
        assert!(s.segment("s1").is_some());
    }

    #[test]
    fn test_occluded_marker_constructor() {
        let m = Marker::occluded("LFHD");
        assert!(m.occluded);
        assert_eq!(m.name, "LFHD");
    }
}
