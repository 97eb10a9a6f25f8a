use std::{fmt, ops::Index, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::location::GeoSample;

/// Points per sealed chunk
const CHUNK_LEN: usize = 128;

/// Append-only list of path points that is cheap to clone.
///
/// Full chunks are frozen behind an [Arc] and shared between clones, only the unsealed tail
/// (at most [CHUNK_LEN] points) is copied. Snapshots of a long session therefore don't copy
/// the whole path every time a point is added.
#[derive(Clone, Default)]
pub struct TrailPath {
    sealed: Arc<Vec<Arc<[GeoSample]>>>,
    tail: Vec<GeoSample>,
    len: usize,
}

impl TrailPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, sample: GeoSample) {
        self.tail.push(sample);
        self.len += 1;

        if self.tail.len() == CHUNK_LEN {
            let chunk: Arc<[GeoSample]> = std::mem::take(&mut self.tail).into();
            Arc::make_mut(&mut self.sealed).push(chunk);
        }
    }

    pub fn get(&self, idx: usize) -> Option<&GeoSample> {
        if idx >= self.len {
            return None;
        }

        let chunk = idx / CHUNK_LEN;
        match self.sealed.get(chunk) {
            Some(sealed) => sealed.get(idx % CHUNK_LEN),
            None => self.tail.get(idx - self.sealed.len() * CHUNK_LEN),
        }
    }

    pub fn first(&self) -> Option<&GeoSample> {
        self.get(0)
    }

    pub fn last(&self) -> Option<&GeoSample> {
        self.len.checked_sub(1).and_then(|idx| self.get(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeoSample> + '_ {
        self.sealed
            .iter()
            .flat_map(|chunk| chunk.iter())
            .chain(self.tail.iter())
    }

    pub fn to_vec(&self) -> Vec<GeoSample> {
        self.iter().copied().collect()
    }

    /// Consecutive pairs of points, in order
    pub fn segments(&self) -> impl Iterator<Item = (&GeoSample, &GeoSample)> + '_ {
        self.iter().zip(self.iter().skip(1))
    }
}

impl Index<usize> for TrailPath {
    type Output = GeoSample;

    fn index(&self, idx: usize) -> &Self::Output {
        match self.get(idx) {
            Some(sample) => sample,
            None => panic!("Path index {idx} out of range for length {}", self.len),
        }
    }
}

impl From<Vec<GeoSample>> for TrailPath {
    fn from(samples: Vec<GeoSample>) -> Self {
        let mut path = Self::new();
        for sample in samples {
            path.push(sample);
        }
        path
    }
}

impl PartialEq for TrailPath {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl fmt::Debug for TrailPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl Serialize for TrailPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for TrailPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<GeoSample>::deserialize(deserializer).map(Self::from)
    }
}
