//! Job model shared by the commands and the transfer engine

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// User metadata of an object, keyed without the `x-amz-meta-` prefix
pub type Metadata = BTreeMap<String, Vec<String>>;

/// Direction of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestType {
    Put,
    Get,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestType::Put => write!(f, "PUT"),
            RequestType::Get => write!(f, "GET"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Critical,
    Urgent,
    High,
    Normal,
    Low,
    Background,
    Minimized,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::Urgent => "URGENT",
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
            Priority::Low => "LOW",
            Priority::Background => "BACKGROUND",
            Priority::Minimized => "MINIMIZED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteOptimization {
    Capacity,
    Performance,
}

impl WriteOptimization {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOptimization::Capacity => "CAPACITY",
            WriteOptimization::Performance => "PERFORMANCE",
        }
    }
}

/// Whether the client must process chunks in the order the server lists them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkOrdering {
    None,
    InOrder,
}

impl ChunkOrdering {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkOrdering::None => "NONE",
            ChunkOrdering::InOrder => "IN_ORDER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InProgress,
    Completed,
    Canceled,
}

/// Storage node a chunk is served by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub endpoint: String,
    pub http_port: Option<u16>,
    pub https_port: Option<u16>,
    pub id: Uuid,
}

/// One contiguous byte range of an object within a chunk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BulkObject {
    pub name: String,
    pub length: u64,
    pub offset: u64,
    pub in_cache: bool,
}

impl BulkObject {
    pub fn new(name: impl Into<String>, offset: u64, length: u64) -> Self {
        Self {
            name: name.into(),
            length,
            offset,
            in_cache: false,
        }
    }

    /// Byte range covered by this part, `None` when empty
    pub fn range(&self) -> Option<Range> {
        if self.length == 0 {
            None
        } else {
            Some(Range::new(self.offset, self.offset + self.length - 1))
        }
    }

    fn key(&self) -> (&str, u64, u64) {
        (&self.name, self.offset, self.length)
    }
}

impl fmt::Display for BulkObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.name, self.offset, self.length, self.in_cache
        )
    }
}

/// Unit of allocation: a group of object ranges placed together by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: Uuid,
    pub chunk_number: u32,
    pub node_id: Option<Uuid>,
    pub objects: Vec<BulkObject>,
}

impl Chunk {
    /// Copy of this chunk keeping only the parts `keep` accepts
    pub fn filtered<F>(&self, keep: F) -> Chunk
    where
        F: Fn(&BulkObject) -> bool,
    {
        Chunk {
            chunk_id: self.chunk_id,
            chunk_number: self.chunk_number,
            node_id: self.node_id,
            objects: self.objects.iter().filter(|o| keep(o)).cloned().collect(),
        }
    }

    /// Copy without the parts already resident in the server cache
    pub fn without_cached(&self) -> Chunk {
        self.filtered(|o| !o.in_cache)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Filter every chunk and drop the ones left empty
pub fn filter_chunks<F>(chunks: &[Chunk], keep: F) -> Vec<Chunk>
where
    F: Fn(&BulkObject) -> bool,
{
    chunks
        .iter()
        .map(|chunk| chunk.filtered(&keep))
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

/// Server-produced job descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterObjectList {
    pub job_id: Uuid,
    pub bucket_name: String,
    pub request_type: RequestType,
    pub priority: Option<Priority>,
    pub write_optimization: Option<WriteOptimization>,
    pub chunk_ordering: Option<ChunkOrdering>,
    pub start_date: Option<String>,
    pub status: Option<JobStatus>,
    pub original_size_in_bytes: Option<u64>,
    pub cached_size_in_bytes: Option<u64>,
    pub completed_size_in_bytes: Option<u64>,
    pub user_name: Option<String>,
    pub nodes: Vec<Node>,
    pub chunks: Vec<Chunk>,
}

impl MasterObjectList {
    /// An empty job descriptor
    pub fn new(job_id: Uuid, bucket_name: impl Into<String>, request_type: RequestType) -> Self {
        Self {
            job_id,
            bucket_name: bucket_name.into(),
            request_type,
            priority: None,
            write_optimization: None,
            chunk_ordering: None,
            start_date: None,
            status: None,
            original_size_in_bytes: None,
            cached_size_in_bytes: None,
            completed_size_in_bytes: None,
            user_name: None,
            nodes: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn node(&self, id: Uuid) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Copy without the parts listed in `completed`
    ///
    /// Parts match on name, offset and length. Chunks left empty are
    /// dropped, so running a job built from the result only moves data
    /// that has not been transferred yet.
    pub fn without_completed<'a, I>(&self, completed: I) -> MasterObjectList
    where
        I: IntoIterator<Item = &'a BulkObject>,
    {
        let done: HashSet<(&str, u64, u64)> = completed.into_iter().map(BulkObject::key).collect();
        MasterObjectList {
            chunks: filter_chunks(&self.chunks, |o| !done.contains(&o.key())),
            ..self.clone()
        }
    }

    /// Total bytes across every chunk
    pub fn total_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.objects.iter())
            .map(|o| o.length)
            .sum()
    }
}

/// Inclusive byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: u64,
    pub end: u64,
}

impl Range {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Overlap of two ranges
    pub fn intersect(&self, other: &Range) -> Option<Range> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then(|| Range::new(start, end))
    }

    /// Value of a `Range` request header
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Object named in a job creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ds3Object {
    pub name: String,
    pub size: Option<u64>,
    /// Sub-ranges to read; empty means the whole object
    pub ranges: Vec<Range>,
}

impl Ds3Object {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            ranges: Vec::new(),
        }
    }

    pub fn with_size(name: impl Into<String>, size: u64) -> Self {
        Self {
            size: Some(size),
            ..Self::new(name)
        }
    }

    pub fn with_ranges(name: impl Into<String>, ranges: Vec<Range>) -> Self {
        Self {
            ranges,
            ..Self::new(name)
        }
    }
}

/// Requested sub-ranges per object name, for objects that are read partially
pub fn partial_ranges(objects: &[Ds3Object]) -> BTreeMap<String, Vec<Range>> {
    objects
        .iter()
        .filter(|o| !o.ranges.is_empty())
        .map(|o| (o.name.clone(), o.ranges.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(parts: Vec<BulkObject>) -> Chunk {
        Chunk {
            chunk_id: Uuid::new_v4(),
            chunk_number: 0,
            node_id: None,
            objects: parts,
        }
    }

    fn cached(name: &str, offset: u64, length: u64) -> BulkObject {
        BulkObject {
            in_cache: true,
            ..BulkObject::new(name, offset, length)
        }
    }

    #[test]
    fn test_without_cached() {
        let c = chunk(vec![cached("a", 0, 10), BulkObject::new("a", 10, 5)]);
        let filtered = c.without_cached();
        assert_eq!(filtered.objects, vec![BulkObject::new("a", 10, 5)]);
        assert_eq!(filtered.chunk_id, c.chunk_id);
    }

    #[test]
    fn test_filter_chunks_drops_empty() {
        let chunks = vec![
            chunk(vec![cached("a", 0, 10)]),
            chunk(vec![BulkObject::new("b", 0, 3)]),
        ];
        let filtered = filter_chunks(&chunks, |o| !o.in_cache);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].objects[0].name, "b");
    }

    #[test]
    fn test_without_completed() {
        let mut list = MasterObjectList::new(Uuid::new_v4(), "bucket", RequestType::Put);
        list.chunks = vec![
            chunk(vec![BulkObject::new("a", 0, 10), BulkObject::new("a", 10, 10)]),
            chunk(vec![BulkObject::new("b", 0, 4)]),
        ];
        let done = vec![BulkObject::new("a", 0, 10), BulkObject::new("b", 0, 4)];

        let remaining = list.without_completed(&done);
        assert_eq!(remaining.chunks.len(), 1);
        assert_eq!(remaining.chunks[0].objects, vec![BulkObject::new("a", 10, 10)]);
        assert_eq!(remaining.total_bytes(), 10);

        let again = remaining.without_completed(&done);
        assert_eq!(again, remaining);
    }

    #[test]
    fn test_range_math() {
        let range = Range::new(10, 19);
        assert_eq!(range.len(), 10);
        assert_eq!(range.header_value(), "bytes=10-19");
        assert_eq!(range.intersect(&Range::new(15, 30)), Some(Range::new(15, 19)));
        assert_eq!(range.intersect(&Range::new(20, 30)), None);
        assert_eq!(BulkObject::new("a", 5, 5).range(), Some(Range::new(5, 9)));
        assert_eq!(BulkObject::new("a", 5, 0).range(), None);
    }

    #[test]
    fn test_partial_ranges() {
        let objects = vec![
            Ds3Object::new("whole"),
            Ds3Object::with_ranges("part", vec![Range::new(0, 99)]),
        ];
        let ranges = partial_ranges(&objects);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges["part"], vec![Range::new(0, 99)]);
    }
}
