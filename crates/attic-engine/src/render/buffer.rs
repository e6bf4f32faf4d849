use crate::error::EngineError;

/// Device-side backing store of a [`GeometryBuffer`].
///
/// `upload` copies `bytes` to `offset`; the buffer never asks for a range
/// beyond its capacity.
pub trait VertexStorage: Send {
    fn upload(&mut self, offset: usize, bytes: &[u8]);
}

impl VertexStorage for Vec<u8> {
    fn upload(&mut self, offset: usize, bytes: &[u8]) {
        let end = offset + bytes.len();
        if self.len() < end {
            self.resize(end, 0);
        }
        self[offset..end].copy_from_slice(bytes);
    }
}

impl<S: VertexStorage + ?Sized> VertexStorage for Box<S> {
    fn upload(&mut self, offset: usize, bytes: &[u8]) {
        (**self).upload(offset, bytes);
    }
}

/// Identifies a used segment for its whole lifetime, across moves.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SegmentId(u64);

/// Bookkeeping state of a segment.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SegmentState {
    /// Available to best-fit.
    Free,
    /// Holds live data.
    Used,
    /// Given back by its owner. Counts as free space but is only reclaimed by
    /// the next defragmentation.
    Released,
}

/// Public snapshot of a segment.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SegmentInfo {
    pub offset: usize,
    pub length: usize,
    pub state: SegmentState,
}

impl SegmentInfo {
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

#[derive(Debug)]
struct Segment {
    id: SegmentId,
    offset: usize,
    length: usize,
    state: SegmentState,
    /// CPU copy of the last upload, replayed when the segment moves.
    data: Vec<u8>,
}

impl Segment {
    fn info(&self) -> SegmentInfo {
        SegmentInfo {
            offset: self.offset,
            length: self.length,
            state: self.state,
        }
    }
}

/// Fixed-capacity byte region carved into variable-length segments.
///
/// Invariants:
/// - `segments` is sorted by offset and partitions `[0, capacity)` without gaps
/// - a used segment's data never exceeds its length
///
/// Allocation is best-fit over free segments. When no free segment is large
/// enough but the total free space is, the buffer defragments: used segments
/// slide to the front (re-uploading their data) and all free space becomes a
/// single tail segment.
pub struct GeometryBuffer<S> {
    capacity: usize,
    segments: Vec<Segment>,
    next_id: u64,
    storage: S,
}

impl<S: VertexStorage> GeometryBuffer<S> {
    pub fn new(capacity: usize, storage: S) -> Self {
        let mut buffer = Self {
            capacity,
            segments: Vec::new(),
            next_id: 0,
            storage,
        };
        let id = buffer.fresh_id();
        buffer.segments.push(Segment {
            id,
            offset: 0,
            length: capacity,
            state: SegmentState::Free,
            data: Vec::new(),
        });
        buffer
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes not held by used segments (free and released).
    pub fn free_bytes(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.state != SegmentState::Used)
            .map(|s| s.length)
            .sum()
    }

    /// Segment layout in offset order.
    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.segments.iter().map(Segment::info).collect()
    }

    pub fn segment(&self, id: SegmentId) -> Option<SegmentInfo> {
        self.find_used(id).map(|i| self.segments[i].info())
    }

    pub fn offset(&self, id: SegmentId) -> Option<usize> {
        self.segment(id).map(|s| s.offset)
    }

    #[inline]
    pub fn storage(&self) -> &S {
        &self.storage
    }

    #[inline]
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Carves a used segment of exactly `length` bytes.
    pub fn allocate(&mut self, length: usize) -> Result<SegmentId, EngineError> {
        let free = self.free_bytes();
        if length > free {
            return Err(EngineError::OutOfSpace { requested: length, free });
        }

        if let Some(index) = self.best_fit(length) {
            return Ok(self.split(index, length));
        }

        log::debug!("geometry buffer: defragmenting for {length} bytes ({free} free)");
        self.defragment();

        match self.best_fit(length) {
            Some(index) => Ok(self.split(index, length)),
            None => Err(EngineError::OutOfSpace { requested: length, free }),
        }
    }

    /// Marks a used segment as released. Its bytes are reclaimed on the next
    /// defragmentation.
    pub fn release(&mut self, id: SegmentId) -> Result<(), EngineError> {
        let index = self
            .find_used(id)
            .ok_or_else(|| EngineError::config(format!("segment {id:?} is not in use")))?;

        let segment = &mut self.segments[index];
        segment.state = SegmentState::Released;
        segment.data = Vec::new();
        Ok(())
    }

    /// Releases every used segment.
    pub fn release_all(&mut self) {
        for segment in &mut self.segments {
            if segment.state == SegmentState::Used {
                segment.state = SegmentState::Released;
                segment.data = Vec::new();
            }
        }
    }

    /// Uploads `bytes` to the start of a used segment.
    pub fn write(&mut self, id: SegmentId, bytes: &[u8]) -> Result<(), EngineError> {
        let index = self
            .find_used(id)
            .ok_or_else(|| EngineError::config(format!("segment {id:?} is not in use")))?;

        let segment = &mut self.segments[index];
        if bytes.len() > segment.length {
            return Err(EngineError::config(format!(
                "write of {} bytes exceeds segment length {}",
                bytes.len(),
                segment.length
            )));
        }

        segment.data.clear();
        segment.data.extend_from_slice(bytes);
        self.storage.upload(segment.offset, bytes);
        Ok(())
    }

    /// Packs used segments to the front and merges all other space into one
    /// free tail segment (possibly empty).
    pub fn defragment(&mut self) {
        self.segments.sort_by_key(|s| s.offset);

        let old = std::mem::take(&mut self.segments);
        let mut cursor = 0usize;
        let mut moved = 0usize;

        for mut segment in old {
            if segment.state != SegmentState::Used {
                continue;
            }
            if segment.offset != cursor {
                segment.offset = cursor;
                if !segment.data.is_empty() {
                    self.storage.upload(cursor, &segment.data);
                }
                moved += 1;
            }
            cursor += segment.length;
            self.segments.push(segment);
        }

        let id = self.fresh_id();
        self.segments.push(Segment {
            id,
            offset: cursor,
            length: self.capacity - cursor,
            state: SegmentState::Free,
            data: Vec::new(),
        });

        if moved > 0 {
            log::trace!("geometry buffer: moved {moved} segments");
        }
    }

    fn fresh_id(&mut self) -> SegmentId {
        let id = SegmentId(self.next_id);
        self.next_id += 1;
        id
    }

    fn find_used(&self, id: SegmentId) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| s.id == id && s.state == SegmentState::Used)
    }

    /// Smallest free segment that fits; ties go to the lowest offset.
    fn best_fit(&self, length: usize) -> Option<usize> {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state == SegmentState::Free && s.length >= length)
            .min_by_key(|(_, s)| s.length)
            .map(|(i, _)| i)
    }

    fn split(&mut self, index: usize, length: usize) -> SegmentId {
        let id = self.fresh_id();
        let free = &mut self.segments[index];

        if free.length == length {
            free.id = id;
            free.state = SegmentState::Used;
            return id;
        }

        let used = Segment {
            id,
            offset: free.offset,
            length,
            state: SegmentState::Used,
            data: Vec::new(),
        };
        free.offset += length;
        free.length -= length;
        self.segments.insert(index, used);
        id
    }
}

impl<S> std::fmt::Debug for GeometryBuffer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryBuffer")
            .field("capacity", &self.capacity)
            .field("segments", &self.segments)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(capacity: usize) -> GeometryBuffer<Vec<u8>> {
        GeometryBuffer::new(capacity, Vec::new())
    }

    fn used(buf: &GeometryBuffer<Vec<u8>>) -> Vec<(usize, usize)> {
        buf.segments()
            .into_iter()
            .filter(|s| s.state == SegmentState::Used)
            .map(|s| (s.offset, s.end()))
            .collect()
    }

    fn assert_partitioned(buf: &GeometryBuffer<Vec<u8>>) {
        let segments = buf.segments();
        let mut cursor = 0;
        for s in &segments {
            assert_eq!(s.offset, cursor, "gap or overlap in {segments:?}");
            cursor = s.end();
        }
        assert_eq!(cursor, buf.capacity());
    }

    // ── best fit ──────────────────────────────────────────────────────────

    #[test]
    fn allocates_front_to_back() {
        let mut buf = buffer(400);
        let a = buf.allocate(100).unwrap();
        let b = buf.allocate(200).unwrap();
        assert_eq!(buf.offset(a), Some(0));
        assert_eq!(buf.offset(b), Some(100));
        assert_eq!(buf.free_bytes(), 100);
        assert_partitioned(&buf);
    }

    #[test]
    fn released_segment_waits_for_defragmentation() {
        let mut buf = buffer(200);
        let a = buf.allocate(100).unwrap();
        let _b = buf.allocate(50).unwrap();
        buf.release(a).unwrap();

        // The free tail still fits, so the released hole is left alone.
        let c = buf.allocate(40).unwrap();
        assert_eq!(buf.offset(c), Some(150));
        assert_eq!(buf.free_bytes(), 110);
    }

    #[test]
    fn exact_fit_leaves_no_empty_segment() {
        let mut buf = buffer(100);
        buf.allocate(100).unwrap();
        assert_eq!(buf.segments().len(), 1);
        assert_eq!(buf.free_bytes(), 0);
    }

    // ── release / out of space ────────────────────────────────────────────

    #[test]
    fn out_of_space_when_total_free_is_too_small() {
        let mut buf = buffer(100);
        buf.allocate(80).unwrap();
        let err = buf.allocate(30).unwrap_err();
        assert_eq!(err, EngineError::OutOfSpace { requested: 30, free: 20 });
    }

    #[test]
    fn released_space_is_reclaimed() {
        let mut buf = buffer(100);
        let a = buf.allocate(100).unwrap();
        buf.release(a).unwrap();
        assert_eq!(buf.free_bytes(), 100);
        let b = buf.allocate(100).unwrap();
        assert_eq!(buf.offset(b), Some(0));
    }

    #[test]
    fn double_release_is_an_error() {
        let mut buf = buffer(100);
        let a = buf.allocate(10).unwrap();
        buf.release(a).unwrap();
        assert!(matches!(buf.release(a), Err(EngineError::Config(_))));
    }

    #[test]
    fn write_larger_than_segment_fails() {
        let mut buf = buffer(100);
        let a = buf.allocate(4).unwrap();
        assert!(buf.write(a, &[0; 5]).is_err());
        buf.write(a, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&buf.storage()[..4], &[1, 2, 3, 4]);
    }

    // ── defragmentation ───────────────────────────────────────────────────

    #[test]
    fn fragmented_request_triggers_defragmentation() {
        let mut buf = buffer(400);
        let a = buf.allocate(100).unwrap();
        let b = buf.allocate(200).unwrap();
        let c = buf.allocate(50).unwrap();
        assert_eq!(buf.free_bytes(), 50);

        buf.release(b).unwrap();
        let d = buf.allocate(120).unwrap();

        assert_eq!(buf.offset(a), Some(0));
        assert_eq!(buf.offset(c), Some(100));
        assert_eq!(buf.offset(d), Some(150));
        assert_eq!(used(&buf), vec![(0, 100), (100, 150), (150, 270)]);

        let tail = buf.segments().last().copied().unwrap();
        assert_eq!(tail, SegmentInfo { offset: 270, length: 130, state: SegmentState::Free });
        assert_partitioned(&buf);
    }

    #[test]
    fn defragmentation_reuploads_moved_data() {
        let mut buf = buffer(16);
        let a = buf.allocate(8).unwrap();
        let b = buf.allocate(4).unwrap();
        buf.write(b, &[9, 9, 9, 9]).unwrap();
        buf.release(a).unwrap();

        buf.defragment();

        assert_eq!(buf.offset(b), Some(0));
        assert_eq!(&buf.storage()[..4], &[9, 9, 9, 9]);
    }

    #[test]
    fn defragmentation_is_idempotent() {
        let mut buf = buffer(256);
        let ids: Vec<_> = (0..6).map(|i| buf.allocate(10 + i * 7).unwrap()).collect();
        buf.release(ids[1]).unwrap();
        buf.release(ids[4]).unwrap();

        buf.defragment();
        let once = buf.segments();
        buf.defragment();
        assert_eq!(buf.segments(), once);
    }

    #[test]
    fn full_buffer_defragments_to_empty_tail() {
        let mut buf = buffer(10);
        buf.allocate(10).unwrap();
        buf.defragment();
        let segments = buf.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].length, 0);
        assert_partitioned(&buf);
    }

    #[test]
    fn outstanding_total_within_capacity_always_fits() {
        // Deterministic churn: never exceeds capacity, never overlaps.
        let mut buf = buffer(1000);
        let mut live: Vec<(SegmentId, usize)> = Vec::new();
        let mut seed = 7u32;
        let mut next = || {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (seed >> 16) as usize
        };

        for _ in 0..500 {
            let outstanding: usize = live.iter().map(|(_, len)| len).sum();
            if !live.is_empty() && next() % 3 == 0 {
                let (id, _) = live.swap_remove(next() % live.len());
                buf.release(id).unwrap();
            } else {
                let len = 1 + next() % 120;
                if outstanding + len <= buf.capacity() {
                    let id = buf.allocate(len).unwrap();
                    live.push((id, len));
                }
            }

            let mut ranges = used(&buf);
            ranges.sort();
            for pair in ranges.windows(2) {
                assert!(pair[0].1 <= pair[1].0, "overlap: {pair:?}");
            }
            assert_partitioned(&buf);
        }
    }
}
