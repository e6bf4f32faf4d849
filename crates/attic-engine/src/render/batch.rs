use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::device::GraphicsDevice;
use crate::logic::{ListenerControl, Property, PropertyEvent, PropertyListener};

use super::attribute::{AttributeSet, VertexAttribute, vertex_size};
use super::buffer::{GeometryBuffer, SegmentId, SegmentInfo, VertexStorage};

/// Device-side storage of a batch: vertex bytes plus the packed index list.
pub trait BatchStorage: VertexStorage {
    fn upload_indices(&mut self, indices: &[u32]);

    /// Frees device resources. Called once by [`Batch::destroy`].
    fn release(&mut self) {}
}

/// CPU-only batch storage.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    pub vertices: Vec<u8>,
    pub indices: Vec<u32>,
}

impl VertexStorage for MemoryStorage {
    fn upload(&mut self, offset: usize, bytes: &[u8]) {
        self.vertices.upload(offset, bytes);
    }
}

impl BatchStorage for MemoryStorage {
    fn upload_indices(&mut self, indices: &[u32]) {
        self.indices.clear();
        self.indices.extend_from_slice(indices);
    }

    fn release(&mut self) {
        self.vertices = Vec::new();
        self.indices = Vec::new();
    }
}

/// [`MemoryStorage`] that stays readable after being handed to a batch.
#[derive(Debug, Default, Clone)]
pub struct SharedMemory(Arc<Mutex<MemoryStorage>>);

impl SharedMemory {
    pub fn snapshot(&self) -> MemoryStorage {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl VertexStorage for SharedMemory {
    fn upload(&mut self, offset: usize, bytes: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upload(offset, bytes);
    }
}

impl BatchStorage for SharedMemory {
    fn upload_indices(&mut self, indices: &[u32]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upload_indices(indices);
    }

    fn release(&mut self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).release();
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BatchId(u64);

impl BatchId {
    /// Process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

struct Slot {
    segment: SegmentId,
    indices: Vec<u32>,
    active: bool,
}

struct BatchState {
    buffer: GeometryBuffer<Box<dyn BatchStorage>>,
    slots: Vec<Option<Slot>>,
    free_slots: Vec<usize>,
    indices: Vec<u32>,
    indices_dirty: bool,
    destroyed: bool,
}

impl BatchState {
    fn insert_slot(&mut self, slot: Slot) -> usize {
        self.indices_dirty = true;
        match self.free_slots.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    fn remove_slot(&mut self, index: usize) {
        let Some(slot) = self.slots.get_mut(index).and_then(Option::take) else {
            return;
        };
        if let Err(e) = self.buffer.release(slot.segment) {
            log::warn!("batch slot {index}: {e}");
        }
        self.free_slots.push(index);
        self.indices_dirty = true;
    }
}

struct BatchShared {
    id: BatchId,
    attributes: Vec<VertexAttribute>,
    attribute_set: AttributeSet,
    vertex_size: usize,
    is_static: bool,
    state: Mutex<BatchState>,
}

impl BatchShared {
    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn serialize(&self, property: &dyn Property) -> Option<(Vec<u8>, Vec<u32>)> {
        let data = property.render_data()?;
        if data.attribute_set() != self.attribute_set {
            log::warn!("batch {:?}: render data changed its vertex layout", self.id);
            return None;
        }

        let mut bytes = Vec::with_capacity(data.byte_len(&self.attributes));
        if let Err(e) = data.serialize(&self.attributes, &mut bytes) {
            log::warn!("batch {:?}: {e}", self.id);
            return None;
        }
        Some((bytes, data.indices().to_vec()))
    }

    /// Re-serializes a slot from its property, moving it if it grew.
    fn refresh(&self, state: &mut BatchState, index: usize, property: &dyn Property) -> bool {
        let Some((bytes, indices)) = self.serialize(property) else {
            state.remove_slot(index);
            return false;
        };
        let Some(segment) = state.slots.get(index).and_then(Option::as_ref).map(|s| s.segment) else {
            return false;
        };

        let fits = state
            .buffer
            .segment(segment)
            .is_some_and(|s| s.length >= bytes.len());

        let segment = if fits {
            segment
        } else {
            if let Err(e) = state.buffer.release(segment) {
                log::warn!("batch {:?}: {e}", self.id);
            }
            match state.buffer.allocate(bytes.len()) {
                Ok(moved) => moved,
                Err(e) => {
                    log::error!("batch {:?}: dropping slot {index}: {e}", self.id);
                    if let Some(slot) = state.slots.get_mut(index) {
                        *slot = None;
                    }
                    state.free_slots.push(index);
                    state.indices_dirty = true;
                    return false;
                }
            }
        };

        if let Err(e) = state.buffer.write(segment, &bytes) {
            log::error!("batch {:?}: {e}", self.id);
            state.remove_slot(index);
            return false;
        }

        if let Some(Some(slot)) = state.slots.get_mut(index) {
            slot.segment = segment;
            slot.indices = indices;
        }
        state.indices_dirty = true;
        true
    }
}

/// Listener tying one property to one batch slot.
struct SlotListener {
    batch: Weak<BatchShared>,
    slot: usize,
}

impl PropertyListener for SlotListener {
    fn on_event(&self, property: &dyn Property, event: PropertyEvent) -> ListenerControl {
        let Some(shared) = self.batch.upgrade() else {
            return ListenerControl::Detach;
        };
        let mut guard = shared.lock();
        let state = &mut *guard;
        if state.destroyed {
            return ListenerControl::Detach;
        }

        let keep = match event {
            PropertyEvent::Added => true,
            PropertyEvent::Changed => !property.is_active() || shared.refresh(state, self.slot, property),
            PropertyEvent::Disabled => {
                if let Some(Some(slot)) = state.slots.get_mut(self.slot) {
                    slot.active = false;
                }
                state.indices_dirty = true;
                true
            }
            PropertyEvent::Enabled => {
                if let Some(Some(slot)) = state.slots.get_mut(self.slot) {
                    slot.active = true;
                }
                shared.refresh(state, self.slot, property)
            }
            PropertyEvent::Removed => {
                state.remove_slot(self.slot);
                false
            }
        };

        if keep {
            ListenerControl::Keep
        } else {
            ListenerControl::Detach
        }
    }
}

/// Group of drawables sharing one vertex layout and one geometry buffer,
/// drawn with a single indexed call.
///
/// Cloning is cheap; clones refer to the same batch. Property listeners run
/// on the scheduler thread while the render thread draws, so slot state sits
/// behind a mutex.
#[derive(Clone)]
pub struct Batch {
    shared: Arc<BatchShared>,
}

impl Batch {
    pub fn new(
        is_static: bool,
        attributes: &[VertexAttribute],
        capacity: usize,
        storage: Box<dyn BatchStorage>,
    ) -> Self {
        Self::with_id(BatchId::next(), is_static, attributes, capacity, storage)
    }

    pub fn with_id(
        id: BatchId,
        is_static: bool,
        attributes: &[VertexAttribute],
        capacity: usize,
        storage: Box<dyn BatchStorage>,
    ) -> Self {
        let state = BatchState {
            buffer: GeometryBuffer::new(capacity, storage),
            slots: Vec::new(),
            free_slots: Vec::new(),
            indices: Vec::new(),
            indices_dirty: false,
            destroyed: false,
        };

        Self {
            shared: Arc::new(BatchShared {
                id,
                attributes: attributes.to_vec(),
                attribute_set: AttributeSet::from_attributes(attributes),
                vertex_size: vertex_size(attributes),
                is_static,
                state: Mutex::new(state),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> BatchId {
        self.shared.id
    }

    #[inline]
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.shared.attributes
    }

    #[inline]
    pub fn attribute_set(&self) -> AttributeSet {
        self.shared.attribute_set
    }

    #[inline]
    pub fn vertex_size(&self) -> usize {
        self.shared.vertex_size
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.shared.is_static
    }

    /// Number of properties currently held.
    pub fn len(&self) -> usize {
        self.shared.lock().slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.lock().destroyed
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().buffer.capacity()
    }

    pub fn free_bytes(&self) -> usize {
        self.shared.lock().buffer.free_bytes()
    }

    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.shared.lock().buffer.segments()
    }

    /// Takes `property` into the batch if its layout matches and its vertices fit.
    ///
    /// On success the batch listens to the property for the rest of its life.
    pub fn accept(&self, property: &mut dyn Property) -> bool {
        match property.render_data() {
            Some(data) if data.attribute_set() == self.shared.attribute_set => {}
            _ => return false,
        }
        let Some((bytes, indices)) = self.shared.serialize(property) else {
            return false;
        };

        let slot = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            if state.destroyed {
                return false;
            }

            let segment = match state.buffer.allocate(bytes.len()) {
                Ok(segment) => segment,
                Err(e) => {
                    log::debug!("batch {:?} cannot accept: {e}", self.shared.id);
                    return false;
                }
            };
            if let Err(e) = state.buffer.write(segment, &bytes) {
                log::warn!("batch {:?}: {e}", self.shared.id);
                let _ = state.buffer.release(segment);
                return false;
            }

            state.insert_slot(Slot {
                segment,
                indices,
                active: property.is_active(),
            })
        };

        // Lock released: registering on an active property calls back into the batch.
        property.add_listener(Arc::new(SlotListener {
            batch: Arc::downgrade(&self.shared),
            slot,
        }));
        true
    }

    /// Rebuilds and uploads the packed index list if any slot changed.
    ///
    /// Returns the number of indices to draw.
    pub fn flush_indices(&self) -> u32 {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        if state.indices_dirty {
            state.indices.clear();
            for slot in state.slots.iter().flatten().filter(|s| s.active) {
                let Some(offset) = state.buffer.offset(slot.segment) else {
                    continue;
                };
                let first_vertex = (offset / self.shared.vertex_size.max(1)) as u32;
                state
                    .indices
                    .extend(slot.indices.iter().map(|i| first_vertex + i));
            }
            state.buffer.storage_mut().upload_indices(&state.indices);
            state.indices_dirty = false;
        }
        state.indices.len() as u32
    }

    /// Packed index list as last uploaded.
    pub fn indices(&self) -> Vec<u32> {
        self.flush_indices();
        self.shared.lock().indices.clone()
    }

    /// Flushes indices and issues one draw through `device`.
    pub fn render(&self, device: &dyn GraphicsDevice) -> bool {
        self.flush_indices();
        device.render_batch(self)
    }

    /// Releases every slot and the device storage. Listeners detach on their
    /// next event.
    pub fn destroy(&self) {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        state.slots.clear();
        state.free_slots.clear();
        state.indices.clear();
        state.buffer.release_all();
        state.buffer.storage_mut().release();
    }
}

impl PartialEq for Batch {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Batch {}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.shared.id)
            .field("attributes", &self.shared.attributes)
            .field("is_static", &self.shared.is_static)
            .finish_non_exhaustive()
    }
}
