//! Free-list arena for penalty records, plus the intrusive index lists
//! that thread records through the reuse wheel, the non-reuse list, and
//! each config block's owned-record list.

pub(crate) type RecordKey = usize;

/// One prev/next pair for a single intrusive list membership
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct Links {
    pub(crate) prev: Option<RecordKey>,
    pub(crate) next: Option<RecordKey>,
}

/// Which of a record's two link pairs a list operation works on.
/// `Sched` covers the mutually-exclusive non-reuse list / wheel-slot
/// membership; `Cfg` is the owning config block's record list.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum LinkSet {
    Sched = 0,
    Cfg = 1,
}

pub(crate) trait Linked {
    fn links(&self, set: LinkSet) -> &Links;
    fn links_mut(&mut self, set: LinkSet) -> &mut Links;
}

/// Head of an intrusive list; lives outside the arena (engine, wheel
/// slot, or config block)
#[derive(Debug, Default)]
pub(crate) struct ListHead {
    pub(crate) head: Option<RecordKey>,
    pub(crate) len: usize,
}

impl ListHead {
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

#[derive(Debug)]
enum Slot<T> {
    Occupied(T),
    // Next slot in the free list
    Vacant(Option<usize>),
}

/// Slots are recycled through a free list so keys stay stable for the
/// lifetime of the value they were handed out for.
#[derive(Debug)]
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Option<usize>,
    len: usize,
}

impl<T> Arena<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::with_capacity(16),
            free: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn insert(&mut self, value: T) -> usize {
        self.len += 1;
        match self.free {
            Some(idx) => {
                self.free = match self.slots[idx] {
                    Slot::Vacant(next) => next,
                    Slot::Occupied(_) => None,
                };
                self.slots[idx] = Slot::Occupied(value);
                idx
            }
            None => {
                self.slots.push(Slot::Occupied(value));
                self.slots.len() - 1
            }
        }
    }

    pub(crate) fn remove(&mut self, key: usize) -> Option<T> {
        match self.slots.get(key) {
            Some(Slot::Occupied(_)) => (),
            _ => return None,
        }
        let slot = std::mem::replace(&mut self.slots[key], Slot::Vacant(self.free));
        self.free = Some(key);
        self.len -= 1;
        match slot {
            Slot::Occupied(value) => Some(value),
            Slot::Vacant(_) => None,
        }
    }

    pub(crate) fn get(&self, key: usize) -> Option<&T> {
        match self.slots.get(key) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, key: usize) -> Option<&mut T> {
        match self.slots.get_mut(key) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn keys(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Occupied(_) => Some(i),
                Slot::Vacant(_) => None,
            })
            .collect()
    }
}

impl<T: Linked> Arena<T> {
    /// Push `key` at the front of `list`. Returns false if the key is
    /// not live (the caller treats that as a penalty-update failure).
    pub(crate) fn push_front(&mut self, list: &mut ListHead, set: LinkSet, key: RecordKey) -> bool {
        let old_head = list.head;
        match self.get_mut(key) {
            Some(value) => {
                let links = value.links_mut(set);
                links.prev = None;
                links.next = old_head;
            }
            None => return false,
        }
        if let Some(head_key) = old_head {
            match self.get_mut(head_key) {
                Some(value) => value.links_mut(set).prev = Some(key),
                None => return false,
            }
        }
        list.head = Some(key);
        list.len += 1;
        true
    }

    /// Detach `key` from `list` in O(1). Returns false when the linkage
    /// does not match the expected membership.
    pub(crate) fn unlink(&mut self, list: &mut ListHead, set: LinkSet, key: RecordKey) -> bool {
        let (prev, next) = match self.get(key) {
            Some(value) => {
                let links = value.links(set);
                (links.prev, links.next)
            }
            None => return false,
        };
        match prev {
            Some(prev_key) => match self.get_mut(prev_key) {
                Some(value) => value.links_mut(set).next = next,
                None => return false,
            },
            None => {
                if list.head != Some(key) {
                    return false;
                }
                list.head = next;
            }
        }
        if let Some(next_key) = next {
            match self.get_mut(next_key) {
                Some(value) => value.links_mut(set).prev = prev,
                None => return false,
            }
        }
        if let Some(value) = self.get_mut(key) {
            *value.links_mut(set) = Links::default();
        }
        list.len = list.len.saturating_sub(1);
        true
    }

    /// Snapshot the keys on `list`, head first. Bounded by the arena
    /// population so a corrupted cycle cannot spin forever.
    pub(crate) fn collect(&self, list: &ListHead, set: LinkSet) -> Vec<RecordKey> {
        let mut keys = Vec::with_capacity(list.len);
        let mut cursor = list.head;
        while let Some(key) = cursor {
            keys.push(key);
            if keys.len() > self.len {
                break;
            }
            cursor = self.get(key).and_then(|value| value.links(set).next);
        }
        keys
    }
}
