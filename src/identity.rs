//! Object identity manager
//!
//! Maps opaque host references to small, stable [`ObjectId`]s and carries the
//! per-object [`Metadata`] tag used for the unannotated-this protocol.
//!
//! # Design
//!
//! ```text
//! host ref ──► MetadataStash ──► Metadata::Annotated(id)
//!                               Metadata::UnannotatedThis(id)
//!
//! host ref ──► native provenance ──► SourceId   (until the next flush point)
//! ```
//!
//! Where the metadata physically lives is a construction-time choice: the
//! default [`SideTable`] keys a hash map by reference identity, while hosts
//! that can stash a hidden slot on their objects supply their own
//! [`MetadataStash`] (the `useHiddenPropertyForIds` option).

use crate::error::{Result, TraceError};
use crate::value::{Iid, ObjectId, SourceId};
use fnv::FnvHashMap;
use std::hash::Hash;

/// Tagged identity carried alongside a tracked reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metadata {
    /// Id whose constructor relationship is resolved (or irrelevant)
    Annotated(ObjectId),
    /// Constructor receiver observed before its constructor call completed
    UnannotatedThis(ObjectId),
}

impl Metadata {
    /// The object id regardless of the tag
    pub fn id(self) -> ObjectId {
        match self {
            Metadata::Annotated(id) | Metadata::UnannotatedThis(id) => id,
        }
    }

    pub fn is_unannotated_this(self) -> bool {
        matches!(self, Metadata::UnannotatedThis(_))
    }
}

/// Storage strategy for per-reference metadata
pub trait MetadataStash<R> {
    fn get(&self, obj: &R) -> Option<Metadata>;
    fn set(&mut self, obj: &R, meta: Metadata);
    /// Number of references carrying metadata
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default stash: a hash map keyed by reference identity
#[derive(Debug)]
pub struct SideTable<R> {
    table: FnvHashMap<R, Metadata>,
}

impl<R> Default for SideTable<R> {
    fn default() -> Self {
        Self {
            table: FnvHashMap::default(),
        }
    }
}

impl<R: Clone + Eq + Hash> MetadataStash<R> for SideTable<R> {
    fn get(&self, obj: &R) -> Option<Metadata> {
        self.table.get(obj).copied()
    }

    fn set(&mut self, obj: &R, meta: Metadata) {
        self.table.insert(obj.clone(), meta);
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}

/// Outcome of [`ObjectIdentityManager::find_or_create_unique_id`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// The reference was already tracked
    Existing(ObjectId),
    /// A fresh id was allocated; `origin` is the site to attribute it to
    Created { id: ObjectId, origin: SourceId },
}

impl Resolved {
    pub fn id(self) -> ObjectId {
        match self {
            Resolved::Existing(id) | Resolved::Created { id, .. } => id,
        }
    }

    pub fn is_created(self) -> bool {
        matches!(self, Resolved::Created { .. })
    }
}

/// Bijection between host references and object ids
pub struct ObjectIdentityManager<R> {
    stash: Box<dyn MetadataStash<R>>,
    next_id: u32,
    /// Creation sites stashed for objects that do not have an id yet
    native_provenance: FnvHashMap<R, SourceId>,
}

impl<R: Clone + Eq + Hash + 'static> ObjectIdentityManager<R> {
    /// Create a manager backed by a [`SideTable`]
    pub fn new() -> Self {
        Self::with_stash(Box::new(SideTable::default()))
    }

    /// Create a manager backed by a host-provided stash
    pub fn with_stash(stash: Box<dyn MetadataStash<R>>) -> Self {
        Self {
            stash,
            next_id: 1,
            native_provenance: FnvHashMap::default(),
        }
    }

    /// Return the id of `obj`, allocating one on first sight.
    ///
    /// Non-literal allocations consume any provenance stashed through
    /// [`set_source_id_for_native_obj`](Self::set_source_id_for_native_obj)
    /// and report it as the creation site. Literal allocations always use
    /// `site`.
    pub fn find_or_create_unique_id(&mut self, obj: &R, site: SourceId, is_literal: bool) -> Resolved {
        if let Some(meta) = self.stash.get(obj) {
            return Resolved::Existing(meta.id());
        }
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.stash.set(obj, Metadata::Annotated(id));

        let stashed = self.native_provenance.remove(obj);
        let origin = match stashed {
            Some(source) if !is_literal => source,
            _ => site,
        };
        tracing::trace!(id = id.0, %origin, is_literal, "allocated object id");
        Resolved::Created { id, origin }
    }

    /// Lookup without allocation
    pub fn find_obj_id(&self, obj: &R) -> Option<ObjectId> {
        self.stash.get(obj).map(Metadata::id)
    }

    /// Lookup of an object the event stream guarantees is tracked.
    ///
    /// A miss means the host's events are inconsistent with earlier ones.
    pub fn find_extant_obj_id(&self, obj: &R, event: &'static str, site: Iid) -> Result<ObjectId> {
        self.find_obj_id(obj)
            .ok_or(TraceError::UntrackedObject { event, site })
    }

    pub fn has_metadata(&self, obj: &R) -> bool {
        self.stash.get(obj).is_some()
    }

    pub fn get_metadata(&self, obj: &R) -> Option<Metadata> {
        self.stash.get(obj)
    }

    pub fn set_metadata(&mut self, obj: &R, meta: Metadata) {
        self.stash.set(obj, meta);
    }

    /// Tag `id` as an unannotated constructor receiver
    pub fn set_unannotated_this(id: ObjectId) -> Metadata {
        Metadata::UnannotatedThis(id)
    }

    pub fn extract_obj_id(meta: Metadata) -> ObjectId {
        meta.id()
    }

    /// Remember where an untracked object came from, in case it gets an id
    /// later.
    pub fn set_source_id_for_native_obj(&mut self, obj: &R, source: SourceId) {
        self.native_provenance.insert(obj.clone(), source);
    }

    /// Drop all stashed provenance (called at flush points)
    pub fn flush_native_obj_provenance(&mut self) {
        if !self.native_provenance.is_empty() {
            tracing::debug!(
                entries = self.native_provenance.len(),
                "discarding native object provenance"
            );
        }
        self.native_provenance.clear();
    }

    pub fn native_provenance_len(&self) -> usize {
        self.native_provenance.len()
    }

    /// Number of references tracked so far
    pub fn tracked_count(&self) -> usize {
        self.stash.len()
    }
}

impl<R: Clone + Eq + Hash + 'static> Default for ObjectIdentityManager<R> {
    fn default() -> Self {
        Self::new()
    }
}
