//! Object heap, reference tables and per-thread frames.
//!
//! All state lives behind the single lock in [`Vm`](super::Vm). Nothing here
//! calls back into user code, so every method runs to completion under it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::ThreadId;

use crate::descriptor::{MethodSig, TypeSig};
use crate::error::{BridgeError, Result};
use crate::native::{InvocationTarget, JValue, RawHandle};

use super::class::NativeMethod;

pub(crate) const OBJECT_CLASS: ObjId = ObjId(1);
pub(crate) const CLASS_CLASS: ObjId = ObjId(2);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub(crate) struct ObjId(pub(crate) u64);

/// A stored field value. References hold the object, not a handle.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Slot {
    Value(JValue),
    Ref(Option<ObjId>),
}

pub(crate) enum ObjectData {
    Plain(HashMap<u64, Slot>),
    Boxed(JValue),
    Str(String),
    Class(ClassData),
    Proxy(Arc<dyn InvocationTarget>),
}

impl ObjectData {
    fn kind(&self) -> &'static str {
        match self {
            ObjectData::Plain(_) => "object",
            ObjectData::Boxed(_) => "boxed primitive",
            ObjectData::Str(_) => "string",
            ObjectData::Class(_) => "class",
            ObjectData::Proxy(_) => "proxy",
        }
    }
}

pub(crate) struct HeapObject {
    pub(crate) class: ObjId,
    pub(crate) data: ObjectData,
}

pub(crate) struct ClassData {
    pub(crate) name: String,
    pub(crate) superclass: Option<ObjId>,
    pub(crate) interfaces: Vec<ObjId>,
    pub(crate) is_interface: bool,
    pub(crate) methods: Vec<u64>,
    pub(crate) fields: Vec<u64>,
    pub(crate) statics: HashMap<u64, Slot>,
}

#[derive(Clone)]
pub(crate) enum MethodBody {
    Native(NativeMethod),
    Abstract,
}

pub(crate) struct MethodEntry {
    pub(crate) class: ObjId,
    pub(crate) name: String,
    pub(crate) signature: String,
    pub(crate) sig: MethodSig,
    pub(crate) is_static: bool,
    pub(crate) body: MethodBody,
}

pub(crate) struct FieldEntry {
    pub(crate) class: ObjId,
    pub(crate) name: String,
    pub(crate) sig: TypeSig,
    pub(crate) is_static: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RefKind {
    Local { thread: ThreadId, frame: usize },
    Global,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RefEntry {
    pub(crate) object: ObjId,
    pub(crate) kind: RefKind,
}

#[derive(Default)]
pub(crate) struct Frame {
    pub(crate) locals: Vec<u64>,
}

pub(crate) struct ThreadState {
    pub(crate) frames: Vec<Frame>,
    pub(crate) local_count: usize,
}

impl ThreadState {
    fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
            local_count: 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Counters {
    pub(crate) globals_created: u64,
    pub(crate) globals_deleted: u64,
    pub(crate) locals_deleted: u64,
    pub(crate) invalid_handle_errors: u64,
}

pub(crate) struct VmState {
    pub(crate) objects: HashMap<ObjId, HeapObject>,
    pub(crate) refs: HashMap<u64, RefEntry>,
    pub(crate) threads: HashMap<ThreadId, ThreadState>,
    pub(crate) classes: HashMap<String, ObjId>,
    pub(crate) proxy_classes: HashMap<String, ObjId>,
    pub(crate) methods: Vec<MethodEntry>,
    pub(crate) fields: Vec<FieldEntry>,
    pub(crate) counters: Counters,
    max_local_refs: Option<usize>,
    next_object: u64,
    next_handle: u64,
}

impl VmState {
    /// Heap containing only the two bootstrap classes.
    pub(crate) fn new(max_local_refs: Option<usize>) -> Self {
        let mut state = Self {
            objects: HashMap::new(),
            refs: HashMap::new(),
            threads: HashMap::new(),
            classes: HashMap::new(),
            proxy_classes: HashMap::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            counters: Counters::default(),
            max_local_refs,
            next_object: CLASS_CLASS.0 + 1,
            next_handle: 1,
        };

        for (id, name, superclass) in [
            (OBJECT_CLASS, "java/lang/Object", None),
            (CLASS_CLASS, "java/lang/Class", Some(OBJECT_CLASS)),
        ] {
            state.objects.insert(
                id,
                HeapObject {
                    class: CLASS_CLASS,
                    data: ObjectData::Class(ClassData::new(name, superclass, Vec::new(), false)),
                },
            );
            state.classes.insert(name.to_string(), id);
        }

        state
    }

    pub(crate) fn alloc(&mut self, class: ObjId, data: ObjectData) -> ObjId {
        let id = ObjId(self.next_object);
        self.next_object += 1;
        self.objects.insert(id, HeapObject { class, data });
        id
    }

    // Threads and frames

    pub(crate) fn attach(&mut self, thread: ThreadId) -> bool {
        if self.threads.contains_key(&thread) {
            return false;
        }
        self.threads.insert(thread, ThreadState::new());
        true
    }

    /// Drop every local of `thread` and forget it.
    pub(crate) fn detach(&mut self, thread: ThreadId) -> bool {
        let Some(state) = self.threads.remove(&thread) else {
            return false;
        };
        for frame in state.frames {
            for handle in frame.locals {
                self.refs.remove(&handle);
            }
        }
        true
    }

    fn thread_mut(&mut self, thread: ThreadId) -> Result<&mut ThreadState> {
        self.threads.get_mut(&thread).ok_or(BridgeError::NotAttached)
    }

    pub(crate) fn ensure_attached(&self, thread: ThreadId) -> Result<()> {
        if self.threads.contains_key(&thread) {
            Ok(())
        } else {
            Err(BridgeError::NotAttached)
        }
    }

    pub(crate) fn push_frame(&mut self, thread: ThreadId) -> Result<()> {
        self.thread_mut(thread)?.frames.push(Frame::default());
        Ok(())
    }

    /// Pop the innermost frame, deleting its locals. The base frame stays.
    pub(crate) fn pop_frame(&mut self, thread: ThreadId) -> Result<()> {
        let state = self.thread_mut(thread)?;
        if state.frames.len() <= 1 {
            return Err(BridgeError::FrameUnderflow);
        }

        let frame = state.frames.pop().unwrap_or_default();
        state.local_count -= frame.locals.len();
        for handle in frame.locals {
            self.refs.remove(&handle);
        }
        Ok(())
    }

    // References

    fn next_handle(&mut self) -> RawHandle {
        let raw = self.next_handle;
        self.next_handle += 1;
        RawHandle::from_raw(raw)
    }

    pub(crate) fn new_local(&mut self, thread: ThreadId, object: ObjId) -> Result<RawHandle> {
        let limit = self.max_local_refs;
        let state = self.thread_mut(thread)?;
        if limit.is_some_and(|max| state.local_count >= max) {
            return Err(BridgeError::ResourceExhausted(format!(
                "local reference limit of {} reached",
                state.local_count
            )));
        }

        let frame = state.frames.len() - 1;
        let handle = self.next_handle();
        let state = self.thread_mut(thread)?;
        state.frames[frame].locals.push(handle.as_raw());
        state.local_count += 1;

        self.refs.insert(
            handle.as_raw(),
            RefEntry {
                object,
                kind: RefKind::Local { thread, frame },
            },
        );
        Ok(handle)
    }

    pub(crate) fn new_global(&mut self, object: ObjId) -> RawHandle {
        let handle = self.next_handle();
        self.refs.insert(
            handle.as_raw(),
            RefEntry {
                object,
                kind: RefKind::Global,
            },
        );
        self.counters.globals_created += 1;
        handle
    }

    fn invalid(&mut self, handle: RawHandle) -> BridgeError {
        self.counters.invalid_handle_errors += 1;
        BridgeError::InvalidHandle(handle)
    }

    fn entry(&mut self, thread: ThreadId, handle: RawHandle) -> Result<RefEntry> {
        let Some(entry) = self.refs.get(&handle.as_raw()).copied() else {
            return Err(self.invalid(handle));
        };

        match entry.kind {
            RefKind::Local { thread: owner, .. } if owner != thread => Err(self.invalid(handle)),
            _ => Ok(entry),
        }
    }

    /// The object behind a live handle of either kind. Null is an error.
    pub(crate) fn resolve(&mut self, thread: ThreadId, handle: RawHandle) -> Result<ObjId> {
        if handle.is_null() {
            return Err(self.invalid(handle));
        }
        Ok(self.entry(thread, handle)?.object)
    }

    pub(crate) fn resolve_opt(
        &mut self,
        thread: ThreadId,
        handle: RawHandle,
    ) -> Result<Option<ObjId>> {
        if handle.is_null() {
            return Ok(None);
        }
        self.resolve(thread, handle).map(Some)
    }

    pub(crate) fn delete_local(&mut self, thread: ThreadId, handle: RawHandle) -> Result<()> {
        let entry = self.entry(thread, handle)?;
        let RefKind::Local { frame, .. } = entry.kind else {
            return Err(self.invalid(handle));
        };

        let state = self.thread_mut(thread)?;
        let locals = &mut state.frames[frame].locals;
        if let Some(pos) = locals.iter().position(|h| *h == handle.as_raw()) {
            locals.swap_remove(pos);
            state.local_count -= 1;
        }

        self.refs.remove(&handle.as_raw());
        self.counters.locals_deleted += 1;
        Ok(())
    }

    pub(crate) fn delete_global(&mut self, handle: RawHandle) -> Result<()> {
        match self.refs.get(&handle.as_raw()) {
            Some(entry) if entry.kind == RefKind::Global => {
                self.refs.remove(&handle.as_raw());
                self.counters.globals_deleted += 1;
                Ok(())
            }
            _ => Err(self.invalid(handle)),
        }
    }

    pub(crate) fn globals_to(&self, object: ObjId) -> usize {
        self.refs
            .values()
            .filter(|e| e.object == object && e.kind == RefKind::Global)
            .count()
    }

    pub(crate) fn local_total(&self) -> usize {
        self.threads.values().map(|t| t.local_count).sum()
    }

    // Objects and classes

    pub(crate) fn object(&self, id: ObjId) -> Result<&HeapObject> {
        self.objects
            .get(&id)
            .ok_or_else(|| BridgeError::RemoteException(format!("dangling object {}", id.0)))
    }

    pub(crate) fn object_mut(&mut self, id: ObjId) -> Result<&mut HeapObject> {
        self.objects
            .get_mut(&id)
            .ok_or_else(|| BridgeError::RemoteException(format!("dangling object {}", id.0)))
    }

    pub(crate) fn class(&self, id: ObjId) -> Result<&ClassData> {
        match &self.object(id)?.data {
            ObjectData::Class(class) => Ok(class),
            other => Err(BridgeError::mismatch("class", other.kind())),
        }
    }

    pub(crate) fn class_mut(&mut self, id: ObjId) -> Result<&mut ClassData> {
        match &mut self.object_mut(id)?.data {
            ObjectData::Class(class) => Ok(class),
            other => Err(BridgeError::mismatch("class", other.kind())),
        }
    }

    pub(crate) fn class_name(&self, id: ObjId) -> String {
        self.class(id)
            .map_or_else(|_| format!("<object {}>", id.0), |c| c.name.clone())
    }

    pub(crate) fn class_by_name(&self, name: &str) -> Result<ObjId> {
        let name = name.replace('.', "/");
        self.classes
            .get(&name)
            .copied()
            .ok_or(BridgeError::ClassNotFound(name))
    }

    /// Whether `class` is `target` or extends/implements it.
    pub(crate) fn is_assignable(&self, class: ObjId, target: ObjId) -> bool {
        if class == target || target == OBJECT_CLASS {
            return true;
        }

        let Ok(data) = self.class(class) else {
            return false;
        };

        data.superclass
            .iter()
            .chain(data.interfaces.iter())
            .any(|parent| self.is_assignable(*parent, target))
    }

    /// Find a method visible on `class`: own methods, then the superclass
    /// chain, then interfaces. Constructors are never inherited.
    pub(crate) fn find_method(
        &self,
        class: ObjId,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> Option<u64> {
        let data = self.class(class).ok()?;

        let own = data.methods.iter().copied().find(|id| {
            let m = &self.methods[(*id - 1) as usize];
            m.name == name && m.signature == signature && m.is_static == is_static
        });
        if own.is_some() || name == "<init>" {
            return own;
        }

        data.superclass
            .iter()
            .chain(data.interfaces.iter())
            .find_map(|parent| self.find_method(*parent, name, signature, is_static))
    }

    /// Most specific concrete implementation of `name signature` for an
    /// instance of `class`.
    pub(crate) fn resolve_virtual(&self, class: ObjId, name: &str, signature: &str) -> Option<u64> {
        let mut current = Some(class);
        while let Some(id) = current {
            let data = self.class(id).ok()?;
            for method in &data.methods {
                let m = &self.methods[(*method - 1) as usize];
                if m.name == name
                    && m.signature == signature
                    && !m.is_static
                    && matches!(m.body, MethodBody::Native(_))
                {
                    return Some(*method);
                }
            }
            current = data.superclass;
        }
        None
    }

    pub(crate) fn method(&self, id: u64) -> Option<&MethodEntry> {
        id.checked_sub(1).and_then(|i| self.methods.get(i as usize))
    }

    pub(crate) fn find_field(
        &self,
        class: ObjId,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> Option<u64> {
        let mut current = Some(class);
        while let Some(id) = current {
            let data = self.class(id).ok()?;
            let found = data.fields.iter().copied().find(|f| {
                let field = &self.fields[(*f - 1) as usize];
                field.name == name && field.sig.to_string() == signature && field.is_static == is_static
            });
            if found.is_some() {
                return found;
            }
            current = data.superclass;
        }
        None
    }

    pub(crate) fn field(&self, id: u64) -> Option<&FieldEntry> {
        id.checked_sub(1).and_then(|i| self.fields.get(i as usize))
    }

    /// Every instance field declared on `class` and its superclasses.
    pub(crate) fn instance_fields(&self, class: ObjId) -> Vec<u64> {
        let mut fields = Vec::new();
        let mut current = Some(class);
        while let Some(id) = current {
            let Ok(data) = self.class(id) else {
                break;
            };
            fields.extend(
                data.fields
                    .iter()
                    .copied()
                    .filter(|f| !self.fields[(*f - 1) as usize].is_static),
            );
            current = data.superclass;
        }
        fields
    }

    // Collection

    /// Free every object unreachable from a reference, a class or a static.
    pub(crate) fn collect(&mut self) -> usize {
        let mut marked: HashSet<ObjId> = HashSet::new();
        let mut pending: Vec<ObjId> = self
            .refs
            .values()
            .map(|e| e.object)
            .chain(self.classes.values().copied())
            .chain(self.proxy_classes.values().copied())
            .collect();

        while let Some(id) = pending.pop() {
            if !marked.insert(id) {
                continue;
            }
            let Some(object) = self.objects.get(&id) else {
                continue;
            };

            pending.push(object.class);
            match &object.data {
                ObjectData::Plain(slots) => pending.extend(slot_refs(slots)),
                ObjectData::Class(class) => {
                    pending.extend(slot_refs(&class.statics));
                    pending.extend(class.superclass);
                    pending.extend(class.interfaces.iter().copied());
                }
                ObjectData::Boxed(_) | ObjectData::Str(_) | ObjectData::Proxy(_) => {}
            }
        }

        let before = self.objects.len();
        self.objects.retain(|id, _| marked.contains(id));
        before - self.objects.len()
    }
}

fn slot_refs(slots: &HashMap<u64, Slot>) -> impl Iterator<Item = ObjId> + '_ {
    slots.values().filter_map(|slot| match slot {
        Slot::Ref(Some(id)) => Some(*id),
        _ => None,
    })
}

impl ClassData {
    pub(crate) fn new(
        name: &str,
        superclass: Option<ObjId>,
        interfaces: Vec<ObjId>,
        is_interface: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            superclass,
            interfaces,
            is_interface,
            methods: Vec::new(),
            fields: Vec::new(),
            statics: HashMap::new(),
        }
    }
}
