//! In-process object runtime implementing [`NativeInterface`].
//!
//! Hosts that embed a real VM implement [`NativeInterface`] over its native
//! interface; [`Vm`] is a complete pure-Rust runtime behind the same surface.
//! It is what the test-suite and benches run against, and it enforces the
//! reference rules strictly: handles are never reused, locals belong to
//! their thread and frame, and any use of a stale handle is an
//! [`InvalidHandle`](BridgeError::InvalidHandle) error that is also counted
//! in [`VmStats::invalid_handle_errors`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Vm                                                         │
//! │  ├── Mutex<VmState>: heap, ref table, threads, classes      │
//! │  └── NativeInterface impl                                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ method call
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Dispatch (lock released)                                   │
//! │  ├── native body: FrameGuard + closure(&Vm, &Call)          │
//! │  └── proxy: box primitives → InvocationTarget → unbox       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod builtins;
mod class;
mod heap;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::config::Signedness;
use crate::descriptor::{MethodSig, TypeSig};
use crate::error::{BridgeError, Result};
use crate::native::{FieldId, InvocationTarget, JValue, MethodId, NativeInterface, RawHandle};
use crate::refs::FrameGuard;

pub use class::{Call, ClassBuilder, NativeMethod};

use heap::{
    CLASS_CLASS, ClassData, FieldEntry, MethodBody, MethodEntry, OBJECT_CLASS, ObjId, ObjectData,
    Slot, VmState,
};

const STRING_CLASS: &str = "java/lang/String";

/// Construction options for [`Vm`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmOptions {
    /// Representation of the byte type this runtime speaks. Values of the
    /// other representation are rejected with `TypeMismatch`.
    pub byte_signedness: Signedness,

    /// Maximum live locals per thread across all frames.
    pub max_local_refs: Option<usize>,
}

impl VmOptions {
    pub fn with_byte_signedness(mut self, signedness: Signedness) -> Self {
        self.byte_signedness = signedness;
        self
    }

    pub fn with_max_local_refs(mut self, limit: usize) -> Self {
        self.max_local_refs = Some(limit);
        self
    }
}

/// Snapshot of heap and reference-table counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    pub live_objects: usize,
    pub local_refs: usize,
    pub global_refs: usize,
    pub attached_threads: usize,
    pub globals_created: u64,
    pub globals_deleted: u64,
    pub locals_deleted: u64,
    pub invalid_handle_errors: u64,
}

enum Target {
    Native(NativeMethod),
    Proxy(Arc<dyn InvocationTarget>),
}

pub struct Vm {
    state: Mutex<VmState>,
    options: VmOptions,
}

impl Vm {
    /// A runtime with the built-in classes loaded and no attached threads.
    pub fn new(options: VmOptions) -> Result<Self> {
        let mut state = VmState::new(options.max_local_refs);
        builtins::install(&mut state, options.byte_signedness)?;

        log::debug!(
            "Vm created ({} classes, byte signedness {:?})",
            state.classes.len(),
            options.byte_signedness
        );

        Ok(Self {
            state: Mutex::new(state),
            options,
        })
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    fn lock(&self) -> MutexGuard<'_, VmState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current() -> ThreadId {
        thread::current().id()
    }

    /// Register a user class.
    pub fn define_class(&self, builder: ClassBuilder) -> Result<()> {
        let mut state = self.lock();
        let name = builder.name.clone();
        define_in(&mut state, builder, self.options.byte_signedness)?;
        log::trace!("Defined class {}", name);
        Ok(())
    }

    /// Detach the calling thread, deleting every local it still holds.
    pub fn detach_current_thread(&self) -> bool {
        self.lock().detach(Self::current())
    }

    pub fn stats(&self) -> VmStats {
        let state = self.lock();
        let global_refs = state
            .refs
            .values()
            .filter(|e| e.kind == heap::RefKind::Global)
            .count();

        VmStats {
            live_objects: state.objects.len(),
            local_refs: state.local_total(),
            global_refs,
            attached_threads: state.threads.len(),
            globals_created: state.counters.globals_created,
            globals_deleted: state.counters.globals_deleted,
            locals_deleted: state.counters.locals_deleted,
            invalid_handle_errors: state.counters.invalid_handle_errors,
        }
    }

    /// Free unreachable objects. Returns how many were freed.
    pub fn collect_garbage(&self) -> usize {
        let freed = self.lock().collect();
        log::debug!("Collected {} objects", freed);
        freed
    }

    /// Whether `handle` is live and usable from the calling thread. Does not
    /// count as an invalid use.
    pub fn is_valid_handle(&self, handle: RawHandle) -> bool {
        let state = self.lock();
        match state.refs.get(&handle.as_raw()) {
            Some(entry) => match entry.kind {
                heap::RefKind::Global => true,
                heap::RefKind::Local { thread, .. } => thread == Self::current(),
            },
            None => false,
        }
    }

    /// Number of live global references to the object behind `handle`.
    pub fn global_refs_to(&self, handle: RawHandle) -> Result<usize> {
        let mut state = self.lock();
        let object = state.resolve(Self::current(), handle)?;
        Ok(state.globals_to(object))
    }

    // Helpers for native method bodies

    /// Box a primitive into a new local of the matching box class.
    pub fn box_primitive(&self, value: JValue) -> Result<RawHandle> {
        let class_name = match value {
            JValue::Boolean(_) => "java/lang/Boolean",
            JValue::Byte(_) | JValue::UByte(_) => "java/lang/Byte",
            JValue::Char(_) => "java/lang/Character",
            JValue::Short(_) => "java/lang/Short",
            JValue::Int(_) => "java/lang/Integer",
            JValue::Long(_) => "java/lang/Long",
            JValue::Float(_) => "java/lang/Float",
            JValue::Double(_) => "java/lang/Double",
            JValue::Void | JValue::Object(_) => {
                return Err(BridgeError::mismatch("primitive", value.kind()));
            }
        };
        if let JValue::Byte(_) | JValue::UByte(_) = value {
            self.check_value(&TypeSig::Byte, &value)?;
        }

        let thread = Self::current();
        let mut state = self.lock();
        let class = state.class_by_name(class_name)?;
        let object = state.alloc(class, ObjectData::Boxed(value));
        state.new_local(thread, object)
    }

    /// The primitive held by a boxed object.
    pub fn unbox_primitive(&self, handle: RawHandle) -> Result<JValue> {
        let thread = Self::current();
        let mut state = self.lock();
        let object = state.resolve(thread, handle)?;
        let heap_object = state.object(object)?;
        match heap_object.data {
            ObjectData::Boxed(value) => Ok(value),
            _ => Err(BridgeError::mismatch(
                "boxed primitive",
                state.class_name(heap_object.class),
            )),
        }
    }

    /// Like [`unbox_primitive`](Self::unbox_primitive) but `None` for
    /// objects that are not boxes.
    pub fn boxed_value(&self, handle: RawHandle) -> Result<Option<JValue>> {
        let thread = Self::current();
        let mut state = self.lock();
        let object = state.resolve(thread, handle)?;
        Ok(match state.object(object)?.data {
            ObjectData::Boxed(value) => Some(value),
            _ => None,
        })
    }

    /// String contents, or `None` for objects that are not strings.
    pub fn string_value(&self, handle: RawHandle) -> Result<Option<String>> {
        let thread = Self::current();
        let mut state = self.lock();
        let object = state.resolve(thread, handle)?;
        Ok(match &state.object(object)?.data {
            ObjectData::Str(s) => Some(s.clone()),
            _ => None,
        })
    }

    /// Stable per-object hash, independent of any `hashCode` override.
    pub fn identity_hash(&self, handle: RawHandle) -> Result<i32> {
        let thread = Self::current();
        let object = self.lock().resolve(thread, handle)?;
        Ok(((object.0 as u32).wrapping_mul(0x9E37_79B9) & 0x7FFF_FFFF) as i32)
    }

    /// Internal name of the runtime class of `handle`.
    pub fn class_name_of(&self, handle: RawHandle) -> Result<String> {
        let thread = Self::current();
        let mut state = self.lock();
        let object = state.resolve(thread, handle)?;
        let class = state.object(object)?.class;
        Ok(state.class_name(class))
    }

    /// Internal name of the class object `class`.
    pub fn class_name(&self, class: RawHandle) -> Result<String> {
        let thread = Self::current();
        let mut state = self.lock();
        let class = state.resolve(thread, class)?;
        Ok(state.class(class)?.name.clone())
    }

    // Dispatch

    /// Validate a value against a declared type: kind, byte representation
    /// and, for class types, assignability.
    fn check_value(&self, sig: &TypeSig, value: &JValue) -> Result<()> {
        if !sig.accepts(value) {
            return Err(BridgeError::mismatch(sig.to_string(), value.kind()));
        }

        match (sig, self.options.byte_signedness, value) {
            (TypeSig::Byte, Signedness::Signed, JValue::UByte(_)) => {
                Err(BridgeError::mismatch("signed byte", value.kind()))
            }
            (TypeSig::Byte, Signedness::Unsigned, JValue::Byte(_)) => {
                Err(BridgeError::mismatch("unsigned byte", value.kind()))
            }
            _ => Ok(()),
        }
    }

    fn check_args(
        &self,
        state: &mut VmState,
        thread: ThreadId,
        sig: &MethodSig,
        args: &[JValue],
    ) -> Result<()> {
        sig.check_args(args)?;

        for (param, arg) in sig.args.iter().zip(args) {
            self.check_value(param, arg)?;
            self.check_reference(state, thread, param, arg)?;
        }
        Ok(())
    }

    fn check_reference(
        &self,
        state: &mut VmState,
        thread: ThreadId,
        sig: &TypeSig,
        value: &JValue,
    ) -> Result<()> {
        let JValue::Object(handle) = value else {
            return Ok(());
        };
        let Some(object) = state.resolve_opt(thread, *handle)? else {
            return Ok(());
        };

        if let TypeSig::Object(name) = sig {
            if let Ok(expected) = state.class_by_name(name) {
                let actual = state.object(object)?.class;
                if !state.is_assignable(actual, expected) {
                    return Err(BridgeError::mismatch(name.clone(), state.class_name(actual)));
                }
            }
        }
        Ok(())
    }

    fn to_slot(
        &self,
        state: &mut VmState,
        thread: ThreadId,
        sig: &TypeSig,
        value: JValue,
    ) -> Result<Slot> {
        self.check_value(sig, &value)?;
        self.check_reference(state, thread, sig, &value)?;
        Ok(match value {
            JValue::Object(handle) => Slot::Ref(state.resolve_opt(thread, handle)?),
            other => Slot::Value(other),
        })
    }

    fn from_slot(state: &mut VmState, thread: ThreadId, slot: Slot) -> Result<JValue> {
        Ok(match slot {
            Slot::Value(value) => value,
            Slot::Ref(None) => JValue::Object(RawHandle::NULL),
            Slot::Ref(Some(object)) => JValue::Object(state.new_local(thread, object)?),
        })
    }

    /// Run a resolved method body with the lock released.
    fn run(
        &self,
        target: Target,
        this: RawHandle,
        name: &str,
        sig: &MethodSig,
        args: &[JValue],
    ) -> Result<JValue> {
        let frame = FrameGuard::push(self, args.len() + 4)?;

        match target {
            Target::Native(body) => {
                let this = self.new_local_ref(this)?;
                let result = body(self, &Call { this, args })?;

                if sig.ret == TypeSig::Void {
                    if result != JValue::Void {
                        return Err(BridgeError::mismatch("void", result.kind()));
                    }
                } else {
                    self.check_value(&sig.ret, &result)?;
                }

                match result {
                    JValue::Object(handle) => Ok(JValue::Object(frame.pop_with(handle)?)),
                    value => {
                        frame.pop_with(RawHandle::NULL)?;
                        Ok(value)
                    }
                }
            }
            Target::Proxy(target) => {
                let mut handles = Vec::with_capacity(args.len());
                for arg in args {
                    handles.push(match arg {
                        JValue::Object(handle) => self.new_local_ref(*handle)?,
                        primitive => self.box_primitive(*primitive)?,
                    });
                }

                let out = target.invoke(name, handles)?;

                match &sig.ret {
                    TypeSig::Void => {
                        frame.pop_with(RawHandle::NULL)?;
                        Ok(JValue::Void)
                    }
                    ret if ret.is_reference() => Ok(JValue::Object(frame.pop_with(out)?)),
                    ret => {
                        if out.is_null() {
                            return Err(BridgeError::RemoteException(format!(
                                "proxy method `{name}` returned null for a `{ret}` result"
                            )));
                        }
                        let value = self.unbox_primitive(out)?;
                        self.check_value(ret, &value)?;
                        frame.pop_with(RawHandle::NULL)?;
                        Ok(value)
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("options", &self.options)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Create the class object for `builder` and install its members.
fn define_in(state: &mut VmState, builder: ClassBuilder, signedness: Signedness) -> Result<ObjId> {
    if state.classes.contains_key(&builder.name) {
        return Err(BridgeError::RemoteException(format!(
            "class `{}` is already defined",
            builder.name
        )));
    }

    let superclass = match &builder.superclass {
        Some(name) => state.class_by_name(name)?,
        None => OBJECT_CLASS,
    };
    let interfaces = builder
        .interfaces
        .iter()
        .map(|name| state.class_by_name(name))
        .collect::<Result<Vec<_>>>()?;

    let data = ClassData::new(&builder.name, Some(superclass), interfaces, builder.is_interface);
    let class = state.alloc(CLASS_CLASS, ObjectData::Class(data));
    state.classes.insert(builder.name.clone(), class);

    if let Err(e) = add_members(state, class, builder, signedness) {
        let name = state.class_name(class);
        state.classes.remove(&name);
        return Err(e);
    }
    Ok(class)
}

/// Install the methods and fields of `builder` on an existing class.
fn add_members(
    state: &mut VmState,
    class: ObjId,
    builder: ClassBuilder,
    signedness: Signedness,
) -> Result<()> {
    let needs_default_ctor = !builder.is_interface && !builder.has_constructor();
    let mut methods = builder.methods;
    if needs_default_ctor {
        methods.push(class::MethodDecl {
            name: "<init>".into(),
            signature: "()V".into(),
            is_static: false,
            body: Some(Arc::new(no_op)),
        });
    }

    let mut method_ids = Vec::with_capacity(methods.len());
    for decl in methods {
        let sig = MethodSig::parse(&decl.signature)?;
        if decl.name == "<init>" && (sig.ret != TypeSig::Void || builder.is_interface) {
            return Err(BridgeError::InvalidSignature(decl.signature));
        }

        state.methods.push(MethodEntry {
            class,
            name: decl.name,
            signature: decl.signature,
            sig,
            is_static: decl.is_static,
            body: decl.body.map_or(MethodBody::Abstract, MethodBody::Native),
        });
        method_ids.push(state.methods.len() as u64);
    }

    let mut field_ids = Vec::with_capacity(builder.fields.len());
    let mut statics = HashMap::new();
    for decl in builder.fields {
        let sig = TypeSig::parse(&decl.signature)?;
        let default = default_slot(&sig, signedness)
            .ok_or_else(|| BridgeError::InvalidSignature(decl.signature.clone()))?;

        state.fields.push(FieldEntry {
            class,
            name: decl.name,
            sig,
            is_static: decl.is_static,
        });
        let id = state.fields.len() as u64;
        if decl.is_static {
            statics.insert(id, default);
        }
        field_ids.push(id);
    }

    let data = state.class_mut(class)?;
    data.methods.extend(method_ids);
    data.fields.extend(field_ids);
    data.statics.extend(statics);
    Ok(())
}

fn no_op(_: &Vm, _: &Call<'_>) -> Result<JValue> {
    Ok(JValue::Void)
}

fn default_slot(sig: &TypeSig, signedness: Signedness) -> Option<Slot> {
    let value = match sig {
        TypeSig::Void => return None,
        TypeSig::Object(_) | TypeSig::Array(_) => return Some(Slot::Ref(None)),
        TypeSig::Boolean => JValue::Boolean(false),
        TypeSig::Byte => match signedness {
            Signedness::Signed => JValue::Byte(0),
            Signedness::Unsigned => JValue::UByte(0),
        },
        TypeSig::Char => JValue::Char(0),
        TypeSig::Short => JValue::Short(0),
        TypeSig::Int => JValue::Int(0),
        TypeSig::Long => JValue::Long(0),
        TypeSig::Float => JValue::Float(0.0),
        TypeSig::Double => JValue::Double(0.0),
    };
    Some(Slot::Value(value))
}

impl NativeInterface for Vm {
    fn attach_current_thread(&self) -> Result<()> {
        if self.lock().attach(Self::current()) {
            log::trace!("Attached thread {:?}", Self::current());
        }
        Ok(())
    }

    fn is_current_thread_attached(&self) -> bool {
        self.lock().threads.contains_key(&Self::current())
    }

    fn new_local_ref(&self, obj: RawHandle) -> Result<RawHandle> {
        if obj.is_null() {
            return Ok(RawHandle::NULL);
        }
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;
        let object = state.resolve(thread, obj)?;
        state.new_local(thread, object)
    }

    fn delete_local_ref(&self, obj: RawHandle) -> Result<()> {
        if obj.is_null() {
            return Ok(());
        }
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;
        state.delete_local(thread, obj)
    }

    fn new_global_ref(&self, obj: RawHandle) -> Result<RawHandle> {
        if obj.is_null() {
            return Ok(RawHandle::NULL);
        }
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;
        let object = state.resolve(thread, obj)?;
        Ok(state.new_global(object))
    }

    fn delete_global_ref(&self, obj: RawHandle) -> Result<()> {
        if obj.is_null() {
            return Ok(());
        }
        let mut state = self.lock();
        state.ensure_attached(Self::current())?;
        state.delete_global(obj)
    }

    fn push_local_frame(&self, _capacity: usize) -> Result<()> {
        self.lock().push_frame(Self::current())
    }

    fn pop_local_frame(&self, result: RawHandle) -> Result<RawHandle> {
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;

        // Resolve before the frame (and possibly `result`) goes away
        let object = state.resolve_opt(thread, result);
        state.pop_frame(thread)?;

        match object? {
            Some(object) => state.new_local(thread, object),
            None => Ok(RawHandle::NULL),
        }
    }

    fn is_same_object(&self, a: RawHandle, b: RawHandle) -> Result<bool> {
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;
        Ok(state.resolve_opt(thread, a)? == state.resolve_opt(thread, b)?)
    }

    fn is_instance_of(&self, obj: RawHandle, class: RawHandle) -> Result<bool> {
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;

        let class = state.resolve(thread, class)?;
        state.class(class)?;
        let Some(object) = state.resolve_opt(thread, obj)? else {
            return Ok(false);
        };
        let actual = state.object(object)?.class;
        Ok(state.is_assignable(actual, class))
    }

    fn get_object_class(&self, obj: RawHandle) -> Result<RawHandle> {
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;
        let object = state.resolve(thread, obj)?;
        let class = state.object(object)?.class;
        state.new_local(thread, class)
    }

    fn find_class(&self, name: &str) -> Result<RawHandle> {
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;
        let class = state.class_by_name(name)?;
        state.new_local(thread, class)
    }

    fn get_method_id(&self, class: RawHandle, name: &str, signature: &str) -> Result<MethodId> {
        self.lookup_method(class, name, signature, false)
    }

    fn get_static_method_id(
        &self,
        class: RawHandle,
        name: &str,
        signature: &str,
    ) -> Result<MethodId> {
        self.lookup_method(class, name, signature, true)
    }

    fn get_field_id(&self, class: RawHandle, name: &str, signature: &str) -> Result<FieldId> {
        self.lookup_field(class, name, signature, false)
    }

    fn get_static_field_id(
        &self,
        class: RawHandle,
        name: &str,
        signature: &str,
    ) -> Result<FieldId> {
        self.lookup_field(class, name, signature, true)
    }

    fn call_method(&self, obj: RawHandle, method: MethodId, args: &[JValue]) -> Result<JValue> {
        let thread = Self::current();
        let (target, name, sig) = {
            let mut state = self.lock();
            state.ensure_attached(thread)?;

            let receiver = state.resolve(thread, obj)?;
            let entry = method_entry(&state, method)?;
            if entry.is_static {
                return Err(BridgeError::mismatch("instance method", "static method"));
            }
            let (declaring, name, signature, sig) = (
                entry.class,
                entry.name.clone(),
                entry.signature.clone(),
                entry.sig.clone(),
            );

            let actual = state.object(receiver)?.class;
            if !state.is_assignable(actual, declaring) {
                return Err(BridgeError::mismatch(
                    state.class_name(declaring),
                    state.class_name(actual),
                ));
            }

            let target = match &state.object(receiver)?.data {
                ObjectData::Proxy(target) => Target::Proxy(target.clone()),
                _ => {
                    let body = if name == "<init>" {
                        Some(entry_body(&state, method))
                    } else {
                        state
                            .resolve_virtual(actual, &name, &signature)
                            .map(|id| entry_body(&state, MethodId::from_raw(id)))
                    };
                    match body.flatten() {
                        Some(body) => Target::Native(body),
                        None => {
                            return Err(BridgeError::RemoteException(format!(
                                "AbstractMethodError: {}.{}{}",
                                state.class_name(actual),
                                name,
                                signature
                            )));
                        }
                    }
                }
            };

            self.check_args(&mut state, thread, &sig, args)?;
            (target, name, sig)
        };

        self.run(target, obj, &name, &sig, args)
    }

    fn call_static_method(
        &self,
        class: RawHandle,
        method: MethodId,
        args: &[JValue],
    ) -> Result<JValue> {
        let thread = Self::current();
        let (body, name, sig) = {
            let mut state = self.lock();
            state.ensure_attached(thread)?;

            let class_id = state.resolve(thread, class)?;
            state.class(class_id)?;
            let entry = method_entry(&state, method)?;
            if !entry.is_static {
                return Err(BridgeError::mismatch("static method", "instance method"));
            }
            let (name, sig) = (entry.name.clone(), entry.sig.clone());
            let body = entry_body(&state, method).ok_or_else(|| {
                BridgeError::RemoteException(format!("AbstractMethodError: {name}"))
            })?;

            self.check_args(&mut state, thread, &sig, args)?;
            (body, name, sig)
        };

        self.run(Target::Native(body), class, &name, &sig, args)
    }

    fn new_object(&self, class: RawHandle, ctor: MethodId, args: &[JValue]) -> Result<RawHandle> {
        let thread = Self::current();
        let (body, sig, local) = {
            let mut state = self.lock();
            state.ensure_attached(thread)?;

            let class_id = state.resolve(thread, class)?;
            if state.class(class_id)?.is_interface {
                return Err(BridgeError::RemoteException(format!(
                    "InstantiationError: {}",
                    state.class_name(class_id)
                )));
            }

            let entry = method_entry(&state, ctor)?;
            if entry.name != "<init>" || entry.class != class_id {
                return Err(BridgeError::mismatch(
                    format!("constructor of {}", state.class_name(class_id)),
                    format!("{}{}", entry.name, entry.signature),
                ));
            }
            let sig = entry.sig.clone();
            let body = entry_body(&state, ctor)
                .ok_or_else(|| BridgeError::RemoteException("abstract constructor".into()))?;

            self.check_args(&mut state, thread, &sig, args)?;

            let slots = state
                .instance_fields(class_id)
                .into_iter()
                .filter_map(|id| {
                    let field = state.field(id)?;
                    Some((id, default_slot(&field.sig, self.options.byte_signedness)?))
                })
                .collect();
            let object = state.alloc(class_id, ObjectData::Plain(slots));
            (body, sig, state.new_local(thread, object)?)
        };

        if let Err(e) = self.run(Target::Native(body), local, "<init>", &sig, args) {
            let _ = self.delete_local_ref(local);
            return Err(e);
        }
        Ok(local)
    }

    fn get_field(&self, obj: RawHandle, field: FieldId) -> Result<JValue> {
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;

        let object = state.resolve(thread, obj)?;
        let entry = field_entry(&state, field, false)?;
        let slot = match &state.object(object)?.data {
            ObjectData::Plain(slots) => slots.get(&field.as_raw()).copied(),
            _ => None,
        };
        let slot = slot.ok_or_else(|| field_not_found(&state, object, entry))?;
        Self::from_slot(&mut state, thread, slot)
    }

    fn set_field(&self, obj: RawHandle, field: FieldId, value: JValue) -> Result<()> {
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;

        let object = state.resolve(thread, obj)?;
        let sig = field_entry(&state, field, false)?.sig.clone();
        let slot = self.to_slot(&mut state, thread, &sig, value)?;

        let missing = {
            let entry = field_entry(&state, field, false)?;
            field_not_found(&state, object, entry)
        };
        match &mut state.object_mut(object)?.data {
            ObjectData::Plain(slots) if slots.contains_key(&field.as_raw()) => {
                slots.insert(field.as_raw(), slot);
                Ok(())
            }
            _ => Err(missing),
        }
    }

    fn get_static_field(&self, class: RawHandle, field: FieldId) -> Result<JValue> {
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;

        let _ = state.resolve(thread, class)?;
        let owner = field_entry(&state, field, true)?.class;
        let slot = state
            .class(owner)?
            .statics
            .get(&field.as_raw())
            .copied()
            .ok_or_else(|| BridgeError::RemoteException("static field without storage".into()))?;
        Self::from_slot(&mut state, thread, slot)
    }

    fn set_static_field(&self, class: RawHandle, field: FieldId, value: JValue) -> Result<()> {
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;

        let _ = state.resolve(thread, class)?;
        let entry = field_entry(&state, field, true)?;
        let (owner, sig) = (entry.class, entry.sig.clone());
        let slot = self.to_slot(&mut state, thread, &sig, value)?;
        state.class_mut(owner)?.statics.insert(field.as_raw(), slot);
        Ok(())
    }

    fn new_string(&self, value: &str) -> Result<RawHandle> {
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;
        let class = state.class_by_name(STRING_CLASS)?;
        let object = state.alloc(class, ObjectData::Str(value.to_string()));
        state.new_local(thread, object)
    }

    fn get_string(&self, obj: RawHandle) -> Result<String> {
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;
        let object = state.resolve(thread, obj)?;
        let heap_object = state.object(object)?;
        match &heap_object.data {
            ObjectData::Str(s) => Ok(s.clone()),
            _ => Err(BridgeError::mismatch(
                STRING_CLASS,
                state.class_name(heap_object.class),
            )),
        }
    }

    fn create_proxy(
        &self,
        interface: &str,
        target: Arc<dyn InvocationTarget>,
    ) -> Result<RawHandle> {
        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;

        let iface = state.class_by_name(interface)?;
        if !state.class(iface)?.is_interface {
            return Err(BridgeError::mismatch("interface", state.class_name(iface)));
        }

        let class = match state.proxy_classes.get(interface).copied() {
            Some(class) => class,
            None => {
                let name = format!("$Proxy{}", state.proxy_classes.len());
                let data = ClassData::new(&name, Some(OBJECT_CLASS), vec![iface], false);
                let class = state.alloc(CLASS_CLASS, ObjectData::Class(data));
                state.proxy_classes.insert(interface.to_string(), class);
                class
            }
        };

        let object = state.alloc(class, ObjectData::Proxy(target));
        state.new_local(thread, object)
    }
}

impl Vm {
    fn lookup_method(
        &self,
        class: RawHandle,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> Result<MethodId> {
        MethodSig::parse(signature)?;

        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;
        let class = state.resolve(thread, class)?;
        state.class(class)?;

        state
            .find_method(class, name, signature, is_static)
            .map(MethodId::from_raw)
            .ok_or_else(|| BridgeError::MethodNotFound {
                class: state.class_name(class),
                name: name.to_string(),
                signature: signature.to_string(),
            })
    }

    fn lookup_field(
        &self,
        class: RawHandle,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> Result<FieldId> {
        TypeSig::parse(signature)?;

        let thread = Self::current();
        let mut state = self.lock();
        state.ensure_attached(thread)?;
        let class = state.resolve(thread, class)?;
        state.class(class)?;

        state
            .find_field(class, name, signature, is_static)
            .map(FieldId::from_raw)
            .ok_or_else(|| BridgeError::FieldNotFound {
                class: state.class_name(class),
                name: name.to_string(),
                signature: signature.to_string(),
            })
    }
}

fn method_entry(state: &VmState, method: MethodId) -> Result<&MethodEntry> {
    state
        .method(method.as_raw())
        .ok_or_else(|| BridgeError::RemoteException(format!("unknown method id {}", method.as_raw())))
}

fn entry_body(state: &VmState, method: MethodId) -> Option<NativeMethod> {
    match &state.method(method.as_raw())?.body {
        MethodBody::Native(body) => Some(body.clone()),
        MethodBody::Abstract => None,
    }
}

fn field_entry(state: &VmState, field: FieldId, is_static: bool) -> Result<&FieldEntry> {
    state
        .field(field.as_raw())
        .filter(|f| f.is_static == is_static)
        .ok_or_else(|| BridgeError::RemoteException(format!("unknown field id {}", field.as_raw())))
}

fn field_not_found(state: &VmState, object: ObjId, entry: &FieldEntry) -> BridgeError {
    let class = state
        .object(object)
        .map_or_else(|_| String::new(), |o| state.class_name(o.class));
    BridgeError::FieldNotFound {
        class,
        name: entry.name.clone(),
        signature: entry.sig.to_string(),
    }
}
