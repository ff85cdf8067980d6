//! User-defined classes.

use std::fmt;
use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::native::{JValue, RawHandle};

use super::Vm;

/// Body of a native method.
///
/// Runs on the calling thread without the heap lock held, inside a fresh
/// local frame that is popped when it returns; an object result is promoted
/// into the caller's frame.
pub type NativeMethod = Arc<dyn Fn(&Vm, &Call<'_>) -> Result<JValue> + Send + Sync>;

/// Receiver and arguments of a native method invocation.
///
/// For instance methods and constructors `this` is a local reference to the
/// receiver; for static methods it is a local reference to the class.
pub struct Call<'a> {
    pub this: RawHandle,
    pub args: &'a [JValue],
}

impl Call<'_> {
    pub fn arg(&self, index: usize) -> Result<JValue> {
        self.args.get(index).copied().ok_or_else(|| {
            BridgeError::mismatch(
                format!("argument {index}"),
                format!("{} arguments", self.args.len()),
            )
        })
    }

    pub fn object_arg(&self, index: usize) -> Result<RawHandle> {
        let value = self.arg(index)?;
        value
            .as_object()
            .ok_or_else(|| BridgeError::mismatch("object", value.kind()))
    }
}

pub(crate) struct MethodDecl {
    pub(crate) name: String,
    pub(crate) signature: String,
    pub(crate) is_static: bool,
    pub(crate) body: Option<NativeMethod>,
}

pub(crate) struct FieldDecl {
    pub(crate) name: String,
    pub(crate) signature: String,
    pub(crate) is_static: bool,
}

/// Declarative description of a class, registered with
/// [`Vm::define_class`].
///
/// ```ignore
/// vm.define_class(
///     ClassBuilder::new("demo/Counter")
///         .field("count", "I")
///         .method("next", "()I", |vm, call| { /* ... */ }),
/// )?;
/// ```
pub struct ClassBuilder {
    pub(crate) name: String,
    pub(crate) superclass: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) is_interface: bool,
    pub(crate) methods: Vec<MethodDecl>,
    pub(crate) fields: Vec<FieldDecl>,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().replace('.', "/"),
            superclass: None,
            interfaces: Vec::new(),
            is_interface: false,
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// An interface: no constructors, only abstract or static methods.
    pub fn interface(name: impl Into<String>) -> Self {
        Self {
            is_interface: true,
            ..Self::new(name)
        }
    }

    pub fn extends(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = Some(superclass.into().replace('.', "/"));
        self
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into().replace('.', "/"));
        self
    }

    pub fn constructor(
        self,
        signature: impl Into<String>,
        body: impl Fn(&Vm, &Call<'_>) -> Result<JValue> + Send + Sync + 'static,
    ) -> Self {
        self.declare("<init>", signature, false, Some(Arc::new(body)))
    }

    pub fn method(
        self,
        name: impl Into<String>,
        signature: impl Into<String>,
        body: impl Fn(&Vm, &Call<'_>) -> Result<JValue> + Send + Sync + 'static,
    ) -> Self {
        self.declare(name, signature, false, Some(Arc::new(body)))
    }

    pub fn static_method(
        self,
        name: impl Into<String>,
        signature: impl Into<String>,
        body: impl Fn(&Vm, &Call<'_>) -> Result<JValue> + Send + Sync + 'static,
    ) -> Self {
        self.declare(name, signature, true, Some(Arc::new(body)))
    }

    pub fn abstract_method(self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.declare(name, signature, false, None)
    }

    pub fn field(self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.declare_field(name, signature, false)
    }

    pub fn static_field(self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.declare_field(name, signature, true)
    }

    fn declare(
        mut self,
        name: impl Into<String>,
        signature: impl Into<String>,
        is_static: bool,
        body: Option<NativeMethod>,
    ) -> Self {
        self.methods.push(MethodDecl {
            name: name.into(),
            signature: signature.into(),
            is_static,
            body,
        });
        self
    }

    fn declare_field(
        mut self,
        name: impl Into<String>,
        signature: impl Into<String>,
        is_static: bool,
    ) -> Self {
        self.fields.push(FieldDecl {
            name: name.into(),
            signature: signature.into(),
            is_static,
        });
        self
    }

    pub(crate) fn has_constructor(&self) -> bool {
        self.methods.iter().any(|m| m.name == "<init>")
    }
}

impl fmt::Debug for ClassBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBuilder")
            .field("name", &self.name)
            .field("superclass", &self.superclass)
            .field("interfaces", &self.interfaces)
            .field("methods", &self.methods.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}
