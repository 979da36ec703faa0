use crate::codec::{Object, Value, ValueKind};
use crate::error::BridgeResult;
use crate::paint::Painter;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub(crate) type GetFn = Arc<dyn Fn(&mut dyn Any) -> BridgeResult<Value> + Send + Sync>;
pub(crate) type SetFn = Arc<dyn Fn(&mut dyn Any, Value) -> BridgeResult<()> + Send + Sync>;
pub(crate) type ListFn =
    Arc<dyn Fn(&mut dyn Any, &mut dyn FnMut(&mut Vec<Object>)) -> BridgeResult<()> + Send + Sync>;
pub(crate) type CallFn = Arc<dyn Fn(&mut dyn Any, Vec<Value>) -> BridgeResult<Vec<Value>> + Send + Sync>;
pub(crate) type PaintFn = Arc<dyn Fn(&mut dyn Any, &Painter) -> BridgeResult<()> + Send + Sync>;

/// How a field is reached.
#[derive(Clone)]
pub(crate) enum FieldAccess {
    Value { get: GetFn, set: SetFn },
    /// List of native objects, exposed as a live list property.
    Objects(ListFn),
}

/// A reflected field.
#[derive(Clone)]
pub struct FieldDesc {
    pub(crate) name: String,
    pub(crate) offset: usize,
    pub(crate) size: usize,
    pub(crate) kind: ValueKind,
    pub(crate) access: FieldAccess,
}

impl FieldDesc {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Byte offset within the owning value.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn is_object_list(&self) -> bool {
        matches!(self.access, FieldAccess::Objects(_))
    }
}

#[derive(Clone)]
pub(crate) enum Invoker {
    Call(CallFn),
    Paint(PaintFn),
}

/// A reflected method.
#[derive(Clone)]
pub struct MethodDesc {
    pub(crate) name: String,
    pub(crate) params: Vec<ValueKind>,
    pub(crate) invoker: Invoker,
}

impl MethodDesc {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter kinds, in order.
    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }

    pub fn is_paint(&self) -> bool {
        matches!(self.invoker, Invoker::Paint(_))
    }
}

/// A property as the native side sees it: a field and/or getter, plus an
/// optional setter method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDesc {
    pub name: String,
    pub field: Option<usize>,
    pub getter: Option<usize>,
    pub setter: Option<usize>,
}

/// Per-type table mapping stable indices to accessors and invokers.
pub struct TypeDescriptor {
    pub(crate) name: String,
    pub(crate) size: usize,
    pub(crate) fields: Vec<FieldDesc>,
    pub(crate) methods: Vec<MethodDesc>,
    pub(crate) properties: Vec<PropertyDesc>,
}

impl TypeDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    pub fn methods(&self) -> &[MethodDesc] {
        &self.methods
    }

    pub fn properties(&self) -> &[PropertyDesc] {
        &self.properties
    }

    pub fn field(&self, index: usize) -> Option<&FieldDesc> {
        self.fields.get(index)
    }

    pub fn method(&self, index: usize) -> Option<&MethodDesc> {
        self.methods.get(index)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDesc> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }

    /// Property backed by the field stored at `offset`.
    pub fn property_at_offset(&self, offset: usize) -> Option<&PropertyDesc> {
        let field = self.fields.iter().position(|f| f.offset == offset)?;
        self.properties.iter().find(|p| p.field == Some(field))
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("fields", &self.fields.iter().map(|x| &x.name).collect::<Vec<_>>())
            .field("methods", &self.methods.iter().map(|x| &x.name).collect::<Vec<_>>())
            .field("properties", &self.properties)
            .finish()
    }
}
