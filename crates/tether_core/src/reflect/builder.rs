use super::descriptor::{
    CallFn, FieldAccess, FieldDesc, GetFn, Invoker, ListFn, MethodDesc, PaintFn, PropertyDesc,
    SetFn, TypeDescriptor,
};
use super::Reflect;
use crate::codec::{Marshal, Object, Value, ValueKind};
use crate::error::{BridgeError, BridgeResult};
use crate::paint::Painter;
use std::any::Any;
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;

/// Collects the field and method tables of a [`Reflect`] type.
///
/// Indices are assigned in declaration order and never change afterwards.
pub struct TypeBuilder<T> {
    name: String,
    fields: Vec<FieldDesc>,
    methods: Vec<MethodDesc>,
    computed: Vec<(String, String)>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Reflect> TypeBuilder<T> {
    pub(crate) fn new() -> Self {
        let full = std::any::type_name::<T>();
        let name = full.rsplit("::").next().unwrap_or(full).to_string();
        Self {
            name,
            fields: Vec::new(),
            methods: Vec::new(),
            computed: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Override the type name reported to the native side.
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    /// Expose a field. `offset` must be `offset_of!(T, field)`.
    pub fn field<F, L>(&mut self, name: &str, offset: usize, lens: L) -> &mut Self
    where
        F: Marshal + Clone,
        L: Fn(&mut T) -> &mut F + Send + Sync + 'static,
    {
        let lens = Arc::new(lens);
        let read = Arc::clone(&lens);
        let get: GetFn = Arc::new(move |any: &mut dyn Any| {
            let target = downcast::<T>(any)?;
            Ok(read(target).clone().into_value())
        });
        let set: SetFn = Arc::new(move |any: &mut dyn Any, value: Value| {
            let target = downcast::<T>(any)?;
            *lens(target) = unmarshal::<F>(value)?;
            Ok(())
        });
        self.fields.push(FieldDesc {
            name: name.to_string(),
            offset,
            size: size_of::<F>(),
            kind: F::kind(),
            access: FieldAccess::Value { get, set },
        });
        self
    }

    /// Expose a list of native objects as a live list property.
    pub fn object_list<L>(&mut self, name: &str, offset: usize, lens: L) -> &mut Self
    where
        L: Fn(&mut T) -> &mut Vec<Object> + Send + Sync + 'static,
    {
        let list: ListFn = Arc::new(
            move |any: &mut dyn Any, f: &mut dyn FnMut(&mut Vec<Object>)| {
                let target = downcast::<T>(any)?;
                f(lens(target));
                Ok(())
            },
        );
        self.fields.push(FieldDesc {
            name: name.to_string(),
            offset,
            size: size_of::<Vec<Object>>(),
            kind: Vec::<Object>::kind(),
            access: FieldAccess::Objects(list),
        });
        self
    }

    /// Expose a method. Arguments arrive already converted to `params`.
    pub fn method<M>(&mut self, name: &str, params: &[ValueKind], f: M) -> &mut Self
    where
        M: Fn(&mut T, Vec<Value>) -> Vec<Value> + Send + Sync + 'static,
    {
        let call: CallFn = Arc::new(move |any: &mut dyn Any, args: Vec<Value>| {
            Ok(f(downcast::<T>(any)?, args))
        });
        self.push_method(name, params.to_vec(), Invoker::Call(call))
    }

    /// Zero-argument method returning one value.
    pub fn getter<R, G>(&mut self, name: &str, f: G) -> &mut Self
    where
        R: Marshal,
        G: Fn(&mut T) -> R + Send + Sync + 'static,
    {
        let call: CallFn = Arc::new(move |any: &mut dyn Any, _args: Vec<Value>| {
            Ok(vec![f(downcast::<T>(any)?).into_value()])
        });
        self.push_method(name, Vec::new(), Invoker::Call(call))
    }

    /// One-argument method with no result. Named `set_<property>`, it
    /// becomes that property's setter.
    pub fn setter<A, S>(&mut self, name: &str, f: S) -> &mut Self
    where
        A: Marshal,
        S: Fn(&mut T, A) + Send + Sync + 'static,
    {
        let call: CallFn = Arc::new(move |any: &mut dyn Any, args: Vec<Value>| {
            let target = downcast::<T>(any)?;
            let arg = unmarshal::<A>(args.into_iter().next().unwrap_or_default())?;
            f(target, arg);
            Ok(Vec::new())
        });
        self.push_method(name, vec![A::kind()], Invoker::Call(call))
    }

    /// Method invoked by the native renderer with a drawing context.
    pub fn paint<P>(&mut self, name: &str, f: P) -> &mut Self
    where
        P: Fn(&mut T, &Painter) + Send + Sync + 'static,
    {
        let paint: PaintFn = Arc::new(move |any: &mut dyn Any, painter: &Painter| {
            f(downcast::<T>(any)?, painter);
            Ok(())
        });
        self.push_method(name, Vec::new(), Invoker::Paint(paint))
    }

    /// Getter-only property backed by a method declared on this builder.
    pub fn computed(&mut self, name: &str, getter: &str) -> &mut Self {
        self.computed.push((name.to_string(), getter.to_string()));
        self
    }

    fn push_method(&mut self, name: &str, params: Vec<ValueKind>, invoker: Invoker) -> &mut Self {
        self.methods.push(MethodDesc {
            name: name.to_string(),
            params,
            invoker,
        });
        self
    }

    pub(crate) fn build(self) -> TypeDescriptor {
        let method_index = |name: &str| self.methods.iter().position(|m| m.name == name);

        let mut properties: Vec<PropertyDesc> = self
            .fields
            .iter()
            .enumerate()
            .map(|(index, field)| PropertyDesc {
                name: field.name.clone(),
                field: Some(index),
                getter: None,
                setter: method_index(&format!("set_{}", field.name)),
            })
            .collect();

        for (name, getter) in &self.computed {
            match method_index(getter) {
                Some(index) => properties.push(PropertyDesc {
                    name: name.clone(),
                    field: None,
                    getter: Some(index),
                    setter: method_index(&format!("set_{name}")),
                }),
                None => tracing::warn!(
                    type_name = %self.name,
                    property = %name,
                    getter = %getter,
                    "computed property refers to an undeclared method"
                ),
            }
        }

        TypeDescriptor {
            name: self.name,
            size: size_of::<T>(),
            fields: self.fields,
            methods: self.methods,
            properties,
        }
    }
}

fn downcast<T: 'static>(any: &mut dyn Any) -> BridgeResult<&mut T> {
    match any.downcast_mut::<T>() {
        Some(target) => Ok(target),
        None => Err(BridgeError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            actual: "foreign value".to_string(),
        }),
    }
}

fn unmarshal<F: Marshal>(value: Value) -> BridgeResult<F> {
    let from = value.type_name();
    F::from_value(value).ok_or_else(|| BridgeError::CannotUse {
        from,
        to: F::kind().to_string(),
    })
}
