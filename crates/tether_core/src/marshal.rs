//! Reflection marshaller
//!
//! Services the native side's field, method, paint and list-property
//! callbacks against the descriptor table of the value a fold wraps. Each
//! callback first resolves the fold's engine. Values are never locked while
//! the registry is.

use crate::bridge::BridgeInner;
use crate::codec::{self, DataValue, Marshal, Object, Value, ValueKind, MAX_PARAMS};
use crate::error::{BridgeError, BridgeResult};
use crate::fold::FoldId;
use crate::managed::Managed;
use crate::native::{EngineAddr, NativeHandle, Ownership};
use crate::paint::Painter;
use crate::reflect::{FieldAccess, Invoker, MethodDesc, TypeDescriptor};
use crate::registry::Resolved;
use std::sync::Arc;

impl BridgeInner {
    /// Resolve the fold's engine, running a registered type's initializer the
    /// first time.
    fn resolve(&self, engine: Option<EngineAddr>, fold: FoldId) -> BridgeResult<Resolved> {
        let mut resolved = self.registry.lock().resolve(engine, fold)?;
        if let Some(init) = resolved.init.take() {
            init(
                &resolved.value,
                Object::new(Some(resolved.engine), resolved.handle),
            );
        }
        Ok(resolved)
    }

    fn encode(&self, engine: EngineAddr, value: Value) -> BridgeResult<DataValue> {
        codec::encode(value, &mut |managed: &Managed| {
            self.wrap_value(engine, managed, Ownership::Script)
        })
    }

    fn decode(&self, engine: EngineAddr, value: &DataValue) -> BridgeResult<Value> {
        codec::decode(value, Some(engine), &|fold| self.registry.lock().value_of(fold))
    }

    pub(crate) fn read_property(
        &self,
        engine: Option<EngineAddr>,
        fold: FoldId,
        field: Option<usize>,
        getter: Option<usize>,
        setter: Option<usize>,
    ) -> BridgeResult<DataValue> {
        let target = self.resolve(engine, fold)?;
        let ty = Arc::clone(target.value.descriptor());

        if let Some(index) = getter {
            let method = method(&ty, index)?;
            let mut results = call(&target.value, method, Vec::new())?;
            if results.is_empty() {
                return Err(BridgeError::NoResult {
                    method: method.name().to_string(),
                });
            }
            return self.encode(target.engine, results.swap_remove(0));
        }

        let Some(index) = field else {
            return Err(BridgeError::NoAccessor {
                type_name: ty.name().to_string(),
            });
        };
        let desc = ty.field(index).ok_or_else(|| BridgeError::UnknownField {
            type_name: ty.name().to_string(),
            index,
        })?;
        match &desc.access {
            FieldAccess::Objects(_) => Ok(DataValue::ListProperty(
                self.runtime.new_list_property(fold, index, setter),
            )),
            FieldAccess::Value { get, .. } => {
                let value = match target.value.with_any(|any| get(any))? {
                    Value::Managed(inner) if inner.is_unaddressable() => {
                        return Err(BridgeError::UnaddressableField {
                            type_name: ty.name().to_string(),
                            field: desc.name().to_string(),
                        });
                    }
                    Value::Managed(inner) => Value::Managed(inner.peel()),
                    other => other,
                };
                self.encode(target.engine, value)
            }
        }
    }

    pub(crate) fn write_property(
        &self,
        engine: Option<EngineAddr>,
        fold: FoldId,
        field: Option<usize>,
        setter: Option<usize>,
        value: &DataValue,
    ) -> BridgeResult<()> {
        let target = self.resolve(engine, fold)?;
        let ty = Arc::clone(target.value.descriptor());
        let decoded = self.decode(target.engine, value)?;

        if let Some(index) = setter {
            return call_setter(&target.value, method(&ty, index)?, decoded);
        }

        let Some(index) = field else {
            return Err(BridgeError::NoAccessor {
                type_name: ty.name().to_string(),
            });
        };
        let desc = ty.field(index).ok_or_else(|| BridgeError::UnknownField {
            type_name: ty.name().to_string(),
            index,
        })?;
        let converted = convert(decoded, desc.kind())?;
        match &desc.access {
            FieldAccess::Value { set, .. } => target.value.with_any(|any| set(any, converted)),
            FieldAccess::Objects(list) => {
                let mut replacement = unmarshal::<Vec<Object>>(converted)?;
                target.value.with_any(|any| {
                    list(any, &mut |objects: &mut Vec<Object>| {
                        *objects = std::mem::take(&mut replacement);
                    })
                })
            }
        }
    }

    pub(crate) fn invoke(
        &self,
        engine: Option<EngineAddr>,
        fold: FoldId,
        index: usize,
        slots: &mut [DataValue],
    ) -> BridgeResult<()> {
        let target = self.resolve(engine, fold)?;
        let ty = Arc::clone(target.value.descriptor());
        let method = method(&ty, index)?;

        let params = method.params();
        if params.len() > MAX_PARAMS {
            return Err(BridgeError::TooManyParams {
                method: method.name().to_string(),
                count: params.len(),
                max: MAX_PARAMS,
            });
        }

        let mut args = Vec::with_capacity(params.len());
        for (i, kind) in params.iter().enumerate() {
            let slot = slots.get(i + 1).cloned().unwrap_or_default();
            let decoded = self.decode(target.engine, &slot)?;
            let arg = decoded.clone().convert(kind).map_err(|err| BridgeError::ParamConversion {
                method: method.name().to_string(),
                index: i,
                from: err.from,
                to: err.to,
                got: format!("{decoded:?}"),
            })?;
            args.push(arg);
        }

        let mut results = call(&target.value, method, args)?;
        let encoded = match results.len() {
            0 => return Ok(()),
            1 => self.encode(target.engine, results.swap_remove(0))?,
            n if n > MAX_PARAMS => return Err(BridgeError::TooManyResults),
            _ => DataValue::VariantList(
                results
                    .into_iter()
                    .map(|result| self.encode(target.engine, result))
                    .collect::<BridgeResult<Vec<_>>>()?,
            ),
        };
        if let Some(out) = slots.first_mut() {
            *out = encoded;
        }
        Ok(())
    }

    pub(crate) fn paint_with(
        &self,
        engine: Option<EngineAddr>,
        fold: FoldId,
        index: usize,
    ) -> BridgeResult<()> {
        let target = self.resolve(engine, fold)?;
        let ty = Arc::clone(target.value.descriptor());
        let method = method(&ty, index)?;
        let Invoker::Paint(paint) = &method.invoker else {
            return Err(BridgeError::TypeMismatch {
                expected: "paint method".to_string(),
                actual: method.name().to_string(),
            });
        };

        let _painting = self.dispatcher.begin_paint()?;
        let painter = Painter::new(target.engine, Object::new(Some(target.engine), target.handle));
        target.value.with_any(|any| paint(any, &painter))
    }

    // ------------------------------------------------------------------
    // List properties
    // ------------------------------------------------------------------

    fn with_objects<R>(
        &self,
        fold: FoldId,
        field: usize,
        f: impl FnOnce(&mut Vec<Object>) -> R,
    ) -> BridgeResult<(Resolved, R)> {
        let target = self.resolve(None, fold)?;
        let ty = Arc::clone(target.value.descriptor());
        let not_a_list = || BridgeError::NotObjectList {
            type_name: ty.name().to_string(),
            field: ty.field(field).map(|f| f.name().to_string()).unwrap_or_default(),
        };
        let Some(FieldAccess::Objects(list)) = ty.field(field).map(|desc| &desc.access) else {
            return Err(not_a_list());
        };

        let mut f = Some(f);
        let mut out = None;
        target.value.with_any(|any| {
            list(any, &mut |objects: &mut Vec<Object>| {
                if let Some(f) = f.take() {
                    out = Some(f(objects));
                }
            })
        })?;
        let out = out.ok_or_else(not_a_list)?;
        Ok((target, out))
    }

    pub(crate) fn list_get(&self, fold: FoldId, field: usize, index: usize) -> BridgeResult<NativeHandle> {
        let (_, found) = self.with_objects(fold, field, |objects| {
            objects
                .get(index)
                .map(|object| object.addr())
                .ok_or(BridgeError::ListIndex {
                    index,
                    len: objects.len(),
                })
        })?;
        found
    }

    pub(crate) fn list_len(&self, fold: FoldId, field: usize) -> BridgeResult<usize> {
        Ok(self.with_objects(fold, field, |objects| objects.len())?.1)
    }

    pub(crate) fn list_push(
        &self,
        fold: FoldId,
        field: usize,
        setter: Option<usize>,
        handle: NativeHandle,
    ) -> BridgeResult<()> {
        match setter {
            None => {
                let engine = self.registry.lock().engine_of(fold)?;
                self.with_objects(fold, field, |objects| {
                    objects.push(Object::new(engine, handle));
                })?;
                Ok(())
            }
            Some(setter) => {
                let (target, mut objects) = self.with_objects(fold, field, |objects| objects.clone())?;
                objects.push(Object::new(Some(target.engine), handle));
                let ty = Arc::clone(target.value.descriptor());
                call_setter(&target.value, method(&ty, setter)?, objects.into_value())
            }
        }
    }

    pub(crate) fn list_reset(&self, fold: FoldId, field: usize, setter: Option<usize>) -> BridgeResult<()> {
        match setter {
            // Dropping the removed objects releases their references.
            None => self.with_objects(fold, field, Vec::<Object>::clear).map(|_| ()),
            Some(setter) => {
                let (target, _) = self.with_objects(fold, field, |_| ())?;
                let ty = Arc::clone(target.value.descriptor());
                call_setter(&target.value, method(&ty, setter)?, Vec::<Object>::new().into_value())
            }
        }
    }
}

fn method(ty: &TypeDescriptor, index: usize) -> BridgeResult<&MethodDesc> {
    ty.method(index).ok_or_else(|| BridgeError::UnknownMethod {
        type_name: ty.name().to_string(),
        index,
    })
}

fn call(value: &Managed, method: &MethodDesc, args: Vec<Value>) -> BridgeResult<Vec<Value>> {
    match &method.invoker {
        Invoker::Call(call) => value.with_any(|any| call(any, args)),
        Invoker::Paint(_) => Err(BridgeError::TypeMismatch {
            expected: "callable method".to_string(),
            actual: format!("paint method {}", method.name()),
        }),
    }
}

fn call_setter(value: &Managed, method: &MethodDesc, arg: Value) -> BridgeResult<()> {
    let kind = method.params().first().cloned().unwrap_or(ValueKind::Any);
    call(value, method, vec![convert(arg, &kind)?]).map(|_| ())
}

/// Conversion failures surface as "cannot use X as a Y".
fn convert(value: Value, kind: &ValueKind) -> BridgeResult<Value> {
    value.convert(kind).map_err(|err| BridgeError::CannotUse {
        from: err.from,
        to: err.to,
    })
}

fn unmarshal<T: Marshal>(value: Value) -> BridgeResult<T> {
    let from = value.type_name();
    T::from_value(value).ok_or_else(|| BridgeError::CannotUse {
        from,
        to: T::kind().to_string(),
    })
}
