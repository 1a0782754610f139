//! Tree interpreter with an explicit global register file.

use std::collections::HashMap;

use arbor_ir::{
    BlockRef, GlobalRegister, IrContext, ManifestRef, NodeRef, ObjectModel, Opcode, RegDep,
    ShadowField, SymbolKind,
};
use derive_more::{Display, Error, From};
use tracing::trace;

use crate::heap::{Heap, ObjectId};
use crate::value::Value;

const DEFAULT_FUEL: usize = 10_000;

/// Java-level exception raised by the program being interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Exception {
    #[display("NullPointerException")]
    NullPointer,
    #[display("ArrayStoreException")]
    ArrayStore,
    #[display("ArrayIndexOutOfBoundsException")]
    ArrayIndexOutOfBounds,
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    Returned(Option<Value>),
    Threw(Exception),
}

/// The body could not be interpreted: it is malformed or reads state that
/// was never defined.
#[derive(Clone, Debug, PartialEq, Eq, Display, Error)]
pub enum EvalError {
    #[display("method has no blocks")]
    EmptyMethod,
    #[display("{node} reads {register}, which holds no value")]
    UnsetRegister {
        node: NodeRef,
        register: GlobalRegister,
    },
    #[display("{node} reads slot '{name}', which holds no value")]
    UnsetSlot { node: NodeRef, name: String },
    #[display("{node} expected {expected}, found {found}")]
    TypeMismatch {
        node: NodeRef,
        expected: &'static str,
        found: Value,
    },
    #[display("{node} ({opcode}) cannot be evaluated here")]
    Unsupported { node: NodeRef, opcode: Opcode },
    #[display("call to unknown method '{name}'")]
    UnknownCallee { name: String },
    #[display("control fell off the end of {block}")]
    FellOffEnd { block: BlockRef },
    #[display("ran out of fuel")]
    OutOfFuel,
}

/// Why evaluation of a tree stopped early.
#[derive(From)]
enum Interrupt {
    Threw(Exception),
    Failed(EvalError),
}

enum Flow {
    Next,
    Jump(BlockRef, Option<ManifestRef>),
    Return(Option<Value>),
}

/// Interpreter state for one run of a method body.
pub struct Machine<'a> {
    ctx: &'a IrContext,
    heap: &'a mut Heap,
    object_model: ObjectModel,
    registers: HashMap<GlobalRegister, Value>,
    slots: HashMap<String, Value>,
    /// Values of nodes evaluated in the current extended block.
    values: HashMap<NodeRef, Value>,
    fuel: usize,
    helper_calls: usize,
}

impl<'a> Machine<'a> {
    pub fn new(ctx: &'a IrContext, heap: &'a mut Heap) -> Self {
        Self {
            ctx,
            heap,
            object_model: ObjectModel::default(),
            registers: HashMap::new(),
            slots: HashMap::new(),
            values: HashMap::new(),
            fuel: DEFAULT_FUEL,
            helper_calls: 0,
        }
    }

    pub fn with_object_model(mut self, object_model: ObjectModel) -> Self {
        self.object_model = object_model;
        self
    }

    pub fn with_register(mut self, register: GlobalRegister, value: Value) -> Self {
        self.registers.insert(register, value);
        self
    }

    pub fn with_slot(mut self, name: &str, value: Value) -> Self {
        self.slots.insert(name.to_owned(), value);
        self
    }

    /// Limit the number of blocks the run may enter.
    pub fn with_fuel(mut self, fuel: usize) -> Self {
        self.fuel = fuel;
        self
    }

    pub fn slot(&self, name: &str) -> Option<Value> {
        self.slots.get(name).copied()
    }

    pub fn register(&self, register: GlobalRegister) -> Option<Value> {
        self.registers.get(&register).copied()
    }

    /// Number of equality comparisons that reached a call.
    pub fn helper_calls(&self) -> usize {
        self.helper_calls
    }

    pub fn heap(&self) -> &Heap {
        self.heap
    }

    pub fn run(&mut self) -> Result<Completion, EvalError> {
        let ctx = self.ctx;
        let mut block = ctx.entry_block().ok_or(EvalError::EmptyMethod)?;
        self.enter(block)?;
        'blocks: loop {
            for tt in ctx.block_tree_tops(block) {
                let flow = match self.execute(ctx.tt_node(tt)) {
                    Ok(flow) => flow,
                    Err(Interrupt::Threw(exception)) => {
                        trace!(%block, %exception, "exception thrown");
                        return Ok(Completion::Threw(exception));
                    }
                    Err(Interrupt::Failed(error)) => return Err(error),
                };
                match flow {
                    Flow::Next => {}
                    Flow::Jump(target, manifest) => {
                        self.take_edge(manifest, target)?;
                        block = target;
                        continue 'blocks;
                    }
                    Flow::Return(value) => return Ok(Completion::Returned(value)),
                }
            }
            let next = ctx.next_block(block).ok_or(EvalError::FellOffEnd { block })?;
            self.take_edge(ctx.exit_manifest(block), next)?;
            block = next;
        }
    }

    fn take_edge(&mut self, manifest: Option<ManifestRef>, target: BlockRef) -> Result<(), EvalError> {
        let ctx = self.ctx;
        let mut defined = Vec::new();
        if let Some(manifest) = manifest {
            for entry in &ctx.manifest(manifest).entries {
                let value = match entry {
                    RegDep::Carried(load) => self.read_register(*load)?,
                    RegDep::Fresh(def) => match self.evaluate(def.value) {
                        Ok(value) => value,
                        Err(Interrupt::Failed(error)) => return Err(error),
                        Err(Interrupt::Threw(_)) => {
                            return Err(EvalError::Unsupported {
                                node: def.value,
                                opcode: ctx.opcode(def.value),
                            });
                        }
                    },
                };
                defined.push((entry.register(ctx), value));
            }
        }
        if !ctx.is_extension(target) {
            // Only the registers the edge names are live in the target.
            self.registers.clear();
        }
        self.registers.extend(defined);
        self.enter(target)
    }

    fn enter(&mut self, block: BlockRef) -> Result<(), EvalError> {
        let ctx = self.ctx;
        self.fuel = self.fuel.checked_sub(1).ok_or(EvalError::OutOfFuel)?;
        trace!(%block, registers = self.registers.len(), "entering block");
        if ctx.is_extension(block) {
            return Ok(());
        }
        self.values.clear();
        if let Some(manifest) = ctx.entry_manifest(block) {
            for entry in &ctx.manifest(manifest).entries {
                let load = entry.node();
                let value = self.read_register(load)?;
                self.values.insert(load, value);
            }
        }
        Ok(())
    }

    fn read_register(&self, load: NodeRef) -> Result<Value, EvalError> {
        let data = self.ctx.node(load);
        let register = data.register.ok_or(EvalError::Unsupported {
            node: load,
            opcode: data.opcode,
        })?;
        self.register(register)
            .ok_or(EvalError::UnsetRegister { node: load, register })
    }

    fn execute(&mut self, root: NodeRef) -> Result<Flow, Interrupt> {
        let ctx = self.ctx;
        let data = ctx.node(root);
        match data.opcode {
            Opcode::Treetop => {
                self.evaluate(ctx.child(root, 0))?;
            }
            Opcode::IStore | Opcode::AStore => {
                let value = self.evaluate(ctx.child(root, 0))?;
                let name = self.symbol_name(root)?;
                self.slots.insert(name, value);
            }
            Opcode::IRegStore | Opcode::ARegStore => {
                let value = self.evaluate(ctx.child(root, 0))?;
                let register = data.register.ok_or(EvalError::Unsupported {
                    node: root,
                    opcode: data.opcode,
                })?;
                self.registers.insert(register, value);
            }
            opcode if opcode.is_if() => {
                let lhs = self.evaluate(ctx.child(root, 0))?;
                let rhs = self.evaluate(ctx.child(root, 1))?;
                let taken = match opcode {
                    Opcode::IfACmpEq | Opcode::IfICmpEq => lhs == rhs,
                    _ => lhs != rhs,
                };
                if taken {
                    return Ok(Flow::Jump(self.target(root)?, data.manifest));
                }
            }
            Opcode::Goto => return Ok(Flow::Jump(self.target(root)?, data.manifest)),
            Opcode::IReturn | Opcode::AReturn => {
                let value = self.evaluate(ctx.child(root, 0))?;
                return Ok(Flow::Return(Some(value)));
            }
            Opcode::Return => return Ok(Flow::Return(None)),
            Opcode::NullChk => {
                if self.evaluate(ctx.child(root, 0))?.is_null() {
                    return Err(Exception::NullPointer.into());
                }
            }
            Opcode::ArrayStoreChk => {
                let store = ctx.child(root, 0);
                self.array_store(store, true)?;
            }
            Opcode::AWrtBarI => self.array_store(root, false)?,
            _ => {
                self.evaluate(root)?;
            }
        }
        Ok(Flow::Next)
    }

    fn array_store(&mut self, store: NodeRef, checked: bool) -> Result<(), Interrupt> {
        let ctx = self.ctx;
        if ctx.opcode(store) != Opcode::AWrtBarI {
            return Err(self.unsupported(store));
        }
        let address = self.evaluate(ctx.child(store, 0))?;
        let value = self.evaluate(ctx.child(store, 1))?;
        self.evaluate(ctx.child(store, 2))?;
        let Value::Element { array, index } = address else {
            return Err(self.mismatch(store, "an element address", address));
        };
        if checked && let Value::Ref(Some(object)) = value {
            let component = self.heap.class(self.heap.class_of(array)).component;
            let assignable =
                component.is_some_and(|c| self.heap.is_subclass(self.heap.class_of(object), c));
            if !assignable {
                return Err(Exception::ArrayStore.into());
            }
        }
        let stored = usize::try_from(index)
            .ok()
            .is_some_and(|index| self.heap.set_element(array, index, value));
        if !stored {
            return Err(Exception::ArrayIndexOutOfBounds.into());
        }
        Ok(())
    }

    fn evaluate(&mut self, node: NodeRef) -> Result<Value, Interrupt> {
        if let Some(&value) = self.values.get(&node) {
            return Ok(value);
        }
        let ctx = self.ctx;
        let data = ctx.node(node);
        let value = match data.opcode {
            Opcode::IConst => Value::Int(data.constant as i32),
            Opcode::AConst if data.constant == 0 => Value::NULL,
            Opcode::ILoad | Opcode::ALoad => {
                let name = self.symbol_name(node)?;
                self.slot(&name)
                    .ok_or(EvalError::UnsetSlot { node, name })?
            }
            Opcode::IRegLoad | Opcode::ARegLoad => self.read_register(node)?,
            Opcode::ICall | Opcode::ACall => self.call(node)?,
            Opcode::IAnd | Opcode::IAdd => {
                let lhs = self.evaluate_int(ctx.child(node, 0))?;
                let rhs = self.evaluate_int(ctx.child(node, 1))?;
                Value::Int(if data.opcode == Opcode::IAnd {
                    lhs & rhs
                } else {
                    lhs.wrapping_add(rhs)
                })
            }
            Opcode::ILoadI | Opcode::ALoadI => self.load_indirect(node)?,
            Opcode::ALAdd => {
                let base = self.evaluate(ctx.child(node, 0))?;
                let index = self.evaluate_int(ctx.child(node, 1))?;
                match base {
                    Value::Ref(Some(array)) => Value::Element { array, index },
                    Value::Ref(None) => return Err(Exception::NullPointer.into()),
                    other => return Err(self.mismatch(node, "an array", other)),
                }
            }
            Opcode::PassThrough => self.evaluate(ctx.child(node, 0))?,
            _ => return Err(self.unsupported(node)),
        };
        self.values.insert(node, value);
        Ok(value)
    }

    fn evaluate_int(&mut self, node: NodeRef) -> Result<i32, Interrupt> {
        match self.evaluate(node)? {
            Value::Int(v) => Ok(v),
            other => Err(self.mismatch(node, "an int", other)),
        }
    }

    fn load_indirect(&mut self, node: NodeRef) -> Result<Value, Interrupt> {
        let ctx = self.ctx;
        let base = self.evaluate(ctx.child(node, 0))?;
        let field = match ctx.node(node).symbol.map(|sym| ctx.symbols.kind(sym)) {
            Some(SymbolKind::Shadow(field)) => field,
            _ => return Err(self.unsupported(node)),
        };
        let value = match (field, base) {
            (_, Value::Ref(None)) => return Err(Exception::NullPointer.into()),
            (ShadowField::Vft, Value::Ref(Some(object))) => Value::Class(self.heap.class_of(object)),
            (ShadowField::ClassFlags, Value::Class(class)) => {
                Value::Int(self.heap.class(class).flags as i32)
            }
            (ShadowField::ArrayComponentType, Value::Class(class)) => {
                match self.heap.class(class).component {
                    Some(component) => Value::Class(component),
                    None => return Err(self.mismatch(node, "an array class", base)),
                }
            }
            (ShadowField::ArrayElement, Value::Element { array, index }) => {
                match usize::try_from(index).ok().and_then(|i| self.heap.element(array, i)) {
                    Some(value) => value,
                    None => return Err(Exception::ArrayIndexOutOfBounds.into()),
                }
            }
            (_, other) => return Err(self.mismatch(node, "a matching base", other)),
        };
        Ok(value)
    }

    fn call(&mut self, node: NodeRef) -> Result<Value, Interrupt> {
        let ctx = self.ctx;
        let Some(sym) = ctx.node(node).symbol else {
            return Err(self.unsupported(node));
        };
        match ctx.symbols.kind(sym) {
            SymbolKind::NonHelper(_) | SymbolKind::Helper(_) => {
                let lhs = self.evaluate(ctx.child(node, 0))?;
                let rhs = self.evaluate(ctx.child(node, 1))?;
                self.helper_calls += 1;
                Ok(Value::Int(i32::from(self.objects_equal(node, lhs, rhs)?)))
            }
            _ => Err(EvalError::UnknownCallee {
                name: ctx.symbols.name(sym),
            }
            .into()),
        }
    }

    /// Reference equality with value-type substitutability.
    fn objects_equal(&self, node: NodeRef, lhs: Value, rhs: Value) -> Result<bool, Interrupt> {
        let (Value::Ref(lhs), Value::Ref(rhs)) = (lhs, rhs) else {
            return Err(self.mismatch(node, "two references", lhs));
        };
        if lhs == rhs {
            return Ok(true);
        }
        let (Some(lhs), Some(rhs)) = (lhs, rhs) else {
            return Ok(false);
        };
        Ok(self.same_value(lhs, rhs))
    }

    fn same_value(&self, lhs: ObjectId, rhs: ObjectId) -> bool {
        let class = self.heap.class_of(lhs);
        if class != self.heap.class_of(rhs) {
            return false;
        }
        let flag = self.object_model.value_type_class_flag;
        if self.heap.class(class).flags & flag == 0 {
            return false;
        }
        self.heap.object(lhs).fields == self.heap.object(rhs).fields
    }

    fn target(&self, node: NodeRef) -> Result<BlockRef, Interrupt> {
        self.ctx
            .node(node)
            .branch_target
            .ok_or_else(|| self.unsupported(node))
    }

    fn symbol_name(&self, node: NodeRef) -> Result<String, Interrupt> {
        match self.ctx.node(node).symbol {
            Some(sym) => Ok(self.ctx.symbols.name(sym)),
            None => Err(self.unsupported(node)),
        }
    }

    fn unsupported(&self, node: NodeRef) -> Interrupt {
        EvalError::Unsupported {
            node,
            opcode: self.ctx.opcode(node),
        }
        .into()
    }

    fn mismatch(&self, node: NodeRef, expected: &'static str, found: Value) -> Interrupt {
        EvalError::TypeMismatch {
            node,
            expected,
            found,
        }
        .into()
    }
}
