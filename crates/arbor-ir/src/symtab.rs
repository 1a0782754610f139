//! Symbol-reference table.
//!
//! Maps the well-known bindings the lowering pass needs (equality helper,
//! class-pointer access, class flags, array component type, null check) to
//! stable [`SymRef`] handles. Lookups are idempotent: the first request
//! creates the entry and every later request returns the same handle.

use std::collections::HashMap;

use cranelift_entity::PrimaryMap;

use crate::opcode::DataType;
use crate::refs::SymRef;
use crate::symbol::Symbol;

/// Non-helper symbols: recognised calls that are not yet bound to a runtime helper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NonHelperSymbol {
    /// Reference equality comparison as emitted by the bytecode translator.
    ObjectEqualityComparison,
}

/// Out-of-line runtime helper routines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeHelper {
    /// The runtime's reference equality helper.
    ObjectEqualityComparison,
}

/// Fields reached through shadow symbols.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShadowField {
    /// Class pointer of an object.
    Vft,
    /// Flags word of a class.
    ClassFlags,
    /// Component class of an array class.
    ArrayComponentType,
    /// Element of a reference array.
    ArrayElement,
}

/// What a symbol reference denotes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// A local slot (parameter, auto or temporary).
    Auto { name: Symbol, data_type: DataType },
    /// An ordinary callee.
    Method { name: Symbol },
    NonHelper(NonHelperSymbol),
    Helper(RuntimeHelper),
    Shadow(ShadowField),
    NullCheck,
}

/// Table of symbol references for one method compilation.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: PrimaryMap<SymRef, SymbolKind>,
    lookup: HashMap<SymbolKind, SymRef>,
    next_temp: u32,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&self, sym: SymRef) -> SymbolKind {
        self.symbols[sym]
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Return the handle for `kind`, creating it on first use.
    pub fn find_or_create(&mut self, kind: SymbolKind) -> SymRef {
        if let Some(&sym) = self.lookup.get(&kind) {
            return sym;
        }
        let sym = self.symbols.push(kind);
        self.lookup.insert(kind, sym);
        sym
    }

    pub fn find_or_create_object_equality_non_helper(&mut self) -> SymRef {
        self.find_or_create(SymbolKind::NonHelper(
            NonHelperSymbol::ObjectEqualityComparison,
        ))
    }

    pub fn find_or_create_object_equality_helper(&mut self) -> SymRef {
        self.find_or_create(SymbolKind::Helper(RuntimeHelper::ObjectEqualityComparison))
    }

    pub fn find_or_create_vft(&mut self) -> SymRef {
        self.find_or_create(SymbolKind::Shadow(ShadowField::Vft))
    }

    pub fn find_or_create_class_flags(&mut self) -> SymRef {
        self.find_or_create(SymbolKind::Shadow(ShadowField::ClassFlags))
    }

    pub fn find_or_create_array_component_type(&mut self) -> SymRef {
        self.find_or_create(SymbolKind::Shadow(ShadowField::ArrayComponentType))
    }

    pub fn find_or_create_array_element(&mut self) -> SymRef {
        self.find_or_create(SymbolKind::Shadow(ShadowField::ArrayElement))
    }

    pub fn find_or_create_null_check(&mut self) -> SymRef {
        self.find_or_create(SymbolKind::NullCheck)
    }

    pub fn find_or_create_auto(&mut self, name: Symbol, data_type: DataType) -> SymRef {
        self.find_or_create(SymbolKind::Auto { name, data_type })
    }

    pub fn find_or_create_method(&mut self, name: Symbol) -> SymRef {
        self.find_or_create(SymbolKind::Method { name })
    }

    /// Create a temporary slot that no other symbol reference shares.
    pub fn create_temp(&mut self, data_type: DataType) -> SymRef {
        loop {
            let name = Symbol::intern(&format!("temp{}", self.next_temp));
            self.next_temp += 1;
            let taken = [DataType::Int32, DataType::Address]
                .into_iter()
                .any(|ty| self.lookup.contains_key(&SymbolKind::Auto { name, data_type: ty }));
            if !taken {
                return self.find_or_create(SymbolKind::Auto { name, data_type });
            }
        }
    }

    /// Whether `sym` is the given non-helper symbol.
    pub fn is_non_helper(&self, sym: SymRef, which: NonHelperSymbol) -> bool {
        self.symbols[sym] == SymbolKind::NonHelper(which)
    }

    /// Whether `sym` is the given runtime helper.
    pub fn is_helper(&self, sym: SymRef, which: RuntimeHelper) -> bool {
        self.symbols[sym] == SymbolKind::Helper(which)
    }

    /// Name used in the textual IR.
    pub fn name(&self, sym: SymRef) -> String {
        match self.symbols[sym] {
            SymbolKind::Auto { name, .. } | SymbolKind::Method { name } => name.to_string(),
            SymbolKind::NonHelper(NonHelperSymbol::ObjectEqualityComparison) => {
                "object_equality".to_owned()
            }
            SymbolKind::Helper(RuntimeHelper::ObjectEqualityComparison) => {
                "acmp_helper".to_owned()
            }
            SymbolKind::Shadow(ShadowField::Vft) => "vft".to_owned(),
            SymbolKind::Shadow(ShadowField::ClassFlags) => "class_flags".to_owned(),
            SymbolKind::Shadow(ShadowField::ArrayComponentType) => "component_class".to_owned(),
            SymbolKind::Shadow(ShadowField::ArrayElement) => "array_element".to_owned(),
            SymbolKind::NullCheck => "null_check".to_owned(),
        }
    }

    /// Resolve a textual name. Well-known names map to their dedicated
    /// symbols; any other name becomes a method when used by a call and a
    /// slot of `data_type` otherwise.
    pub fn resolve_name(&mut self, name: &str, is_call: bool, data_type: DataType) -> SymRef {
        match name {
            "object_equality" => self.find_or_create_object_equality_non_helper(),
            "acmp_helper" => self.find_or_create_object_equality_helper(),
            "vft" => self.find_or_create_vft(),
            "class_flags" => self.find_or_create_class_flags(),
            "component_class" => self.find_or_create_array_component_type(),
            "array_element" => self.find_or_create_array_element(),
            "null_check" => self.find_or_create_null_check(),
            _ if is_call => self.find_or_create_method(Symbol::intern(name)),
            _ => self.find_or_create_auto(Symbol::intern(name), data_type),
        }
    }
}
