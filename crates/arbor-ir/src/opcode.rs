//! Node opcodes and their static properties.

use std::fmt;

/// Type of the value a node produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    NoType,
    Int32,
    Address,
}

macro_rules! opcodes {
    ($($variant:ident => $name:literal : $ty:ident),* $(,)?) => {
        /// Operation performed by a node.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant,)*
        }

        impl Opcode {
            /// All opcodes, in declaration order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            /// Mnemonic used by the printer and parser.
            pub const fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }

            /// Type of the value produced by this opcode.
            pub const fn data_type(self) -> DataType {
                match self {
                    $(Opcode::$variant => DataType::$ty,)*
                }
            }

            /// Look an opcode up by its mnemonic.
            pub fn from_name(name: &str) -> Option<Opcode> {
                match name {
                    $($name => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    BBStart => "BBStart": NoType,
    BBEnd => "BBEnd": NoType,
    Treetop => "treetop": NoType,
    IConst => "iconst": Int32,
    AConst => "aconst": Address,
    ILoad => "iload": Int32,
    ALoad => "aload": Address,
    IStore => "istore": NoType,
    AStore => "astore": NoType,
    IRegLoad => "iRegLoad": Int32,
    ARegLoad => "aRegLoad": Address,
    IRegStore => "iRegStore": NoType,
    ARegStore => "aRegStore": NoType,
    ICall => "icall": Int32,
    ACall => "acall": Address,
    IAnd => "iand": Int32,
    IAdd => "iadd": Int32,
    ILoadI => "iloadi": Int32,
    ALoadI => "aloadi": Address,
    AWrtBarI => "awrtbari": NoType,
    ALAdd => "aladd": Address,
    IfACmpEq => "ifacmpeq": NoType,
    IfACmpNe => "ifacmpne": NoType,
    IfICmpEq => "ificmpeq": NoType,
    IfICmpNe => "ificmpne": NoType,
    Goto => "goto": NoType,
    IReturn => "ireturn": NoType,
    AReturn => "areturn": NoType,
    Return => "return": NoType,
    NullChk => "NULLCHK": NoType,
    ArrayStoreChk => "ArrayStoreCHK": NoType,
    PassThrough => "PassThrough": NoType,
}

impl Opcode {
    pub fn is_call(self) -> bool {
        matches!(self, Opcode::ICall | Opcode::ACall)
    }

    /// Number of children, or `None` for calls, which take any number of
    /// arguments.
    pub fn arity(self) -> Option<usize> {
        use Opcode::*;
        let count = match self {
            ICall | ACall => return None,
            BBStart | BBEnd | IConst | AConst | ILoad | ALoad | IRegLoad | ARegLoad | Goto
            | Return => 0,
            Treetop | IStore | AStore | IRegStore | ARegStore | ILoadI | ALoadI | IReturn
            | AReturn | NullChk | ArrayStoreChk | PassThrough => 1,
            IAnd | IAdd | ALAdd | IfACmpEq | IfACmpNe | IfICmpEq | IfICmpNe => 2,
            AWrtBarI => 3,
        };
        Some(count)
    }

    /// Conditional branches.
    pub fn is_if(self) -> bool {
        matches!(
            self,
            Opcode::IfACmpEq | Opcode::IfACmpNe | Opcode::IfICmpEq | Opcode::IfICmpNe
        )
    }

    /// Any opcode that names a branch destination.
    pub fn is_branch(self) -> bool {
        self.is_if() || self == Opcode::Goto
    }

    pub fn is_return(self) -> bool {
        matches!(self, Opcode::IReturn | Opcode::AReturn | Opcode::Return)
    }

    /// Opcodes after which control never falls through to the next block.
    pub fn ends_fallthrough(self) -> bool {
        self == Opcode::Goto || self.is_return()
    }

    pub fn is_reg_load(self) -> bool {
        matches!(self, Opcode::IRegLoad | Opcode::ARegLoad)
    }

    pub fn is_reg_store(self) -> bool {
        matches!(self, Opcode::IRegStore | Opcode::ARegStore)
    }

    /// Direct loads from a slot (auto or temporary).
    pub fn is_load_direct(self) -> bool {
        matches!(self, Opcode::ILoad | Opcode::ALoad)
    }

    /// Direct stores into a slot (auto or temporary).
    pub fn is_store_direct(self) -> bool {
        matches!(self, Opcode::IStore | Opcode::AStore)
    }

    /// Any store whose first child is the stored value.
    pub fn is_store(self) -> bool {
        self.is_store_direct() || self.is_reg_store()
    }

    pub fn is_block_marker(self) -> bool {
        matches!(self, Opcode::BBStart | Opcode::BBEnd)
    }

    /// Register load of the given type.
    pub fn reg_load_for(ty: DataType) -> Option<Opcode> {
        match ty {
            DataType::Int32 => Some(Opcode::IRegLoad),
            DataType::Address => Some(Opcode::ARegLoad),
            DataType::NoType => None,
        }
    }

    /// Register store of the given type.
    pub fn reg_store_for(ty: DataType) -> Option<Opcode> {
        match ty {
            DataType::Int32 => Some(Opcode::IRegStore),
            DataType::Address => Some(Opcode::ARegStore),
            DataType::NoType => None,
        }
    }

    /// Direct slot load of the given type.
    pub fn load_for(ty: DataType) -> Option<Opcode> {
        match ty {
            DataType::Int32 => Some(Opcode::ILoad),
            DataType::Address => Some(Opcode::ALoad),
            DataType::NoType => None,
        }
    }

    /// Direct slot store of the given type.
    pub fn store_for(ty: DataType) -> Option<Opcode> {
        match ty {
            DataType::Int32 => Some(Opcode::IStore),
            DataType::Address => Some(Opcode::AStore),
            DataType::NoType => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
