//! Raw (unresolved) parse structures and winnow combinators for the text format.
//!
//! This is the first parsing stage: text → `Raw*` structs. Node numbers,
//! block labels, opcode names and symbol names stay unresolved.

use winnow::ascii;
use winnow::combinator::{opt, preceded};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

// ============================================================================
// Raw (unresolved) structures
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) struct RawMethod<'a> {
    pub name: &'a str,
    pub registers: u16,
    pub blocks: Vec<RawBlock<'a>>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawBlock<'a> {
    pub label: u32,
    pub extension: bool,
    pub entry: Vec<RawEntry<'a>>,
    pub statements: Vec<RawNode<'a>>,
    pub exit: Option<Vec<RawEntry<'a>>>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawNode<'a> {
    pub opcode: &'a str,
    pub symbol: Option<&'a str>,
    pub constant: Option<i64>,
    pub register: Option<u16>,
    pub non_null: bool,
    pub children: Vec<RawOperand<'a>>,
    pub target: Option<u32>,
    pub manifest: Option<Vec<RawEntry<'a>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RawOperand<'a> {
    /// `%N`
    Ref(u32),
    /// `%N = node`
    Def(u32, Box<RawNode<'a>>),
}

#[derive(Debug, Clone)]
pub(crate) enum RawEntry<'a> {
    /// `%N` — a register load, carried.
    Plain(RawOperand<'a>),
    /// `$r: %N` — carried.
    Carried(u16, RawOperand<'a>),
    /// `$r: pass(%N)` — fresh.
    Pass(u16, RawOperand<'a>),
}

// ============================================================================
// Winnow parsers
// ============================================================================

/// Skip whitespace and `//` line comments.
pub(crate) fn ws(input: &mut &str) -> ModalResult<()> {
    loop {
        take_while(0.., |c: char| c.is_ascii_whitespace()).parse_next(input)?;
        if input.starts_with("//") {
            take_while(0.., |c: char| c != '\n').parse_next(input)?;
        } else {
            return Ok(());
        }
    }
}

/// Parse an identifier: [a-zA-Z_][a-zA-Z0-9_]*
pub(crate) fn ident<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

/// Parse a node number: %N
pub(crate) fn node_number(input: &mut &str) -> ModalResult<u32> {
    preceded('%', ascii::dec_uint).parse_next(input)
}

/// Parse a register: $N
pub(crate) fn register(input: &mut &str) -> ModalResult<u16> {
    preceded('$', ascii::dec_uint).parse_next(input)
}

/// Parse a block label: block_N
pub(crate) fn block_label(input: &mut &str) -> ModalResult<u32> {
    preceded("block_", ascii::dec_uint).parse_next(input)
}

/// Parse a symbol reference: @name
pub(crate) fn symbol_ref<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    preceded('@', ident).parse_next(input)
}

/// Parse a constant: #42, #-1 or #0x100
pub(crate) fn constant(input: &mut &str) -> ModalResult<i64> {
    '#'.parse_next(input)?;
    let negative = opt('-').parse_next(input)?.is_some();
    let magnitude: u64 = if input.starts_with("0x") {
        "0x".parse_next(input)?;
        ascii::hex_uint(input)?
    } else {
        ascii::dec_uint(input)?
    };
    let value = i64::try_from(magnitude)
        .map_err(|_| winnow::error::ErrMode::Backtrack(winnow::error::ContextError::new()))?;
    Ok(if negative { -value } else { value })
}

/// Parse an operand: `%N` or `%N = node`.
pub(crate) fn raw_operand<'a>(input: &mut &'a str) -> ModalResult<RawOperand<'a>> {
    let number = node_number.parse_next(input)?;
    if opt((ws, '=')).parse_next(input)?.is_some() {
        ws.parse_next(input)?;
        let node = raw_node.parse_next(input)?;
        Ok(RawOperand::Def(number, Box::new(node)))
    } else {
        Ok(RawOperand::Ref(number))
    }
}

/// Parse a manifest entry: `%N`, `$r: %N` or `$r: pass(%N)`.
pub(crate) fn raw_entry<'a>(input: &mut &'a str) -> ModalResult<RawEntry<'a>> {
    if input.starts_with('$') {
        let reg = register.parse_next(input)?;
        (ws, ':', ws).parse_next(input)?;
        if input.starts_with("pass(") {
            "pass(".parse_next(input)?;
            ws.parse_next(input)?;
            let operand = raw_operand.parse_next(input)?;
            (ws, ')').parse_next(input)?;
            Ok(RawEntry::Pass(reg, operand))
        } else {
            Ok(RawEntry::Carried(reg, raw_operand.parse_next(input)?))
        }
    } else {
        Ok(RawEntry::Plain(raw_operand.parse_next(input)?))
    }
}

/// Parse a manifest body: `{ entry, ... }`
pub(crate) fn raw_manifest<'a>(input: &mut &'a str) -> ModalResult<Vec<RawEntry<'a>>> {
    '{'.parse_next(input)?;
    let mut entries = Vec::new();
    loop {
        ws.parse_next(input)?;
        if input.starts_with('}') {
            break;
        }
        if !entries.is_empty() {
            ','.parse_next(input)?;
            ws.parse_next(input)?;
        }
        entries.push(raw_entry.parse_next(input)?);
    }
    '}'.parse_next(input)?;
    Ok(entries)
}

/// Parse a node.
///
/// Grammar:
/// ```text
/// opcode [@symbol] [#constant] [$register] [nonnull] [(operands)] [-> block_N] [{ manifest }]
/// ```
pub(crate) fn raw_node<'a>(input: &mut &'a str) -> ModalResult<RawNode<'a>> {
    let opcode = ident
        .verify(|name: &str| name != "in" && name != "out")
        .parse_next(input)?;
    let symbol = opt(preceded(ws, symbol_ref)).parse_next(input)?;
    let constant = opt(preceded(ws, constant)).parse_next(input)?;
    let register = opt(preceded(ws, register)).parse_next(input)?;
    let non_null = opt((ws, "nonnull")).parse_next(input)?.is_some();

    let mut children = Vec::new();
    if input.starts_with('(') {
        '('.parse_next(input)?;
        loop {
            ws.parse_next(input)?;
            if input.starts_with(')') {
                break;
            }
            if !children.is_empty() {
                ','.parse_next(input)?;
                ws.parse_next(input)?;
            }
            children.push(raw_operand.parse_next(input)?);
        }
        ')'.parse_next(input)?;
    }

    let target = opt(preceded((ws, "->", ws), block_label)).parse_next(input)?;
    let manifest = opt(preceded(ws, raw_manifest)).parse_next(input)?;

    Ok(RawNode {
        opcode,
        symbol,
        constant,
        register,
        non_null,
        children,
        target,
        manifest,
    })
}

/// Parse a block: `block_N [extension] { [in {...}] statements [out {...}] }`
pub(crate) fn raw_block<'a>(input: &mut &'a str) -> ModalResult<RawBlock<'a>> {
    let label = block_label.parse_next(input)?;
    let extension = opt((ws, "extension")).parse_next(input)?.is_some();
    (ws, '{', ws).parse_next(input)?;

    let entry = opt(preceded(("in", ws), raw_manifest))
        .parse_next(input)?
        .unwrap_or_default();

    let mut statements = Vec::new();
    let mut exit = None;
    loop {
        ws.parse_next(input)?;
        if input.starts_with('}') {
            break;
        }
        if let Some(manifest) = opt(preceded(("out", ws), raw_manifest)).parse_next(input)? {
            exit = Some(manifest);
            ws.parse_next(input)?;
            break;
        }
        statements.push(raw_node.parse_next(input)?);
    }
    '}'.parse_next(input)?;

    Ok(RawBlock {
        label,
        extension,
        entry,
        statements,
        exit,
    })
}

/// Parse a method: `method @name registers=N { blocks }`
pub(crate) fn raw_method<'a>(input: &mut &'a str) -> ModalResult<RawMethod<'a>> {
    ws.parse_next(input)?;
    ("method", ws).parse_next(input)?;
    let name = symbol_ref.parse_next(input)?;
    (ws, "registers=").parse_next(input)?;
    let registers = ascii::dec_uint.parse_next(input)?;
    (ws, '{').parse_next(input)?;

    let mut blocks = Vec::new();
    loop {
        ws.parse_next(input)?;
        if input.starts_with('}') {
            break;
        }
        blocks.push(raw_block.parse_next(input)?);
    }
    '}'.parse_next(input)?;
    ws.parse_next(input)?;

    Ok(RawMethod {
        name,
        registers,
        blocks,
    })
}
