//! Metamethod names

use std::fmt;

/// A metatable event a usertype can bind a function to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaFunction {
    /// `__index`, bound as the read fallback
    Index,
    /// `__newindex`, bound as the write fallback
    NewIndex,
    /// `__call`
    Call,
    /// `__tostring`
    ToString,
    /// `__len`
    Len,
    /// `__pairs`
    Pairs,
    /// `__eq`
    Eq,
    /// `__lt`
    Lt,
    /// `__le`
    Le,
    /// `__gc`, reserved for the destructor
    Gc,
    /// `__add`
    Add,
    /// `__sub`
    Sub,
    /// `__mul`
    Mul,
    /// `__div`
    Div,
    /// `__mod`
    Mod,
    /// `__pow`
    Pow,
    /// `__unm`
    Unm,
    /// `__idiv`
    IDiv,
    /// `__band`
    BAnd,
    /// `__bor`
    BOr,
    /// `__bxor`
    BXor,
    /// `__shl`
    Shl,
    /// `__shr`
    Shr,
    /// `__bnot`
    BNot,
    /// `__concat`
    Concat,
}

impl MetaFunction {
    /// Every event, in declaration order
    pub const ALL: [MetaFunction; 25] = [
        MetaFunction::Index,
        MetaFunction::NewIndex,
        MetaFunction::Call,
        MetaFunction::ToString,
        MetaFunction::Len,
        MetaFunction::Pairs,
        MetaFunction::Eq,
        MetaFunction::Lt,
        MetaFunction::Le,
        MetaFunction::Gc,
        MetaFunction::Add,
        MetaFunction::Sub,
        MetaFunction::Mul,
        MetaFunction::Div,
        MetaFunction::Mod,
        MetaFunction::Pow,
        MetaFunction::Unm,
        MetaFunction::IDiv,
        MetaFunction::BAnd,
        MetaFunction::BOr,
        MetaFunction::BXor,
        MetaFunction::Shl,
        MetaFunction::Shr,
        MetaFunction::BNot,
        MetaFunction::Concat,
    ];

    /// Metatable key of the event
    pub fn name(self) -> &'static str {
        match self {
            MetaFunction::Index => "__index",
            MetaFunction::NewIndex => "__newindex",
            MetaFunction::Call => "__call",
            MetaFunction::ToString => "__tostring",
            MetaFunction::Len => "__len",
            MetaFunction::Pairs => "__pairs",
            MetaFunction::Eq => "__eq",
            MetaFunction::Lt => "__lt",
            MetaFunction::Le => "__le",
            MetaFunction::Gc => "__gc",
            MetaFunction::Add => "__add",
            MetaFunction::Sub => "__sub",
            MetaFunction::Mul => "__mul",
            MetaFunction::Div => "__div",
            MetaFunction::Mod => "__mod",
            MetaFunction::Pow => "__pow",
            MetaFunction::Unm => "__unm",
            MetaFunction::IDiv => "__idiv",
            MetaFunction::BAnd => "__band",
            MetaFunction::BOr => "__bor",
            MetaFunction::BXor => "__bxor",
            MetaFunction::Shl => "__shl",
            MetaFunction::Shr => "__shr",
            MetaFunction::BNot => "__bnot",
            MetaFunction::Concat => "__concat",
        }
    }

    /// Event named by a metatable key
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }
}

impl fmt::Display for MetaFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
