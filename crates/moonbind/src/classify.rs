//! Type classification
//!
//! Every Rust type that crosses the stack boundary is sorted into exactly one
//! [`ValueKind`] at compile time. The kind decides how values of the type are
//! pushed and read, and the slot counts decide how many stack slots one
//! logical value occupies.
//!
//! ```text
//!   bool            ──► Boolean          Vec<T>, HashMap ──► Table
//!   i32, f64, ...   ──► Primitive        [char; N]       ──► String
//!   String, char    ──► String           Ptr<T>          ──► PointerRef
//!   ()              ──► Nil (0 slots)    Unique<T>, Rc   ──► OwningPointer
//!   (A, B, ...)     ──► MultiValue       anything bound  ──► ValueUserdata
//! ```

use std::borrow::Cow;

/// Storage category of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Number stored directly in a slot
    Primitive,
    /// Text stored as a VM string
    String,
    /// Boolean stored directly in a slot
    Boolean,
    /// Container marshalled to and from a VM table
    Table,
    /// Callable value
    Function,
    /// Non-owning view of an object owned elsewhere
    PointerRef,
    /// Owning pointer whose pointee lives in a userdata block
    OwningPointer,
    /// Native object copied into a userdata block
    ValueUserdata,
    /// The nil value, or nothing at all
    Nil,
    /// Several values spread over consecutive slots
    MultiValue,
}

impl ValueKind {
    /// Whether values of this kind live in a userdata block
    pub fn is_userdata(self) -> bool {
        matches!(
            self,
            ValueKind::PointerRef | ValueKind::OwningPointer | ValueKind::ValueUserdata
        )
    }
}

/// Compile-time classification of a type
///
/// Slot counts bound how many stack slots a single logical value of the type
/// occupies. `MAX_SLOTS` is `None` for types that absorb every remaining slot.
pub trait Classify {
    /// Storage category
    const KIND: ValueKind;

    /// Fewest slots a value may occupy
    const MIN_SLOTS: usize = 1;

    /// Most slots a value may occupy; `None` for unbounded
    const MAX_SLOTS: Option<usize> = Some(1);

    /// Kind of a fixed-size array whose elements are of this type
    const ARRAY_KIND: ValueKind = ValueKind::Table;

    /// Name used in type-mismatch messages
    fn type_name() -> Cow<'static, str>;
}

/// Add two optional slot counts; `None` absorbs
pub const fn add_slots(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x + y),
        _ => None,
    }
}

/// Runtime description of one parameter or result type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Type name
    pub name: Cow<'static, str>,
    /// Storage category
    pub kind: ValueKind,
    /// Fewest slots consumed
    pub min_slots: usize,
    /// Most slots consumed; `None` for unbounded
    pub max_slots: Option<usize>,
}

impl TypeDescriptor {
    /// Descriptor of `T`
    pub fn of<T: Classify + ?Sized>() -> Self {
        TypeDescriptor {
            name: T::type_name(),
            kind: T::KIND,
            min_slots: T::MIN_SLOTS,
            max_slots: T::MAX_SLOTS,
        }
    }
}

/// Classification of `T`
pub fn kind_of<T: Classify + ?Sized>() -> ValueKind {
    T::KIND
}
