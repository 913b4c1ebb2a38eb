//! Tagged envelopes and payload sets.
//!
//! An [`Envelope`] is the unit exchanged on the wire: a correlation tag plus
//! a host-defined [`PayloadSet`], which is a struct of optional payload
//! slots. On the wire the tag comes first, followed by the populated slots in
//! field declaration order:
//!
//! ```text
//! {"tag":7,"listing":{"path":"/srv","entries":[]}}
//! ```

use crate::Tag;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// A typed message that can occupy a payload slot.
///
/// Implemented for every `Any + Send + Sync + Debug` type, so payloads are
/// plain structs and enums.
pub trait Payload: Any + Send + Sync + fmt::Debug {
    /// Returns the payload as `Any` for exact-type lookup and downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns the concrete type name, for logs and error reports.
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + fmt::Debug> Payload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// The set of optional payload slots carried by an envelope.
///
/// Usually declared with [`payload_set!`](crate::payload_set). `Default`
/// must produce a set with every slot empty.
pub trait PayloadSet:
    Serialize + DeserializeOwned + Default + Clone + PartialEq + fmt::Debug + Send + Sync + 'static
{
    /// Returns the populated slots in field declaration order.
    fn populated(&self) -> Vec<&dyn Payload>;

    /// Returns whether no slot is populated.
    fn is_empty(&self) -> bool {
        self.populated().is_empty()
    }
}

/// A correlation tag plus a set of payload slots.
///
/// The tag is fixed at construction; only the payload slots can change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P> {
    tag: Tag,
    #[serde(flatten)]
    payloads: P,
}

impl<P: PayloadSet> Envelope<P> {
    /// Creates an envelope with the given tag and payloads.
    pub fn new(tag: Tag, payloads: P) -> Self {
        Self { tag, payloads }
    }

    /// Creates an empty envelope with the given tag.
    pub fn empty(tag: Tag) -> Self {
        Self::new(tag, P::default())
    }

    /// Creates an empty reply carrying the tag of `request`.
    pub fn reply_to(request: &Envelope<P>) -> Self {
        Self::empty(request.tag)
    }

    /// Replaces the payload set.
    pub fn with_payloads(mut self, payloads: P) -> Self {
        self.payloads = payloads;
        self
    }

    /// Applies `f` to the payload set, builder style.
    pub fn with(mut self, f: impl FnOnce(&mut P)) -> Self {
        f(&mut self.payloads);
        self
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn payloads(&self) -> &P {
        &self.payloads
    }

    pub fn payloads_mut(&mut self) -> &mut P {
        &mut self.payloads
    }

    pub fn into_payloads(self) -> P {
        self.payloads
    }

    /// Returns whether no payload slot is populated.
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

/// Slot name taken by the envelope's own tag field.
pub const RESERVED_SLOT: &str = "tag";

/// Returns whether `name` collides with the envelope's tag field.
#[doc(hidden)]
pub const fn is_reserved_slot(name: &str) -> bool {
    let name = name.as_bytes();
    let reserved = RESERVED_SLOT.as_bytes();
    if name.len() != reserved.len() {
        return false;
    }
    let mut i = 0;
    while i < name.len() {
        if name[i] != reserved[i] {
            return false;
        }
        i += 1;
    }
    true
}

/// Reads a slot that is present on the wire.
///
/// A present key always populates the slot, even when the payload itself is
/// encoded as `null` (unit structs, `()`, `Option` payloads). Absent keys
/// fall back to `None` through `#[serde(default)]`.
#[doc(hidden)]
pub fn deserialize_slot<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Declares a [`PayloadSet`] struct from `slot: PayloadType` pairs.
///
/// Each slot becomes an `Option<PayloadType>` field, skipped on the wire
/// when empty. The host crate must depend on `serde` with `derive` and name
/// this crate `tagwire_protocol` in its dependencies.
///
/// A slot may not be named `tag`; that key belongs to the envelope and the
/// declaration fails to compile. Renaming a slot to `tag` with
/// `#[serde(rename)]` is not detected and must be avoided.
///
/// ```ignore
/// payload_set! {
///     pub struct Messages {
///         listing: FileListing,
///         status: Status,
///     }
/// }
/// ```
#[macro_export]
macro_rules! payload_set {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, ::serde::Serialize, ::serde::Deserialize)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                #[serde(
                    default,
                    skip_serializing_if = "Option::is_none",
                    deserialize_with = "tagwire_protocol::envelope::deserialize_slot"
                )]
                pub $field: Option<$ty>,
            )*
        }

        const _: () = {
            $(
                assert!(
                    !$crate::envelope::is_reserved_slot(stringify!($field)),
                    "payload slot `tag` collides with the envelope tag"
                );
            )*
        };

        impl $crate::PayloadSet for $name {
            fn populated(&self) -> Vec<&dyn $crate::Payload> {
                let mut slots: Vec<&dyn $crate::Payload> = Vec::new();
                $(
                    if let Some(payload) = &self.$field {
                        slots.push(payload);
                    }
                )*
                slots
            }
        }
    };
}
