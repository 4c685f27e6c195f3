//! Object contracts and references
//!
//! What a type needs to be stored, how live objects are held in a
//! transaction, and how objects refer to each other.

use std::any::{type_name, Any};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, TroveError};
use crate::objects::ObjectId;

use super::Transaction;

// =============================================================================
// Storable Types
// =============================================================================

/// Contract for types stored in a Trove
///
/// Implemented for every `serde` type that is also `Clone + Send + Sync`.
/// Objects refer to each other through [`Ref`], never by owning one another.
pub trait Persistent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Persistent for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Object-safe view of a [`Persistent`] value
pub trait Persisted: Any + Send + Sync {
    /// Serialize the current state
    fn encode(&self) -> Result<Vec<u8>>;

    /// Name of the concrete type
    fn shape(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Persistent> Persisted for T {
    fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    fn shape(&self) -> &'static str {
        type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Serialize a value into its stored form
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| TroveError::Serialization(e.to_string()))
}

/// Restore a value of object `id` from its stored form
pub fn decode<T: DeserializeOwned>(id: ObjectId, bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| TroveError::Restore {
        id,
        reason: format!("as {}: {}", type_name::<T>(), e),
    })
}

// =============================================================================
// Object References
// =============================================================================

/// A transaction's handle on one object: a bare ID until first use, the
/// restored value afterwards
pub enum ObjectRef<T: ?Sized> {
    /// Not yet loaded; only the ID is known
    Proxy(ObjectId),

    /// Restored (or newly created) value owned by the transaction
    Live(ObjectId, Box<T>),
}

impl<T: ?Sized> ObjectRef<T> {
    pub fn id(&self) -> ObjectId {
        match self {
            ObjectRef::Proxy(id) | ObjectRef::Live(id, _) => *id,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ObjectRef::Live(..))
    }

    /// Upgrade a proxy with `load`, then hand out the live value
    ///
    /// Already-live references are returned as they are; `load` is not
    /// called.
    pub fn resolve<F>(&mut self, load: F) -> Result<&mut T>
    where
        F: FnOnce(ObjectId) -> Result<Box<T>>,
    {
        if let ObjectRef::Proxy(id) = *self {
            let value = load(id)?;
            *self = ObjectRef::Live(id, value);
        }

        match self {
            ObjectRef::Live(_, value) => Ok(&mut **value),
            ObjectRef::Proxy(id) => Err(TroveError::InvalidObject(format!(
                "object {} failed to load",
                id
            ))),
        }
    }

    /// Drop back to a proxy, returning the live value if there was one
    pub fn downgrade(&mut self) -> Option<Box<T>> {
        let id = self.id();
        match std::mem::replace(self, ObjectRef::Proxy(id)) {
            ObjectRef::Live(_, value) => Some(value),
            ObjectRef::Proxy(_) => None,
        }
    }
}

impl<T: ?Sized> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Proxy(id) => write!(f, "Proxy({})", id),
            ObjectRef::Live(id, _) => write!(f, "Live({})", id),
        }
    }
}

/// Typed link from one stored object to another
///
/// Serialized as the bare ID, so a graph of objects (cycles included) is a
/// set of blobs holding IDs. Resolve it through a transaction to reach the
/// target.
pub struct Ref<T> {
    id: ObjectId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Ref<T> {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl<T: Persistent> Ref<T> {
    /// Load (if needed) and borrow the target
    pub fn resolve<'t>(&self, txn: &'t mut Transaction) -> Result<&'t T> {
        txn.get(self.id)
    }

    /// Load (if needed) and mutably borrow the target
    pub fn resolve_mut<'t>(&self, txn: &'t mut Transaction) -> Result<&'t mut T> {
        txn.get_mut(self.id)
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ref<T> {}

impl<T> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Ref<T> {}

impl<T> Hash for Ref<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref<{}>({})", type_name::<T>(), self.id)
    }
}

impl<T> Serialize for Ref<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Ref<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        ObjectId::deserialize(deserializer).map(Ref::new)
    }
}
