use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Three-way update for a single field.
///
/// On the wire an absent key is `Keep`, an explicit `null` is `Clear`, and any
/// other value is `Set`. Containers must mark patch fields with
/// `#[serde(default, skip_serializing_if = "Patch::is_keep")]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Patch<T> {
    /// No change requested.
    #[default]
    Keep,
    /// Reset the field to its empty value.
    Clear,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    pub fn as_ref(&self) -> Patch<&T> {
        match self {
            Patch::Keep => Patch::Keep,
            Patch::Clear => Patch::Clear,
            Patch::Set(v) => Patch::Set(v),
        }
    }

    pub fn set_value(&self) -> Option<&T> {
        match self {
            Patch::Set(v) => Some(v),
            _ => None,
        }
    }
}

impl<T: Clone + Default> Patch<T> {
    /// The value the field would hold after the patch, for non-nullable fields.
    pub fn proposed(&self, current: &T) -> T {
        match self {
            Patch::Keep => current.clone(),
            Patch::Clear => T::default(),
            Patch::Set(v) => v.clone(),
        }
    }
}

impl<T: Clone> Patch<T> {
    /// The value the field would hold after the patch, for nullable fields.
    pub fn proposed_option(&self, current: &Option<T>) -> Option<T> {
        match self {
            Patch::Keep => current.clone(),
            Patch::Clear => None,
            Patch::Set(v) => Some(v.clone()),
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Patch::Set(v),
            None => Patch::Keep,
        }
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            // Keep is skipped by the container; Clear travels as null.
            Patch::Keep | Patch::Clear => serializer.serialize_none(),
            Patch::Set(v) => v.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<T> = Option::deserialize(deserializer)?;
        Ok(match opt {
            None => Patch::Clear,
            Some(v) => Patch::Set(v),
        })
    }
}
