//! Mutations applied by a migrator and their per-document resolution.

use crate::error::{MigrateError, Result, StoreError};
use crate::store::{
    DocumentData, DocumentSnapshot, FieldPatch, FieldPath, FieldValue, Precondition, SetOptions,
};
use std::fmt;
use std::sync::Arc;

/// Field-patch data produced by a derived-update getter.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateData {
    /// Values keyed by dotted field path. Every value is written as is.
    Fields(DocumentData),
    /// Explicit path/value pairs, which may carry deletes.
    Pairs(FieldPatch),
}

impl UpdateData {
    pub fn is_empty(&self) -> bool {
        match self {
            UpdateData::Fields(fields) => fields.is_empty(),
            UpdateData::Pairs(pairs) => pairs.is_empty(),
        }
    }

    pub fn into_patch(self) -> std::result::Result<FieldPatch, StoreError> {
        match self {
            UpdateData::Fields(fields) => fields
                .into_iter()
                .map(|(path, value)| {
                    FieldPath::parse(&path).map(|path| (path, FieldValue::from(value)))
                })
                .collect(),
            UpdateData::Pairs(pairs) => Ok(pairs),
        }
    }
}

impl From<DocumentData> for UpdateData {
    fn from(fields: DocumentData) -> Self {
        UpdateData::Fields(fields)
    }
}

impl From<FieldPatch> for UpdateData {
    fn from(pairs: FieldPatch) -> Self {
        UpdateData::Pairs(pairs)
    }
}

pub(crate) type SetGetter<S> = Arc<dyn Fn(&S) -> DocumentData + Send + Sync>;
pub(crate) type UpdateGetter<S> = Arc<dyn Fn(&S) -> UpdateData + Send + Sync>;

/// Write requested for every document a migration accepts.
pub(crate) enum Mutation<S> {
    Set {
        data: DocumentData,
        options: SetOptions,
    },
    SetDerived {
        get_data: SetGetter<S>,
        options: SetOptions,
    },
    Update {
        patch: FieldPatch,
        precondition: Option<Precondition>,
    },
    UpdateDerived {
        get_data: UpdateGetter<S>,
        precondition: Option<Precondition>,
    },
}

impl<S> Mutation<S> {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Mutation::Set { .. } => "set",
            Mutation::SetDerived { .. } => "set_with_derived_data",
            Mutation::Update { .. } => "update",
            Mutation::UpdateDerived { .. } => "update_with_derived_data",
        }
    }
}

impl<S> fmt::Debug for Mutation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("kind", &self.name())
            .finish_non_exhaustive()
    }
}

/// Concrete write for one document.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DocumentWrite {
    Set {
        data: DocumentData,
        options: SetOptions,
    },
    Update {
        patch: FieldPatch,
        precondition: Option<Precondition>,
    },
}

impl<S: DocumentSnapshot> Mutation<S> {
    /// Update from a map keyed by field path. Rejects empty or malformed input.
    pub(crate) fn update_from_fields(
        data: DocumentData,
        precondition: Option<Precondition>,
    ) -> Result<Self> {
        let patch = UpdateData::Fields(data)
            .into_patch()
            .map_err(|err| MigrateError::InvalidMutation(err.to_string()))?;
        Self::update_from_patch(patch, precondition)
    }

    pub(crate) fn update_from_patch(
        patch: FieldPatch,
        precondition: Option<Precondition>,
    ) -> Result<Self> {
        if patch.is_empty() {
            return Err(MigrateError::InvalidMutation(
                "update data must name at least one field".to_string(),
            ));
        }
        Ok(Mutation::Update {
            patch,
            precondition,
        })
    }

    /// Write for `snapshot`, or `None` when a derived update produced no fields.
    pub(crate) fn resolve(
        &self,
        snapshot: &S,
    ) -> std::result::Result<Option<DocumentWrite>, StoreError> {
        let write = match self {
            Mutation::Set { data, options } => DocumentWrite::Set {
                data: data.clone(),
                options: options.clone(),
            },
            Mutation::SetDerived { get_data, options } => DocumentWrite::Set {
                data: get_data(snapshot),
                options: options.clone(),
            },
            Mutation::Update {
                patch,
                precondition,
            } => DocumentWrite::Update {
                patch: patch.clone(),
                precondition: precondition.clone(),
            },
            Mutation::UpdateDerived {
                get_data,
                precondition,
            } => {
                let data = get_data(snapshot);
                if data.is_empty() {
                    return Ok(None);
                }
                DocumentWrite::Update {
                    patch: data.into_patch()?,
                    precondition: precondition.clone(),
                }
            }
        };
        Ok(Some(write))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemorySnapshot, MemoryStore};
    use crate::store::DocumentRef;
    use serde_json::json;

    async fn snapshot() -> MemorySnapshot {
        let store = MemoryStore::new();
        let doc = store.collection("c").doc("1");
        doc.set(
            json!({"a": 1}).as_object().cloned().unwrap(),
            SetOptions::Overwrite,
        )
        .await
        .unwrap();
        doc.get().unwrap()
    }

    #[test]
    fn test_update_from_fields_parses_paths() {
        let mutation: Mutation<MemorySnapshot> =
            Mutation::update_from_fields(json!({"a.b": 1}).as_object().cloned().unwrap(), None)
                .unwrap();
        match mutation {
            Mutation::Update { patch, .. } => {
                assert_eq!(
                    patch,
                    vec![(FieldPath::parse("a.b").unwrap(), FieldValue::Value(json!(1)))]
                );
            }
            other => panic!("unexpected mutation {other:?}"),
        }
    }

    #[test]
    fn test_update_rejects_empty_and_malformed_data() {
        let empty = Mutation::<MemorySnapshot>::update_from_fields(DocumentData::new(), None);
        assert!(matches!(empty, Err(MigrateError::InvalidMutation(_))));

        let malformed = Mutation::<MemorySnapshot>::update_from_fields(
            json!({"a..b": 1}).as_object().cloned().unwrap(),
            None,
        );
        assert!(matches!(malformed, Err(MigrateError::InvalidMutation(_))));
    }

    #[tokio::test]
    async fn test_empty_derived_update_resolves_to_nothing() {
        let mutation: Mutation<MemorySnapshot> = Mutation::UpdateDerived {
            get_data: Arc::new(|_: &MemorySnapshot| UpdateData::Pairs(Vec::new())),
            precondition: None,
        };
        assert_eq!(mutation.resolve(&snapshot().await).unwrap(), None);
    }

    #[tokio::test]
    async fn test_derived_set_reads_snapshot() {
        let mutation: Mutation<MemorySnapshot> = Mutation::SetDerived {
            get_data: Arc::new(|snapshot: &MemorySnapshot| {
                let mut data = snapshot.data().clone();
                data.insert("copied".to_string(), json!(true));
                data
            }),
            options: SetOptions::Merge,
        };
        let write = mutation.resolve(&snapshot().await).unwrap().unwrap();
        assert_eq!(
            write,
            DocumentWrite::Set {
                data: json!({"a": 1, "copied": true}).as_object().cloned().unwrap(),
                options: SetOptions::Merge,
            }
        );
    }
}
