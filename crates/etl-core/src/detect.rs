//! ChangeDetector: compara el snapshot entrante con la última versión
//! conocida de la clave y produce un `ChangeVerdict`.
//!
//! Es una función pura de sus dos entradas más la configuración de campos
//! rastreados. Los campos no rastreados (contadores volátiles, timestamps de
//! la API) nunca generan versiones nuevas.

use std::collections::BTreeSet;

use etl_domain::{Attributes, ChangeVerdict, DimensionVersion, EntitySnapshot};
use serde::{Deserialize, Serialize};

/// Qué campos participan en la comparación.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "fields", rename_all = "snake_case")]
pub enum TrackedFields {
    /// Todos los campos presentes en cualquiera de los dos lados.
    #[default]
    All,
    /// Sólo los campos listados.
    Only(BTreeSet<String>),
    /// Todos salvo los listados.
    AllExcept(BTreeSet<String>),
}

impl TrackedFields {
    pub fn only<I, S>(fields: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        TrackedFields::Only(fields.into_iter().map(Into::into).collect())
    }

    pub fn all_except<I, S>(fields: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        TrackedFields::AllExcept(fields.into_iter().map(Into::into).collect())
    }

    pub fn is_tracked(&self, field: &str) -> bool {
        match self {
            TrackedFields::All => true,
            TrackedFields::Only(set) => set.contains(field),
            TrackedFields::AllExcept(set) => !set.contains(field),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    tracked: TrackedFields,
}

impl ChangeDetector {
    pub fn new(tracked: TrackedFields) -> Self {
        Self { tracked }
    }

    pub fn tracked(&self) -> &TrackedFields {
        &self.tracked
    }

    /// Veredicto para una clave.
    ///
    /// `incoming = None` significa que la clave no aparece en la extracción
    /// actual. Una versión previa cerrada con snapshot entrante es una
    /// reaparición y se informa como `Changed`.
    pub fn detect(&self, previous: Option<&DimensionVersion>, incoming: Option<&EntitySnapshot>) -> ChangeVerdict {
        match (previous, incoming) {
            (None, Some(_)) => ChangeVerdict::New,
            (None, None) => ChangeVerdict::Unchanged,
            (Some(prev), None) => {
                if prev.is_current() {
                    ChangeVerdict::Removed
                } else {
                    ChangeVerdict::Unchanged
                }
            }
            (Some(prev), Some(snap)) => {
                let diff_fields = self.diff(prev.attributes(), snap.attributes());
                if prev.is_current() && diff_fields.is_empty() {
                    ChangeVerdict::Unchanged
                } else {
                    ChangeVerdict::Changed { diff_fields }
                }
            }
        }
    }

    /// Campos rastreados cuyo valor difiere entre ambos lados. Un campo
    /// ausente en un lado difiere de uno presente (aunque sea `null`).
    pub fn diff(&self, stored: &Attributes, incoming: &Attributes) -> BTreeSet<String> {
        stored.keys()
              .chain(incoming.keys())
              .filter(|field| self.tracked.is_tracked(field))
              .filter(|field| stored.get(*field) != incoming.get(*field))
              .cloned()
              .collect()
    }
}
