use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Resultado de comparar un snapshot entrante contra la última versión
/// conocida de su clave. Efímero: se produce por comparación.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ChangeVerdict {
    Unchanged,
    /// Campos trackeados que difieren (útil para auditoría).
    Changed { diff_fields: BTreeSet<String> },
    New,
    Removed,
}

impl ChangeVerdict {
    /// true si el veredicto produce operaciones de escritura.
    pub fn requires_write(&self) -> bool {
        !matches!(self, ChangeVerdict::Unchanged)
    }

    /// Etiqueta corta estable para logs y contadores.
    pub fn label(&self) -> &'static str {
        match self {
            ChangeVerdict::Unchanged => "unchanged",
            ChangeVerdict::Changed { .. } => "changed",
            ChangeVerdict::New => "new",
            ChangeVerdict::Removed => "removed",
        }
    }
}
