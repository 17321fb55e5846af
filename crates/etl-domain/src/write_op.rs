// write_op.rs
use crate::DimensionVersion;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Tipo de operación de versionado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Close,
    Insert,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Close => "close",
            OperationKind::Insert => "insert",
        }
    }
}

/// Identificador determinista de una operación de escritura.
///
/// Se deriva de `(kind, entity_type, business_key, version_number, at)`, de
/// modo que re-aplicar el mismo veredicto tras un crash produce exactamente
/// los mismos ids y el loader puede descartar duplicados.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn derive(kind: OperationKind,
                  entity_type: &str,
                  business_key: &str,
                  version_number: i64,
                  at: DateTime<Utc>)
                  -> Self {
        let mut hasher = Sha256::new();
        // Separador explícito para evitar colisiones tipo ("a|b","c") vs ("a","b|c")
        for part in [kind.as_str(),
                     entity_type,
                     business_key,
                     &version_number.to_string(),
                     &at.to_rfc3339_opts(SecondsFormat::Nanos, true)]
        {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        OperationId(format!("{:x}", hasher.finalize()))
    }

    /// Reconstruye un id leído de almacenamiento (sin validar formato).
    pub fn from_stored(raw: impl Into<String>) -> Self {
        OperationId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operación de escritura sobre la tabla de versiones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    /// Cierra la versión vigente `version_number` con `valid_to`.
    Close {
        operation_id: OperationId,
        entity_type: String,
        business_key: String,
        version_number: i64,
        valid_to: DateTime<Utc>,
    },
    /// Inserta una nueva versión (siempre abierta).
    Insert { operation_id: OperationId, version: DimensionVersion },
}

impl WriteOp {
    pub fn close(entity_type: &str, business_key: &str, version_number: i64, valid_to: DateTime<Utc>) -> Self {
        WriteOp::Close { operation_id: OperationId::derive(OperationKind::Close,
                                                           entity_type,
                                                           business_key,
                                                           version_number,
                                                           valid_to),
                         entity_type: entity_type.to_string(),
                         business_key: business_key.to_string(),
                         version_number,
                         valid_to }
    }

    pub fn insert(version: DimensionVersion) -> Self {
        let operation_id = OperationId::derive(OperationKind::Insert,
                                               version.entity_type(),
                                               version.business_key(),
                                               version.version_number(),
                                               version.valid_from());
        WriteOp::Insert { operation_id, version }
    }

    pub fn operation_id(&self) -> &OperationId {
        match self {
            WriteOp::Close { operation_id, .. } | WriteOp::Insert { operation_id, .. } => operation_id,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            WriteOp::Close { .. } => OperationKind::Close,
            WriteOp::Insert { .. } => OperationKind::Insert,
        }
    }

    pub fn entity_type(&self) -> &str {
        match self {
            WriteOp::Close { entity_type, .. } => entity_type,
            WriteOp::Insert { version, .. } => version.entity_type(),
        }
    }

    pub fn business_key(&self) -> &str {
        match self {
            WriteOp::Close { business_key, .. } => business_key,
            WriteOp::Insert { version, .. } => version.business_key(),
        }
    }
}

/// Unidad atómica de escritura: el loader aplica todas sus operaciones o
/// ninguna. Un `Changed` produce el par Close+Insert en un mismo batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(ops: Vec<WriteOp>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn operation_ids(&self) -> Vec<&OperationId> {
        self.ops.iter().map(WriteOp::operation_id).collect()
    }

    pub fn inserts(&self) -> impl Iterator<Item = &DimensionVersion> {
        self.ops.iter().filter_map(|op| match op {
                                     WriteOp::Insert { version, .. } => Some(version),
                                     WriteOp::Close { .. } => None,
                                 })
    }

    pub fn closes(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, WriteOp::Close { .. })).count()
    }
}
