// version.rs
use crate::{Attributes, DomainError, EntitySnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fin de vigencia de una versión. `Open` es el centinela explícito de la
/// versión vigente (en Postgres se mapea a `valid_to IS NULL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "at", rename_all = "snake_case")]
pub enum ValidTo {
    Open,
    Closed(DateTime<Utc>),
}

impl ValidTo {
    pub fn is_open(&self) -> bool {
        matches!(self, ValidTo::Open)
    }

    /// Timestamp de cierre, None si sigue abierta.
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ValidTo::Open => None,
            ValidTo::Closed(at) => Some(*at),
        }
    }
}

impl From<Option<DateTime<Utc>>> for ValidTo {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        match value {
            Some(at) => ValidTo::Closed(at),
            None => ValidTo::Open,
        }
    }
}

/// Fila historizada (SCD Tipo 2) de una clave de negocio.
///
/// Invariantes que mantiene el propio tipo:
/// - `version_number >= 1`.
/// - `is_current` es verdadero si y sólo si `valid_to` es `Open`.
/// - Si está cerrada, `valid_to > valid_from`.
///
/// Una versión cerrada no se vuelve a editar; la única mutación posible es
/// `closed_at`, que produce una copia cerrada de una versión abierta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionVersion {
    entity_type: String,
    business_key: String,
    version_number: i64,
    attributes: Attributes,
    valid_from: DateTime<Utc>,
    valid_to: ValidTo,
    is_current: bool,
}

impl DimensionVersion {
    /// Primera versión (v1) de una clave observada por primera vez.
    pub fn first(snapshot: &EntitySnapshot, at: DateTime<Utc>) -> Self {
        Self { entity_type: snapshot.entity_type().to_string(),
               business_key: snapshot.business_key().to_string(),
               version_number: 1,
               attributes: snapshot.attributes().clone(),
               valid_from: at,
               valid_to: ValidTo::Open,
               is_current: true }
    }

    /// Versión siguiente a `previous`, abierta desde `at`.
    pub fn successor(previous: &DimensionVersion, snapshot: &EntitySnapshot, at: DateTime<Utc>) -> Self {
        Self { entity_type: previous.entity_type.clone(),
               business_key: previous.business_key.clone(),
               version_number: previous.version_number + 1,
               attributes: snapshot.attributes().clone(),
               valid_from: at,
               valid_to: ValidTo::Open,
               is_current: true }
    }

    /// Reconstruye una versión desde almacenamiento, validando invariantes.
    ///
    /// # Errores
    /// `DomainError::InvalidVersion` si el número es < 1, si `is_current` no
    /// concuerda con `valid_to`, o si el intervalo cerrado no es positivo.
    pub fn from_parts(entity_type: impl Into<String>,
                      business_key: impl Into<String>,
                      version_number: i64,
                      attributes: Attributes,
                      valid_from: DateTime<Utc>,
                      valid_to: ValidTo,
                      is_current: bool)
                      -> Result<Self, DomainError> {
        let business_key = business_key.into();
        if version_number < 1 {
            return Err(DomainError::InvalidVersion { business_key,
                                                     reason: format!("version_number={version_number} < 1") });
        }
        if is_current != valid_to.is_open() {
            return Err(DomainError::InvalidVersion { business_key,
                                                     reason: "is_current no coincide con valid_to".to_string() });
        }
        if let ValidTo::Closed(to) = valid_to {
            if to <= valid_from {
                return Err(DomainError::InvalidVersion { business_key,
                                                         reason: format!("valid_to={to} <= valid_from={valid_from}") });
            }
        }
        Ok(Self { entity_type: entity_type.into(),
                  business_key,
                  version_number,
                  attributes,
                  valid_from,
                  valid_to,
                  is_current })
    }

    /// Copia cerrada de esta versión con `valid_to = at`.
    ///
    /// # Errores
    /// - `AlreadyClosed` si la versión ya no es vigente.
    /// - `NonPositiveInterval` si `at <= valid_from`.
    pub fn closed_at(&self, at: DateTime<Utc>) -> Result<Self, DomainError> {
        if !self.is_current {
            return Err(DomainError::AlreadyClosed { business_key: self.business_key.clone(),
                                                    version_number: self.version_number });
        }
        if at <= self.valid_from {
            return Err(DomainError::NonPositiveInterval { business_key: self.business_key.clone(),
                                                          valid_from: self.valid_from,
                                                          valid_to: at });
        }
        let mut closed = self.clone();
        closed.valid_to = ValidTo::Closed(at);
        closed.is_current = false;
        Ok(closed)
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn business_key(&self) -> &str {
        &self.business_key
    }

    pub fn version_number(&self) -> i64 {
        self.version_number
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn valid_from(&self) -> DateTime<Utc> {
        self.valid_from
    }

    pub fn valid_to(&self) -> ValidTo {
        self.valid_to
    }

    pub fn is_current(&self) -> bool {
        self.is_current
    }
}
