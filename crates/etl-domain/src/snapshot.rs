// snapshot.rs
use crate::DomainError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Mapeo ordenado nombre de campo → valor. Conserva el orden de extracción
/// para que los exports y diffs sean estables.
pub type Attributes = IndexMap<String, serde_json::Value>;

/// Entidad de negocio tal como fue extraída en la corrida actual.
///
/// Es transitoria: se produce por corrida y nunca se persiste directamente;
/// lo que se persiste son las `DimensionVersion` derivadas de ella.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    entity_type: String,
    business_key: String,
    attributes: Attributes,
    extracted_at: DateTime<Utc>,
}

impl EntitySnapshot {
    /// Crea un snapshot validando que tipo y clave de negocio no estén vacíos.
    ///
    /// # Errores
    /// Retorna `DomainError::InvalidSnapshot` si `entity_type` o
    /// `business_key` son vacíos (o sólo espacios).
    pub fn new(entity_type: impl Into<String>,
               business_key: impl Into<String>,
               attributes: Attributes,
               extracted_at: DateTime<Utc>)
               -> Result<Self, DomainError> {
        let entity_type = entity_type.into();
        let business_key = business_key.into();
        if entity_type.trim().is_empty() {
            return Err(DomainError::InvalidSnapshot("entity_type vacío".to_string()));
        }
        if business_key.trim().is_empty() {
            return Err(DomainError::InvalidSnapshot(format!("business_key vacío para entidad '{entity_type}'")));
        }
        Ok(Self { entity_type,
                  business_key,
                  attributes,
                  extracted_at })
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn business_key(&self) -> &str {
        &self.business_key
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn extracted_at(&self) -> DateTime<Utc> {
        self.extracted_at
    }

    /// Valor de un atributo puntual (None si el campo no viene en el snapshot).
    pub fn attribute(&self, field: &str) -> Option<&serde_json::Value> {
        self.attributes.get(field)
    }
}
