//! Contratos de registro por tipo de entidad.
//!
//! Un contrato declara la clave de negocio y los campos esperados con su tipo
//! JSON. Un registro que no lo cumple es un error de validación: se pone en
//! cuarentena y el lote continúa.

use chrono::{DateTime, Utc};
use etl_core::EtlError;
use etl_domain::{Attributes, EntitySnapshot};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl FieldType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub ty: FieldType,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordContract {
    entity_type: String,
    key_field: String,
    fields: IndexMap<String, FieldSpec>,
}

impl RecordContract {
    /// Contrato con `key_field` como clave de negocio (entero o string no
    /// vacío). La clave siempre es obligatoria.
    pub fn new(entity_type: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self { entity_type: entity_type.into(),
               key_field: key_field.into(),
               fields: IndexMap::new() }
    }

    pub fn required(mut self, field: impl Into<String>, ty: FieldType) -> Self {
        self.fields.insert(field.into(), FieldSpec { ty, required: true });
        self
    }

    /// Campo opcional: puede faltar o ser `null`, pero si trae valor debe
    /// ser del tipo indicado.
    pub fn optional(mut self, field: impl Into<String>, ty: FieldType) -> Self {
        self.fields.insert(field.into(), FieldSpec { ty, required: false });
        self
    }

    /// Usuarios de GitLab.
    pub fn gitlab_users() -> Self {
        Self::new("gitlab_users", "id").required("id", FieldType::Integer)
                                       .required("username", FieldType::String)
                                       .required("name", FieldType::String)
                                       .required("created_at", FieldType::String)
                                       .optional("state", FieldType::String)
                                       .optional("last_activity_on", FieldType::String)
    }

    /// Proyectos de GitLab.
    pub fn gitlab_projects() -> Self {
        Self::new("gitlab_projects", "id").required("id", FieldType::Integer)
                                          .required("name", FieldType::String)
                                          .required("path_with_namespace", FieldType::String)
                                          .optional("default_branch", FieldType::String)
                                          .optional("archived", FieldType::Bool)
                                          .optional("last_activity_at", FieldType::String)
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// # Errores
    /// `Validation` si el registro no es un objeto, falta un campo
    /// obligatorio (o es `null`) o un campo no tiene el tipo esperado.
    pub fn validate(&self, record: &Value) -> Result<(), EtlError> {
        let obj = record.as_object()
                        .ok_or_else(|| EtlError::Validation(format!("{}: record is not a JSON object", self.entity_type)))?;
        self.business_key(record)?;
        for (field, spec) in &self.fields {
            match obj.get(field) {
                None | Some(Value::Null) if spec.required => {
                    return Err(EtlError::Validation(format!("{}: missing or null required field '{field}'",
                                                            self.entity_type)));
                }
                None | Some(Value::Null) => {}
                Some(v) if !spec.ty.matches(v) => {
                    return Err(EtlError::Validation(format!("{}: field '{field}' expected {:?}",
                                                            self.entity_type, spec.ty)));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Clave de negocio del registro como texto.
    pub fn business_key(&self, record: &Value) -> Result<String, EtlError> {
        match record.get(&self.key_field) {
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
            _ => Err(EtlError::Validation(format!("{}: missing or invalid key field '{}'",
                                                  self.entity_type, self.key_field))),
        }
    }

    /// Valida el registro y lo convierte en snapshot. Los atributos son todos
    /// los campos del objeto salvo la clave, en su orden original.
    pub fn to_snapshot(&self, record: &Value, extracted_at: DateTime<Utc>) -> Result<EntitySnapshot, EtlError> {
        self.validate(record)?;
        let business_key = self.business_key(record)?;
        let attributes: Attributes = record.as_object()
                                           .into_iter()
                                           .flatten()
                                           .filter(|(k, _)| **k != self.key_field)
                                           .map(|(k, v)| (k.clone(), v.clone()))
                                           .collect();
        Ok(EntitySnapshot::new(self.entity_type.clone(), business_key, attributes, extracted_at)?)
    }
}
