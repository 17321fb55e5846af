use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EtlError;

/// Token opaco de reanudación que devuelve cada step.
///
/// El executor sólo lo persiste y lo entrega de vuelta (al propio step en un
/// reintento o reanudación, y a los steps dependientes). El contenido lo
/// define cada step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(Value);

impl Checkpoint {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn empty() -> Self {
        Self(Value::Null)
    }

    pub fn encode<T: Serialize>(state: &T) -> Result<Self, EtlError> {
        Ok(Self(serde_json::to_value(state)?))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EtlError> {
        Ok(serde_json::from_value(self.0.clone())?)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}
