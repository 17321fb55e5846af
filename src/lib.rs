//! Runner del ETL incremental.
//!
//! - `config`: configuración desde `.env` / variables de entorno.
//! - `logging`: instalación del subscriber de logs.
//! - `runner`: cableado de stores, pipeline demo y reanudación.

pub mod config;
pub mod logging;
pub mod runner;
