//! Data types exchanged between the gateway, the object store and HTTP clients.
//!
//! `StoredObject` maps to the metadata table via `sqlx::FromRow`; the DTOs
//! serialize with the PascalCase field names clients already depend on.

pub mod dto;
pub mod stored_object;
