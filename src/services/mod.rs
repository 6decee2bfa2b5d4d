pub mod classification;
pub mod gateway_service;
pub mod local_store;
pub mod memory_store;
pub mod object_store;
