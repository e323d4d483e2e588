//! Gateway services: persistence, backend integration and the generation pipeline.

pub mod activity_service;
pub mod comfy_client;
pub mod data_store;
pub mod generation_service;
pub mod poller;
pub mod prompt_catalog;
pub mod queue_tracker;
pub mod retention_service;
pub mod user_service;
pub mod workflow_service;
